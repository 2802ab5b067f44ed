//! The transport seam.
//!
//! The bridge never talks to a broker library directly. It drives a
//! [`Transport`] obtained from a [`TransportFactory`] and receives traffic
//! through [`TransportCallbacks`], which the transport invokes synchronously
//! from inside its blocking receive loop.
//!
//! # Overview
//!
//! - [`Transport`] – connect / subscribe / publish / disconnect plus the
//!   blocking receive loop.
//! - [`TransportCallbacks`] – on-connect, on-disconnect and on-message hooks.
//! - [`TransportFactory`] – builds a fresh transport from a [`BrokerConfig`]
//!   each time the supervisor starts.
//! - [`MqttTransport`][crate::mqtt::MqttTransport] – the `rumqttc`-backed
//!   implementation used in production.

use std::sync::Arc;
use std::time::Duration;

use iotdash_types::{DashError, QualityOfService};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Keepalive interval negotiated with the broker.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Path used by brokers that serve MQTT over WebSocket.
pub const DEFAULT_WS_PATH: &str = "/mqtt";

/// Return code reported to `on_disconnect` when the link drops without a
/// clean DISCONNECT.
pub const RC_CONNECTION_LOST: u8 = 7;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// How the transport reaches the broker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportMode {
    /// Plain MQTT over TCP.
    #[default]
    Tcp,
    /// MQTT over TLS using the platform's default root store.
    Tls,
    /// MQTT tunnelled through a WebSocket at `path`.
    WebSocket {
        #[serde(default = "default_ws_path")]
        path: String,
        #[serde(default)]
        secure: bool,
    },
}

fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}

/// Broker credentials. The password is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the supervisor needs to open a session with the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Namespace prefix; the supervisor subscribes to `"{base_topic}/#"`.
    pub base_topic: String,
    pub mode: TransportMode,
    pub client_id: String,
    pub keepalive: Duration,
}

impl BrokerConfig {
    /// Create a plaintext-TCP configuration with a random client id.
    pub fn new(host: impl Into<String>, port: u16, base_topic: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            host: host.into(),
            port,
            credentials: None,
            base_topic: base_topic.into(),
            mode: TransportMode::Tcp,
            client_id: format!("iotdash-{}", &id[..8]),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Wildcard subscription covering the whole base namespace.
    pub fn subscription_pattern(&self) -> String {
        format!("{}/#", self.base_topic.trim_end_matches('/'))
    }

    /// Topic a publisher should use for `channel`.
    pub fn channel_topic(&self, channel: &str) -> String {
        format!("{}/{}", self.base_topic.trim_end_matches('/'), channel)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Traits
// ────────────────────────────────────────────────────────────────────────────

/// A publish/subscribe client.
///
/// # Contract
///
/// * `connect` prepares the session; implementations may defer the network
///   handshake to the receive loop.
/// * `run_receive_loop` blocks the calling thread, invoking `callbacks` for
///   every connection event and message, and returns once the session ends
///   (cleanly after `disconnect`, or with an error).
/// * `disconnect` may be called from any thread and must not wait for the
///   receive loop to exit.
pub trait Transport: Send + Sync {
    fn connect(&self, host: &str, port: u16, keepalive: Duration) -> Result<(), DashError>;

    fn subscribe(&self, pattern: &str, qos: QualityOfService) -> Result<(), DashError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfService) -> Result<(), DashError>;

    fn disconnect(&self) -> Result<(), DashError>;

    fn run_receive_loop(&self, callbacks: &dyn TransportCallbacks) -> Result<(), DashError>;
}

/// Hooks invoked by a [`Transport`] from its receive-loop thread.
///
/// Implementations must not block and must not panic; they run inside the
/// transport's event loop.
pub trait TransportCallbacks: Send + Sync {
    /// `rc == 0` means the broker accepted the connection.
    fn on_connect(&self, transport: &dyn Transport, rc: u8);

    /// `rc == 0` means a requested, clean disconnect.
    fn on_disconnect(&self, rc: u8);

    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Builds a fresh [`Transport`] for each supervisor session.
pub trait TransportFactory: Send + Sync {
    fn build(&self, config: &BrokerConfig) -> Result<Arc<dyn Transport>, DashError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_pattern_appends_wildcard() {
        let cfg = BrokerConfig::new("localhost", 1883, "cursoIoT/demo");
        assert_eq!(cfg.subscription_pattern(), "cursoIoT/demo/#");
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let cfg = BrokerConfig::new("localhost", 1883, "plant/");
        assert_eq!(cfg.subscription_pattern(), "plant/#");
        assert_eq!(cfg.channel_topic("temp"), "plant/temp");
    }

    #[test]
    fn client_ids_are_unique() {
        let a = BrokerConfig::new("localhost", 1883, "x");
        let b = BrokerConfig::new("localhost", 1883, "x");
        assert!(a.client_id.starts_with("iotdash-"));
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("operator", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("operator"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn broker_config_debug_redacts_password() {
        let cfg = BrokerConfig::new("localhost", 1883, "x")
            .with_credentials(Credentials::new("operator", "hunter2"));
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }

    #[test]
    fn websocket_mode_defaults_path() {
        let mode: TransportMode = serde_json::from_str(r#"{"kind":"web_socket"}"#).unwrap();
        assert_eq!(
            mode,
            TransportMode::WebSocket {
                path: "/mqtt".to_string(),
                secure: false
            }
        );
    }
}
