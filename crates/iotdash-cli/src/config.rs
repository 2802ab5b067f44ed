//! Configuration – reads/writes `~/.iotdash/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use iotdash_middleware::transport::DEFAULT_WS_PATH;
use iotdash_middleware::{BrokerConfig, Credentials, TransportMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Publish interval used when the configured one is unusable.
pub const FALLBACK_PUBLISH_INTERVAL_SEC: f64 = 1.0;

/// Errors raised while loading or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Wire protocol used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Tls,
    Websockets,
    Wss,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "tls" | "ssl" => Ok(TransportKind::Tls),
            "websockets" | "websocket" | "ws" => Ok(TransportKind::Websockets),
            "wss" => Ok(TransportKind::Wss),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Tls => write!(f, "tls"),
            TransportKind::Websockets => write!(f, "websockets"),
            TransportKind::Wss => write!(f, "wss"),
        }
    }
}

/// Persisted user configuration stored in `~/.iotdash/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker host name.
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Broker password (stored as plain text; the file is created
    /// owner-only on Unix). Wiped from memory when the config is dropped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Namespace prefix: the dashboard subscribes to `{base_topic}/#` and
    /// the simulator publishes to `{base_topic}/{channel}`.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Seconds between simulated sensor publications.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_sec: f64,

    #[serde(default)]
    pub transport: TransportKind,

    /// WebSocket path, only used by the `websockets` / `wss` transports.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Samples retained per channel.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Debug lines retained in the ring.
    #[serde(default = "default_debug_capacity")]
    pub debug_capacity: usize,

    /// HTTP port of the web cockpit.
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Serve the web cockpit alongside the REPL.
    #[serde(default = "default_true")]
    pub web_enabled: bool,

    /// Redraw cadence of the cockpit and `/watch`, in milliseconds.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("base_topic", &self.base_topic)
            .field("publish_interval_sec", &self.publish_interval_sec)
            .field("transport", &self.transport)
            .field("ws_path", &self.ws_path)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("debug_capacity", &self.debug_capacity)
            .field("web_port", &self.web_port)
            .field("web_enabled", &self.web_enabled)
            .field("refresh_ms", &self.refresh_ms)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

fn default_broker() -> String {
    "broker.emqx.io".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_base_topic() -> String {
    "cursoIoT/demo".to_string()
}
fn default_publish_interval() -> f64 {
    FALLBACK_PUBLISH_INTERVAL_SEC
}
fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}
fn default_buffer_capacity() -> usize {
    iotdash_middleware::store::DEFAULT_BUFFER_CAPACITY
}
fn default_debug_capacity() -> usize {
    iotdash_middleware::store::DEFAULT_DEBUG_CAPACITY
}
fn default_web_port() -> u16 {
    iotdash_cockpit::DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_refresh_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            base_topic: default_base_topic(),
            publish_interval_sec: default_publish_interval(),
            transport: TransportKind::default(),
            ws_path: default_ws_path(),
            buffer_capacity: default_buffer_capacity(),
            debug_capacity: default_debug_capacity(),
            web_port: default_web_port(),
            web_enabled: true,
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl Config {
    /// Translate into the middleware's broker configuration.
    pub fn to_broker_config(&self) -> BrokerConfig {
        let mode = match self.transport {
            TransportKind::Tcp => TransportMode::Tcp,
            TransportKind::Tls => TransportMode::Tls,
            TransportKind::Websockets => TransportMode::WebSocket {
                path: self.ws_path.clone(),
                secure: false,
            },
            TransportKind::Wss => TransportMode::WebSocket {
                path: self.ws_path.clone(),
                secure: true,
            },
        };
        let broker = BrokerConfig::new(&self.broker, self.port, &self.base_topic).with_mode(mode);
        // Credentials are only sent as a pair.
        if self.username.is_empty() || self.password.is_empty() {
            broker
        } else {
            broker.with_credentials(Credentials::new(&self.username, self.password.as_str()))
        }
    }

    /// Publish interval. Values that are not a positive, representable
    /// duration are replaced by [`FALLBACK_PUBLISH_INTERVAL_SEC`].
    pub fn publish_interval(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.publish_interval_sec)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| std::time::Duration::from_secs_f64(FALLBACK_PUBLISH_INTERVAL_SEC))
    }

    pub fn refresh(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.refresh_ms.max(50))
    }
}

/// Return the path to `~/.iotdash/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".iotdash").join("config.toml")
}

/// Resolve the effective configuration: the file when present, otherwise
/// defaults, with `IOTDASH_*` overrides applied on top in both cases.
pub fn load() -> Result<Config, ConfigError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `IOTDASH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `IOTDASH_MQTT_BROKER` | `broker` |
/// | `IOTDASH_MQTT_PORT` | `port` |
/// | `IOTDASH_MQTT_USERNAME` | `username` |
/// | `IOTDASH_MQTT_PASSWORD` | `password` |
/// | `IOTDASH_MQTT_BASE_TOPIC` | `base_topic` |
/// | `IOTDASH_MQTT_TRANSPORT` | `transport` |
/// | `IOTDASH_MQTT_WS_PATH` | `ws_path` |
/// | `IOTDASH_PUBLISH_INTERVAL_SEC` | `publish_interval_sec` |
/// | `IOTDASH_WEB_PORT` | `web_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("IOTDASH_MQTT_BROKER")
        && !v.trim().is_empty()
    {
        cfg.broker = v.trim().to_string();
    }
    if let Some(v) = lookup("IOTDASH_MQTT_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = lookup("IOTDASH_MQTT_USERNAME") {
        cfg.username = v;
    }
    if let Some(v) = lookup("IOTDASH_MQTT_PASSWORD") {
        cfg.password.zeroize();
        cfg.password = v;
    }
    if let Some(v) = lookup("IOTDASH_MQTT_BASE_TOPIC")
        && !v.trim().is_empty()
    {
        cfg.base_topic = v.trim().to_string();
    }
    if let Some(v) = lookup("IOTDASH_MQTT_TRANSPORT")
        && let Ok(kind) = v.parse::<TransportKind>()
    {
        cfg.transport = kind;
    }
    if let Some(v) = lookup("IOTDASH_MQTT_WS_PATH")
        && !v.trim().is_empty()
    {
        cfg.ws_path = v.trim().to_string();
    }
    if let Some(v) = lookup("IOTDASH_PUBLISH_INTERVAL_SEC") {
        cfg.publish_interval_sec = v
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or(FALLBACK_PUBLISH_INTERVAL_SEC);
    }
    if let Some(v) = lookup("IOTDASH_WEB_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.web_port = port;
    }
}

/// Save the config to disk, creating `~/.iotdash/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
