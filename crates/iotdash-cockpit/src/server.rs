//! [`CockpitServer`] – HTTP + WebSocket server for the live dashboard.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * `GET /api/snapshot` → the current [`StoreSnapshot`] as JSON.
//! * Any other plain HTTP request → 200 OK with the embedded dashboard HTML.
//! * WebSocket upgrades → a snapshot frame every refresh interval, plus
//!   operator commands from the browser.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use iotdash_middleware::{ConnectionSupervisor, StoreSnapshot};
use iotdash_types::{DashError, DebugRecord};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Default TCP port for the cockpit HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default interval between snapshot frames pushed to each browser.
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(1000);

/// Debug lines included in every frame.
pub const DEBUG_LINES_PER_FRAME: usize = 50;

/// The compiled-in dashboard page (HTML + CSS + JS).
const COCKPIT_HTML: &str = include_str!("cockpit.html");

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Frames sent from the server to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Downstream<'a> {
    Snapshot { data: &'a StoreSnapshot },
    Ack { action: &'a str, ok: bool, detail: String },
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Serves the dashboard and streams store snapshots to every connected
/// browser. It is a pure consumer: it reads the store on its own cadence
/// and only reaches the transport through the supervisor's start / stop
/// operations.
pub struct CockpitServer {
    supervisor: Arc<ConnectionSupervisor>,
    port: u16,
    refresh: Duration,
}

impl CockpitServer {
    /// Create a server backed by `supervisor` on the [`DEFAULT_PORT`].
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            supervisor,
            port: DEFAULT_PORT,
            refresh: DEFAULT_REFRESH,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the snapshot push interval (builder-style). Values below
    /// 50 ms are raised to 50 ms.
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh.max(Duration::from_millis(50));
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    /// Bind `0.0.0.0:{port}` and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Transport`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), DashError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DashError::Transport(format!("cockpit bind error on {addr}: {e}")))?;
        info!(port = self.port, "cockpit listening on http://localhost:{}", self.port);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), DashError> {
        let shared = Arc::new(self);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            warn!(peer = %peer, error = %e, "cockpit client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "cockpit accept error");
                }
            }
        }
    }

    fn frame(&self) -> StoreSnapshot {
        self.supervisor.store().frame(DEBUG_LINES_PER_FRAME)
    }

    // -----------------------------------------------------------------------
    // Per-connection handler
    // -----------------------------------------------------------------------

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), DashError> {
        // Peek so tungstenite's handshaker still sees the full request.
        let mut buf = [0u8; 1024];
        let n = stream
            .peek(&mut buf)
            .await
            .map_err(|e| DashError::Transport(format!("peek error from {peer}: {e}")))?;

        let head = String::from_utf8_lossy(&buf[..n]);
        let is_ws_upgrade = head.lines().any(|line| {
            let line = line.to_lowercase();
            line.starts_with("upgrade:") && line.contains("websocket")
        });

        if is_ws_upgrade {
            self.handle_ws(stream, peer).await
        } else {
            let wants_snapshot = head
                .lines()
                .next()
                .is_some_and(|request_line| request_line.starts_with("GET /api/snapshot"));
            self.serve_http(stream, wants_snapshot).await
        }
    }

    async fn serve_http(
        &self,
        mut stream: TcpStream,
        wants_snapshot: bool,
    ) -> Result<(), DashError> {
        // Drain what the client already sent so closing does not reset it.
        let mut sink = [0u8; 1024];
        let _ = stream.read(&mut sink).await;

        let (content_type, body) = if wants_snapshot {
            let json = serde_json::to_string(&self.frame())
                .map_err(|e| DashError::Serialization(e.to_string()))?;
            ("application/json", json)
        } else {
            ("text/html; charset=utf-8", COCKPIT_HTML.to_string())
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Cache-Control: no-store\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            content_type,
            body.len(),
            body
        );
        stream
            .write_all(response.as_bytes())
            .await
            .map_err(|e| DashError::Transport(format!("HTTP write error: {e}")))?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    async fn handle_ws(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), DashError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| DashError::Transport(format!("WS handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "cockpit websocket opened");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut ticker = tokio::time::interval(self.refresh);

        loop {
            tokio::select! {
                // ── Downstream: store snapshot → browser ───────────────────
                _ = ticker.tick() => {
                    let frame = self.frame();
                    match serde_json::to_string(&Downstream::Snapshot { data: &frame }) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!(error = %e, "snapshot serialization error"),
                    }
                }
                // ── Upstream: browser → supervisor ─────────────────────────
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(ack) = handle_command(text.as_str(), &self.supervisor)
                                && let Ok(json) = serde_json::to_string(&ack.as_downstream())
                                && ws_tx.send(Message::Text(json.into())).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "cockpit websocket closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operator commands
// ---------------------------------------------------------------------------

/// Result of an operator command, echoed back to the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub action: String,
    pub ok: bool,
    pub detail: String,
}

impl CommandAck {
    fn as_downstream(&self) -> Downstream<'_> {
        Downstream::Ack {
            action: &self.action,
            ok: self.ok,
            detail: self.detail.clone(),
        }
    }
}

/// Apply an operator command sent by the browser.
///
/// | `action` | Effect |
/// |---|---|
/// | `reconnect` | [`ConnectionSupervisor::reconnect`] |
/// | `disconnect` | [`ConnectionSupervisor::stop`] |
/// | `clear` | [`SharedStore::clear_all`][iotdash_middleware::SharedStore::clear_all] |
///
/// Unknown actions and malformed JSON are ignored (`None`).
pub(crate) fn handle_command(text: &str, supervisor: &ConnectionSupervisor) -> Option<CommandAck> {
    let json: Value = serde_json::from_str(text).ok()?;
    let action = json.get("action").and_then(Value::as_str)?;

    let (ok, detail) = match action {
        "reconnect" => match supervisor.reconnect() {
            Ok(outcome) => (true, format!("{outcome:?}")),
            Err(e) => (false, e.to_string()),
        },
        "disconnect" => {
            supervisor.stop();
            (true, "client stopped".to_string())
        }
        "clear" => {
            supervisor.store().clear_all();
            supervisor
                .store()
                .log_event(DebugRecord::lifecycle("cockpit", "buffers cleared"));
            (true, "buffers cleared".to_string())
        }
        _ => return None,
    };
    info!(action, ok, "cockpit command");
    Some(CommandAck {
        action: action.to_string(),
        ok,
        detail,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use iotdash_middleware::{MqttTransportFactory, SharedStore, SupervisorState};

    fn make_supervisor() -> Arc<ConnectionSupervisor> {
        let store = Arc::new(SharedStore::default());
        Arc::new(ConnectionSupervisor::new(store, Arc::new(MqttTransportFactory)))
    }

    // ── CockpitServer constructor ─────────────────────────────────────────────

    #[test]
    fn default_port_is_8080() {
        let server = CockpitServer::new(make_supervisor());
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.refresh(), DEFAULT_REFRESH);
    }

    #[test]
    fn with_port_overrides_default() {
        let server = CockpitServer::new(make_supervisor()).with_port(9999);
        assert_eq!(server.port(), 9999);
    }

    #[test]
    fn refresh_has_a_floor() {
        let server = CockpitServer::new(make_supervisor()).with_refresh(Duration::from_millis(1));
        assert_eq!(server.refresh(), Duration::from_millis(50));
    }

    // ── Operator commands ─────────────────────────────────────────────────────

    #[test]
    fn clear_command_empties_buffers() {
        let supervisor = make_supervisor();
        supervisor.store().append("temp", 22.0);

        let ack = handle_command(r#"{"action":"clear"}"#, &supervisor).unwrap();
        assert!(ack.ok);
        assert_eq!(supervisor.store().latest("temp"), None);
    }

    #[test]
    fn disconnect_command_without_session_is_ok() {
        let supervisor = make_supervisor();
        let ack = handle_command(r#"{"action":"disconnect"}"#, &supervisor).unwrap();
        assert!(ack.ok);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn reconnect_before_any_start_reports_failure() {
        let supervisor = make_supervisor();
        let ack = handle_command(r#"{"action":"reconnect"}"#, &supervisor).unwrap();
        assert!(!ack.ok);
        assert_eq!(ack.action, "reconnect");
    }

    #[test]
    fn unknown_or_invalid_commands_are_ignored() {
        let supervisor = make_supervisor();
        assert!(handle_command(r#"{"action":"self_destruct"}"#, &supervisor).is_none());
        assert!(handle_command(r#"{"op":"subscribe"}"#, &supervisor).is_none());
        assert!(handle_command("not json at all", &supervisor).is_none());
    }

    #[test]
    fn ack_serializes_with_op_tag() {
        let ack = CommandAck {
            action: "clear".to_string(),
            ok: true,
            detail: "buffers cleared".to_string(),
        };
        let json = serde_json::to_string(&ack.as_downstream()).unwrap();
        assert!(json.contains(r#""op":"ack""#));
        assert!(json.contains(r#""action":"clear""#));
    }

    #[test]
    fn snapshot_frame_serializes_channels_and_state() {
        let supervisor = make_supervisor();
        supervisor.store().append("hum", 55.0);
        let frame = supervisor.store().frame(DEBUG_LINES_PER_FRAME);
        let json = serde_json::to_string(&Downstream::Snapshot { data: &frame }).unwrap();
        assert!(json.contains(r#""op":"snapshot""#));
        assert!(json.contains(r#""name":"hum""#));
        assert!(json.contains(r#""state":"disconnected""#));
    }

    // ── HTTP ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn http_snapshot_endpoint_returns_json() {
        let supervisor = make_supervisor();
        supervisor.store().append("temp", 23.5);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(CockpitServer::new(Arc::clone(&supervisor)).serve(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/snapshot HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("application/json"));
        assert!(response.contains("23.5"));
    }

    #[tokio::test]
    async fn http_root_serves_dashboard_html() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(CockpitServer::new(make_supervisor()).serve(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.contains("text/html"));
        assert!(response.contains("<canvas"));
    }

    // ── HTML embedding ────────────────────────────────────────────────────────

    #[test]
    fn cockpit_html_contains_websocket_connect_code() {
        assert!(COCKPIT_HTML.contains("WebSocket"));
    }

    #[test]
    fn cockpit_html_exposes_operator_actions() {
        for action in ["reconnect", "disconnect", "clear"] {
            assert!(COCKPIT_HTML.contains(action), "missing action {action}");
        }
    }
}
