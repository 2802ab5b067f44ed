//! MQTT transport built on the synchronous `rumqttc` client.
//!
//! `rumqttc` splits a session into a [`Client`] handle (requests) and a
//! [`Connection`] (the event loop). [`MqttTransport::connect`] creates both;
//! [`MqttTransport::run_receive_loop`] drives the connection on the calling
//! thread and maps its notifications onto [`TransportCallbacks`]. Requests
//! issued from callbacks use the non-blocking `try_*` variants because the
//! request queue is drained by that same thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use iotdash_types::{DashError, QualityOfService};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet,
    QoS,
};
use tracing::{debug, info, warn};

use crate::transport::{
    BrokerConfig, RC_CONNECTION_LOST, Transport, TransportCallbacks, TransportFactory,
    TransportMode,
};

/// Capacity of the client → event-loop request queue.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Largest packet accepted or sent. An oversized incoming PUBLISH ends the
/// session, so this is raised from `rumqttc`'s 10 KiB default.
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// [`Transport`] implementation speaking MQTT 3.1.1 through `rumqttc`.
pub struct MqttTransport {
    config: BrokerConfig,
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<Connection>>,
    stopping: AtomicBool,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            connection: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    /// Build the `rumqttc` options for `host:port` according to the
    /// configured transport mode and credentials.
    pub(crate) fn options(&self, host: &str, port: u16, keepalive: Duration) -> MqttOptions {
        let broker = match &self.config.mode {
            TransportMode::WebSocket { path, secure } => {
                let scheme = if *secure { "wss" } else { "ws" };
                format!("{scheme}://{host}:{port}{path}")
            }
            TransportMode::Tcp | TransportMode::Tls => host.to_string(),
        };
        let mut options = MqttOptions::new(self.config.client_id.clone(), broker, port);
        options.set_keep_alive(keepalive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(creds) = &self.config.credentials {
            options.set_credentials(creds.username.clone(), creds.password.clone());
        }
        match &self.config.mode {
            TransportMode::Tcp => {}
            TransportMode::Tls => {
                options.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            TransportMode::WebSocket { secure: false, .. } => {
                options.set_transport(rumqttc::Transport::Ws);
            }
            TransportMode::WebSocket { secure: true, .. } => {
                options.set_transport(rumqttc::Transport::wss_with_default_config());
            }
        }
        options
    }

    fn client(&self) -> Result<Client, DashError> {
        lock(&self.client)
            .clone()
            .ok_or_else(|| DashError::Transport("not connected".to_string()))
    }
}

impl Transport for MqttTransport {
    fn connect(&self, host: &str, port: u16, keepalive: Duration) -> Result<(), DashError> {
        // The client slot doubles as the guard between `connect` and
        // `disconnect`: whichever takes it first wins.
        let mut slot = lock(&self.client);
        if self.stopping.load(Ordering::SeqCst) {
            return Err(DashError::Transport("disconnect requested before connect".to_string()));
        }
        let (client, connection) =
            Client::new(self.options(host, port, keepalive), REQUEST_QUEUE_CAPACITY);
        *slot = Some(client);
        *lock(&self.connection) = Some(connection);
        info!(host, port, client_id = %self.config.client_id, "mqtt session prepared");
        Ok(())
    }

    fn subscribe(&self, pattern: &str, qos: QualityOfService) -> Result<(), DashError> {
        self.client()?
            .try_subscribe(pattern, to_qos(qos))
            .map_err(|e| DashError::Transport(format!("subscribe {pattern}: {e}")))
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfService) -> Result<(), DashError> {
        self.client()?
            .publish(topic, to_qos(qos), false, payload.to_vec())
            .map_err(|e| DashError::Transport(format!("publish {topic}: {e}")))
    }

    fn disconnect(&self) -> Result<(), DashError> {
        let slot = lock(&self.client);
        self.stopping.store(true, Ordering::SeqCst);
        slot.as_ref()
            .ok_or_else(|| DashError::Transport("not connected".to_string()))?
            .try_disconnect()
            .map_err(|e| DashError::Transport(format!("disconnect: {e}")))
    }

    fn run_receive_loop(&self, callbacks: &dyn TransportCallbacks) -> Result<(), DashError> {
        let mut connection = lock(&self.connection).take().ok_or_else(|| {
            DashError::Transport("receive loop started before connect".to_string())
        })?;

        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    callbacks.on_connect(self, return_code(ack.code));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    callbacks.on_message(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    callbacks.on_disconnect(RC_CONNECTION_LOST);
                    return Err(DashError::Transport("broker closed the session".to_string()));
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("disconnect sent; leaving receive loop");
                    callbacks.on_disconnect(0);
                    return Ok(());
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    let rc = return_code(code);
                    callbacks.on_connect(self, rc);
                    return Err(DashError::ConnectionRefused(rc));
                }
                Err(e) if self.stopping.load(Ordering::SeqCst) => {
                    debug!(error = %e, "connection closed after stop request");
                    callbacks.on_disconnect(0);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "mqtt connection error");
                    callbacks.on_disconnect(RC_CONNECTION_LOST);
                    return Err(DashError::Transport(e.to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Produces a fresh [`MqttTransport`] per supervisor session.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttTransportFactory;

impl TransportFactory for MqttTransportFactory {
    fn build(&self, config: &BrokerConfig) -> Result<Arc<dyn Transport>, DashError> {
        if config.host.trim().is_empty() {
            return Err(DashError::Transport("broker host is empty".to_string()));
        }
        Ok(Arc::new(MqttTransport::new(config.clone())))
    }
}

fn to_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// MQTT 3.1.1 CONNACK return code.
fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
