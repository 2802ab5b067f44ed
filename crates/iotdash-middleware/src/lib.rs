//! `iotdash-middleware` – the ingestion-and-buffering bridge.
//!
//! Moves telemetry from a publish/subscribe transport running on its own
//! thread into a lock-guarded store that consumers poll at their own pace.
//!
//! # Modules
//!
//! - [`store`] – [`SharedStore`]: bounded per-channel sample buffers, the
//!   debug ring and the connection state behind a single lock.
//! - [`ingest`] – [`IngestionHandler`]: decodes one message and applies it to
//!   the store; never fails outward.
//! - [`transport`] – the [`Transport`] / [`TransportCallbacks`] /
//!   [`TransportFactory`] seam plus [`BrokerConfig`].
//! - [`supervisor`] – [`ConnectionSupervisor`]: idempotent start / stop /
//!   restart of the background receive loop.
//! - [`mqtt`] – [`MqttTransport`]: the `rumqttc`-backed transport.
//!
//! ```text
//! transport thread ──▶ IngestionHandler ──▶ SharedStore ◀── consumers
//!        ▲                                                      │
//!        └──────────── ConnectionSupervisor ◀── start/stop ─────┘
//! ```

pub mod ingest;
pub mod mqtt;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use ingest::{IngestOutcome, IngestionHandler};
pub use mqtt::{MqttTransport, MqttTransportFactory};
pub use store::{ChannelBuffer, ChannelView, SharedStore, StoreSnapshot};
pub use supervisor::{ConnectionSupervisor, StartOutcome, SupervisorState};
pub use transport::{
    BrokerConfig, Credentials, Transport, TransportCallbacks, TransportFactory, TransportMode,
};
