//! `iotdash-cockpit` – the live web dashboard.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8080`) that:
//!
//! 1. **Serves** the single-page dashboard (HTML/CSS/JS) at every
//!    non-WebSocket HTTP path, and the current store frame as JSON at
//!    `GET /api/snapshot`.
//!
//! 2. **Streams** a [`StoreSnapshot`] to every connected browser tab once per
//!    refresh interval. The server only ever reads the [`SharedStore`]; it
//!    never waits on the transport thread.
//!
//! 3. **Accepts** operator commands from the browser as
//!    `{"action": "reconnect" | "disconnect" | "clear"}`, routed to the
//!    [`ConnectionSupervisor`] and the store.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iotdash_middleware::{ConnectionSupervisor, MqttTransportFactory, SharedStore};
//! use iotdash_cockpit::CockpitServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(SharedStore::default());
//!     let supervisor = Arc::new(ConnectionSupervisor::new(store, Arc::new(MqttTransportFactory)));
//!     CockpitServer::new(supervisor)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`StoreSnapshot`]: iotdash_middleware::StoreSnapshot
//! [`SharedStore`]: iotdash_middleware::SharedStore
//! [`ConnectionSupervisor`]: iotdash_middleware::ConnectionSupervisor

pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT, DEFAULT_REFRESH};
