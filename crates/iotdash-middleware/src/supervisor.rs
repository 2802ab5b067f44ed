//! [`ConnectionSupervisor`] – owns the transport and its receive-loop thread.
//!
//! ```text
//!            start (thread spawned)
//! Stopped ─────────────────────────▶ Running
//!    ▲                                  │
//!    └─────── stop / loop terminated ───┘
//! ```
//!
//! * `start` is a no-op while a receive loop is alive.
//! * `stop` never waits for the thread: it asks the transport to disconnect
//!   and returns. Disconnect errors are logged, not returned.
//! * `restart` is `stop` followed by `start`. The old thread may still be
//!   unwinding when the new one starts; the store lock keeps buffers
//!   consistent and the session id keeps the old thread from touching the
//!   new connection state.
//!
//! Nothing that happens on the background thread crosses back to the
//! caller. Failures end up in the store's debug ring and connection state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use iotdash_types::{ConnectionState, DashError, DebugRecord, QualityOfService};
use tracing::{debug, error, info, warn};

use crate::ingest::IngestionHandler;
use crate::store::SharedStore;
use crate::transport::{BrokerConfig, Transport, TransportCallbacks, TransportFactory};

/// Name given to the receive-loop thread.
pub const TRANSPORT_THREAD_NAME: &str = "iotdash-transport";

/// Lifecycle of a [`ConnectionSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
}

/// Result of a [`ConnectionSupervisor::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A receive loop was already alive; nothing changed.
    AlreadyRunning,
}

struct ActiveSession {
    transport: Arc<dyn Transport>,
    handle: JoinHandle<()>,
}

struct SupervisorInner {
    state: SupervisorState,
    active: Option<ActiveSession>,
    last_config: Option<BrokerConfig>,
}

/// Starts, stops and restarts the background transport session that feeds
/// a [`SharedStore`].
pub struct ConnectionSupervisor {
    store: Arc<SharedStore>,
    factory: Arc<dyn TransportFactory>,
    inner: Mutex<SupervisorInner>,
}

impl ConnectionSupervisor {
    pub fn new(store: Arc<SharedStore>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            store,
            factory,
            inner: Mutex::new(SupervisorInner {
                state: SupervisorState::Stopped,
                active: None,
                last_config: None,
            }),
        }
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// Current lifecycle state. A session whose thread has already exited
    /// reports [`SupervisorState::Stopped`].
    pub fn state(&self) -> SupervisorState {
        let inner = self.lock();
        match &inner.active {
            Some(active) if !active.handle.is_finished() => inner.state,
            _ => SupervisorState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }

    /// Configuration of the most recent `start`.
    pub fn last_config(&self) -> Option<BrokerConfig> {
        self.lock().last_config.clone()
    }

    /// Build a transport from `config` and spawn its receive loop.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without touching anything if
    /// a loop is still alive.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the transport cannot be built, or
    /// [`DashError::Supervisor`] if the OS refuses to spawn the thread. Both
    /// are also recorded in the debug log.
    pub fn start(&self, config: BrokerConfig) -> Result<StartOutcome, DashError> {
        let mut inner = self.lock();
        if let Some(active) = &inner.active
            && !active.handle.is_finished()
        {
            debug!("start requested while a receive loop is alive; ignoring");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // Whatever is left is a finished thread; dropping the handle is enough.
        inner.active = None;
        inner.last_config = Some(config.clone());

        let transport = match self.factory.build(&config) {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, "failed to build transport");
                self.store.log_event(DebugRecord::lifecycle(
                    "supervisor",
                    format!("transport build failed: {e}"),
                ));
                self.store.set_connection_state(e.connection_state());
                inner.state = SupervisorState::Stopped;
                return Err(e);
            }
        };

        let session = self.store.begin_session();
        let worker = SessionWorker {
            store: Arc::clone(&self.store),
            handler: IngestionHandler::new(Arc::clone(&self.store)),
            session,
            subscription: config.subscription_pattern(),
        };
        let worker_transport = Arc::clone(&transport);
        let spawned = thread::Builder::new()
            .name(TRANSPORT_THREAD_NAME.to_string())
            .spawn(move || worker.run(worker_transport.as_ref(), &config));

        match spawned {
            Ok(handle) => {
                inner.active = Some(ActiveSession { transport, handle });
                inner.state = SupervisorState::Running;
                info!(session, "transport session started");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                error!(error = %e, "failed to spawn transport thread");
                let err = DashError::Supervisor(format!("thread spawn failed: {e}"));
                self.store
                    .log_event(DebugRecord::lifecycle("supervisor", err.to_string()));
                self.store.set_session_state(session, err.connection_state());
                inner.state = SupervisorState::Stopped;
                Err(err)
            }
        }
    }

    /// Ask the running session to disconnect and forget it.
    ///
    /// Returns immediately; the background thread exits on its own once the
    /// transport unblocks. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let active = {
            let mut inner = self.lock();
            inner.state = SupervisorState::Stopped;
            inner.active.take()
        };
        // Close the session first so late callbacks from the old thread
        // cannot flip the state back.
        self.store.end_session();

        let Some(active) = active else {
            debug!("stop requested with no active session");
            return;
        };
        if let Err(e) = active.transport.disconnect() {
            warn!(error = %e, "disconnect failed during stop");
            self.store
                .log_event(DebugRecord::lifecycle("supervisor", format!("disconnect failed: {e}")));
        }
        self.store
            .log_event(DebugRecord::lifecycle("supervisor", "stopped"));
        info!("transport session stopped");
        // Dropping the handle detaches the thread.
        drop(active.handle);
    }

    /// `stop` followed by `start(config)`.
    pub fn restart(&self, config: BrokerConfig) -> Result<StartOutcome, DashError> {
        self.stop();
        self.start(config)
    }

    /// Restart with the configuration of the previous `start`.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Supervisor`] if the supervisor was never started.
    pub fn reconnect(&self) -> Result<StartOutcome, DashError> {
        let config = self.last_config().ok_or_else(|| {
            DashError::Supervisor("no previous configuration to reconnect with".to_string())
        })?;
        self.restart(config)
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background session
// ────────────────────────────────────────────────────────────────────────────

/// State moved onto the transport thread. Holds nothing but the store, so
/// the callbacks cannot reach any consumer-owned state.
struct SessionWorker {
    store: Arc<SharedStore>,
    handler: IngestionHandler,
    session: u64,
    subscription: String,
}

impl SessionWorker {
    fn run(self, transport: &dyn Transport, config: &BrokerConfig) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            transport
                .connect(&config.host, config.port, config.keepalive)
                .and_then(|()| transport.run_receive_loop(&self))
        }));

        match outcome {
            Ok(Ok(())) => {
                debug!(session = self.session, "receive loop exited");
                self.store
                    .log_event(DebugRecord::lifecycle("transport-thread", "receive loop exited"));
            }
            Ok(Err(e)) => {
                error!(session = self.session, error = %e, "receive loop failed");
                self.store
                    .log_event(DebugRecord::lifecycle("transport-thread", e.to_string()));
                self.store.set_session_state(self.session, e.connection_state());
            }
            Err(_) => {
                error!(session = self.session, "receive loop panicked");
                self.store
                    .log_event(DebugRecord::lifecycle("transport-thread", "receive loop panicked"));
                self.store
                    .set_session_state(self.session, ConnectionState::Error(None));
            }
        }
    }
}

impl TransportCallbacks for SessionWorker {
    fn on_connect(&self, transport: &dyn Transport, rc: u8) {
        self.store
            .log_event(DebugRecord::lifecycle("on_connect", format!("rc={rc}")));
        if rc != 0 {
            warn!(rc, "broker refused connection");
            self.store
                .set_session_state(self.session, ConnectionState::Error(Some(rc)));
            return;
        }
        self.store
            .set_session_state(self.session, ConnectionState::Connected);
        info!(pattern = %self.subscription, "connected; subscribing");
        match transport.subscribe(&self.subscription, QualityOfService::AtLeastOnce) {
            Ok(()) => self.store.log_event(DebugRecord::lifecycle(
                "subscribe",
                format!("{} qos=1", self.subscription),
            )),
            Err(e) => {
                warn!(error = %e, "subscribe failed");
                self.store
                    .log_event(DebugRecord::lifecycle("subscribe", format!("failed: {e}")));
            }
        }
    }

    fn on_disconnect(&self, rc: u8) {
        info!(rc, "disconnected");
        self.store
            .set_session_state(self.session, ConnectionState::Disconnected);
        self.store
            .log_event(DebugRecord::lifecycle("on_disconnect", format!("rc={rc}")));
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        let ingested =
            panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(topic, payload)));
        if ingested.is_err() {
            error!(topic, "ingestion panicked");
            self.store
                .log_event(DebugRecord::parse_error(topic, "ingestion panicked"));
        }
    }
}
