//! `iotdash publish` – simulated sensor publisher.
//!
//! Publishes one JSON reading per sensor to `{base}/{channel}` every
//! interval, over the same [`Transport`] the dashboard consumes from.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use iotdash_middleware::{BrokerConfig, Transport, TransportCallbacks, TransportFactory};
use iotdash_types::{DashError, QualityOfService};
use rand::RngCore;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::sensors::{ProximitySensor, RandomWalkSensor, Sensor};

/// Build the wire payload for one reading.
pub fn payload(sensor: &dyn Sensor, value: f64, t: f64) -> Value {
    json!({
        "t": t,
        "type": sensor.kind(),
        "unit": sensor.unit(),
        "value": value,
    })
}

/// Seconds since the Unix epoch with millisecond resolution.
fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub struct Publisher {
    config: BrokerConfig,
    sensors: Vec<Box<dyn Sensor + Send>>,
}

impl Publisher {
    /// A publisher with the three default sensors.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            sensors: vec![
                Box::new(RandomWalkSensor::temperature()),
                Box::new(RandomWalkSensor::humidity()),
                Box::new(ProximitySensor::default()),
            ],
        }
    }

    /// Read every sensor once and publish the readings. Returns how many
    /// messages were handed to the transport.
    pub fn publish_once(
        &mut self,
        transport: &dyn Transport,
        rng: &mut dyn RngCore,
    ) -> Result<usize, DashError> {
        let t = unix_seconds();
        let mut sent = 0;
        for sensor in &mut self.sensors {
            let value = sensor.read(rng);
            let topic = self.config.channel_topic(sensor.channel());
            let body = serde_json::to_vec(&payload(&**sensor, value, t))
                .map_err(|e| DashError::Serialization(e.to_string()))?;
            transport.publish(&topic, &body, QualityOfService::AtLeastOnce)?;
            debug!(topic = %topic, value, "reading published");
            sent += 1;
        }
        Ok(sent)
    }

    /// Connect, then publish every `interval` until `shutdown` is set or the
    /// link drops.
    pub fn run(
        mut self,
        factory: &dyn TransportFactory,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), DashError> {
        let transport = factory.build(&self.config)?;
        transport.connect(&self.config.host, self.config.port, self.config.keepalive)?;

        let link = Arc::new(LinkMonitor::default());
        let loop_transport = Arc::clone(&transport);
        let loop_link = Arc::clone(&link);
        let receiver = thread::Builder::new()
            .name("iotdash-publisher".to_string())
            .spawn(move || {
                if let Err(e) = loop_transport.run_receive_loop(loop_link.as_ref()) {
                    warn!(error = %e, "publisher link ended");
                }
                loop_link.closed.store(true, Ordering::SeqCst);
            })
            .map_err(|e| DashError::Transport(format!("failed to spawn publisher thread: {e}")))?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            base = %self.config.base_topic,
            interval_ms = interval.as_millis() as u64,
            "publisher started"
        );

        let mut rng = rand::rng();
        let mut result = Ok(());
        while !shutdown.load(Ordering::SeqCst) {
            if link.closed.load(Ordering::SeqCst) {
                result = Err(DashError::Transport("broker link closed".to_string()));
                break;
            }
            let tick = Instant::now();
            if let Err(e) = self.publish_once(transport.as_ref(), &mut rng) {
                result = Err(e);
                break;
            }
            sleep_until(tick.checked_add(interval), || {
                shutdown.load(Ordering::SeqCst) || link.closed.load(Ordering::SeqCst)
            });
        }

        if let Err(e) = transport.disconnect() {
            debug!(error = %e, "publisher disconnect failed");
        }
        let _ = receiver.join();
        info!("publisher stopped");
        result
    }
}

/// Sleep in short slices until `deadline` or until `interrupted` reports
/// true. A `None` deadline (past what `Instant` can represent) only ends on
/// interruption.
fn sleep_until(deadline: Option<Instant>, interrupted: impl Fn() -> bool) {
    const SLICE: Duration = Duration::from_millis(100);
    loop {
        if interrupted() {
            return;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => SLICE,
        };
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(SLICE));
    }
}

#[derive(Default)]
struct LinkMonitor {
    closed: AtomicBool,
}

impl TransportCallbacks for LinkMonitor {
    fn on_connect(&self, _transport: &dyn Transport, rc: u8) {
        if rc == 0 {
            info!("publisher connected");
        } else {
            warn!(rc, "publisher connection refused");
        }
    }

    fn on_disconnect(&self, rc: u8) {
        info!(rc, "publisher disconnected");
    }

    fn on_message(&self, _topic: &str, _payload: &[u8]) {}
}
