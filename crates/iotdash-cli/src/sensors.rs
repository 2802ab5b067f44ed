//! Simulated sensors feeding `iotdash publish`.

use std::time::{Duration, Instant};

use rand::{Rng, RngCore};

/// A sensor that produces one reading per call.
pub trait Sensor {
    /// Channel name, used as the last topic segment.
    fn channel(&self) -> &'static str;
    /// Value carried in the payload's `type` field.
    fn kind(&self) -> &'static str;
    fn unit(&self) -> &'static str;
    fn read(&mut self, rng: &mut dyn RngCore) -> f64;
}

/// One random-walk step toward the centre of `[low, high]`, clamped to it.
fn bounded_random_walk(
    value: f64,
    low: f64,
    high: f64,
    step: f64,
    jitter: f64,
    rng: &mut dyn RngCore,
) -> f64 {
    let center = (low + high) / 2.0;
    let drift = (center - value) * 0.05;
    let next = value + drift + rng.random_range(-step..=step) + rng.random_range(-jitter..=jitter);
    next.clamp(low, high)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Drifting sensor bounded to a comfort band.
#[derive(Debug, Clone)]
pub struct RandomWalkSensor {
    channel: &'static str,
    kind: &'static str,
    unit: &'static str,
    value: f64,
    low: f64,
    high: f64,
    step: f64,
    jitter: f64,
    decimals: i32,
}

impl RandomWalkSensor {
    /// 20–30 °C, starting at 24 °C.
    pub fn temperature() -> Self {
        Self {
            channel: "temp",
            kind: "temperature",
            unit: "C",
            value: 24.0,
            low: 20.0,
            high: 30.0,
            step: 0.2,
            jitter: 0.05,
            decimals: 2,
        }
    }

    /// 35–75 %, starting at 50 %.
    pub fn humidity() -> Self {
        Self {
            channel: "hum",
            kind: "humidity",
            unit: "%",
            value: 50.0,
            low: 35.0,
            high: 75.0,
            step: 0.3,
            jitter: 0.05,
            decimals: 1,
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }
}

impl Sensor for RandomWalkSensor {
    fn channel(&self) -> &'static str {
        self.channel
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn unit(&self) -> &'static str {
        self.unit
    }

    fn read(&mut self, rng: &mut dyn RngCore) -> f64 {
        self.value = bounded_random_walk(
            self.value,
            self.low,
            self.high,
            self.step,
            self.jitter,
            rng,
        );
        round_to(self.value, self.decimals)
    }
}

/// Reports a far distance most of the time; with probability `p_event` an
/// object "appears" and near readings are reported for `event_len`.
#[derive(Debug, Clone)]
pub struct ProximitySensor {
    far: (f64, f64),
    near: (f64, f64),
    p_event: f64,
    event_len: Duration,
    in_event_until: Option<Instant>,
}

impl Default for ProximitySensor {
    fn default() -> Self {
        Self {
            far: (120.0, 200.0),
            near: (15.0, 40.0),
            p_event: 0.07,
            event_len: Duration::from_millis(2500),
            in_event_until: None,
        }
    }
}

impl ProximitySensor {
    /// Override the detection probability (clamped to `[0, 1]`).
    pub fn with_event_probability(mut self, p_event: f64) -> Self {
        self.p_event = p_event.clamp(0.0, 1.0);
        self
    }

    pub fn in_event(&self, now: Instant) -> bool {
        self.in_event_until.is_some_and(|until| now < until)
    }

    fn read_at(&mut self, now: Instant, rng: &mut dyn RngCore) -> f64 {
        let (low, high) = if self.in_event(now) {
            self.near
        } else if rng.random_bool(self.p_event) {
            self.in_event_until = Some(now + self.event_len);
            self.near
        } else {
            self.far
        };
        round_to(rng.random_range(low..=high), 1)
    }
}

impl Sensor for ProximitySensor {
    fn channel(&self) -> &'static str {
        "prox"
    }

    fn kind(&self) -> &'static str {
        "proximity"
    }

    fn unit(&self) -> &'static str {
        "cm"
    }

    fn read(&mut self, rng: &mut dyn RngCore) -> f64 {
        self.read_at(Instant::now(), rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn random_walk_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for mut sensor in [RandomWalkSensor::temperature(), RandomWalkSensor::humidity()] {
            let (low, high) = sensor.bounds();
            for _ in 0..5_000 {
                let v = sensor.read(&mut rng);
                assert!((low..=high).contains(&v), "{} out of bounds: {v}", sensor.channel());
            }
        }
    }

    #[test]
    fn walk_drifts_back_toward_centre() {
        let mut rng = StdRng::seed_from_u64(1);
        let v = bounded_random_walk(29.9, 20.0, 30.0, 0.0, 0.0, &mut rng);
        assert!(v < 29.9);
    }

    #[test]
    fn readings_are_rounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut hum = RandomWalkSensor::humidity();
        let v = hum.read(&mut rng);
        assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-9);
    }

    #[test]
    fn proximity_without_events_reads_far() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sensor = ProximitySensor::default().with_event_probability(0.0);
        for _ in 0..500 {
            let v = sensor.read(&mut rng);
            assert!((120.0..=200.0).contains(&v));
        }
    }

    #[test]
    fn proximity_event_holds_near_readings() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut sensor = ProximitySensor::default().with_event_probability(1.0);
        let start = Instant::now();
        let first = sensor.read_at(start, &mut rng);
        assert!((15.0..=40.0).contains(&first));
        assert!(sensor.in_event(start + Duration::from_millis(2000)));
        assert!(!sensor.in_event(start + Duration::from_millis(2600)));

        // Still inside the event window even though no new event is drawn.
        sensor.p_event = 0.0;
        let held = sensor.read_at(start + Duration::from_millis(1000), &mut rng);
        assert!((15.0..=40.0).contains(&held));
        let after = sensor.read_at(start + Duration::from_millis(3000), &mut rng);
        assert!((120.0..=200.0).contains(&after));
    }

    #[test]
    fn sensors_publish_on_default_channels() {
        let channels = [
            RandomWalkSensor::temperature().channel(),
            RandomWalkSensor::humidity().channel(),
            ProximitySensor::default().channel(),
        ];
        assert_eq!(channels, iotdash_types::DEFAULT_CHANNELS);
    }
}
