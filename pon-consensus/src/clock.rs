//! Timestamp source

use chrono::Utc;
use std::sync::Mutex;

/// Seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock that never repeats or goes backwards.
///
/// Request ids are derived from timestamps, so two readings must never be equal.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<f64>,
}

/// Smallest step between two readings
const TICK: f64 = 1e-6;

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        let wall = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut reading = wall.max(*last + TICK);
        if reading <= *last {
            // below float resolution of the current epoch, step by one ulp
            reading = f64::from_bits(last.to_bits() + 1);
        }
        *last = reading;
        reading
    }
}
