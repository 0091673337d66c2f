use std::sync::{Arc, Mutex};

use chrono::Utc;

/// Source of wall-clock timestamps (seconds since the epoch) for eventlog
/// entries and drain records.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct MockClock {
    time: Arc<Mutex<f64>>,
}

impl MockClock {
    pub fn new(start: f64) -> Self {
        Self { time: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, time: f64) {
        if let Ok(mut guard) = self.time.lock() {
            *guard = time;
        }
    }

    pub fn advance(&self, seconds: f64) {
        if let Ok(mut guard) = self.time.lock() {
            *guard += seconds;
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        self.time.lock().map(|guard| *guard).unwrap_or_default()
    }
}
