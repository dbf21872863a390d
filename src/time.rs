//! Time sources
//!
//! The appender asks a [`TimeProvider`] for "now" before every write to
//! decide whether the queue has rolled. Tests swap in a [`SetTimeProvider`]
//! to drive rolls deterministically.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds since the Unix epoch
pub trait TimeProvider: Send + Sync + Debug {
    fn current_time_millis(&self) -> i64;
}

/// Reads the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn current_time_millis(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        }
    }
}

/// A manually driven clock
#[derive(Debug, Default)]
pub struct SetTimeProvider {
    millis: AtomicI64,
}

impl SetTimeProvider {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward and return the new value
    pub fn advance(&self, millis: i64) -> i64 {
        self.millis.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl TimeProvider for SetTimeProvider {
    fn current_time_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
