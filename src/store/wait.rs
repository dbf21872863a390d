//! Bounded waiting on shared words
//!
//! Spin (via `crossbeam::utils::Backoff`) while the other side is likely to
//! finish within microseconds, then sleep in short steps until the deadline.
//! Nothing here blocks indefinitely.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::error::{Result, TideError};

const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Poll until `poll` yields a value or `timeout` elapses
///
/// Returns `TideError::Timeout` naming `what` once the deadline passes.
pub(crate) fn wait_for<T>(
    timeout: Duration,
    what: impl FnOnce() -> String,
    mut poll: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    if let Some(value) = poll()? {
        return Ok(value);
    }

    let started = Instant::now();
    let backoff = Backoff::new();
    let mut sleep = Duration::from_micros(10);

    loop {
        if backoff.is_completed() {
            thread::sleep(sleep);
            sleep = (sleep * 2).min(MAX_SLEEP);
        } else {
            backoff.snooze();
        }

        if let Some(value) = poll()? {
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(TideError::Timeout {
                what: what(),
                waited_ms: waited.as_millis() as u64,
            });
        }
    }
}
