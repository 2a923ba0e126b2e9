//! Exponential reconnect backoff.

use std::time::Duration;

/// Initial handshake timeout and retry delay (2 seconds)
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound of the backoff (1 minute)
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubling backoff with a cap.
///
/// `current()` is both the handshake timeout of the next attempt and the
/// wait before it. After k consecutive failures it equals
/// `min(initial * 2^k, cap)`; a success resets it to `initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        let initial = initial.min(cap);
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Records a failed attempt and returns the wait before the next one.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}
