//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling delay from `base` up to `cap`, reset on every successful session.
///
/// ```rust
/// use std::time::Duration;
/// use rembraille_client::infrastructure::network::Backoff;
///
/// let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// A `base` larger than `cap` is clamped to `cap`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.min(cap);
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Returns the delay to wait now and doubles the next one, saturating at the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.cap, |d| d.min(self.cap));
        delay
    }

    /// Restores the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) returns.
    pub fn peek(&self) -> Duration {
        self.current
    }
}
