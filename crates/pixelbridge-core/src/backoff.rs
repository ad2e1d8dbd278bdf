//! Reconnect backoff policy.

use std::time::Duration;

/// Default first reconnect delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default reconnect delay ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential reconnect delay: starts at the floor, doubles after every
/// failed attempt, and is capped at the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    /// Create a backoff with the given floor and ceiling.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Create a backoff from millisecond settings.
    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    /// Delay to wait before the next attempt, advancing the policy.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Return to the floor after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_to_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_ceiling_below_floor_is_raised() {
        let mut backoff = Backoff::from_millis(500, 100);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
