//! A small exponential-backoff policy for the node's long-running refresh
//! task: resets on success, doubles up to a cap on repeated failures.

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(100);
const MAX: Duration = Duration::from_secs(10);

pub(crate) struct BackoffPolicy {
    current: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy { current: INITIAL }
    }
}

impl BackoffPolicy {
    pub(crate) fn reset(&mut self) {
        self.current = INITIAL;
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to sleep for, then doubles it (capped) for next time.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = BackoffPolicy::default();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.current(), INITIAL);
    }

    #[test]
    fn caps_at_max() {
        let mut backoff = BackoffPolicy::default();
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.current(), MAX);
    }
}
