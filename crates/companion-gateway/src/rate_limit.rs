use std::time::{Duration, Instant};

/// Sliding window over sends in the last 10 seconds.
pub const MESSAGE_RATE_WINDOW: Duration = Duration::from_secs(10);
/// Sends admitted per window.
pub const MESSAGE_RATE_LIMIT: usize = 30;
/// Hard cap on retained history.
const MESSAGE_HISTORY_CAPACITY: usize = 64;

/// Per-session anti-spam window. Owned by the reader pump, so it needs no
/// synchronization.
#[derive(Debug)]
pub struct MessageRateLimiter {
    history: Vec<Instant>,
    window: Duration,
    limit: usize,
}

impl MessageRateLimiter {
    pub fn new() -> Self {
        Self::with_window(MESSAGE_RATE_WINDOW, MESSAGE_RATE_LIMIT)
    }

    fn with_window(window: Duration, limit: usize) -> Self {
        Self {
            history: Vec::with_capacity(limit.min(MESSAGE_HISTORY_CAPACITY)),
            window,
            limit,
        }
    }

    /// Compact the window and decide whether a send at `now` is admitted.
    pub fn allow(&mut self, now: Instant) -> bool {
        let cutoff = now.checked_sub(self.window);
        self.history.retain(|ts| match cutoff {
            Some(cutoff) => *ts > cutoff,
            None => true,
        });

        if self.history.len() >= self.limit {
            return false;
        }

        self.history.push(now);
        if self.history.len() > MESSAGE_HISTORY_CAPACITY {
            let overflow = self.history.len() - MESSAGE_HISTORY_CAPACITY;
            self.history.drain(..overflow);
        }
        true
    }
}

impl Default for MessageRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_exactly_the_limit_within_one_window() {
        let mut limiter = MessageRateLimiter::new();
        let start = Instant::now();

        for i in 0..MESSAGE_RATE_LIMIT {
            assert!(
                limiter.allow(start + Duration::from_millis(i as u64)),
                "send {i} should be admitted"
            );
        }
        assert!(!limiter.allow(start + Duration::from_millis(500)));
    }

    #[test]
    fn readmits_after_the_oldest_entry_expires() {
        let mut limiter = MessageRateLimiter::new();
        let start = Instant::now();

        for _ in 0..MESSAGE_RATE_LIMIT {
            assert!(limiter.allow(start));
        }
        assert!(!limiter.allow(start + Duration::from_secs(1)));

        // Just past the window measured from the oldest send.
        let after_window = start + MESSAGE_RATE_WINDOW + Duration::from_millis(1);
        assert!(limiter.allow(after_window));
    }

    #[test]
    fn denied_sends_do_not_consume_window_slots() {
        let mut limiter = MessageRateLimiter::with_window(Duration::from_secs(10), 2);
        let start = Instant::now();

        assert!(limiter.allow(start));
        assert!(limiter.allow(start));
        assert!(!limiter.allow(start));
        assert!(!limiter.allow(start));

        // Both admitted sends expire together; the denials left no residue.
        let later = start + Duration::from_secs(11);
        assert!(limiter.allow(later));
        assert!(limiter.allow(later));
        assert!(!limiter.allow(later));
    }

    #[test]
    fn history_stays_bounded() {
        let mut limiter =
            MessageRateLimiter::with_window(Duration::from_secs(3600), usize::MAX);
        let start = Instant::now();
        for i in 0..(MESSAGE_HISTORY_CAPACITY * 3) {
            limiter.allow(start + Duration::from_millis(i as u64));
        }
        assert!(limiter.history.len() <= MESSAGE_HISTORY_CAPACITY);
    }
}
