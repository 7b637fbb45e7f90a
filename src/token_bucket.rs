use chrono::{DateTime, Utc};
use std::time::Duration;

/// Token bucket whose clock is supplied by the caller, so the registry can
/// drive it from an injected [`Clock`](crate::clock::Clock).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn try_consume(&mut self, tokens: u32, now: DateTime<Utc>) -> bool {
        self.refill(now);

        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&mut self, now: DateTime<Utc>) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }

    /// Token count as of the last refill, without advancing time.
    pub fn stored_tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn time_until_available(&mut self, required_tokens: u32, now: DateTime<Utc>) -> Option<Duration> {
        self.refill(now);

        if self.tokens >= required_tokens as f64 {
            return None;
        }
        if self.refill_rate <= 0.0 {
            return Some(Duration::MAX);
        }

        let tokens_needed = required_tokens as f64 - self.tokens;
        let seconds_to_wait = tokens_needed / self.refill_rate;

        Some(Duration::try_from_secs_f64(seconds_to_wait).unwrap_or(Duration::MAX))
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        // A clock that stepped backwards adds nothing.
        let Ok(elapsed) = (now - self.last_refill).to_std() else {
            return;
        };

        if elapsed > Duration::from_millis(1) {
            let tokens_to_add = self.refill_rate * elapsed.as_secs_f64();

            // Prevent overflow by capping at capacity
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn test_token_bucket_creation() {
        let bucket = TokenBucket::new(10, 2.0, Utc::now());
        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.refill_rate(), 2.0);
    }

    #[test]
    fn test_token_consumption() {
        let now = Utc::now();
        let mut bucket = TokenBucket::new(10, 2.0, now);
        assert!(bucket.try_consume(5, now));
        assert_eq!(bucket.available_tokens(now), 5);
        assert!(bucket.try_consume(5, now));
        assert_eq!(bucket.available_tokens(now), 0);
        assert!(!bucket.try_consume(1, now));
    }

    #[test]
    fn test_refill_over_time() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(5, 5.0, start);
        for _ in 0..5 {
            assert!(bucket.try_consume(1, start));
        }
        assert!(!bucket.try_consume(1, start));

        let later = start + chrono::Duration::milliseconds(400);
        assert_eq!(bucket.available_tokens(later), 2);
    }

    #[test]
    fn test_capacity_overflow_prevention() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(5, 1000.0, start);
        bucket.try_consume(3, start);

        assert_eq!(bucket.available_tokens(start + secs(10)), 5);
    }

    #[test]
    fn test_backwards_clock_adds_nothing() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(2, 1.0, start);
        bucket.try_consume(2, start);
        assert_eq!(bucket.available_tokens(start - secs(30)), 0);
    }

    #[test]
    fn test_time_until_available() {
        let now = Utc::now();
        let mut bucket = TokenBucket::new(4, 2.0, now);
        assert_eq!(bucket.time_until_available(1, now), None);

        bucket.try_consume(4, now);
        assert_eq!(
            bucket.time_until_available(1, now),
            Some(Duration::from_millis(500))
        );
    }
}
