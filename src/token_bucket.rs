use serde::Serialize;

use crate::bucket_state::BucketState;
use crate::error::{LimiterError, Result};

/// Immutable bucket parameters shared by every client of one policy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketConfig {
    capacity: u64,
    refill_rate: u64,
    refill_interval_ms: u64,
}

impl BucketConfig {
    /// `refill_rate` tokens are added per elapsed `refill_interval_ms`, never exceeding
    /// `capacity`. A zero refill rate is allowed and yields a bucket that never refills.
    pub fn new(capacity: u64, refill_rate: u64, refill_interval_ms: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(LimiterError::Configuration(
                "bucket capacity must be greater than 0".to_string(),
            ));
        }
        if refill_interval_ms == 0 {
            return Err(LimiterError::Configuration(
                "refill interval must be greater than 0".to_string(),
            ));
        }
        if refill_interval_ms > i64::MAX as u64 {
            return Err(LimiterError::Configuration(format!(
                "refill interval {}ms is out of range",
                refill_interval_ms
            )));
        }

        Ok(Self {
            capacity,
            refill_rate,
            refill_interval_ms,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    pub fn refill_interval_ms(&self) -> u64 {
        self.refill_interval_ms
    }

    pub fn initial_state(&self, now_ms: i64) -> BucketState {
        BucketState::initial(self.capacity, now_ms)
    }
}

/// Pure token-bucket arithmetic. No I/O, no locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    config: BucketConfig,
}

impl TokenBucket {
    pub fn new(config: BucketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Add tokens for every whole interval elapsed since the last refill.
    ///
    /// The refill clock advances by whole intervals only, so a sub-interval remainder keeps
    /// accumulating across calls. A clock that moved backwards leaves the state untouched.
    pub fn refill(&self, state: BucketState, now_ms: i64) -> BucketState {
        let elapsed = now_ms.saturating_sub(state.last_refill_ms);
        if elapsed <= 0 {
            return state;
        }

        let interval = self.config.refill_interval_ms as i64;
        let intervals_passed = elapsed / interval;
        if intervals_passed == 0 {
            return state;
        }

        let tokens_to_add = (intervals_passed as u64).saturating_mul(self.config.refill_rate);
        let token_count = state
            .token_count
            .saturating_add(tokens_to_add)
            .min(self.config.capacity);

        BucketState {
            token_count,
            last_refill_ms: state.last_refill_ms + intervals_passed * interval,
        }
    }

    pub fn consume(&self, state: BucketState) -> (BucketState, bool) {
        consume_one(state)
    }
}

/// Take a single token if one is available. An empty bucket is returned unchanged.
pub fn consume_one(state: BucketState) -> (BucketState, bool) {
    if state.has_tokens() {
        (
            BucketState {
                token_count: state.token_count - 1,
                ..state
            },
            true,
        )
    } else {
        (state, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u64, refill_rate: u64, interval_ms: u64) -> TokenBucket {
        TokenBucket::new(BucketConfig::new(capacity, refill_rate, interval_ms).unwrap())
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        assert!(matches!(
            BucketConfig::new(0, 5, 1000),
            Err(LimiterError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_interval() {
        assert!(matches!(
            BucketConfig::new(10, 5, 0),
            Err(LimiterError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_allows_zero_refill_rate() {
        let config = BucketConfig::new(10, 0, 1000).unwrap();
        assert_eq!(config.refill_rate(), 0);
    }

    #[test]
    fn test_token_consumption() {
        let bucket = bucket(10, 5, 100_000);
        let mut state = BucketState::initial(10, 0);
        for expected in (0..10).rev() {
            let (next, admitted) = bucket.consume(state);
            assert!(admitted);
            assert_eq!(next.token_count, expected);
            state = next;
        }

        let (next, admitted) = bucket.consume(state);
        assert!(!admitted);
        assert_eq!(next, state);
    }

    #[test]
    fn test_refill_whole_intervals_only() {
        let bucket = bucket(10, 5, 1000);
        let state = BucketState::new(0, 0);

        assert_eq!(bucket.refill(state, 999), state);

        let refilled = bucket.refill(state, 1000);
        assert_eq!(refilled, BucketState::new(5, 1000));
    }

    #[test]
    fn test_refill_preserves_sub_interval_remainder() {
        let bucket = bucket(10, 1, 1000);
        let state = BucketState::new(0, 0);

        let refilled = bucket.refill(state, 2500);
        assert_eq!(refilled, BucketState::new(2, 2000));

        // Frequent small-elapsed calls still accumulate toward the next boundary.
        let mut current = refilled;
        for now in [2600, 2700, 2800, 2900] {
            current = bucket.refill(current, now);
            assert_eq!(current.token_count, 2);
        }
        current = bucket.refill(current, 3000);
        assert_eq!(current, BucketState::new(3, 3000));
    }

    #[test]
    fn test_capacity_overflow_prevention() {
        let bucket = bucket(5, 1000, 10);
        let state = BucketState::new(2, 0);
        let refilled = bucket.refill(state, 10_000);
        assert_eq!(refilled.token_count, 5);
    }

    #[test]
    fn test_refill_saturates_on_huge_elapsed() {
        let bucket = bucket(5, u64::MAX, 1);
        let refilled = bucket.refill(BucketState::new(0, i64::MIN), i64::MAX);
        assert_eq!(refilled.token_count, 5);
    }

    #[test]
    fn test_clock_regression_is_noop() {
        let bucket = bucket(10, 5, 1000);
        let state = BucketState::new(3, 50_000);
        assert_eq!(bucket.refill(state, 10_000), state);
    }

    #[test]
    fn test_refill_is_monotonic() {
        let bucket = bucket(100, 3, 250);
        let state = BucketState::new(0, 0);
        let mut previous = 0;
        for now in (0..20_000).step_by(97) {
            let tokens = bucket.refill(state, now).token_count;
            assert!(tokens >= previous);
            assert!(tokens <= 100);
            previous = tokens;
        }
    }

    #[test]
    fn test_scenario_refill_after_drain() {
        let bucket = bucket(10, 5, 100_000);
        let mut state = BucketState::initial(10, 0);
        for _ in 0..10 {
            let (next, admitted) = bucket.consume(bucket.refill(state, 0));
            assert!(admitted);
            state = next;
        }
        let (state, admitted) = bucket.consume(bucket.refill(state, 0));
        assert!(!admitted);

        let refilled = bucket.refill(state, 100_000);
        assert_eq!(refilled.token_count, 5);
        let (after, admitted) = bucket.consume(refilled);
        assert!(admitted);
        assert_eq!(after.token_count, 4);
    }
}
