//! Randomized retry delays.
//!
//! Callers that lost the same optimistic race would otherwise sleep for the same backoff
//! and collide again on wake-up. Jitter spreads them out.

use rand::{rng, Rng};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Exact backoff delay. Deterministic, for tests.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let micros = Self::as_micros_saturated(delay);
        if micros == 0 {
            return Duration::ZERO;
        }

        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_micros(rng.random_range(0..=micros)),
            Jitter::Equal => Duration::from_micros(rng.random_range(micros / 2..=micros)),
        }
    }

    fn as_micros_saturated(duration: Duration) -> u64 {
        duration.as_micros().try_into().unwrap_or(u64::MAX)
    }
}
