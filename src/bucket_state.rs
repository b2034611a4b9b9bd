//! Per-client bucket state and its two-value persisted encoding.

use serde::Serialize;

/// Token count and refill clock for one client of one policy instance.
///
/// Only ever held as a transient copy during a single store apply; the store owns the
/// durable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketState {
    pub token_count: u64,
    /// Epoch milliseconds of the last whole refill interval boundary.
    pub last_refill_ms: i64,
}

/// Why a persisted bucket could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl BucketState {
    pub fn new(token_count: u64, last_refill_ms: i64) -> Self {
        Self {
            token_count,
            last_refill_ms,
        }
    }

    /// Full bucket first observed at `now_ms`.
    pub fn initial(capacity: u64, now_ms: i64) -> Self {
        Self::new(capacity, now_ms)
    }

    pub fn has_tokens(&self) -> bool {
        self.token_count > 0
    }

    /// Base-10 text for the token entry and the last-refill entry.
    pub fn encode(&self) -> (String, String) {
        (self.token_count.to_string(), self.last_refill_ms.to_string())
    }

    /// Decode the two stored entries.
    ///
    /// Returns `Ok(None)` when neither entry exists. A lone entry, non-integer text or a
    /// negative count is an error. Counts above `capacity` are clamped, which happens when
    /// capacity is lowered between deployments.
    pub fn decode(
        tokens: Option<&str>,
        last_refill: Option<&str>,
        capacity: u64,
    ) -> Result<Option<Self>, DecodeError> {
        let (tokens, last_refill) = match (tokens, last_refill) {
            (None, None) => return Ok(None),
            (Some(t), Some(l)) => (t, l),
            (Some(_), None) => return Err(DecodeError("last refill entry missing".into())),
            (None, Some(_)) => return Err(DecodeError("token entry missing".into())),
        };

        let token_count: i64 = tokens
            .trim()
            .parse()
            .map_err(|_| DecodeError(format!("token count {:?} is not an integer", tokens)))?;
        if token_count < 0 {
            return Err(DecodeError(format!("token count {} is negative", token_count)));
        }
        let last_refill_ms: i64 = last_refill.trim().parse().map_err(|_| {
            DecodeError(format!("last refill {:?} is not an integer", last_refill))
        })?;

        Ok(Some(Self::new(
            (token_count as u64).min(capacity),
            last_refill_ms,
        )))
    }
}
