//! Bucket state store contract and an in-process backend.
//!
//! Every correctness-critical read-modify-write goes through [`BucketStore::apply_atomic`].
//! Issuing `get` followed by `save` from two handlers at once can let both observe the same
//! stale count and over-admit, so strategies never compose those two calls.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::bucket_state::BucketState;
use crate::error::{LimiterError, Result};
use crate::key_generator::{BucketKeys, KeyGenerator};
use crate::metrics::LimiterMetrics;
use crate::token_bucket::BucketConfig;

/// Object-safe view of a store used for health reporting.
#[async_trait]
pub trait StoreProbe: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait BucketStore: StoreProbe {
    /// Persisted state for `client_id`, or a fresh full bucket stamped `now_ms` when none
    /// exists. A fresh bucket is not written.
    async fn get(&self, client_id: &str, config: &BucketConfig, now_ms: i64)
        -> Result<BucketState>;

    /// Replace the persisted state for `client_id`.
    async fn save(&self, client_id: &str, state: BucketState) -> Result<()>;

    /// Read, transform and write the state for `client_id` as one unit with respect to every
    /// other apply on the same client.
    ///
    /// `transform` may run more than once per call on backends that retry internally, so it
    /// must be pure. Backends that detect a lost race report
    /// [`LimiterError::ConcurrencyConflict`] and leave retrying to the caller.
    async fn apply_atomic<F, R>(
        &self,
        client_id: &str,
        config: &BucketConfig,
        now_ms: i64,
        transform: F,
    ) -> Result<R>
    where
        F: Fn(BucketState) -> (BucketState, R) + Send + Sync,
        R: Send;
}

/// Result of reading a bucket's raw entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Loaded {
    Absent(BucketState),
    Present(BucketState),
    /// The stored value was unreadable; the state is the replacement full bucket.
    Reset(BucketState),
}

impl Loaded {
    pub(crate) fn state(self) -> BucketState {
        match self {
            Loaded::Absent(state) | Loaded::Present(state) | Loaded::Reset(state) => state,
        }
    }
}

/// Shared decoding for raw entries, recovering from corrupt data with a full bucket.
pub(crate) fn load_state(
    tokens: Option<&str>,
    last_refill: Option<&str>,
    keys: &BucketKeys,
    config: &BucketConfig,
    now_ms: i64,
    metrics: &LimiterMetrics,
) -> Loaded {
    match BucketState::decode(tokens, last_refill, config.capacity()) {
        Ok(Some(state)) => Loaded::Present(state),
        Ok(None) => Loaded::Absent(config.initial_state(now_ms)),
        Err(reason) => {
            let err = LimiterError::StorageCorrupt {
                key: keys.tokens.clone(),
                reason: reason.to_string(),
            };
            warn!(error = %err, "Resetting unreadable bucket to full capacity");
            metrics.record_corrupt_reset();
            Loaded::Reset(config.initial_state(now_ms))
        }
    }
}

/// Lock stripes in a [`MemoryStore`]. Both entries of a client live in one stripe.
const SHARDS: usize = 16;

type Shard = Mutex<HashMap<String, String>>;

/// Store living in process memory, laid out like the Redis backend.
///
/// Suitable for a single instance and for tests. Entries are striped across
/// [`SHARDS`] locks by client id, so clients in different stripes never wait on each
/// other. A stripe lock is only held while a transform runs, never across an await.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    keys: KeyGenerator,
    shards: Arc<[Shard]>,
    metrics: Arc<LimiterMetrics>,
}

impl MemoryStore {
    pub fn new(keys: KeyGenerator) -> Self {
        Self {
            keys,
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            metrics: Arc::new(LimiterMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<LimiterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of raw entries, two per persisted bucket.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|entries| entries.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(client_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        (hasher.finish() % SHARDS as u64) as usize
    }

    fn lock(&self, client_id: &str) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.shards[Self::shard_index(client_id)]
            .lock()
            .map_err(|_| LimiterError::StorageUnavailable("memory store lock poisoned".to_string()))
    }

    fn load(
        &self,
        entries: &HashMap<String, String>,
        keys: &BucketKeys,
        config: &BucketConfig,
        now_ms: i64,
    ) -> Loaded {
        load_state(
            entries.get(&keys.tokens).map(String::as_str),
            entries.get(&keys.last_refill).map(String::as_str),
            keys,
            config,
            now_ms,
            &self.metrics,
        )
    }

    fn write(entries: &mut HashMap<String, String>, keys: &BucketKeys, state: BucketState) {
        let (tokens, last_refill) = state.encode();
        entries.insert(keys.tokens.clone(), tokens);
        entries.insert(keys.last_refill.clone(), last_refill);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(KeyGenerator::default())
    }
}

#[async_trait]
impl StoreProbe for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        for shard in self.shards.iter() {
            shard.lock().map_err(|_| {
                LimiterError::StorageUnavailable("memory store lock poisoned".to_string())
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn get(
        &self,
        client_id: &str,
        config: &BucketConfig,
        now_ms: i64,
    ) -> Result<BucketState> {
        let keys = self.keys.bucket_keys(client_id);
        let mut entries = self.lock(client_id)?;
        let loaded = self.load(&entries, &keys, config, now_ms);
        if let Loaded::Reset(state) = loaded {
            Self::write(&mut entries, &keys, state);
        }
        Ok(loaded.state())
    }

    async fn save(&self, client_id: &str, state: BucketState) -> Result<()> {
        let keys = self.keys.bucket_keys(client_id);
        let mut entries = self.lock(client_id)?;
        Self::write(&mut entries, &keys, state);
        Ok(())
    }

    async fn apply_atomic<F, R>(
        &self,
        client_id: &str,
        config: &BucketConfig,
        now_ms: i64,
        transform: F,
    ) -> Result<R>
    where
        F: Fn(BucketState) -> (BucketState, R) + Send + Sync,
        R: Send,
    {
        let keys = self.keys.bucket_keys(client_id);
        let mut entries = self.lock(client_id)?;
        let current = self.load(&entries, &keys, config, now_ms).state();
        let (next, outcome) = transform(current);
        Self::write(&mut entries, &keys, next);
        Ok(outcome)
    }
}
