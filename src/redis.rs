//! Redis-backed bucket store.
//!
//! `apply_atomic` is an optimistic transaction: WATCH both bucket keys, read them, run the
//! transform locally, then MULTI/SET/SET/EXEC. If another writer touched either key in
//! between, EXEC aborts and the call returns [`LimiterError::ConcurrencyConflict`].
//! WATCH state is per connection, so transactions use dedicated (non-multiplexed)
//! connections from a small idle list.

use async_trait::async_trait;
use redis::aio::Connection;
use redis::Client;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::bucket_state::BucketState;
use crate::error::{LimiterError, Result};
use crate::key_generator::{BucketKeys, KeyGenerator};
use crate::metrics::LimiterMetrics;
use crate::store::{load_state, BucketStore, Loaded, StoreProbe};
use crate::token_bucket::BucketConfig;

/// Connection and timing knobs for [`RedisStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreOptions {
    /// Upper bound for one store round trip, connection setup included.
    pub op_timeout: Duration,
    /// Idle connections kept for reuse.
    pub max_idle: usize,
    /// Expiry applied to both entries on every write. `None` keeps buckets forever.
    pub key_ttl: Option<Duration>,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(2000),
            max_idle: 16,
            key_ttl: None,
        }
    }
}

pub struct RedisStore {
    client: Client,
    keys: KeyGenerator,
    options: RedisStoreOptions,
    idle: Mutex<Vec<Connection>>,
    metrics: Arc<LimiterMetrics>,
}

impl RedisStore {
    /// Does not connect; connections are opened on first use.
    pub fn new(redis_url: &str, keys: KeyGenerator, options: RedisStoreOptions) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            LimiterError::Configuration(format!("invalid Redis URL {:?}: {}", redis_url, e))
        })?;

        Ok(Self {
            client,
            keys,
            options,
            idle: Mutex::new(Vec::new()),
            metrics: Arc::new(LimiterMetrics::new()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<LimiterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    async fn checkout(&self) -> Result<Connection> {
        if let Some(conn) = self.take_idle() {
            return Ok(conn);
        }
        debug!("Opening new Redis connection");
        Ok(self.client.get_async_connection().await?)
    }

    fn take_idle(&self) -> Option<Connection> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    /// Return a healthy connection. Connections that saw an error are dropped instead.
    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.options.max_idle {
                idle.push(conn);
            }
        }
    }

    async fn with_timeout<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.options.op_timeout, fut)
            .await
            .map_err(|_| {
                LimiterError::StorageUnavailable(format!(
                    "Redis {} timed out after {:?}",
                    op, self.options.op_timeout
                ))
            })?
    }

    async fn read_raw(
        conn: &mut Connection,
        keys: &BucketKeys,
    ) -> Result<(Option<String>, Option<String>)> {
        Ok(redis::cmd("MGET")
            .arg(&keys.tokens)
            .arg(&keys.last_refill)
            .query_async(conn)
            .await?)
    }

    /// Queue the two SETs for `state` onto `pipe`.
    fn queue_write(&self, pipe: &mut redis::Pipeline, keys: &BucketKeys, state: BucketState) {
        let (tokens, last_refill) = state.encode();
        for (key, value) in [(&keys.tokens, tokens), (&keys.last_refill, last_refill)] {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = self.options.key_ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            cmd.ignore();
        }
    }

    async fn write_state(
        &self,
        conn: &mut Connection,
        keys: &BucketKeys,
        state: BucketState,
    ) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_write(&mut pipe, keys, state);
        pipe.query_async::<_, ()>(conn).await?;
        Ok(())
    }

    /// Read without consuming. A corrupt bucket is reset under WATCH, so the reset is
    /// dropped if an apply committed in the meantime.
    async fn get_once(
        &self,
        conn: &mut Connection,
        keys: &BucketKeys,
        config: &BucketConfig,
        now_ms: i64,
    ) -> Result<BucketState> {
        Self::watch(conn, keys).await?;
        let (tokens, last_refill) = Self::read_raw(conn, keys).await?;
        let loaded = load_state(
            tokens.as_deref(),
            last_refill.as_deref(),
            keys,
            config,
            now_ms,
            &self.metrics,
        );

        if let Loaded::Reset(state) = loaded {
            let mut pipe = redis::pipe();
            pipe.atomic();
            self.queue_write(&mut pipe, keys, state);
            let committed: Option<()> = pipe.query_async(conn).await?;
            if committed.is_none() {
                debug!(key = %keys.tokens, "Bucket changed before its reset was written");
            }
        } else {
            redis::cmd("UNWATCH").query_async::<_, ()>(conn).await?;
        }
        Ok(loaded.state())
    }

    async fn watch(conn: &mut Connection, keys: &BucketKeys) -> Result<()> {
        redis::cmd("WATCH")
            .arg(&keys.tokens)
            .arg(&keys.last_refill)
            .query_async::<_, ()>(conn)
            .await?;
        Ok(())
    }

    async fn apply_once<F, R>(
        &self,
        conn: &mut Connection,
        keys: &BucketKeys,
        config: &BucketConfig,
        now_ms: i64,
        transform: &F,
    ) -> Result<R>
    where
        F: Fn(BucketState) -> (BucketState, R) + Send + Sync,
        R: Send,
    {
        Self::watch(conn, keys).await?;

        let (tokens, last_refill) = Self::read_raw(conn, keys).await?;
        let current = load_state(
            tokens.as_deref(),
            last_refill.as_deref(),
            keys,
            config,
            now_ms,
            &self.metrics,
        )
        .state();
        let (next, outcome) = transform(current);

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_write(&mut pipe, keys, next);
        // EXEC replies nil when a watched key changed.
        let committed: Option<()> = pipe.query_async(conn).await?;

        match committed {
            Some(()) => Ok(outcome),
            None => Err(LimiterError::ConcurrencyConflict {
                key: keys.tokens.clone(),
            }),
        }
    }
}

#[async_trait]
impl StoreProbe for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        self.with_timeout("PING", async {
            let mut conn = self.checkout().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
            self.checkin(conn);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn get(
        &self,
        client_id: &str,
        config: &BucketConfig,
        now_ms: i64,
    ) -> Result<BucketState> {
        let keys = self.keys.bucket_keys(client_id);
        self.with_timeout("GET", async {
            let mut conn = self.checkout().await?;
            let state = self.get_once(&mut conn, &keys, config, now_ms).await?;
            self.checkin(conn);
            Ok(state)
        })
        .await
    }

    async fn save(&self, client_id: &str, state: BucketState) -> Result<()> {
        let keys = self.keys.bucket_keys(client_id);
        self.with_timeout("SET", async {
            let mut conn = self.checkout().await?;
            self.write_state(&mut conn, &keys, state).await?;
            self.checkin(conn);
            Ok(())
        })
        .await
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
        self.with_timeout("transaction", async {
            let mut conn = self.checkout().await?;
            match self
                .apply_once(&mut conn, &keys, config, now_ms, &transform)
                .await
            {
                // EXEC ran, so the connection carries no WATCH state.
                Ok(outcome) => {
                    self.checkin(conn);
                    Ok(outcome)
                }
                Err(err @ LimiterError::ConcurrencyConflict { .. }) => {
                    self.checkin(conn);
                    Err(err)
                }
                Err(err) => Err(err),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    //! These need a running Redis; set `REDIS_URL` and run with `--ignored`.

    use super::*;
    use crate::token_bucket::consume_one;

    fn store(namespace: &str) -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let namespace = format!("{}-{}", namespace, uuid::Uuid::new_v4());
        RedisStore::new(&url, KeyGenerator::new(namespace), RedisStoreOptions::default()).unwrap()
    }

    #[test]
    fn test_rejects_malformed_url() {
        let result = RedisStore::new("not a url", KeyGenerator::default(), Default::default());
        assert!(matches!(result, Err(LimiterError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let store = RedisStore::new(
            "redis://127.0.0.1:1",
            KeyGenerator::default(),
            RedisStoreOptions {
                op_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )
        .unwrap();
        let result = store.ping().await;
        assert!(matches!(result, Err(LimiterError::StorageUnavailable(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_redis() {
        let store = store("round-trip");
        let config = BucketConfig::new(10, 5, 1000).unwrap();

        let fresh = store.get("client", &config, 99).await.unwrap();
        assert_eq!(fresh, BucketState::new(10, 99));

        let saved = BucketState::new(4, 1_700_000_000_000);
        store.save("client", saved).await.unwrap();
        assert_eq!(store.get("client", &config, 0).await.unwrap(), saved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_conflicts_are_reported() {
        let store = Arc::new(store("conflicts"));
        let config = BucketConfig::new(1000, 0, 1000).unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.apply_atomic("hot", &config, 0, consume_one).await
            }));
        }

        let mut committed = 0u64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(admitted) => {
                    assert!(admitted);
                    committed += 1;
                }
                Err(err) => assert!(matches!(err, LimiterError::ConcurrencyConflict { .. })),
            }
        }

        let state = store.get("hot", &config, 0).await.unwrap();
        assert_eq!(state.token_count, 1000 - committed);
    }

    #[tokio::test]
    #[ignore]
    async fn test_read_resets_corrupt_bucket_but_keeps_concurrent_writes() {
        let store = store("corrupt");
        let config = BucketConfig::new(10, 0, 1000).unwrap();
        let keys = store.keys().bucket_keys("client");

        let mut conn = store.client.get_async_connection().await.unwrap();
        redis::cmd("SET")
            .arg(&keys.tokens)
            .arg("garbage")
            .query_async::<_, ()>(&mut conn)
            .await
            .unwrap();
        redis::cmd("SET")
            .arg(&keys.last_refill)
            .arg("5")
            .query_async::<_, ()>(&mut conn)
            .await
            .unwrap();

        let state = store.get("client", &config, 50).await.unwrap();
        assert_eq!(state, BucketState::new(10, 50));
        assert_eq!(store.get("client", &config, 60).await.unwrap(), state);

        // A read on a healthy bucket leaves the connection unwatched for the next apply
        let admitted = store.apply_atomic("client", &config, 70, consume_one).await.unwrap();
        assert!(admitted);
        assert_eq!(store.get("client", &config, 80).await.unwrap().token_count, 9);
    }
}
