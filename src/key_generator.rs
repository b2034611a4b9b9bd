//! Key layout for persisted bucket state.
//!
//! Each client owns two entries, `<namespace>:tokens:<client_id>` and
//! `<namespace>:last_refill:<client_id>`. The client id is used verbatim.

pub const DEFAULT_NAMESPACE: &str = "rate_limiter";

/// The pair of store keys backing one client's bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKeys {
    pub tokens: String,
    pub last_refill: String,
}

/// Derives store keys from client ids for one policy instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    namespace: String,
}

impl KeyGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn tokens_key(&self, client_id: &str) -> String {
        format!("{}:tokens:{}", self.namespace, client_id)
    }

    pub fn last_refill_key(&self, client_id: &str) -> String {
        format!("{}:last_refill:{}", self.namespace, client_id)
    }

    pub fn bucket_keys(&self, client_id: &str) -> BucketKeys {
        BucketKeys {
            tokens: self.tokens_key(client_id),
            last_refill: self.last_refill_key(client_id),
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
