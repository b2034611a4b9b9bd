use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::store::StoreProbe;

pub const STATUS_UP: &str = "UP";
pub const STATUS_DEGRADED: &str = "DEGRADED";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        self.status == STATUS_UP
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Reports service liveness together with the reachability of the bucket store.
pub struct HealthChecker {
    store: Arc<dyn StoreProbe>,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn StoreProbe>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let store = self.check_store().await;

        // The service stays up without its store but cannot make decisions
        let status = if store.error.is_none() {
            STATUS_UP
        } else {
            STATUS_DEGRADED
        };

        HealthStatus {
            status: status.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies: DependencyStatus { store },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                backend: self.store.backend().to_string(),
                status: STATUS_UP.to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                backend: self.store.backend().to_string(),
                status: "DOWN".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
