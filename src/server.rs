use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::Result;
use crate::factory::StrategyFactory;
use crate::handlers::{self, AppState};
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::metrics::LimiterMetrics;
use crate::middleware::{logging_middleware, rate_limit_middleware, ForwardedIpExtractor};
use crate::rate_limiter::RateLimiter;
use crate::redis::{RedisStore, RedisStoreOptions};
use crate::store::MemoryStore;

/// Builds the router: status endpoints under `/gateway`, the protected API under `/api`.
pub fn create_app(state: AppState) -> Router {
    let api = protect(
        Router::new()
            .route("/users", get(handlers::users))
            .route("/ping", get(handlers::ping)),
        state.clone(),
    );

    Router::new()
        .route("/gateway/health", get(handlers::health_check))
        .route("/gateway/rate-limit/status", get(handlers::rate_limit_status))
        .route("/gateway/rate-limit/policy", get(handlers::policy))
        .route("/gateway/metrics", get(handlers::metrics))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

/// Puts every route of `router` behind the admission filter.
pub fn protect(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

/// Wires store, strategy and facade from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
    config.check()?;

    let bucket_config = config.bucket_config()?;
    let retry_policy = config.retry_policy()?;
    let keys = KeyGenerator::new(config.namespace.clone());
    let metrics = Arc::new(LimiterMetrics::new());
    let factory = StrategyFactory::new()
        .with_retry_policy(retry_policy.clone())
        .with_metrics(Arc::clone(&metrics));

    let (strategy, health) = if config.uses_redis() {
        let options = RedisStoreOptions {
            op_timeout: config.store_timeout(),
            key_ttl: config.key_ttl(),
            ..RedisStoreOptions::default()
        };
        let store =
            Arc::new(RedisStore::new(&config.redis_url, keys, options)?.with_metrics(Arc::clone(&metrics)));
        let strategy = factory.create(&config.policy, bucket_config, Arc::clone(&store))?;
        (strategy, HealthChecker::new(store))
    } else {
        tracing::warn!("REDIS_URL is empty, buckets are kept in process memory");
        let store = Arc::new(MemoryStore::new(keys).with_metrics(Arc::clone(&metrics)));
        let strategy = factory.create(&config.policy, bucket_config, Arc::clone(&store))?;
        (strategy, HealthChecker::new(store))
    };

    Ok(AppState {
        limiter: RateLimiter::new(strategy, metrics),
        extractor: Arc::new(ForwardedIpExtractor),
        health: Arc::new(health),
        failure_mode: config.failure_mode,
        retry_policy,
    })
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let state = build_state(config)?;
        tracing::info!(
            policy = state.limiter.policy_name(),
            capacity = state.limiter.get_capacity(),
            failure_mode = %state.failure_mode,
            "Rate limiter ready"
        );

        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Tollgate listening on {}", self.bind_addr);
        tracing::info!("Health check available at /gateway/health");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envconfig::Envconfig;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&vars).unwrap()
    }

    #[test]
    fn test_memory_mode_state() {
        let state = build_state(&config(&[("REDIS_URL", ""), ("RATE_LIMIT_POLICY", "Fixed-Window")]))
            .unwrap();
        assert_eq!(state.limiter.policy_name(), "fixed-window");
        assert_eq!(state.limiter.get_capacity(), 10);
    }

    #[test]
    fn test_redis_mode_builds_without_connecting() {
        let state = build_state(&config(&[("REDIS_URL", "redis://127.0.0.1:1")])).unwrap();
        assert_eq!(state.limiter.policy_name(), "token-bucket");
    }

    #[test]
    fn test_unknown_policy_fails_startup() {
        let result = build_state(&config(&[("REDIS_URL", ""), ("RATE_LIMIT_POLICY", "leaky")]));
        assert!(result.is_err());
    }
}
