//! HTTP surface of the relay.
//!
//! - `POST /webhooks/{integration}` - webhook ingest
//! - `GET  /poll/{integration}?session_id=...` - client polling
//! - `GET  /health` - per-integration store and delivery counters
//!
//! Every integration gets its own store and its own pair of routes, so the
//! payload type of one integration never leaks into another.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{RelayConfig, StoreConfig};
use crate::correlation::{CorrelationStore, StoreStats, SweepableStore};
use crate::error::ApiError;
use crate::ingest::handle_ingest;
use crate::integration::{CallbackIntegration, JsonIntegration};
use crate::observability::{RelayMetrics, RelayStats};
use crate::poll::handle_poll;
use crate::shutdown::{shutdown_requested, ShutdownCoordinator};
use crate::sweeper::ExpirySweeper;

/// Shared state handed to both endpoints of one integration.
pub struct IntegrationState<I: CallbackIntegration> {
    pub integration: Arc<I>,
    pub store: Arc<CorrelationStore<I::Payload>>,
    pub metrics: Arc<RelayMetrics>,
}

impl<I: CallbackIntegration> Clone for IntegrationState<I> {
    fn clone(&self) -> Self {
        Self {
            integration: Arc::clone(&self.integration),
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<I: CallbackIntegration> IntegrationState<I> {
    pub fn new(integration: I, store: CorrelationStore<I::Payload>) -> Self {
        Self {
            integration: Arc::new(integration),
            store: Arc::new(store),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }
}

struct HealthTarget {
    store: Arc<dyn SweepableStore>,
    metrics: Arc<RelayMetrics>,
}

#[derive(Debug, Serialize)]
pub struct IntegrationHealth {
    #[serde(flatten)]
    pub store: StoreStats,
    pub metrics: RelayStats,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub integrations: BTreeMap<String, IntegrationHealth>,
}

/// Routes for a single integration.
pub fn integration_router<I: CallbackIntegration>(state: IntegrationState<I>) -> Router {
    let name = state.integration.name().to_string();
    Router::new()
        .route(&format!("/webhooks/{name}"), post(handle_ingest::<I>))
        .route(&format!("/poll/{name}"), get(handle_poll::<I>))
        .with_state(state)
}

/// Assembles the router and the sweeper from any number of integrations.
pub struct RelayBuilder {
    store_config: StoreConfig,
    router: Router,
    sweeper: ExpirySweeper,
    health: BTreeMap<String, HealthTarget>,
}

impl RelayBuilder {
    pub fn new(store_config: &StoreConfig) -> Self {
        Self {
            store_config: store_config.clone(),
            router: Router::new(),
            sweeper: ExpirySweeper::new(store_config.sweep_interval()),
            health: BTreeMap::new(),
        }
    }

    /// Mount an integration with a fresh store sized from the store config.
    pub fn mount<I: CallbackIntegration>(self, integration: I) -> Self {
        let store = CorrelationStore::new(self.store_config.ttl(), self.store_config.shard_count);
        self.mount_state(IntegrationState::new(integration, store))
    }

    /// Mount an integration whose state was built by the caller.
    pub fn mount_state<I: CallbackIntegration>(mut self, state: IntegrationState<I>) -> Self {
        let name = state.integration.name().to_string();
        let state_ttl = state.store.ttl();
        let store: Arc<dyn SweepableStore> = state.store.clone();

        self.sweeper
            .register(&name, Arc::clone(&store), Arc::clone(&state.metrics));
        self.health.insert(
            name.clone(),
            HealthTarget {
                store,
                metrics: Arc::clone(&state.metrics),
            },
        );
        self.router = self.router.merge(integration_router(state));

        info!(
            integration = %name,
            ttl_secs = state_ttl.as_secs(),
            "Mounted integration"
        );
        self
    }

    pub fn build(self) -> (Router, ExpirySweeper) {
        let health = Arc::new(self.health);
        let router = self
            .router
            .route("/health", get(health_check).with_state(health))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http());

        (router, self.sweeper)
    }
}

/// Router and sweeper for every integration listed in the config.
pub fn build_relay(config: &RelayConfig) -> (Router, ExpirySweeper) {
    config
        .integrations
        .iter()
        .fold(RelayBuilder::new(&config.store), |builder, integration| {
            builder.mount(JsonIntegration::from_config(integration))
        })
        .build()
}

async fn health_check(
    State(targets): State<Arc<BTreeMap<String, HealthTarget>>>,
) -> Json<HealthResponse> {
    let integrations = targets
        .iter()
        .map(|(name, target)| {
            (
                name.clone(),
                IntegrationHealth {
                    store: target.store.stats(),
                    metrics: target.metrics.get_stats(),
                },
            )
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        integrations,
    })
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Serve until the coordinator is triggered. The sweeper runs alongside and
/// stops with the server.
pub async fn serve(config: &RelayConfig, shutdown: &ShutdownCoordinator) -> Result<()> {
    let (router, sweeper) = build_relay(config);

    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.bind_addr))?;
    info!(
        "callback-relay listening on {} ({} integrations)",
        config.server.bind_addr,
        config.integrations.len()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_requested(shutdown.subscribe()))
        .await
        .context("server error")?;

    // The server can also stop on its own; make sure the sweeper follows.
    shutdown.trigger();
    sweeper_handle.await.context("sweeper task failed")?;

    info!("callback-relay stopped");
    Ok(())
}
