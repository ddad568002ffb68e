//! Application state and service wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use lakeside_core::{Result, StorageBackend};
use lakeside_lake::{CompactionCoordinator, Compactor, Reconciler, SchemaCache};

use crate::config::Config;
use crate::routes;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Storage backend holding the lake.
    pub storage: Arc<dyn StorageBackend>,
    /// The singleton compaction lock.
    pub coordinator: Arc<CompactionCoordinator>,
    /// The compaction orchestrator.
    pub compactor: Arc<Compactor>,
    /// Orphan detection and cleanup.
    pub reconciler: Reconciler,
    /// Per-process schema cache.
    pub schema: Arc<SchemaCache>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .finish()
    }
}

impl AppState {
    /// Creates application state over the given storage backend.
    #[must_use]
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>) -> Self {
        let coordinator = Arc::new(CompactionCoordinator::with_stale_after(
            Arc::clone(&storage),
            config.stale_lock(),
        ));
        let schema = Arc::new(SchemaCache::with_ttl(
            Arc::clone(&storage),
            config.schema_ttl(),
        ));
        let compactor = Arc::new(Compactor::new(
            Arc::clone(&storage),
            Arc::clone(&coordinator),
            Arc::clone(&schema),
        ));
        let reconciler = Reconciler::new(Arc::clone(&storage));

        Self {
            config,
            storage,
            coordinator,
            compactor,
            reconciler,
            schema,
        }
    }
}

/// Builds the compaction service router.
pub fn compaction_router(state: Arc<AppState>) -> Router {
    routes::compaction::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the ingestion gateway router.
pub fn gateway_router(state: Arc<AppState>) -> Router {
    routes::gateway::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves both services until shutdown.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a listener cannot bind.
pub async fn serve(config: Config, storage: Arc<dyn StorageBackend>) -> Result<()> {
    config.validate()?;

    let state = Arc::new(AppState::new(config.clone(), storage));

    let gateway_addr = SocketAddr::from(([0, 0, 0, 0], config.gateway_port));
    let compactor_addr = SocketAddr::from(([0, 0, 0, 0], config.compactor_port));

    tracing::info!(
        gateway = %gateway_addr,
        compactor = %compactor_addr,
        "starting Lakeside services"
    );

    let gateway = bind_and_serve(gateway_addr, gateway_router(Arc::clone(&state)));
    let compactor = bind_and_serve(compactor_addr, compaction_router(state));

    tokio::try_join!(gateway, compactor)?;
    Ok(())
}

async fn bind_and_serve(addr: SocketAddr, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| lakeside_core::Error::internal(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| lakeside_core::Error::internal(format!("server error on {addr}: {e}")))?;
    Ok(())
}
