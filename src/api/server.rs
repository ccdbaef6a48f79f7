//! API Server
//!
//! Wires storage, settlement, the simulation engine and the arena registry
//! into one axum application.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{
    config::SurvivalConfig,
    content::ContentCatalog,
    credentials::RocksCredentialStore,
    errors::{ConfigurationError, StorageError, SurvivalResult},
    events::EventBus,
    lobby::ArenaRegistry,
    metrics::SurvivalMetrics,
    settlement::SettlementGateway,
    simulation::{EngineTiming, SimulationEngine},
    stats_store::RocksStatsStore,
    storage::OptimizedStorage,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ApiServer {
    config: SurvivalConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Open storage and build every service described by `config`
    pub fn from_config(config: SurvivalConfig) -> SurvivalResult<Self> {
        let storage = OptimizedStorage::new(&config.storage.data_directory).map_err(|e| {
            StorageError::DatabaseOpenFailed(format!("{}: {}", config.storage.data_directory, e))
        })?;
        let stats = Arc::new(RocksStatsStore::new(storage.clone()));
        let credentials = Arc::new(RocksCredentialStore::new(storage));

        let metrics = Arc::new(
            SurvivalMetrics::new()
                .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to register metrics: {}", e)))?,
        );

        let catalog = match &config.simulation.content_path {
            Some(path) => ContentCatalog::load(path)?,
            None => ContentCatalog::default(),
        };

        let gateway = SettlementGateway::from_config(&config.ledger)
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "ledger.base_url".to_string(),
                value: config.ledger.base_url.clone(),
                reason: e.to_string(),
            })?
            .with_credentials(credentials.clone())
            .with_metrics(metrics.clone());
        let ledger_configured = gateway.is_configured();

        let events = EventBus::new();
        let engine = SimulationEngine::new(Arc::new(catalog), Arc::new(gateway), Arc::new(events.clone()))
            .with_stats(stats.clone())
            .with_metrics(metrics.clone())
            .with_timing(EngineTiming::from_config(&config.simulation))
            .with_rng_seed(config.simulation.rng_seed);

        let registry = ArenaRegistry::new(Arc::new(engine), Arc::new(events.clone()))
            .with_admins(config.lobby.admins.clone())
            .with_final_checkpoint(Duration::from_secs(config.lobby.final_checkpoint_secs))
            .with_max_participants(config.lobby.max_participants)
            .with_metrics(metrics.clone());

        let state = Arc::new(AppState {
            registry: Arc::new(registry),
            events,
            stats,
            credentials,
            metrics,
            pool_defaults: config.pool.settings(),
            default_countdown: config.lobby.countdown_secs.map(Duration::from_secs),
            admin_api_key: config.api.admin_api_key.clone(),
            ledger_configured,
        });

        Ok(Self { config, state })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Router with the middleware stack applied
    pub fn app(&self) -> axum::Router {
        create_router(self.state.clone())
            // Request ID first so every later layer sees it
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(create_cors_layer(self.config.api.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.api.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from((self.config.api.host.parse::<std::net::IpAddr>()?, self.config.api.port));
        let app = self.app();
        self.log_server_info(&addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }

    fn log_server_info(&self, addr: &SocketAddr) {
        info!("Survival API listening on http://{}", addr);
        info!("   Data directory: {}", self.config.storage.data_directory);
        info!("   CORS: {:?}", self.config.api.allowed_origins);
        info!("   Request timeout: {}s", self.config.api.request_timeout_secs);
        if !self.state.ledger_configured {
            warn!("   Ledger token missing: payouts will be reported as ledger_not_configured");
        }
        if self.config.api.admin_api_key.is_none() {
            warn!("   Admin API key missing: credential override endpoints disabled");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
