//! Application startup and lifecycle management.

use crate::config::LdapSyncConfig;
use crate::controller::{self, ControllerContext};
use crate::services::{
    get_metrics, BulkSyncEngine, DirectoryClient, IdentityReconciler,
    KubeResourceStore, LdapDirectoryClient, ResourceBundleProvisioner, ResourceStore,
};
use crate::workers::SyncScheduler;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use kube::Client;
use serde_json::json;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn ResourceStore>,
}

/// Health check endpoint for K8s liveness probes.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "ldap-sync-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint: ready once the resource store answers.
async fn readiness_check(State(state): State<HealthState>) -> Result<StatusCode, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Readiness check failed");
        AppError::ServiceUnavailable(format!("resource store: {}", e))
    })?;
    tracing::debug!("Readiness check passed");
    Ok(StatusCode::OK)
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing the controller, the bulk sync worker and
/// the HTTP surface.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    config: LdapSyncConfig,
    store: Arc<KubeResourceStore>,
    engine: Arc<BulkSyncEngine>,
    reconciler: Arc<IdentityReconciler>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LdapSyncConfig) -> Result<Self, AppError> {
        let client = Client::try_default().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to create Kubernetes client");
            AppError::InternalError(anyhow::anyhow!("Failed to create Kubernetes client: {}", e))
        })?;

        let store = Arc::new(KubeResourceStore::new(
            client,
            &config.registry.namespace,
            config.registry.request_timeout,
        ));
        let directory: Arc<dyn DirectoryClient> =
            Arc::new(LdapDirectoryClient::new(config.directory.clone()));
        let provisioner = Arc::new(ResourceBundleProvisioner::new(
            store.clone(),
            config.bundle.clone(),
        ));
        let engine = Arc::new(BulkSyncEngine::new(
            directory.clone(),
            store.clone(),
            provisioner.clone(),
            config.sync.concurrency,
        ));
        let reconciler = Arc::new(IdentityReconciler::new(
            directory,
            store.clone(),
            provisioner,
        ));

        // Bind HTTP listener
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "LDAP sync service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            config,
            store,
            engine,
            reconciler,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run until `shutdown` is cancelled or a component fails.
    pub async fn run_until_stopped(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let health_state = HealthState {
            store: self.store.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        let controller_ctx = Arc::new(ControllerContext::new(
            self.reconciler.clone(),
            self.config.sync.resync,
            RetryConfig::requeue(),
        ));
        let controller = controller::run(
            self.store.records(),
            controller_ctx,
            self.config.sync.reconcile_concurrency,
            shutdown.clone(),
        );

        let scheduler = SyncScheduler::new(
            self.engine.clone(),
            self.config.sync.interval,
            RetryConfig::default(),
            shutdown.clone(),
        );

        tracing::info!(
            service = %self.config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            record_namespace = %self.config.registry.namespace,
            "Service ready"
        );

        let http_shutdown = shutdown.clone();
        let http_server = axum::serve(self.http_listener, http_router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

        let (http_result, _, _) = tokio::join!(
            async {
                let result = http_server.await;
                shutdown.cancel();
                result
            },
            controller,
            scheduler.start(),
        );

        if let Err(e) = http_result {
            tracing::error!(error = %e, "HTTP server error");
            return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
        }

        Ok(())
    }
}
