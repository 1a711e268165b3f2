//! LDAP Sync Service entry point.

use ldap_sync_service::config::LdapSyncConfig;
use ldap_sync_service::services::init_metrics;
use ldap_sync_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = LdapSyncConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_endpoint = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "Starting ldap-sync-service"
    );

    // Initialize metrics
    init_metrics();

    // Log configuration (the bind password is never logged)
    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        ldap_host = %config.directory.host,
        ldap_port = %config.directory.port,
        ldap_use_tls = config.directory.use_tls,
        ldap_bind_dn = %config.directory.bind_dn,
        ldap_base_dn = %config.directory.base_dn,
        ldap_object_class = %config.directory.object_class,
        ldap_id_attribute = %config.directory.id_attribute,
        record_namespace = %config.registry.namespace,
        sync_interval_secs = config.sync.interval.as_secs(),
        sync_concurrency = config.sync.concurrency,
        reconcile_concurrency = config.sync.reconcile_concurrency,
        workload_image = %config.bundle.image,
        "Configuration loaded"
    );

    // Build and run application
    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Graceful shutdown initiated");
        signal_token.cancel();
    });

    if let Err(e) = app.run_until_stopped(shutdown).await {
        tracing::error!(error = %e, "Application error");
        return Err(e);
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
