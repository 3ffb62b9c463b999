use mailbox_verify::{
    config::WorkerConfig,
    services::{
        classifier::ClassifierRegistry,
        gateway_client::{GatewayClient, JobGateway},
        probe::{ProbeDriver, WebDriverProbe},
        worker::{RuntimeSettings, WorkerRuntime},
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting mailbox verification worker");

    // Load configuration
    let config = WorkerConfig::from_env().expect("Failed to load worker configuration");

    tracing::info!(
        api_endpoint = %config.api_endpoint,
        webdriver_url = %config.webdriver_url,
        concurrent_jobs = config.concurrent_jobs,
        headless = config.headless,
        proxy = config.proxy_server.as_deref().unwrap_or("none"),
        "Worker configuration loaded"
    );

    let gateway = GatewayClient::from_config(&config).expect("Failed to build gateway client");

    match gateway.worker_stats().await {
        Ok(stats) => tracing::info!(
            total_jobs = stats.total_jobs,
            pending_jobs = stats.pending_jobs,
            processing_jobs = stats.processing_jobs,
            "Connected to gateway"
        ),
        Err(e) => tracing::warn!(error = %e, "Gateway not reachable yet, will keep polling"),
    }

    let driver = Arc::new(WebDriverProbe::new(&config));
    let runtime = WorkerRuntime::new(
        Arc::new(gateway),
        driver.clone(),
        ClassifierRegistry::default(),
        RuntimeSettings::from(&config),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    tracing::info!("Worker ready, starting job processing loop");
    let stats = runtime.run(shutdown).await;

    driver.shutdown().await;
    tracing::info!(processed = stats.processed, "Worker exited");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
