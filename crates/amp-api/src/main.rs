//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use amp_ai_client::{
    analyzer_chain, synthesizer_chain, DeepAiConfig, GeminiConfig, HuggingFaceConfig,
    RunPodConfig, RunPodVideoSynthesizer, VideoSynthesizer,
};
use amp_api::{
    create_router, metrics, ApiConfig, AppState, AuthConfig, BillingReconciler, JwksCache,
    MonthlyResetScheduler, Services,
};
use amp_firestore::{FirestoreClient, FirestoreLedger, LedgerStore};
use amp_storage::R2Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;

    info!("Starting amp-api");

    let config = ApiConfig::from_env();
    info!(
        "API config: host={}, port={}, environment={}",
        config.host, config.port, config.environment
    );

    let services = build_services().await?;
    let ledger = Arc::clone(&services.ledger);
    let state = AppState::new(config.clone(), services);

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let reset_scheduler =
        MonthlyResetScheduler::new(Arc::clone(&ledger), config.monthly_reset_interval);
    tokio::spawn(async move {
        reset_scheduler.run().await;
    });

    let reconciler = BillingReconciler::new(ledger, config.billing_reconcile_interval);
    tokio::spawn(async move {
        reconciler.run().await;
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("amp=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Construct every external client and hand them to the state as trait objects.
async fn build_services() -> anyhow::Result<Services> {
    let firestore = FirestoreClient::from_env()
        .await
        .context("Failed to create Firestore client")?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(FirestoreLedger::new(firestore));

    let blobs = Arc::new(R2Client::from_env().context("Failed to create R2 client")?);

    let auth = AuthConfig::from_env().context("AUTH_PROJECT_ID or GCP_PROJECT_ID must be set")?;
    let verifier = Arc::new(JwksCache::new(auth).context("Failed to create JWKS cache")?);

    let analyzers = analyzer_chain(&GeminiConfig::from_env())?;
    let synthesizers =
        synthesizer_chain(&DeepAiConfig::from_env(), &HuggingFaceConfig::from_env())?;

    if analyzers.is_empty() {
        warn!("No vision analyzers configured, product analysis will use filename heuristics");
    }
    if synthesizers.is_empty() {
        warn!("No image synthesizers configured, uploads will return the original image");
    }

    let runpod = RunPodConfig::from_env();
    let video: Option<Arc<dyn VideoSynthesizer>> = if runpod.api_key.is_some() {
        Some(Arc::new(RunPodVideoSynthesizer::new(&runpod)?))
    } else {
        warn!("RUNPOD_API_KEY not set, video generation is disabled");
        None
    };

    info!(
        analyzers = analyzers.len(),
        synthesizers = synthesizers.len(),
        video = video.is_some(),
        "Providers configured"
    );

    Ok(Services {
        ledger,
        blobs,
        verifier,
        analyzers,
        synthesizers,
        video,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
