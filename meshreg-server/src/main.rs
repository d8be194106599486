// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  meshreg: desired-state service-mesh registration
//
//  API:    axum on the tokio runtime
//  Store:  in-memory (standalone) or etcd
//  Locks:  store sessions, one per service reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::{Parser, ValueEnum};
use meshreg_admin::AdminState;
use meshreg_core::MeshregConfig;
use meshreg_core::config::StoreBackend;
use meshreg_observability::MetricsCollector;
use meshreg_reconcile::{Reconciler, ReconcilerConfig};
use meshreg_store::{ConfigStore, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "meshreg", version, about = "meshreg: desired-state service-mesh registration API")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/meshreg/meshreg.yaml")]
    config: PathBuf,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "meshreg starting");

    // ── Config ──
    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults and environment");
    }
    let config = MeshregConfig::load(&cli.config)?;
    info!(
        gateway = %config.gateway.name,
        backend = ?config.store.backend,
        lock_ttl = ?config.lock.ttl,
        lock_retries = config.lock.retries,
        "Configuration loaded"
    );

    // ── Store ──
    let store = connect_store(&config).await?;

    // ── Metrics ──
    let metrics = Arc::new(MetricsCollector::new(config.observability.prometheus.enabled)?);

    // ── API ──
    let state = Arc::new(AdminState {
        reconciler: Reconciler::new(store, ReconcilerConfig::from_config(&config)),
        metrics,
    });

    meshreg_admin::start_admin(&config.server.addr, state, shutdown_signal()).await?;

    info!("meshreg stopped");
    Ok(())
}

async fn connect_store(config: &MeshregConfig) -> anyhow::Result<Arc<dyn ConfigStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store; desired state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "etcd")]
        StoreBackend::Etcd => {
            let etcd = config
                .store
                .etcd
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("store.etcd is required for the etcd backend"))?;
            let store = meshreg_store::EtcdStore::connect(etcd, &config.store.prefix).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "etcd"))]
        StoreBackend::Etcd => {
            anyhow::bail!("etcd backend requested but meshreg was built without the `etcd` feature")
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received, draining in-flight requests");
}
