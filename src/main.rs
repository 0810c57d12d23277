use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coachbook::compactor;
use coachbook::config::Config;
use coachbook::directory::{InMemoryDirectory, Seed};
use coachbook::engine::{Collaborators, Engine};
use coachbook::http::{self, AppState};
use coachbook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coachbook=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    coachbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory = match &config.seed {
        Some(path) => {
            let seed = Seed::load(path)?;
            info!(
                "seeded {} users and {} transactions from {}",
                seed.users.len(),
                seed.transactions.len(),
                path.display()
            );
            Arc::new(InMemoryDirectory::from_seed(seed))
        }
        None => {
            warn!("COACHBOOK_SEED not set, starting with an empty user directory");
            Arc::new(InMemoryDirectory::new())
        }
    };
    let collaborators = Collaborators {
        users: directory.clone(),
        transactions: directory,
    };

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(
        Engine::open(config.journal_path(), collaborators, config.linkage, notify).await?,
    );

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("coachbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  linkage: {:?}", config.linkage);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, http::app(AppState { engine }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("coachbook stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received, draining requests");
}
