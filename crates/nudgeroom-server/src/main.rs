//! nudgeroom-server: task, wager and nudge API with live event streams.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nudgeroom_core::rules::{ActionExecutor, RuleEngine, RuleStore};
use nudgeroom_core::{generator, CloseReason, Config, Database, Services, Sweeper, SystemClock};
use nudgeroom_server::{router, AppState, RuleDispatcher};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "nudgeroom-server")]
#[command(about = "Task wagers and reminder nudges over HTTP and WebSocket")]
struct Cli {
    /// Path to configuration file (defaults to the data directory)
    #[arg(short, long, env = "NUDGEROOM_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (defaults to the data directory)
    #[arg(short, long, env = "NUDGEROOM_DATABASE")]
    database: Option<PathBuf>,

    /// Rules file (defaults to the data directory)
    #[arg(long, env = "NUDGEROOM_RULES")]
    rules: Option<PathBuf>,

    /// Listen address (overrides config file)
    #[arg(long, env = "NUDGEROOM_BIND")]
    bind: Option<String>,

    /// Background sweep interval in seconds, 0 to disable (overrides config file)
    #[arg(long, env = "NUDGEROOM_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nudgeroom=info".parse()?)
                .add_directive("nudgeroom_core=info".parse()?)
                .add_directive("nudgeroom_server=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.sweep.interval_secs = secs;
    }

    let db = match &cli.database {
        Some(path) => Database::open_path(path)?,
        None => Database::open()?,
    };
    let generator = generator::from_config(&config.generator)?;
    let services = Services::new(db, Arc::new(SystemClock), &config, generator);

    let rule_store = match cli.rules {
        Some(path) => RuleStore::with_path(path),
        None => RuleStore::open()?,
    };
    let engine = RuleEngine::load(&rule_store)?;
    info!(rules = engine.rules().len(), path = %rule_store.path().display(), "rules loaded");

    let state = AppState::new(services.clone(), config.server.dispatch_timeout());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = RuleDispatcher::new(
        engine,
        ActionExecutor::from_services(&services),
        state.correlations.clone(),
    );
    let dispatch_handle = tokio::spawn(dispatcher.run(services.bus.subscribe_tasks(), shutdown(shutdown_rx.clone())));

    let sweep_handle = match config.sweep.interval() {
        Some(every) => Some(tokio::spawn(
            Sweeper::new(&services).run(every, shutdown(shutdown_rx.clone())),
        )),
        None => {
            info!("background sweep disabled");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "nudgeroom-server listening");

    let registry = state.registry.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            let closed = registry.close_all(CloseReason::Shutdown);
            info!(closed, "event streams closed");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Give the background loops a moment to notice.
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatch_handle).await;
    if let Some(handle) = sweep_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    info!("nudgeroom-server stopped");
    Ok(())
}

async fn shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
