pub mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tokio::time::timeout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use common::config::StoreConfig;
use common::db::{Db, HandleCache};
use common::session::{run_sweeper, SessionStore};

use crate::state::AppState;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn level_filter(state: &AppState) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(state.log_level.into())
        .from_env_lossy()
}

/// Daily rolling file under `log_dir`, plain text with span close events
fn file_layer(state: &AppState, log_dir: &Path) -> (BoxedLayer, WorkerGuard) {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("warning: cannot create log directory {}: {}", log_dir.display(), e);
    }
    let appender = tracing_appender::rolling::daily(log_dir, "aurora.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(level_filter(state))
        .boxed();
    (layer, guard)
}

/// Install the subscriber, the panic hook and log the build.
///
/// The returned guards flush the non-blocking writers when dropped.
fn init_logging(state: &AppState) -> Vec<WorkerGuard> {
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let mut layers: Vec<BoxedLayer> = vec![tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout)
        .with_filter(level_filter(state))
        .boxed()];
    let mut guards = vec![stdout_guard];

    if let Some(log_dir) = &state.log_dir {
        let (layer, guard) = file_layer(state, log_dir);
        layers.push(layer);
        guards.push(guard);
    }

    tracing_subscriber::registry().with(layers).init();
    utils::register_panic_logger();
    utils::report_build_info();
    guards
}

/// Open handles the process hands to its consumers
pub struct Stores {
    pub cache: HandleCache,
    pub accounts: Db,
    pub sessions: Arc<SessionStore>,
}

/// Open both databases through a fresh handle cache and create their buckets
pub async fn open_stores(config: &StoreConfig) -> anyhow::Result<Stores> {
    let cache = HandleCache::new();

    let accounts = cache
        .acquire(&config.accounts_db_path)
        .await
        .context("opening accounts database")?;
    accounts
        .create_bucket_if_not_exists(&config.accounts_bucket)
        .await?;
    accounts
        .create_bucket_if_not_exists(&config.profiles_bucket)
        .await?;

    let sessions_db = cache
        .acquire(&config.sessions_db_path)
        .await
        .context("opening sessions database")?;
    sessions_db
        .create_bucket_if_not_exists(&config.sessions_bucket)
        .await?;
    let sessions = Arc::new(SessionStore::from_config(sessions_db, config)?);

    Ok(Stores {
        cache,
        accounts,
        sessions,
    })
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) -> anyhow::Result<()> {
    let _ = graceful_waiter.await;

    timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            )
        })?;
    Ok(())
}

/// Run the store until SIGINT/SIGTERM.
///
/// - Opens the accounts and sessions databases and their buckets
/// - Sweeps expired sessions once at startup, then on every interval
/// - On shutdown, stops the sweeper and closes every handle
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let _guards = init_logging(&state);
    let config = &state.config;
    tracing::info!(config = %state.config_path.display(), "configuration loaded");

    let (graceful_waiter, _shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let stores = open_stores(config).await?;

    match stores.sessions.sweep_expired(chrono::Utc::now()).await {
        Ok(removed) => tracing::info!(removed, "startup session sweep finished"),
        Err(e) => tracing::warn!(error = %e, "startup session sweep failed"),
    }

    let sweeper = tokio::spawn(run_sweeper(
        stores.sessions.clone(),
        config.sweep_interval(),
        shutdown_rx,
    ));

    tracing::info!(
        accounts = %stores.accounts.path().display(),
        sessions = %config.sessions_db_path.display(),
        "aurora store running"
    );

    let joined = shutdown_and_join(graceful_waiter, vec![sweeper]).await;

    stores.cache.close_all().await?;
    tracing::info!("all databases closed");
    joined
}
