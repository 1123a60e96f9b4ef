use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wayback_discover_diff::cli::Cli;
use wayback_discover_diff::discover::Discover;
use wayback_discover_diff::logging;
use wayback_discover_diff::metrics::Metrics;
use wayback_discover_diff::queue::{self, JobQueue};
use wayback_discover_diff::settings::Settings;
use wayback_discover_diff::store::Store;
use wayback_discover_diff::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    logging::init(cli.log_dir.as_deref().map(Path::new))
        .map_err(|e| anyhow::anyhow!("cannot initialize logging: {e}"))?;

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("cannot load configuration from {}", cli.config))?;

    info!(
        config = %cli.config,
        bind = %cli.bind,
        simhash_size = settings.simhash.size,
        expire_after = settings.simhash.expire_after,
        threads = settings.threads,
        queue_workers = settings.queue_workers,
        "starting wayback-discover-diff"
    );

    let metrics = Metrics::new(settings.statsd.as_ref());
    let store = Store::connect(&settings)
        .await
        .context("cannot connect to the fingerprint store")?;
    let queue = JobQueue::new(store.connection());
    let discover = Arc::new(Discover::new(&settings, store.clone(), metrics.clone())?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let worker = tokio::spawn(queue::run_worker(
        queue.clone(),
        discover,
        store.clone(),
        metrics.clone(),
        settings.queue_workers,
        shutdown.clone(),
    ));

    let state = AppState {
        store,
        queue,
        metrics,
        snapshots_per_page: settings.snapshots.number_per_page,
    };
    let app = web::router(state, &settings.cors);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("cannot bind {}", cli.bind))?;
    info!(bind = %cli.bind, "http server listening");

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
        .context("http server error")?;

    shutdown.cancel();
    worker.await.context("queue worker panicked")?;
    info!("shut down cleanly");
    Ok(())
}
