mod api;
mod expander;
mod poller;

use anyhow::{anyhow, Context};
use clap::Parser;
use railtrace::config::Config;
use railtrace::live_status::LiveStatusClient;
use railtrace::postgres_tools::make_async_pool;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(version, about = "Live train run tracker")]
struct Args {
    /// Run a single poll cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let cfg = Config::from_env();
    anyhow::ensure!(!cfg.database.url.is_empty(), "DATABASE_URL must be set");
    let tz = cfg
        .tz()
        .map_err(|err| anyhow!("invalid TIMEZONE {:?}: {}", cfg.timezone, err))?;

    tracing::info!(
        "configuration loaded | timezone: {} | server: {} | poller: {} workers / {:?} window",
        cfg.timezone,
        cfg.server.addr,
        cfg.poller.concurrency,
        cfg.poller.window
    );

    let pool = Arc::new(
        make_async_pool(&cfg.database)
            .await
            .map_err(|err| anyhow!("failed to build connection pool: {}", err))?,
    );

    let client = Arc::new(
        LiveStatusClient::new(&cfg.upstream, cfg.poller.proxy_url.as_deref())
            .context("failed to build upstream client")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (restart_tx, restart_rx) = watch::channel(());

    if args.once {
        let mut shutdown = shutdown_rx.clone();
        let processed =
            poller::execute_cycle(&pool, &client, &cfg.poller, tz, &mut shutdown).await;
        tracing::info!("single cycle finished | processed: {}", processed);
        return Ok(());
    }

    let poller_task = tokio::spawn(poller::run(
        Arc::clone(&pool),
        Arc::clone(&client),
        cfg.poller.clone(),
        tz,
        shutdown_rx.clone(),
    ));

    let expander_task = tokio::spawn(expander::run(
        Arc::clone(&pool),
        tz,
        shutdown_rx.clone(),
    ));

    let api_task = tokio::spawn(api::supervise(
        cfg.server.clone(),
        Arc::clone(&pool),
        shutdown_rx.clone(),
        restart_rx,
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
            _ = sighup.recv() => {
                tracing::info!("restart signal received, rebuilding api server");
                let _ = restart_tx.send(());
            }
        }
    }

    tracing::info!("shutdown signal received, cleaning up");
    let _ = shutdown_tx.send(true);

    let drain = futures::future::join_all([poller_task, expander_task, api_task]);
    if tokio::time::timeout(cfg.server.shutdown_timeout, drain)
        .await
        .is_err()
    {
        tracing::warn!("shutdown budget exceeded, abandoning in-flight tasks");
    }

    tracing::info!("application stopped");
    Ok(())
}
