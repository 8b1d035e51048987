//! ISS tracker: caches the upstream ISS position and republishes it.
//!
//! Single-binary Tokio application that:
//! 1. Serves `GET /position` from a coalescing refresh cache
//! 2. Optionally runs a consumer poller that keeps a ground-track trace
//! 3. Logs a periodic heartbeat with cache counters

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::{Error, TrackerConfig};
use iss_client::{IssClient, PositionSource};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{error, info};
use tracker::{HttpFeed, Poller, PollerState, PositionFeed, PositionService, RefreshCoordinator};

/// ISS position cache and republisher
#[derive(Parser)]
#[command(name = "iss-tracker", about = "ISS position cache and republisher")]
struct Cli {
    /// Path to the TOML config file (optional).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Fetch one sample from upstream, print it, then exit.
    #[arg(long)]
    check_upstream: bool,

    /// Only run the consumer poller against a remote tracker.
    /// Without a URL, `poller.server_url` from the config is used.
    #[arg(long, value_name = "URL", num_args = 0..=1)]
    watch: Option<Option<String>>,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "iss_tracker=info,iss_client=info,tracker=info,tower_http=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("🛰️  ISS Tracker starting up...");

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // ── Watch mode ───────────────────────────────────────────────────
    if let Some(url) = cli.watch {
        let url = url.unwrap_or_else(|| cfg.poller.server_url.clone());
        if let Err(e) = run_watch(&url, &cfg).await {
            error!("Watch failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    info!("Upstream: {} (timeout={}ms)", cfg.upstream.url, cfg.upstream.timeout_ms);
    info!(
        "Cache: max_age={}ms, upstream quota={}/s",
        cfg.cache.max_age_ms, cfg.upstream.max_requests_per_sec
    );

    let client = match IssClient::new(&cfg.upstream) {
        Ok(c) => c,
        Err(e) => {
            error!("Upstream client initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    // ── Check-upstream mode ──────────────────────────────────────────
    if cli.check_upstream {
        if let Err(e) = check_upstream(&client).await {
            error!("❌ Upstream check failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = run_tracker(client, &cfg).await {
        error!("Tracker failed: {}", e);
        std::process::exit(1);
    }

    info!("ISS Tracker shut down.");
}

/// Fetch one sample and print it as JSON.
async fn check_upstream(client: &IssClient) -> common::Result<()> {
    info!("Running upstream check against {}...", client.url());
    let sample = client.fetch().await?;
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

async fn run_tracker(client: IssClient, cfg: &TrackerConfig) -> common::Result<()> {
    // ── Shared state ─────────────────────────────────────────────────
    let source: Arc<dyn PositionSource> = Arc::new(client);
    let coordinator = RefreshCoordinator::with_quota(source, cfg.upstream.max_requests_per_sec);
    let service = PositionService::new(coordinator.clone(), cfg.cache.max_age());

    // ── Spawn tasks ──────────────────────────────────────────────────
    let listener = TcpListener::bind(&cfg.server.bind_addr).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_handle = tokio::spawn(tracker::serve(listener, service.clone(), async move {
        let _ = stop_rx.await;
    }));

    let poller = cfg.poller.enabled.then(|| {
        let feed: Arc<dyn PositionFeed> = Arc::new(service.clone());
        Poller::new(feed, cfg.poller.interval()).spawn()
    });
    let display_handle = poller
        .as_ref()
        .map(|handle| tokio::spawn(log_updates(handle.subscribe())));

    let hb_coordinator = coordinator.clone();
    let heartbeat_secs = cfg.server.heartbeat_secs;
    let mut heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(heartbeat_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let stats = hb_coordinator.stats();
            info!(
                "HEARTBEAT: has_sample={} upstream_calls={} failures={} hits={} coalesced={} throttled={}",
                hb_coordinator.peek().is_some(),
                stats.upstream_calls,
                stats.upstream_failures,
                stats.cache_hits,
                stats.coalesced_waits,
                stats.throttled,
            );
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("🚀 ISS Tracker is running. Press Ctrl+C to stop.");

    let early_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
        r = &mut server_handle => {
            error!("Server task exited unexpectedly");
            Some(r)
        }
        r = &mut heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
            None
        }
    };

    heartbeat_handle.abort();
    if let Some(handle) = poller {
        handle.shutdown().await;
    }
    if let Some(handle) = display_handle {
        let _ = handle.await;
    }

    let server_result = match early_exit {
        Some(r) => r,
        None => {
            let _ = stop_tx.send(());
            server_handle.await
        }
    };
    match server_result {
        Ok(result) => result,
        Err(e) => Err(Error::Server(format!("server task failed: {e}"))),
    }
}

async fn run_watch(base_url: &str, cfg: &TrackerConfig) -> common::Result<()> {
    let feed = HttpFeed::new(base_url, cfg.poller.timeout())?;
    info!("Watching {} every {}ms", feed.url(), cfg.poller.interval_ms);

    let handle = Poller::new(Arc::new(feed), cfg.poller.interval()).spawn();
    let display = tokio::spawn(log_updates(handle.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    let _ = display.await;
    Ok(())
}

/// Log each new position the poller displays. Ends when the poller stops.
async fn log_updates(mut rx: watch::Receiver<PollerState>) {
    let mut last_time: Option<i64> = None;

    while rx.changed().await.is_ok() {
        let (report, trace_len, segments) = {
            let state = rx.borrow_and_update();
            (
                state.displayed.clone(),
                state.trace.len(),
                state.trace.segments().len(),
            )
        };
        let Some(report) = report else {
            continue;
        };
        if last_time == Some(report.time) {
            continue;
        }
        last_time = Some(report.time);
        info!(
            "ISS at lat={:.4} lon={:.4} alt={:.1}km vel={:.0}km/h{} (trace: {} points, {} segments)",
            report.latitude,
            report.longitude,
            report.altitude,
            report.velocity,
            if report.stale { " [stale]" } else { "" },
            trace_len,
            segments,
        );
    }
}
