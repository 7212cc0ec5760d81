// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use homesync_auth::jwt::JwtSessionValidator;
use homesync_auth::session::{Session, SessionStore};
use homesync_auth::traits::{Identity, SessionValidator};
use homesync_realtime::SubscriptionController;
use testing::config::{SoakConfig, SoakError, load_config};
use testing::flaky::FlakyBackend;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Soak configuration file
    #[arg(short, long, value_name = "CONFIGURATION", required = true)]
    config: String,

    /// How long to run, e.g. 30s or 5m
    #[arg(short, long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration)]
    duration: Duration,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    duration_str::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), SoakError> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    config.tracing.setup_tracing_subscriber();

    info!(
        config = %args.config,
        duration_ms = args.duration.as_millis() as u64,
        subscriptions = config.subscriptions.len(),
        "soak starting"
    );

    let store = SessionStore::new();
    store.set(Session::new(
        Identity::new(&config.session.identity),
        config.session.token.clone().unwrap_or_default(),
    ));

    match config.session.token {
        Some(_) => run(&config, args.duration, Arc::new(JwtSessionValidator::new(store))).await,
        None => run(&config, args.duration, Arc::new(store)).await,
    }
}

async fn run<V>(config: &SoakConfig, duration: Duration, validator: Arc<V>) -> Result<(), SoakError>
where
    V: SessionValidator + 'static,
{
    let backend = Arc::new(FlakyBackend::new(config.backend.open_failure_probability));
    let controller =
        SubscriptionController::new(backend.clone(), validator).with_settings(config.settings.clone());

    let mut running = Vec::with_capacity(config.subscriptions.len());
    for entry in &config.subscriptions {
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        let subscription = entry.to_config(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })?;
        running.push((controller.configure(subscription)?, changes));
    }

    let deadline = Instant::now() + duration;
    let mut ticker = time::interval(config.backend.tick);
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => break,
            _ = ticker.tick() => {
                backend.broadcast_change();
                let faults = backend.inject_faults(config.backend.fault_probability);
                if faults > 0 {
                    warn!(%faults, "faults injected");
                }
            }
        }
    }

    for (handle, changes) in running {
        let status = handle.status();
        let health = &status.health;
        println!(
            "{:<20} state={:?} ready={} changes={} retries={} auth_retries={} circuit_open={} last_error={}",
            handle.resource_name(),
            status.state,
            status.is_ready,
            changes.load(Ordering::Relaxed),
            health.retry_count(),
            health.auth_retry_count(),
            health.circuit_breaker_open(),
            health.last_error().unwrap_or("-"),
        );
        handle.shutdown().await;
    }

    info!(
        opens = backend.open_count(),
        live = backend.live_channels(),
        "soak finished"
    );
    Ok(())
}
