//! Long-running sync daemon.
//!
//! Syncs once at startup, then whenever the network comes back and on a
//! fixed interval, until Ctrl-C.

use clap::Args;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use shelfsync_core::{LocalStore, SyncOutcome};

use crate::config::Config;
use crate::sync::{network_monitor, SyncEngines};

/// Run sync continuously in the foreground
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Seconds between periodic syncs (overrides sync.interval_secs)
    #[arg(long)]
    interval: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    NetworkRestored,
    Timer,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::NetworkRestored => write!(f, "network restored"),
            Trigger::Timer => write!(f, "timer"),
        }
    }
}

impl WatchCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let interval = self
            .interval
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| config.sync.interval());

        let monitor = network_monitor(&config.sync);
        let engines = SyncEngines::new(store.clone(), &config.sync, Arc::new(monitor.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = monitor.subscribe(move |online| {
            if online {
                let _ = tx.send(Trigger::NetworkRestored);
            }
        });

        println!(
            "Watching for changes (every {}s). Press Ctrl-C to stop.",
            interval.as_secs()
        );

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        let cycles = watch_loop(&engines, interval, rx, shutdown).await;

        monitor.unsubscribe(subscription);
        println!("Stopped after {} sync cycle(s).", cycles);
        Ok(())
    }
}

/// Drives sync cycles until `shutdown` resolves. Returns the cycle count.
async fn watch_loop(
    engines: &SyncEngines,
    interval: Duration,
    mut triggers: mpsc::UnboundedReceiver<Trigger>,
    shutdown: impl Future<Output = ()>,
) -> usize {
    tokio::pin!(shutdown);

    run_cycle(engines, Trigger::Startup).await;
    let mut cycles = 1;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let trigger = tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => Trigger::Timer,
            Some(trigger) = triggers.recv() => trigger,
        };

        run_cycle(engines, trigger).await;
        cycles += 1;
    }

    cycles
}

async fn run_cycle(engines: &SyncEngines, trigger: Trigger) {
    tracing::info!("Sync triggered by {}", trigger);

    for (entity_type, result) in engines.sync(None, false).await {
        match result {
            Ok(report) if report.outcome == SyncOutcome::Completed && report.has_failures() => {
                tracing::warn!("{}", report);
            }
            Ok(report) if report.outcome == SyncOutcome::Completed => {
                tracing::info!("{}", report);
            }
            Ok(report) => {
                tracing::debug!("{}", report);
            }
            Err(e) => {
                tracing::error!("{} sync failed: {}", entity_type, e);
            }
        }
    }
}
