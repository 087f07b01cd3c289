//! Expired-vote sweeper.
//!
//! Sweeps once right away (servers that restart often would otherwise
//! never reach the first tick) and then on a fixed interval. The sweep runs
//! on the blocking pool so a slow disk never stalls vote ingestion. A
//! failed sweep is logged and the next tick tries again.
//!
//! Shutdown uses a `tokio::sync::watch` channel: [`CleanupHandle::stop`]
//! signals it and waits for the loop to exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{StorageError, VoteStore};

/// Called with the number of entries removed after each successful sweep.
pub type SweepObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// Periodic `cleanup_expired` driver.
pub struct CleanupScheduler {
    store: Arc<dyn VoteStore>,
    ttl_hours: u32,
    interval: Duration,
    observer: Option<SweepObserver>,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn VoteStore>, ttl_hours: u32, interval: Duration) -> Self {
        Self {
            store,
            ttl_hours,
            interval,
            observer: None,
        }
    }

    /// Build from hour-granular settings.
    pub fn from_hours(store: Arc<dyn VoteStore>, ttl_hours: u32, interval_hours: u32) -> Self {
        let interval = Duration::from_secs(u64::from(interval_hours.max(1)) * 3600);
        Self::new(store, ttl_hours, interval)
    }

    /// Register a callback for sweep results (e.g. a metrics counter).
    pub fn on_sweep(mut self, observer: SweepObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run a single sweep on the blocking pool.
    pub async fn sweep(&self) -> Result<usize, StorageError> {
        let store = Arc::clone(&self.store);
        let ttl_hours = self.ttl_hours;
        let removed = tokio::task::spawn_blocking(move || store.cleanup_expired(ttl_hours))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))??;

        if let Some(observer) = &self.observer {
            observer(removed);
        }
        Ok(removed)
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> CleanupHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        CleanupHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ttl_hours = self.ttl_hours,
            interval_secs = self.interval.as_secs(),
            "vote cleanup scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // First tick completes immediately.
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => debug!("vote cleanup: nothing expired"),
                        Ok(removed) => info!(removed, "vote cleanup removed expired entries"),
                        Err(e) => warn!(error = %e, "vote cleanup failed; retrying next interval"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("vote cleanup scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Running scheduler.
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Signal the loop and wait for it to finish its current sweep.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "vote cleanup task ended abnormally");
        }
    }
}
