//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use licwatch_licensing::EngineEvents;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

use crate::error::{Result, WatcherError};
use crate::watcher::LicenseWatcher;

/// Period of the expiration gauge refresh.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(1);

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

fn truncated_seconds(remaining: chrono::Duration) -> Duration {
    Duration::from_secs(remaining.num_seconds().max(0) as u64)
}

impl LicenseWatcher {
    /// Spawn the license monitor on the current tokio runtime.
    ///
    /// The monitor runs until `shutdown` fires or its sender is dropped, then
    /// stops the engine watcher. Only one monitor may run per watcher.
    pub fn start(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let events = self
            .engine_watcher()
            .take_events()
            .ok_or(WatcherError::MonitorAlreadyStarted)?;
        let watcher = Arc::clone(self);
        Ok(tokio::spawn(async move {
            watcher.monitor(events, shutdown).await;
        }))
    }

    async fn monitor(&self, events: EngineEvents, mut shutdown: broadcast::Receiver<()>) {
        let EngineEvents {
            mut updates,
            mut errors,
            mut warnings,
        } = events;
        let (mut updates_open, mut errors_open, mut warnings_open) = (true, true, true);
        let mut metrics_ticker = time::interval(METRICS_INTERVAL);
        metrics_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        debug!("license monitor started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = metrics_ticker.tick() => self.publish_expiration(),
                update = updates.recv(), if updates_open => match update {
                    Some(details) => {
                        if shutdown_requested(&mut shutdown) {
                            break;
                        }
                        self.record_event("update");
                        debug!(license_id = %details.license_id, "received update from license engine");
                    }
                    None => updates_open = false,
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) => {
                        self.record_event("error");
                        error!(error = %err, "license expired, please update license");
                    }
                    None => errors_open = false,
                },
                warning = warnings.recv(), if warnings_open => match warning {
                    Some(warning) => {
                        self.record_event("warning");
                        let time_left = truncated_seconds(warning.expiration_time - Utc::now());
                        warn!(
                            license_id = %warning.license_id,
                            time_left = ?time_left,
                            "license expiring"
                        );
                    }
                    None => warnings_open = false,
                },
            }
        }

        self.engine_watcher().stop();
        debug!("license monitor stopped");
    }

    fn publish_expiration(&self) {
        if let Some(metrics) = self.metrics() {
            metrics.set_expiration(&self.current_license());
        }
    }

    fn record_event(&self, kind: &str) {
        if let Some(metrics) = self.metrics() {
            metrics.record_engine_event(kind);
        }
    }
}
