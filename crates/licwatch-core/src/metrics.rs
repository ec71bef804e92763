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

use prometheus::{Gauge, IntCounterVec, Opts, Registry};

use crate::error::Result;
use crate::license::License;

/// Metrics published by the license watcher.
#[derive(Clone)]
pub struct LicenseMetrics {
    registry: Arc<Registry>,
    expiration_time_epoch: Gauge,
    engine_events: IntCounterVec,
}

impl LicenseMetrics {
    /// Register all license metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let expiration_time_epoch = Gauge::new(
            "license_expiration_time_epoch",
            "Expiration time of the active license as Unix seconds",
        )?;
        registry.register(Box::new(expiration_time_epoch.clone()))?;

        let engine_events = IntCounterVec::new(
            Opts::new(
                "license_engine_events_total",
                "License engine events handled by the monitor, by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(engine_events.clone()))?;

        Ok(Self {
            registry,
            expiration_time_epoch,
            engine_events,
        })
    }

    /// Access the underlying registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Publish the license expiration.
    pub fn set_expiration(&self, license: &License) {
        self.expiration_time_epoch
            .set(license.expiration_time.timestamp() as f64);
    }

    /// Last published expiration, Unix seconds.
    pub fn expiration_time_epoch(&self) -> f64 {
        self.expiration_time_epoch.get()
    }

    /// Count an engine event handled by the monitor.
    pub fn record_engine_event(&self, kind: &str) {
        self.engine_events.with_label_values(&[kind]).inc();
    }

    /// Engine events of `kind` handled so far.
    pub fn engine_events(&self, kind: &str) -> u64 {
        self.engine_events.with_label_values(&[kind]).get()
    }
}

impl std::fmt::Debug for LicenseMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseMetrics").finish_non_exhaustive()
    }
}
