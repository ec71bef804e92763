//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! licwatch core: the process-wide license watcher, feature entitlement
//! queries, the monitor loop that consumes engine events, and the shared
//! configuration, logging, and metrics plumbing.

pub mod config;
pub mod error;
pub mod features;
pub mod license;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod throttle;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::config::{EngineConfig, LicenseConfig, LoggingConfig, LICENSE_ENV, LICENSE_PATH_ENV};
pub use crate::error::{Result, WatcherError};
pub use crate::features::{Feature, FeatureSet};
pub use crate::license::{License, LicenseSnapshot};
pub use crate::logging::{init_tracing, LogFormat};
pub use crate::metrics::LicenseMetrics;
pub use crate::monitor::METRICS_INTERVAL;
pub use crate::throttle::{FeatureLogThrottle, FEATURE_LOG_INTERVAL};
pub use crate::watcher::{LicenseWatcher, MISSING_LICENSE_MESSAGE};
