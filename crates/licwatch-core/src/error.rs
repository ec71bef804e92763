//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use licwatch_licensing::EngineError;
use thiserror::Error;

use crate::features::Feature;

/// Result alias used throughout the watcher crate.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Error type for the license watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// License source or reference build date is missing or unusable.
    #[error("{0}")]
    Config(String),
    /// The validation engine rejected a license.
    #[error("{context}: {source}")]
    Validation {
        /// Step that failed.
        context: &'static str,
        /// Engine error behind the failure.
        #[source]
        source: EngineError,
    },
    /// Entitlement for the feature is absent.
    #[error("feature \"{0}\" is unlicensed")]
    UnlicensedFeature(Feature),
    /// The license monitor already owns the engine event channels.
    #[error("license monitor already started")]
    MonitorAlreadyStarted,
    /// Metric registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl WatcherError {
    pub(crate) fn validation(context: &'static str, source: EngineError) -> Self {
        WatcherError::Validation { context, source }
    }
}
