//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
//! Contract between the license watcher and a validation engine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::LicenseDetails;

/// Result alias used throughout the licensing engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by the validation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// License material could not be decoded.
    #[error("license is malformed: {0}")]
    Malformed(String),
    /// Signature did not verify against the trusted key.
    #[error("license signature verification failed: {0}")]
    InvalidSignature(String),
    /// License was issued for another product.
    #[error("license is issued for product '{found}', expected '{expected}'")]
    ProductMismatch {
        /// Product this engine validates for.
        expected: String,
        /// Product named in the license.
        found: String,
    },
    /// License start time lies in the future.
    #[error("license '{license_id}' is not valid before {start_time}")]
    NotYetValid {
        /// Identifier of the rejected license.
        license_id: String,
        /// Instant the license becomes valid.
        start_time: DateTime<Utc>,
    },
    /// License passed its expiration time.
    #[error("license '{license_id}' expired at {expiration_time}")]
    Expired {
        /// Identifier of the rejected license.
        license_id: String,
        /// Expiration instant.
        expiration_time: DateTime<Utc>,
    },
    /// License passed its termination time.
    #[error("license '{license_id}' was terminated at {termination_time}")]
    Terminated {
        /// Identifier of the rejected license.
        license_id: String,
        /// Termination instant.
        termination_time: DateTime<Utc>,
    },
    /// License expired before the running binary was built.
    #[error("license '{license_id}' expired at {expiration_time}, before this build ({build_date})")]
    ExpiredBeforeBuild {
        /// Identifier of the rejected license.
        license_id: String,
        /// Expiration instant.
        expiration_time: DateTime<Utc>,
        /// Reference build timestamp.
        build_date: DateTime<Utc>,
    },
    /// Engine configuration is unusable.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Short label used for the rejection counter.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Malformed(_) => "malformed",
            EngineError::InvalidSignature(_) => "invalid_signature",
            EngineError::ProductMismatch { .. } => "product_mismatch",
            EngineError::NotYetValid { .. } => "not_yet_valid",
            EngineError::Expired { .. } => "expired",
            EngineError::Terminated { .. } => "terminated",
            EngineError::ExpiredBeforeBuild { .. } => "expired_before_build",
            EngineError::Config(_) => "config",
        }
    }
}

/// Warning emitted while a license approaches its expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationWarning {
    /// Identifier of the expiring license.
    pub license_id: String,
    /// Instant the license expires.
    pub expiration_time: DateTime<Utc>,
}

/// Receivers for the engine watcher's lifecycle events.
#[derive(Debug)]
pub struct EngineEvents {
    /// A new license was accepted by the engine watcher.
    pub updates: mpsc::Receiver<LicenseDetails>,
    /// The held license expired or was terminated.
    pub errors: mpsc::Receiver<EngineError>,
    /// The held license is close to expiring.
    pub warnings: mpsc::Receiver<ExpirationWarning>,
}

/// Validates raw license blobs.
pub trait Validator: Send + Sync {
    /// Decode, verify, and time-check a license blob.
    fn validate(&self, blob: &str) -> Result<LicenseDetails>;
}

/// Options for [`LicenseEngine::new_watcher`].
#[derive(Clone)]
pub struct WatcherOptions {
    /// Blob the engine watcher starts with.
    pub initial_license: String,
    /// Validator the engine watcher applies to every blob.
    pub validator: Arc<dyn Validator>,
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("initial_license_len", &self.initial_license.len())
            .finish_non_exhaustive()
    }
}

/// Handle to the engine's own license watcher.
pub trait EngineWatcher: Send + Sync {
    /// Validate and persist a new license, returning the accepted details.
    fn set_license(&self, blob: &str) -> Result<LicenseDetails>;
    /// Canonical license currently held by the engine.
    fn license(&self) -> Result<LicenseDetails>;
    /// Hand out the event receivers; `None` once they have been taken.
    fn take_events(&self) -> Option<EngineEvents>;
    /// Stop background checking. Safe to call more than once.
    fn stop(&self);
}

/// Factory for validators and engine watchers.
pub trait LicenseEngine: Send + Sync {
    /// Build a validator bound to the reference build timestamp.
    fn validator(&self, build_date: DateTime<Utc>) -> Result<Arc<dyn Validator>>;
    /// Create an engine watcher seeded with the initial license.
    fn new_watcher(
        &self,
        options: WatcherOptions,
    ) -> Result<(Box<dyn EngineWatcher>, LicenseDetails)>;
}
