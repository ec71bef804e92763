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

use chrono::{DateTime, Utc};
use licwatch_licensing::{EngineError, LicenseDetails};
use serde::Serialize;

use crate::features::FeatureSet;

/// Parsed entitlement for this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    /// Unique license identifier.
    pub license_id: String,
    /// Customer the license was issued to.
    pub customer_id: String,
    /// Product the license applies to.
    pub product: String,
    /// Issuance timestamp.
    pub issue_time: DateTime<Utc>,
    /// Instant the license becomes valid.
    pub start_time: DateTime<Utc>,
    /// Expiration timestamp.
    pub expiration_time: DateTime<Utc>,
    /// Termination timestamp.
    pub termination_time: DateTime<Utc>,
    /// Entitled features.
    pub features: FeatureSet,
}

impl TryFrom<&LicenseDetails> for License {
    type Error = EngineError;

    fn try_from(details: &LicenseDetails) -> Result<Self, Self::Error> {
        let features = FeatureSet::from_names(details.features.as_slice())
            .map_err(EngineError::Malformed)?;
        Ok(Self {
            license_id: details.license_id.clone(),
            customer_id: details.customer_id.clone(),
            product: details.product.clone(),
            issue_time: details.issue_time,
            start_time: details.start_time,
            expiration_time: details.expiration_time,
            termination_time: details.termination_time,
            features,
        })
    }
}

/// Immutable pairing of a parsed license and the blob it came from.
///
/// Snapshots are only ever replaced as a whole; readers holding an older
/// snapshot keep a consistent view until they drop it.
#[derive(Debug)]
pub struct LicenseSnapshot {
    license: Arc<License>,
    blob: Arc<str>,
}

impl LicenseSnapshot {
    pub(crate) fn new(license: License, blob: &str) -> Self {
        Self {
            license: Arc::new(license),
            blob: Arc::from(blob),
        }
    }

    /// Parsed license.
    #[must_use]
    pub fn license(&self) -> Arc<License> {
        Arc::clone(&self.license)
    }

    /// Raw license blob.
    #[must_use]
    pub fn blob(&self) -> Arc<str> {
        Arc::clone(&self.blob)
    }
}
