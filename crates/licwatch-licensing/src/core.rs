//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::certificates::{verify_certificate, LicenseCertificate};
use crate::clock::Clock;
use crate::engine::{EngineError, Result, Validator};
use crate::logging::{record_license_rejected, record_license_validated};

/// Signed portion of a license envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    /// Unique license identifier.
    pub license_id: String,
    /// Customer the license was issued to.
    pub customer_id: String,
    /// Product the license applies to.
    pub product: String,
    /// RFC 3339 issuance timestamp.
    pub issue_time: String,
    /// RFC 3339 instant the license becomes valid.
    pub start_time: String,
    /// RFC 3339 expiration timestamp.
    pub expiration_time: String,
    /// RFC 3339 termination timestamp.
    pub termination_time: String,
    /// Entitled feature names.
    #[serde(default)]
    pub features: Vec<String>,
}

impl LicensePayload {
    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| EngineError::Malformed(format!("failed to serialise payload: {err}")))
    }
}

/// Metadata extracted from a validated license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseDetails {
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
    /// Termination timestamp; the license is unusable afterwards.
    pub termination_time: DateTime<Utc>,
    /// Raw feature names from the payload.
    pub features: Vec<String>,
}

impl LicenseDetails {
    /// Returns true once `now` reaches the expiration time.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }

    /// Returns true once `now` reaches the termination time.
    #[must_use]
    pub fn is_terminated_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.termination_time
    }

    fn from_payload(payload: LicensePayload) -> Result<Self> {
        Ok(Self {
            issue_time: parse_time("issue_time", &payload.issue_time)?,
            start_time: parse_time("start_time", &payload.start_time)?,
            expiration_time: parse_time("expiration_time", &payload.expiration_time)?,
            termination_time: parse_time("termination_time", &payload.termination_time)?,
            license_id: payload.license_id,
            customer_id: payload.customer_id,
            product: payload.product,
            features: payload.features,
        })
    }
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| EngineError::Malformed(format!("invalid {field} timestamp: {err}")))
}

/// Validator for Ed25519 signed licenses bound to a build timestamp.
#[derive(Debug, Clone)]
pub struct SignedLicenseValidator {
    public_key: VerifyingKey,
    product: String,
    build_date: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl SignedLicenseValidator {
    /// Construct a validator for the given trust anchor and product.
    #[must_use]
    pub fn new(
        public_key: VerifyingKey,
        product: impl Into<String>,
        build_date: DateTime<Utc>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            public_key,
            product: product.into(),
            build_date,
            clock,
        }
    }

    /// Parse, verify, and time-check a license from a raw string.
    pub fn parse(&self, raw: &str) -> Result<LicenseDetails> {
        let certificate = LicenseCertificate::decode(raw)?;
        verify_certificate(&certificate, &self.public_key)?;
        let details = LicenseDetails::from_payload(certificate.payload)?;

        if details.product != self.product {
            return Err(EngineError::ProductMismatch {
                expected: self.product.clone(),
                found: details.product,
            });
        }

        let now = self.clock.now();
        if now < details.start_time {
            return Err(EngineError::NotYetValid {
                license_id: details.license_id,
                start_time: details.start_time,
            });
        }
        if details.is_terminated_at(now) {
            return Err(EngineError::Terminated {
                license_id: details.license_id,
                termination_time: details.termination_time,
            });
        }
        if details.is_expired_at(now) {
            return Err(EngineError::Expired {
                license_id: details.license_id,
                expiration_time: details.expiration_time,
            });
        }
        if self.build_date > details.expiration_time {
            return Err(EngineError::ExpiredBeforeBuild {
                license_id: details.license_id,
                expiration_time: details.expiration_time,
                build_date: self.build_date,
            });
        }
        Ok(details)
    }
}

impl Validator for SignedLicenseValidator {
    fn validate(&self, blob: &str) -> Result<LicenseDetails> {
        match self.parse(blob) {
            Ok(details) => {
                record_license_validated(&details);
                Ok(details)
            }
            Err(err) => {
                record_license_rejected(err.reason());
                Err(err)
            }
        }
    }
}
