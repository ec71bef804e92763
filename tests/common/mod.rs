//! ---
//! lw_section: "04-testing-qa"
//! lw_subsection: "integration-tests"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Shared fixtures for licwatch integration tests."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use licwatch_licensing::{EngineSettings, LicensePayload, ManualClock, SignedLicenseEngine};

pub const PRODUCT: &str = "licwatch";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[19u8; 32])
}

/// 2026-01-01T00:00:00Z; every fixture license starts here.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn build_date() -> DateTime<Utc> {
    epoch() - Duration::days(7)
}

pub fn payload(license_id: &str, features: &[&str], expires_in: Duration) -> LicensePayload {
    let expiration = epoch() + expires_in;
    LicensePayload {
        license_id: license_id.to_owned(),
        customer_id: "acme".to_owned(),
        product: PRODUCT.to_owned(),
        issue_time: epoch().to_rfc3339(),
        start_time: epoch().to_rfc3339(),
        expiration_time: expiration.to_rfc3339(),
        termination_time: (expiration + Duration::days(30)).to_rfc3339(),
        features: features.iter().map(|f| (*f).to_owned()).collect(),
    }
}

pub fn sign(payload: &LicensePayload) -> String {
    let signature = signing_key().sign(&payload.signing_bytes().unwrap());
    let envelope = serde_json::json!({
        "version": 1,
        "payload": payload,
        "signature": general_purpose::STANDARD.encode(signature.to_bytes()),
    });
    general_purpose::STANDARD.encode(serde_json::to_vec(&envelope).unwrap())
}

pub fn license(license_id: &str, features: &[&str], expires_in: Duration) -> String {
    sign(&payload(license_id, features, expires_in))
}

/// Engine bound to the fixture key and a manual clock one hour past [`epoch`].
pub fn engine(check_interval: StdDuration) -> (SignedLicenseEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch() + Duration::hours(1)));
    let settings = EngineSettings::new(PRODUCT, signing_key().verifying_key())
        .with_clock(clock.clone())
        .with_check_interval(check_interval)
        .with_warnings(
            StdDuration::from_secs(7 * 24 * 60 * 60),
            StdDuration::from_secs(60 * 60),
        );
    (SignedLicenseEngine::new(settings), clock)
}
