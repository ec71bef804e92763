//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use tracing::debug;

use crate::core::LicenseDetails;

static LICENSE_VALIDATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "licwatch_license_validations_total",
        "Total number of license validations that succeeded, including entitlement re-checks of the boot license"
    )
    .expect("metric registration to succeed")
});

static LICENSE_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "licwatch_license_rejections_total",
        "Total number of license validations that failed",
        &["reason"]
    )
    .expect("metric registration to succeed")
});

/// Record a successful license validation.
///
/// Every validator call lands here, so feature checks that re-validate the
/// boot license count too.
pub fn record_license_validated(details: &LicenseDetails) {
    LICENSE_VALIDATIONS_TOTAL.inc();
    debug!(
        license_id = %details.license_id,
        customer_id = %details.customer_id,
        expiration_time = %details.expiration_time,
        "license validated"
    );
}

/// Record a rejected license.
pub fn record_license_rejected(reason: &str) {
    LICENSE_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    debug!(reason = reason, "license rejected");
}
