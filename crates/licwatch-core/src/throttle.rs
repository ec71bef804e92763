//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::features::Feature;

/// Minimum spacing between two "feature unlicensed" warnings for one feature.
pub const FEATURE_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Per-feature rate limit for unlicensed-feature warnings.
#[derive(Debug)]
pub struct FeatureLogThrottle {
    interval: Duration,
    last_logged: Mutex<HashMap<Feature, Instant>>,
}

impl Default for FeatureLogThrottle {
    fn default() -> Self {
        Self::new(FEATURE_LOG_INTERVAL)
    }
}

impl FeatureLogThrottle {
    /// Throttle with a custom interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true, and records `now`, when `feature` may be logged again.
    pub fn should_log(&self, feature: Feature, now: Instant) -> bool {
        let mut last_logged = self.last_logged.lock();
        if let Some(previous) = last_logged.get(&feature) {
            if now.saturating_duration_since(*previous) <= self.interval {
                return false;
            }
        }
        last_logged.insert(feature, now);
        true
    }

    /// Last instant a warning was let through for `feature`.
    #[must_use]
    pub fn last_logged(&self, feature: Feature) -> Option<Instant> {
        self.last_logged.lock().get(&feature).copied()
    }
}
