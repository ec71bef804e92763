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
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use licwatch_licensing::{EngineWatcher, LicenseEngine, Validator, WatcherOptions};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::LicenseConfig;
use crate::error::{Result, WatcherError};
use crate::features::{Feature, FeatureSet};
use crate::license::{License, LicenseSnapshot};
use crate::metrics::LicenseMetrics;
use crate::throttle::FeatureLogThrottle;

/// Error text returned when no license source is configured.
pub const MISSING_LICENSE_MESSAGE: &str = "failed to read license: license is missing. \
To add a license, set \"license_path\" or \"license\" in the [license] section of the \
configuration file, set the LICWATCH_LICENSE environment variable to the license text, \
or set the LICWATCH_LICENSE_PATH environment variable to the path of a license file";

const MISSING_BUILD_DATE_MESSAGE: &str =
    "build date is unset; license expiration cannot be checked against this build";

fn trim_line_endings(blob: &str) -> &str {
    blob.trim_end_matches(|c: char| c == '\r' || c == '\n')
}

/// Authoritative view of the active license for one server.
///
/// Readers go through [`LicenseWatcher::snapshot`] and friends and never
/// block on writers. Writers are serialised so that each stored snapshot
/// pairs a blob with the license parsed from that same blob.
pub struct LicenseWatcher {
    current: ArcSwap<LicenseSnapshot>,
    file_license: String,
    validator: Arc<dyn Validator>,
    engine_watcher: Box<dyn EngineWatcher>,
    write_lock: Mutex<()>,
    log_throttle: FeatureLogThrottle,
    metrics: Option<LicenseMetrics>,
}

impl LicenseWatcher {
    /// Build a watcher from the configured license source.
    ///
    /// The monitor is not started; see [`LicenseWatcher::start`].
    pub fn new(config: &LicenseConfig, engine: &dyn LicenseEngine) -> Result<Self> {
        let blob = config.license_string()?;
        Self::from_blob(&blob, config.build_date, engine)
    }

    /// Build a watcher from an already resolved license blob.
    pub fn from_blob(
        blob: &str,
        build_date: Option<DateTime<Utc>>,
        engine: &dyn LicenseEngine,
    ) -> Result<Self> {
        let blob = trim_line_endings(blob);
        if blob.trim().is_empty() {
            return Err(WatcherError::Config(MISSING_LICENSE_MESSAGE.to_owned()));
        }
        let build_date =
            build_date.ok_or_else(|| WatcherError::Config(MISSING_BUILD_DATE_MESSAGE.to_owned()))?;

        let validator = engine
            .validator(build_date)
            .map_err(|err| WatcherError::validation("failed to initialize license validator", err))?;
        let (engine_watcher, initial) = engine
            .new_watcher(WatcherOptions {
                initial_license: blob.to_owned(),
                validator: Arc::clone(&validator),
            })
            .map_err(|err| WatcherError::validation("failed to initialize license", err))?;
        let license = License::try_from(&initial)
            .map_err(|err| WatcherError::validation("failed to convert license", err))?;

        info!(
            license_id = %license.license_id,
            expiration_time = %license.expiration_time,
            features = license.features.len(),
            "license watcher initialised"
        );

        Ok(Self {
            current: ArcSwap::from_pointee(LicenseSnapshot::new(license, blob)),
            file_license: blob.to_owned(),
            validator,
            engine_watcher,
            write_lock: Mutex::new(()),
            log_throttle: FeatureLogThrottle::default(),
            metrics: None,
        })
    }

    /// Attach metrics; the expiration gauge is published immediately.
    #[must_use]
    pub fn with_metrics(mut self, metrics: LicenseMetrics) -> Self {
        metrics.set_expiration(&self.current_license());
        self.metrics = Some(metrics);
        self
    }

    /// Attached metrics, if any.
    pub fn metrics(&self) -> Option<&LicenseMetrics> {
        self.metrics.as_ref()
    }

    pub(crate) fn engine_watcher(&self) -> &dyn EngineWatcher {
        self.engine_watcher.as_ref()
    }

    /// Current license and blob, read together.
    #[must_use]
    pub fn snapshot(&self) -> Arc<LicenseSnapshot> {
        self.current.load_full()
    }

    /// Currently active license. Never absent after construction.
    #[must_use]
    pub fn current_license(&self) -> Arc<License> {
        self.current.load().license()
    }

    /// Raw blob of the currently active license.
    #[must_use]
    pub fn current_blob(&self) -> Arc<str> {
        self.current.load().blob()
    }

    /// Blob supplied at construction. Unchanged by later updates or reloads.
    #[must_use]
    pub fn file_license(&self) -> &str {
        &self.file_license
    }

    /// Validate `blob` without changing any state.
    pub fn validate_license(&self, blob: &str) -> Result<License> {
        let details = self
            .validator
            .validate(trim_line_endings(blob))
            .map_err(|err| WatcherError::validation("error validating license", err))?;
        License::try_from(&details)
            .map_err(|err| WatcherError::validation("failed to convert license", err))
    }

    /// Features the server may use right now.
    ///
    /// Returns the current license's features, gated on the construction-time
    /// license still validating. The gate is re-checked on every call; once
    /// it fails the empty set is returned.
    #[must_use]
    pub fn features(&self) -> FeatureSet {
        let license = self.current_license();
        if let Err(err) = self.validator.validate(&self.file_license) {
            debug!(error = %err, "file license no longer valid");
            return FeatureSet::none();
        }
        license.features.clone()
    }

    /// Succeeds when `feature` is licensed.
    ///
    /// With `emit_log`, a denial is logged at warn level at most once per
    /// feature every five minutes.
    pub fn feature_check(&self, feature: Feature, emit_log: bool) -> Result<()> {
        if self.features().contains(feature) {
            return Ok(());
        }
        if emit_log && self.log_throttle.should_log(feature, Instant::now()) {
            warn!(feature = %feature, "feature is unlicensed");
        }
        Err(WatcherError::UnlicensedFeature(feature))
    }

    /// Validate, persist, and activate a new license blob.
    ///
    /// On any failure the current snapshot is left untouched.
    pub fn set_license(&self, blob: &str) -> Result<()> {
        let blob = trim_line_endings(blob);
        let _guard = self.write_lock.lock();

        self.validator
            .validate(blob)
            .map_err(|err| WatcherError::validation("error validating license", err))?;

        if let Err(err) = self.engine_watcher.set_license(blob) {
            error!(error = %err, "failed to persist license");
            return Err(WatcherError::validation("failed to persist license", err));
        }

        let details = self
            .engine_watcher
            .license()
            .map_err(|err| WatcherError::validation("failed to retrieve license", err))?;
        let license = License::try_from(&details)
            .map_err(|err| WatcherError::validation("failed to convert license", err))?;

        info!(
            license_id = %license.license_id,
            expiration_time = %license.expiration_time,
            "license updated"
        );
        self.current
            .store(Arc::new(LicenseSnapshot::new(license, blob)));
        Ok(())
    }

    /// Re-read the license source from `config` and apply it.
    ///
    /// An empty resolved blob is a no-op.
    pub fn reload(&self, config: &LicenseConfig) -> Result<()> {
        let blob = config.license_string()?;
        if trim_line_endings(&blob).is_empty() {
            debug!("license reload found no license; keeping current license");
            return Ok(());
        }
        self.set_license(&blob)
    }
}

impl std::fmt::Debug for LicenseWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("LicenseWatcher")
            .field("license_id", &snapshot.license().license_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{details, MockEngine};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    const BLOB_A: &str = "blob-a";
    const BLOB_B: &str = "blob-b";

    fn engine() -> MockEngine {
        let (engine, _senders) = MockEngine::new();
        engine
            .shared
            .register(BLOB_A, details("lic-a", &["audit_logging", "namespaces"], Duration::days(90)));
        engine
            .shared
            .register(BLOB_B, details("lic-b", &["multi_region"], Duration::days(365)));
        engine
    }

    fn watcher(engine: &MockEngine) -> LicenseWatcher {
        LicenseWatcher::from_blob(BLOB_A, Some(crate::test_support::epoch()), engine).unwrap()
    }

    #[test]
    fn empty_blob_is_a_config_error_before_validation() {
        let engine = engine();
        let err = LicenseWatcher::from_blob("\r\n", Some(Utc::now()), &engine).unwrap_err();
        match err {
            WatcherError::Config(message) => {
                assert!(message.contains("license_path"));
                assert!(message.contains("LICWATCH_LICENSE "));
                assert!(message.contains("LICWATCH_LICENSE_PATH"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(engine.shared.validations(), 0);
    }

    #[test]
    fn missing_build_date_is_a_config_error() {
        let engine = engine();
        let err = LicenseWatcher::from_blob(BLOB_A, None, &engine).unwrap_err();
        assert!(matches!(err, WatcherError::Config(_)));
        assert_eq!(engine.shared.validations(), 0);
    }

    #[test]
    fn rejected_initial_license_is_a_validation_error() {
        let engine = engine();
        let err = LicenseWatcher::from_blob("garbage", Some(Utc::now()), &engine).unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Validation {
                context: "failed to initialize license",
                ..
            }
        ));
    }

    #[test]
    fn construction_sets_current_and_file_license() {
        let engine = engine();
        let watcher =
            LicenseWatcher::from_blob("blob-a\r\n", Some(Utc::now()), &engine).unwrap();
        assert_eq!(watcher.current_license().license_id, "lic-a");
        assert_eq!(&*watcher.current_blob(), BLOB_A);
        assert_eq!(watcher.file_license(), BLOB_A);
    }

    #[test]
    fn set_license_replaces_the_snapshot() {
        let engine = engine();
        let watcher = watcher(&engine);
        watcher.set_license("blob-b\n").unwrap();

        let snapshot = watcher.snapshot();
        assert_eq!(snapshot.license().license_id, "lic-b");
        assert_eq!(&*snapshot.blob(), BLOB_B);
        assert_eq!(watcher.file_license(), BLOB_A);
    }

    #[test]
    fn failed_set_license_leaves_state_untouched() {
        let engine = engine();
        let watcher = watcher(&engine);
        let before = watcher.snapshot();

        let err = watcher.set_license("not-a-license").unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Validation {
                context: "error validating license",
                ..
            }
        ));

        engine.shared.fail_persist.store(true, Ordering::SeqCst);
        let err = watcher.set_license(BLOB_B).unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Validation {
                context: "failed to persist license",
                ..
            }
        ));
        engine.shared.fail_persist.store(false, Ordering::SeqCst);

        engine.shared.fail_retrieve.store(true, Ordering::SeqCst);
        let err = watcher.set_license(BLOB_B).unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Validation {
                context: "failed to retrieve license",
                ..
            }
        ));

        assert!(Arc::ptr_eq(&before, &watcher.snapshot()));
    }

    #[test]
    fn unknown_feature_fails_conversion() {
        let engine = engine();
        engine
            .shared
            .register("blob-odd", details("lic-odd", &["teleportation"], Duration::days(1)));
        let watcher = watcher(&engine);
        let before = watcher.snapshot();
        let err = watcher.set_license("blob-odd").unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Validation {
                context: "failed to convert license",
                ..
            }
        ));
        assert!(Arc::ptr_eq(&before, &watcher.snapshot()));
    }

    #[test]
    fn validate_license_does_not_change_state() {
        let engine = engine();
        let watcher = watcher(&engine);
        let license = watcher.validate_license(BLOB_B).unwrap();
        assert_eq!(license.license_id, "lic-b");
        assert_eq!(watcher.current_license().license_id, "lic-a");
        assert!(watcher.validate_license("nope").is_err());
    }

    #[test]
    fn features_come_from_the_current_license_while_file_license_is_valid() {
        let engine = engine();
        let watcher = watcher(&engine);
        watcher.set_license(BLOB_B).unwrap();

        let features = watcher.features();
        assert!(features.contains(Feature::MultiRegion));
        assert!(!features.contains(Feature::AuditLogging));
        assert_eq!(features, watcher.current_license().features);
        assert!(watcher.feature_check(Feature::MultiRegion, false).is_ok());

        engine.shared.revoke(BLOB_A);
        assert!(watcher.features().is_empty());
        assert!(watcher.feature_check(Feature::MultiRegion, false).is_err());
        assert_eq!(watcher.current_license().license_id, "lic-b");
    }

    #[test]
    fn features_revalidate_on_every_call() {
        let engine = engine();
        let watcher = watcher(&engine);
        let before = engine.shared.validations();
        let _ = watcher.features();
        let _ = watcher.features();
        assert_eq!(engine.shared.validations(), before + 2);
    }

    #[test]
    fn feature_check_throttles_warnings() {
        let engine = engine();
        let watcher = watcher(&engine);

        assert!(watcher.feature_check(Feature::AuditLogging, true).is_ok());
        assert!(watcher.log_throttle.last_logged(Feature::AuditLogging).is_none());

        let err = watcher.feature_check(Feature::MultiRegion, false).unwrap_err();
        assert!(matches!(err, WatcherError::UnlicensedFeature(Feature::MultiRegion)));
        assert!(watcher.log_throttle.last_logged(Feature::MultiRegion).is_none());

        assert!(watcher.feature_check(Feature::MultiRegion, true).is_err());
        let first = watcher.log_throttle.last_logged(Feature::MultiRegion).unwrap();
        assert!(watcher.feature_check(Feature::MultiRegion, true).is_err());
        assert_eq!(
            watcher.log_throttle.last_logged(Feature::MultiRegion),
            Some(first)
        );
    }

    #[test]
    fn reload_applies_the_configured_license() {
        let engine = engine();
        let watcher = watcher(&engine);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("license.lic");
        let config = LicenseConfig {
            license_path: Some(path.clone()),
            ..Default::default()
        };

        std::fs::write(&path, "\n").unwrap();
        let before = watcher.snapshot();
        let validations = engine.shared.validations();
        watcher.reload(&config).unwrap();
        assert!(Arc::ptr_eq(&before, &watcher.snapshot()));
        assert_eq!(engine.shared.validations(), validations);

        std::fs::write(&path, "blob-b\n").unwrap();
        watcher.reload(&config).unwrap();
        assert_eq!(watcher.current_license().license_id, "lic-b");
        assert_eq!(watcher.file_license(), BLOB_A);
    }

    #[test]
    fn concurrent_readers_never_see_a_torn_snapshot() {
        let engine = engine();
        let watcher = watcher(&engine);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..200 {
                    let blob = if round % 2 == 0 { BLOB_B } else { BLOB_A };
                    watcher.set_license(blob).unwrap();
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let snapshot = watcher.snapshot();
                        let expected = match &*snapshot.blob() {
                            BLOB_A => "lic-a",
                            BLOB_B => "lic-b",
                            other => panic!("unexpected blob {other}"),
                        };
                        assert_eq!(snapshot.license().license_id, expected);
                    }
                });
            }
        });
    }
}
