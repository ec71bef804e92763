//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
//! In-memory validation engine for watcher and monitor tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use licwatch_licensing::{
    EngineError, EngineEvents, EngineWatcher, ExpirationWarning, LicenseDetails, LicenseEngine,
    Result, Validator, WatcherOptions,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub(crate) fn details(license_id: &str, features: &[&str], expires_in: Duration) -> LicenseDetails {
    LicenseDetails {
        license_id: license_id.to_owned(),
        customer_id: "customer-1".to_owned(),
        product: "licwatch".to_owned(),
        issue_time: epoch(),
        start_time: epoch(),
        expiration_time: epoch() + expires_in,
        termination_time: epoch() + expires_in + Duration::days(30),
        features: features.iter().map(|f| (*f).to_owned()).collect(),
    }
}

#[derive(Default)]
pub(crate) struct MockShared {
    pub validations: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_persist: AtomicBool,
    pub fail_retrieve: AtomicBool,
    known: Mutex<HashMap<String, LicenseDetails>>,
    revoked: Mutex<HashSet<String>>,
}

impl MockShared {
    pub(crate) fn register(&self, blob: &str, details: LicenseDetails) {
        self.known.lock().insert(blob.to_owned(), details);
    }

    /// Make `blob` fail validation from now on, as if it had expired.
    pub(crate) fn revoke(&self, blob: &str) {
        self.revoked.lock().insert(blob.to_owned());
    }

    pub(crate) fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct MockValidator {
    shared: Arc<MockShared>,
}

impl Validator for MockValidator {
    fn validate(&self, blob: &str) -> Result<LicenseDetails> {
        self.shared.validations.fetch_add(1, Ordering::SeqCst);
        let known = self.shared.known.lock().get(blob).cloned();
        match known {
            Some(details) if self.shared.revoked.lock().contains(blob) => {
                Err(EngineError::Expired {
                    license_id: details.license_id,
                    expiration_time: details.expiration_time,
                })
            }
            Some(details) => Ok(details),
            None => Err(EngineError::Malformed(format!("unknown blob '{blob}'"))),
        }
    }
}

struct MockWatcher {
    shared: Arc<MockShared>,
    validator: Arc<dyn Validator>,
    current: Mutex<LicenseDetails>,
    events: Mutex<Option<EngineEvents>>,
}

impl EngineWatcher for MockWatcher {
    fn set_license(&self, blob: &str) -> Result<LicenseDetails> {
        if self.shared.fail_persist.load(Ordering::SeqCst) {
            return Err(EngineError::Config("persistence unavailable".to_owned()));
        }
        let details = self.validator.validate(blob)?;
        *self.current.lock() = details.clone();
        Ok(details)
    }

    fn license(&self) -> Result<LicenseDetails> {
        if self.shared.fail_retrieve.load(Ordering::SeqCst) {
            return Err(EngineError::Config("license store unavailable".to_owned()));
        }
        Ok(self.current.lock().clone())
    }

    fn take_events(&self) -> Option<EngineEvents> {
        self.events.lock().take()
    }

    fn stop(&self) {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sending halves of the mock engine's event channels.
pub(crate) struct MockSenders {
    pub updates: mpsc::Sender<LicenseDetails>,
    pub errors: mpsc::Sender<EngineError>,
    pub warnings: mpsc::Sender<ExpirationWarning>,
}

pub(crate) struct MockEngine {
    pub shared: Arc<MockShared>,
    events: Mutex<Option<EngineEvents>>,
}

impl MockEngine {
    pub(crate) fn new() -> (Self, MockSenders) {
        let (update_tx, updates) = mpsc::channel(16);
        let (error_tx, errors) = mpsc::channel(16);
        let (warning_tx, warnings) = mpsc::channel(16);
        let engine = Self {
            shared: Arc::new(MockShared::default()),
            events: Mutex::new(Some(EngineEvents {
                updates,
                errors,
                warnings,
            })),
        };
        let senders = MockSenders {
            updates: update_tx,
            errors: error_tx,
            warnings: warning_tx,
        };
        (engine, senders)
    }
}

impl LicenseEngine for MockEngine {
    fn validator(&self, _build_date: DateTime<Utc>) -> Result<Arc<dyn Validator>> {
        Ok(Arc::new(MockValidator {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn new_watcher(
        &self,
        options: WatcherOptions,
    ) -> Result<(Box<dyn EngineWatcher>, LicenseDetails)> {
        let initial = options.validator.validate(&options.initial_license)?;
        let watcher = MockWatcher {
            shared: Arc::clone(&self.shared),
            validator: options.validator,
            current: Mutex::new(initial.clone()),
            events: Mutex::new(self.events.lock().take()),
        };
        Ok((Box::new(watcher), initial))
    }
}
