//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
//! Engine watcher for signed licenses.
//!
//! A checker thread wakes every `check_interval` and compares the held
//! license against the engine clock. Events are pushed into bounded channels
//! with `try_send`, so a slow consumer loses events instead of stalling the
//! checker.

use std::fmt;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::core::{LicenseDetails, SignedLicenseValidator};
use crate::engine::{
    EngineError, EngineEvents, EngineWatcher, ExpirationWarning, LicenseEngine, Result, Validator,
    WatcherOptions,
};

/// Capacity of each engine event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Tunables for [`SignedLicenseEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Product name licenses must carry.
    pub product: String,
    /// Trusted Ed25519 key.
    pub public_key: VerifyingKey,
    /// Period between expiration checks.
    pub check_interval: Duration,
    /// Warnings start once expiration is closer than this.
    pub warning_window: Duration,
    /// Minimum spacing between two warnings.
    pub warning_interval: Duration,
    /// Time source for validation and checks.
    pub clock: Arc<dyn Clock>,
}

impl EngineSettings {
    /// Settings with production defaults and the system clock.
    #[must_use]
    pub fn new(product: impl Into<String>, public_key: VerifyingKey) -> Self {
        Self {
            product: product.into(),
            public_key,
            check_interval: Duration::from_secs(60),
            warning_window: Duration::from_secs(30 * 24 * 60 * 60),
            warning_interval: Duration::from_secs(60 * 60),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the check period.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Override the warning window and warning spacing.
    #[must_use]
    pub fn with_warnings(mut self, window: Duration, interval: Duration) -> Self {
        self.warning_window = window;
        self.warning_interval = interval;
        self
    }
}

/// Validation engine for Ed25519 signed licenses.
#[derive(Debug, Clone)]
pub struct SignedLicenseEngine {
    settings: EngineSettings,
}

impl SignedLicenseEngine {
    /// Construct an engine from settings.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// Access the engine settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl LicenseEngine for SignedLicenseEngine {
    fn validator(&self, build_date: DateTime<Utc>) -> Result<Arc<dyn Validator>> {
        Ok(Arc::new(SignedLicenseValidator::new(
            self.settings.public_key,
            self.settings.product.clone(),
            build_date,
            Arc::clone(&self.settings.clock),
        )))
    }

    fn new_watcher(
        &self,
        options: WatcherOptions,
    ) -> Result<(Box<dyn EngineWatcher>, LicenseDetails)> {
        let (watcher, initial) = SignedWatcher::spawn(options, &self.settings)?;
        Ok((Box::new(watcher), initial))
    }
}

struct HeldLicense {
    details: LicenseDetails,
    blob: String,
    last_warning: Option<DateTime<Utc>>,
    reported: Option<&'static str>,
}

impl HeldLicense {
    fn new(details: LicenseDetails, blob: &str) -> Self {
        Self {
            details,
            blob: blob.to_owned(),
            last_warning: None,
            reported: None,
        }
    }
}

struct WatchState {
    clock: Arc<dyn Clock>,
    warning_window: chrono::Duration,
    warning_interval: chrono::Duration,
    held: Mutex<HeldLicense>,
}

impl WatchState {
    fn check(
        &self,
        errors: &mpsc::Sender<EngineError>,
        warnings: &mpsc::Sender<ExpirationWarning>,
    ) {
        let now = self.clock.now();
        let mut held = self.held.lock();
        let expiration_time = held.details.expiration_time;

        let failure = if held.details.is_terminated_at(now) {
            Some(EngineError::Terminated {
                license_id: held.details.license_id.clone(),
                termination_time: held.details.termination_time,
            })
        } else if held.details.is_expired_at(now) {
            Some(EngineError::Expired {
                license_id: held.details.license_id.clone(),
                expiration_time,
            })
        } else {
            None
        };

        if let Some(err) = failure {
            let reason = err.reason();
            if held.reported != Some(reason) && deliver(errors, err, "error") {
                held.reported = Some(reason);
            }
            return;
        }

        if expiration_time - now > self.warning_window {
            return;
        }
        if let Some(last) = held.last_warning {
            if now - last < self.warning_interval {
                return;
            }
        }
        let warning = ExpirationWarning {
            license_id: held.details.license_id.clone(),
            expiration_time,
        };
        if deliver(warnings, warning, "warning") {
            held.last_warning = Some(now);
        }
    }
}

fn deliver<T>(tx: &mpsc::Sender<T>, event: T, kind: &'static str) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(kind, "license event channel full; dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn to_chrono(value: Duration, field: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(value)
        .map_err(|_| EngineError::Config(format!("{field} is out of range")))
}

fn run_checker(
    state: Arc<WatchState>,
    interval: Duration,
    stop: std_mpsc::Receiver<()>,
    errors: mpsc::Sender<EngineError>,
    warnings: mpsc::Sender<ExpirationWarning>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => state.check(&errors, &warnings),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("license checker stopped");
}

/// Engine watcher holding the persisted license for [`SignedLicenseEngine`].
pub struct SignedWatcher {
    validator: Arc<dyn Validator>,
    state: Arc<WatchState>,
    update_tx: mpsc::Sender<LicenseDetails>,
    events: Mutex<Option<EngineEvents>>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
    checker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SignedWatcher {
    /// Validate the initial license and start the checker thread.
    pub fn spawn(options: WatcherOptions, settings: &EngineSettings) -> Result<(Self, LicenseDetails)> {
        if settings.check_interval.is_zero() {
            return Err(EngineError::Config(
                "check_interval must be greater than zero".to_owned(),
            ));
        }
        let initial = options.validator.validate(&options.initial_license)?;

        let state = Arc::new(WatchState {
            clock: Arc::clone(&settings.clock),
            warning_window: to_chrono(settings.warning_window, "warning_window")?,
            warning_interval: to_chrono(settings.warning_interval, "warning_interval")?,
            held: Mutex::new(HeldLicense::new(initial.clone(), &options.initial_license)),
        });

        let (update_tx, updates) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (warning_tx, warnings) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let checker = {
            let state = Arc::clone(&state);
            let interval = settings.check_interval;
            thread::Builder::new()
                .name("licwatch-engine".to_owned())
                .spawn(move || run_checker(state, interval, stop_rx, error_tx, warning_tx))
                .map_err(|err| {
                    EngineError::Config(format!("failed to spawn license checker: {err}"))
                })?
        };

        let watcher = Self {
            validator: options.validator,
            state,
            update_tx,
            events: Mutex::new(Some(EngineEvents {
                updates,
                errors,
                warnings,
            })),
            stop_tx: Mutex::new(Some(stop_tx)),
            checker: Mutex::new(Some(checker)),
        };
        Ok((watcher, initial))
    }

    /// Raw blob of the held license.
    #[must_use]
    pub fn license_blob(&self) -> String {
        self.state.held.lock().blob.clone()
    }
}

impl EngineWatcher for SignedWatcher {
    fn set_license(&self, blob: &str) -> Result<LicenseDetails> {
        let details = self.validator.validate(blob)?;
        *self.state.held.lock() = HeldLicense::new(details.clone(), blob);
        deliver(&self.update_tx, details.clone(), "update");
        Ok(details)
    }

    fn license(&self) -> Result<LicenseDetails> {
        Ok(self.state.held.lock().details.clone())
    }

    fn take_events(&self) -> Option<EngineEvents> {
        self.events.lock().take()
    }

    fn stop(&self) {
        if self.stop_tx.lock().take().is_some() {
            debug!("license engine watcher stopping");
        }
    }
}

impl Drop for SignedWatcher {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.checker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for SignedWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedWatcher").finish_non_exhaustive()
    }
}
