//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! licwatch licensing engine: signed license decoding, certificate
//! verification, the engine watcher that reports expirations, and the
//! associated rejection telemetry.

pub mod certificates;
pub mod clock;
pub mod core;
pub mod engine;
pub mod logging;
pub mod watcher;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::{LicenseDetails, LicensePayload, SignedLicenseValidator};
pub use crate::engine::{
    EngineError, EngineEvents, EngineWatcher, ExpirationWarning, LicenseEngine, Result, Validator,
    WatcherOptions,
};
pub use crate::watcher::{EngineSettings, SignedLicenseEngine, SignedWatcher};
