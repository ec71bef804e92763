//! ---
//! lw_section: "02-licensing-engine"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Signed license validation and engine lifecycle events."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::convert::TryInto;

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;

use crate::core::LicensePayload;
use crate::engine::{EngineError, Result};

/// Envelope version understood by this engine.
pub const ENVELOPE_VERSION: u32 = 1;

/// Embedded production public key for validating issued licenses.
pub const DEFAULT_PUBLIC_KEY: [u8; 32] = [
    12, 244, 226, 143, 249, 253, 95, 218, 14, 212, 71, 46, 225, 175, 92, 55, 139, 135, 51, 172,
    158, 189, 126, 149, 175, 255, 128, 197, 132, 99, 109, 103,
];

/// In-memory representation of a signed license certificate.
#[derive(Debug)]
pub struct LicenseCertificate {
    pub(crate) payload: LicensePayload,
    pub(crate) signature: String,
}

#[derive(Debug, Deserialize)]
struct LicenseEnvelope {
    version: u32,
    payload: LicensePayload,
    signature: String,
}

impl LicenseCertificate {
    /// Decode the base64 JSON envelope carrying payload and signature.
    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|err| EngineError::Malformed(format!("license must be base64 encoded: {err}")))?;
        let envelope: LicenseEnvelope = serde_json::from_slice(&bytes).map_err(|err| {
            EngineError::Malformed(format!("license must decode into a JSON envelope: {err}"))
        })?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(EngineError::Malformed(format!(
                "unsupported license envelope version {}",
                envelope.version
            )));
        }
        Ok(Self {
            payload: envelope.payload,
            signature: envelope.signature,
        })
    }
}

/// Parse a base64 encoded Ed25519 public key.
pub fn parse_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| EngineError::Config(format!("public key must be base64 encoded: {err}")))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| EngineError::Config("public key must be 32 bytes".to_owned()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|err| EngineError::Config(format!("invalid public key material: {err}")))
}

/// Verifying key for [`DEFAULT_PUBLIC_KEY`].
pub fn default_public_key() -> Result<VerifyingKey> {
    VerifyingKey::from_bytes(&DEFAULT_PUBLIC_KEY)
        .map_err(|err| EngineError::Config(format!("invalid public key material: {err}")))
}

/// Verify a license certificate against the trusted key.
pub fn verify_certificate(certificate: &LicenseCertificate, key: &VerifyingKey) -> Result<()> {
    let signature_bytes = general_purpose::STANDARD
        .decode(certificate.signature.trim())
        .map_err(|err| {
            EngineError::InvalidSignature(format!("signature must be base64 encoded: {err}"))
        })?;
    let signature_array: [u8; 64] = signature_bytes
        .as_slice()
        .try_into()
        .map_err(|_| EngineError::InvalidSignature("invalid signature length".to_owned()))?;
    let signature = Signature::from_bytes(&signature_array);
    let payload = certificate.payload.signing_bytes()?;

    key.verify_strict(&payload, &signature)
        .map_err(|err| EngineError::InvalidSignature(err.to_string()))
}
