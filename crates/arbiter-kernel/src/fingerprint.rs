use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to canonicalize JSON via JCS: {0}")]
    Canonicalize(String),
}

/// RFC 8785 (JCS) canonical form hashed with SHA-256, lower-case hex.
///
/// Equal JSON values fingerprint identically regardless of key order,
/// whitespace, or numeric formatting.
pub fn jcs_sha256_hex(value: &Value) -> Result<String, FingerprintError> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| FingerprintError::Canonicalize(err.to_string()))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
