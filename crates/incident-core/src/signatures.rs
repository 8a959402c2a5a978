use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SIGNATURE_SCHEME_PREFIX: &str = "v1=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no signature provided")]
    Missing,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies a webhook signature header against the raw request body.
///
/// The header may carry several comma-separated signatures (sent while a
/// secret is being rotated); any match is accepted.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = signature_header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::Missing)?;

    let expected = compute_hmac_sha256_hex(secret, payload);
    let matched = header
        .split(',')
        .map(normalize_signature)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| constant_time_hex_equals(&candidate, &expected));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produces a header value in the form the sender emits (`v1=<hex>`).
pub fn sign(secret: &str, payload: &[u8]) -> String {
    format!(
        "{SIGNATURE_SCHEME_PREFIX}{}",
        compute_hmac_sha256_hex(secret, payload)
    )
}

pub fn compute_hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts variable-length keys");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn normalize_signature(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(SIGNATURE_SCHEME_PREFIX)
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

fn constant_time_hex_equals(left: &str, right: &str) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.as_bytes().ct_eq(right.as_bytes()).into()
}
