//! Rotation codes and admin tokens
//!
//! Both are HMAC-SHA256 derivations keyed by a shared secret, so checking one
//! never needs a lookup, only recomputation. Rotation codes are truncated to
//! 16 characters and are an operational convenience, not the trust boundary.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SentinelError};

type HmacSha256 = Hmac<Sha256>;

/// Length of a rotation verification code
pub const ROTATION_CODE_LEN: usize = 16;

/// Minimum length of an admin token accepted by privileged operations
pub const MIN_ADMIN_TOKEN_LEN: usize = 32;

const ROTATION_DOMAIN: &[u8] = b"sentinel.rotation-code.v1";
const ADMIN_DOMAIN: &[u8] = b"sentinel.admin-token.v1";

fn keyed_digest(secret: &str, domain: &[u8], subject: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SentinelError::KeyDerivation(e.to_string()))?;
    mac.update(domain);
    mac.update(&[0]);
    mac.update(subject.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut result = 0;
    for (x, y) in a_bytes.iter().zip(b_bytes.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Derive the 16-character rotation code for `service_id`
pub fn generate_rotation_code(service_id: &str, secret: &str) -> Result<String> {
    let mut code = keyed_digest(secret, ROTATION_DOMAIN, service_id)?;
    code.truncate(ROTATION_CODE_LEN);
    Ok(code)
}

/// Recompute and compare a rotation code
pub fn verify_rotation_code(service_id: &str, code: &str, secret: &str) -> bool {
    generate_rotation_code(service_id, secret)
        .is_ok_and(|expected| constant_time_eq(&expected, code))
}

/// Derive an admin token for `username` (43 characters)
pub fn generate_admin_token(username: &str, secret: &str) -> Result<String> {
    keyed_digest(secret, ADMIN_DOMAIN, username)
}

/// Recompute and compare an admin token
pub fn verify_admin_token(username: &str, token: &str, secret: &str) -> bool {
    generate_admin_token(username, secret)
        .is_ok_and(|expected| constant_time_eq(&expected, token))
}

/// Length gate applied to every privileged registry operation
pub fn admin_token_has_min_length(token: &str, min_len: usize) -> bool {
    token.chars().count() >= min_len
}
