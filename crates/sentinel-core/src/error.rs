//! Error types for the Sentinel service registry

use thiserror::Error;

use crate::types::ServiceStatus;

/// Result type alias using SentinelError
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Errors that can occur while handling registrations and key material
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    /// The PEM public key on a registration could not be decoded
    #[error("Malformed public key: {0}")]
    MalformedPublicKey(String),

    /// The PEM private key could not be decoded
    #[error("Malformed private key: {0}")]
    MalformedPrivateKey(String),

    /// The signature is not valid base64 or has the wrong shape
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// The signature does not match the registration's current identity fields
    #[error("Signature verification failed: {0}")]
    SignatureMismatch(String),

    /// RSA key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Producing a signature failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Status change not present in the transition table
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ServiceStatus, to: ServiceStatus },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// HMAC key setup failed while deriving a code or token
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}
