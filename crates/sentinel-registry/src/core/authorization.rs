//! Admin authorization for privileged registry operations
//!
//! Every privileged request carries an admin token. The length gate always
//! applies. When an admin secret and a user list are configured, the token
//! must additionally be the derived token of one of those users.

use sentinel_core::token::{admin_token_has_min_length, verify_admin_token, MIN_ADMIN_TOKEN_LEN};
use thiserror::Error;
use tracing::warn;

/// Principal recorded when only the length gate is configured
pub const DEFAULT_PRINCIPAL: &str = "admin";

/// Error returned when an admin token is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Invalid admin token: at least {min_len} characters required")]
    TokenTooShort { min_len: usize },

    #[error("Invalid admin token: not issued to any configured admin")]
    UnknownToken,
}

/// Checks admin tokens and resolves the admin they belong to
#[derive(Clone)]
pub struct AdminAuthorizer {
    min_len: usize,
    secret: Option<String>,
    users: Vec<String>,
}

impl std::fmt::Debug for AdminAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuthorizer")
            .field("min_len", &self.min_len)
            .field("derived_tokens", &self.secret.is_some())
            .field("users", &self.users)
            .finish()
    }
}

impl Default for AdminAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl AdminAuthorizer {
    /// Length gate only
    pub fn new() -> Self {
        Self {
            min_len: MIN_ADMIN_TOKEN_LEN,
            secret: None,
            users: Vec::new(),
        }
    }

    /// Length gate plus derived tokens for `users`
    pub fn with_derived_tokens(secret: impl Into<String>, users: Vec<String>) -> Self {
        Self {
            min_len: MIN_ADMIN_TOKEN_LEN,
            secret: Some(secret.into()),
            users,
        }
    }

    /// Whether tokens are checked against configured admins
    pub fn checks_derived_tokens(&self) -> bool {
        self.secret.is_some() && !self.users.is_empty()
    }

    /// Validate `token` and return the admin it authenticates
    pub fn authorize(&self, token: &str) -> Result<String, AuthorizationError> {
        if !admin_token_has_min_length(token, self.min_len) {
            warn!(
                token_len = token.len(),
                "SECURITY: Admin token rejected (too short)"
            );
            return Err(AuthorizationError::TokenTooShort {
                min_len: self.min_len,
            });
        }

        match self.secret {
            Some(ref secret) if !self.users.is_empty() => self
                .users
                .iter()
                .find(|user| verify_admin_token(user, token, secret))
                .cloned()
                .ok_or_else(|| {
                    warn!("SECURITY: Admin token does not match any configured admin");
                    AuthorizationError::UnknownToken
                }),
            _ => Ok(DEFAULT_PRINCIPAL.to_string()),
        }
    }
}
