//! Server configuration from `SENTINEL_*` environment variables

use chrono::Duration as ChronoDuration;
use sentinel_core::audit::DEFAULT_AUDIT_CAPACITY;
use sentinel_core::{RotationPolicy, SentinelError, ServiceSigner};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, Level};

use crate::core::AdminAuthorizer;
use crate::storage::HealthPolicy;

/// Error type for configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read private key {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid registry key: {0}")]
    Key(#[from] SentinelError),
}

/// Registry server configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub port: u16,
    pub log_level: Level,
    /// Human-readable name of this registry
    pub name: Option<String>,
    /// PKCS#1 PEM file with the registry's signing key
    pub private_key_path: Option<PathBuf>,
    pub rotation_secret: Option<String>,
    pub admin_secret: Option<String>,
    pub admin_users: Vec<String>,
    pub audit_capacity: usize,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub failure_threshold: u32,
    pub min_target_age: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: Level::INFO,
            name: None,
            private_key_path: None,
            rotation_secret: None,
            admin_secret: None,
            admin_users: Vec::new(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            health_interval: Duration::from_secs(60),
            health_timeout: Duration::from_secs(10),
            failure_threshold: 3,
            min_target_age: Duration::from_secs(300),
        }
    }
}

impl RegistryConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`, unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let admin_users = get("SENTINEL_ADMIN_USERS")
            .map(|users| {
                users
                    .split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let audit_capacity = parse(&get, "SENTINEL_AUDIT_CAPACITY", defaults.audit_capacity)?;
        if audit_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                var: "SENTINEL_AUDIT_CAPACITY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let failure_threshold =
            parse(&get, "SENTINEL_FAILURE_THRESHOLD", defaults.failure_threshold)?;
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                var: "SENTINEL_FAILURE_THRESHOLD",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            port: parse(&get, "SENTINEL_PORT", defaults.port)?,
            log_level: parse(&get, "SENTINEL_LOG_LEVEL", defaults.log_level)?,
            name: get("SENTINEL_NAME"),
            private_key_path: get("SENTINEL_PRIVATE_KEY_PATH").map(PathBuf::from),
            rotation_secret: get("SENTINEL_ROTATION_SECRET"),
            admin_secret: get("SENTINEL_ADMIN_SECRET"),
            admin_users,
            audit_capacity,
            health_interval: parse_secs(
                &get,
                "SENTINEL_HEALTH_INTERVAL_SECS",
                defaults.health_interval,
            )?,
            health_timeout: parse_secs(
                &get,
                "SENTINEL_HEALTH_TIMEOUT_SECS",
                defaults.health_timeout,
            )?,
            failure_threshold,
            min_target_age: Duration::from_secs(parse(
                &get,
                "SENTINEL_MIN_TARGET_AGE_SECS",
                defaults.min_target_age.as_secs(),
            )?),
        })
    }

    /// Load the signing key from `private_key_path`, or generate one
    pub fn load_signer(&self) -> Result<ServiceSigner, ConfigError> {
        match self.private_key_path {
            Some(ref path) => {
                let pem = std::fs::read_to_string(path).map_err(|source| ConfigError::KeyFile {
                    path: path.clone(),
                    source,
                })?;
                info!(path = %path.display(), "Loaded registry signing key");
                Ok(ServiceSigner::from_private_key_pem(&pem)?)
            }
            None => {
                info!("No SENTINEL_PRIVATE_KEY_PATH set, generating an ephemeral signing key");
                Ok(ServiceSigner::generate()?)
            }
        }
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        let min_age = ChronoDuration::seconds(self.min_target_age.as_secs() as i64);
        let policy = RotationPolicy::default().with_min_target_age(min_age);
        match self.rotation_secret {
            Some(ref secret) => policy.with_rotation_secret(secret.clone()),
            None => policy,
        }
    }

    pub fn authorizer(&self) -> AdminAuthorizer {
        match self.admin_secret {
            Some(ref secret) => AdminAuthorizer::with_derived_tokens(secret.clone(), self.admin_users.clone()),
            None => AdminAuthorizer::new(),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.failure_threshold,
            ..HealthPolicy::default()
        }
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
                value,
            }),
        None => Ok(default),
    }
}

fn parse_secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(get, var, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: "0".into(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
