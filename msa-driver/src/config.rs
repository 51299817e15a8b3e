//! Engine configuration: explicit values with environment fallback.
//!
//! Every knob can come from the embedding process (`ProviderConfig`) or
//! from the environment (`MSA_*` names), with explicit values winning.

use std::env;
use std::time::Duration;

use tracing::warn;

use msa_client::{Client, Config as ClientConfig};

use crate::error::{DriverError, Result};

pub const ENV_ENDPOINT: &str = "MSA_ENDPOINT";
pub const ENV_USERNAME: &str = "MSA_USERNAME";
pub const ENV_PASSWORD: &str = "MSA_PASSWORD";
pub const ENV_INSECURE_TLS: &str = "MSA_INSECURE_TLS";
pub const ENV_DEFAULT_POOL: &str = "MSA_POOL";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw configuration as supplied by the embedding plan/apply driver.
/// `None` fields fall back to the corresponding environment variable.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure_tls: Option<bool>,
    /// Duration string, e.g. "30s" or "2m".
    pub timeout: Option<String>,
    /// Duration string bounding the session-key cache.
    pub session_ttl: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub insecure_tls: bool,
    pub timeout: Duration,
    pub session_ttl: Option<Duration>,
    /// Placement default for volumes that name neither pool nor vdisk.
    pub default_pool: Option<String>,
}

impl ProviderConfig {
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let endpoint = string_or_env(self.endpoint.as_deref(), ENV_ENDPOINT);
        let username = string_or_env(self.username.as_deref(), ENV_USERNAME);
        let password = string_or_env(self.password.as_deref(), ENV_PASSWORD);

        if endpoint.is_empty() {
            return Err(missing(ENV_ENDPOINT, "endpoint"));
        }
        if username.is_empty() {
            return Err(missing(ENV_USERNAME, "username"));
        }
        if password.is_empty() {
            return Err(missing(ENV_PASSWORD, "password"));
        }

        let insecure_tls = match self.insecure_tls {
            Some(value) => value,
            None => bool_env(ENV_INSECURE_TLS)?,
        };
        if insecure_tls {
            warn!("TLS certificate verification is disabled");
        }

        let timeout = match self.timeout.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_duration(raw, "timeout")?,
            _ => DEFAULT_TIMEOUT,
        };

        let session_ttl = match self.session_ttl.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_duration(raw, "session_ttl")?),
            _ => None,
        };

        let default_pool = {
            let value = string_or_env(None, ENV_DEFAULT_POOL);
            (!value.is_empty()).then_some(value)
        };

        Ok(ResolvedConfig {
            endpoint,
            username,
            password,
            insecure_tls,
            timeout,
            session_ttl,
            default_pool,
        })
    }
}

impl ResolvedConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            insecure_tls: self.insecure_tls,
            timeout: Some(self.timeout),
            session_ttl: self.session_ttl,
            retry: None,
        }
    }

    pub fn connect(&self) -> Result<Client> {
        Ok(Client::new(self.client_config())?)
    }
}

fn string_or_env(value: Option<&str>, env_name: &str) -> String {
    match value {
        Some(value) => value.trim().to_string(),
        None => env::var(env_name).unwrap_or_default().trim().to_string(),
    }
}

fn bool_env(env_name: &str) -> Result<bool> {
    let raw = env::var(env_name).unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(false);
    }
    match raw.to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => Err(DriverError::Validation(format!(
            "{env_name} must be true or false (got {raw:?})"
        ))),
    }
}

fn parse_duration(raw: &str, field: &str) -> Result<Duration> {
    humantime::parse_duration(raw)
        .map_err(|_| DriverError::Validation(format!("{field}: {raw:?} is not a valid duration")))
}

fn missing(env_name: &str, field: &str) -> DriverError {
    DriverError::Validation(format!(
        "{field} is required: set it in the provider configuration or via {env_name}"
    ))
}
