//! The authenticated command channel.
//!
//! One [`Client`] mediates every interaction with the array: it logs in with
//! the SHA-256 credential digest, caches the session key with a TTL, sends
//! commands as `/api/...` GET requests with the `sessionKey` header, retries
//! transient wire failures, and recovers exactly once from session expiry.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::command_path;
use crate::error::{ApiError, ClientError, Result};
use crate::retry::{is_retryable_status, with_retry, RetryConfig};
use crate::xml::{parse_response, Response};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(25 * 60);
const MAX_BODY_SIZE: usize = 4 << 20;

/// Login digest separators, in preference order. Firmware revisions differ
/// on whether the username/password digest is joined with an underscore, so
/// a login rejected by the array is retried once with the other separator.
const LOGIN_HASH_SEPARATORS: [&str; 2] = ["_", ""];

const SESSION_KEY_HEADER: &str = "sessionKey";

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Array HTTPS endpoint, e.g. `https://msa.example.com`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification (not recommended).
    pub insecure_tls: bool,
    /// Per-request timeout; defaults to 30s.
    pub timeout: Option<Duration>,
    /// Session key cache lifetime; defaults to 25 minutes.
    pub session_ttl: Option<Duration>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    key: String,
    valid_until: Instant,
}

pub struct Client {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
    retry: RetryConfig,
    session_ttl: Duration,
    session: Mutex<Option<SessionEntry>>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(ClientError::MissingConfig("endpoint"));
        }
        if config.username.trim().is_empty() {
            return Err(ClientError::MissingConfig("username"));
        }
        if config.password.trim().is_empty() {
            return Err(ClientError::MissingConfig("password"));
        }

        let parsed = reqwest::Url::parse(config.endpoint.trim())
            .map_err(|err| ClientError::InvalidEndpoint(err.to_string()))?;
        if parsed.host_str().is_none() {
            return Err(ClientError::InvalidEndpoint(
                "endpoint must include scheme and host".to_string(),
            ));
        }

        if config.insecure_tls {
            warn!("TLS certificate verification is disabled");
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_tls)
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            base_url: config.endpoint.trim().trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
            http,
            retry: config.retry.unwrap_or_default().with_defaults(),
            session_ttl: config.session_ttl.unwrap_or(DEFAULT_SESSION_TTL),
            session: Mutex::new(None),
        })
    }

    /// Runs a command under the cached session, re-authenticating once if
    /// the array reports the session gone.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response> {
        let key = self.ensure_session(cancel).await?;

        match self.command(cancel, &key, parts).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_session_error() => {
                warn!(command = %parts.join(" "), "session rejected by array, re-authenticating");
                crate::metrics::record_session_renewal();
                self.invalidate_session().await;
                let key = self.ensure_session(cancel).await?;
                self.command(cancel, &key, parts).await
            }
            Err(err) => Err(err),
        }
    }

    /// Runs a command under an explicit session key.
    pub async fn command(
        &self,
        cancel: &CancellationToken,
        session_key: &str,
        parts: &[&str],
    ) -> Result<Response> {
        if session_key.trim().is_empty() {
            return Err(ClientError::MissingConfig("session key"));
        }
        self.do_request(cancel, Some(session_key), &command_path(parts))
            .await
    }

    /// Authenticates against the array and returns the session key.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<String> {
        match self
            .login_with_separator(cancel, LOGIN_HASH_SEPARATORS[0])
            .await
        {
            Ok(key) => Ok(key),
            Err(first_err @ ClientError::LoginFailed(_)) => {
                warn!("login digest rejected, retrying with alternate separator");
                match self
                    .login_with_separator(cancel, LOGIN_HASH_SEPARATORS[1])
                    .await
                {
                    Ok(key) => Ok(key),
                    Err(_) => Err(first_err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn login_with_separator(
        &self,
        cancel: &CancellationToken,
        separator: &str,
    ) -> Result<String> {
        let hash = login_hash(&self.username, &self.password, separator);
        let path = format!("/api/login/{hash}");

        let url = format!("{}{}", self.base_url, path);
        let (body, status) = self.get_with_retry(cancel, &url, None).await?;
        if status != 200 {
            return Err(ClientError::HttpStatus(status));
        }

        let response = parse_response(&body)?;
        let status = response.status().ok_or(ClientError::MissingStatus)?;
        if !status.success() {
            return Err(ClientError::LoginFailed(status.response));
        }
        if status.response.is_empty() {
            return Err(ClientError::MissingSessionKey);
        }

        debug!("login succeeded");
        Ok(status.response)
    }

    /// Ends a session explicitly. The cached key, if it matches, is dropped.
    pub async fn logout(&self, cancel: &CancellationToken, session_key: &str) -> Result<()> {
        if session_key.trim().is_empty() {
            return Err(ClientError::MissingConfig("session key"));
        }

        let response = self
            .do_request(cancel, Some(session_key), "/api/exit")
            .await?;
        let status = response.status().ok_or(ClientError::MissingStatus)?;
        if !status.success() {
            return Err(ClientError::Api(ApiError { status }));
        }

        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|entry| entry.key == session_key) {
            *session = None;
        }
        Ok(())
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(entry) = session.as_ref() {
            if Instant::now() < entry.valid_until {
                return Ok(entry.key.clone());
            }
        }

        let key = self.login(cancel).await?;
        *session = Some(SessionEntry {
            key: key.clone(),
            valid_until: Instant::now() + self.session_ttl,
        });
        Ok(key)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    async fn do_request(
        &self,
        cancel: &CancellationToken,
        session_key: Option<&str>,
        path: &str,
    ) -> Result<Response> {
        let url = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };

        let (body, status) = self.get_with_retry(cancel, &url, session_key).await?;
        if status != 200 {
            return Err(ClientError::HttpStatus(status));
        }

        let response = parse_response(&body)?;
        if let Some(status) = response.status() {
            if !status.success() {
                return Err(ClientError::Api(ApiError { status }));
            }
        }
        Ok(response)
    }

    async fn get_with_retry(
        &self,
        cancel: &CancellationToken,
        url: &str,
        session_key: Option<&str>,
    ) -> Result<(Vec<u8>, u16)> {
        with_retry(cancel, &self.retry, "get", || {
            let url = url.to_string();
            let session_key = session_key.map(str::to_string);
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err((false, ClientError::Interrupted)),
                    result = self.get_once(&url, session_key.as_deref()) => match result {
                        Ok((_, status)) if is_retryable_status(status) => {
                            Err((true, ClientError::HttpStatus(status)))
                        }
                        Ok(ok) => Ok(ok),
                        Err(err) => Err((true, err)),
                    },
                }
            }
        })
        .await
    }

    async fn get_once(&self, url: &str, session_key: Option<&str>) -> Result<(Vec<u8>, u16)> {
        let mut request = self.http.get(url);
        if let Some(key) = session_key {
            request = request.header(SESSION_KEY_HEADER, key);
        }

        let mut response = request.send().await?;
        let status = response.status().as_u16();

        // Bound memory: read at most MAX_BODY_SIZE bytes and drop the rest.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let remaining = MAX_BODY_SIZE - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, status))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn login_hash(username: &str, password: &str, separator: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(separator.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_hash_underscore_separator() {
        // sha256("manage_!manage") known vector, stable across releases.
        let hash = login_hash("manage", "!manage", "_");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, login_hash("manage", "!manage", "_"));
        assert_ne!(hash, login_hash("manage", "!manage", ""));
    }

    #[test]
    fn test_new_requires_credentials() {
        let base = Config {
            endpoint: "https://msa.example.com".to_string(),
            username: "manage".to_string(),
            password: "secret".to_string(),
            ..Config::default()
        };

        assert!(Client::new(base.clone()).is_ok());

        let mut missing = base.clone();
        missing.endpoint = "  ".to_string();
        assert!(matches!(
            Client::new(missing),
            Err(ClientError::MissingConfig("endpoint"))
        ));

        let mut missing = base.clone();
        missing.username = String::new();
        assert!(matches!(
            Client::new(missing),
            Err(ClientError::MissingConfig("username"))
        ));

        let mut missing = base;
        missing.password = String::new();
        assert!(matches!(
            Client::new(missing),
            Err(ClientError::MissingConfig("password"))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        let config = Config {
            endpoint: "not a url".to_string(),
            username: "manage".to_string(),
            password: "secret".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            Client::new(config),
            Err(ClientError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        let client = Client::new(Config {
            endpoint: "https://msa.example.com/".to_string(),
            username: "manage".to_string(),
            password: "secret".to_string(),
            ..Config::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "https://msa.example.com");
    }
}
