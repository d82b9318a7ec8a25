use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest token lifetime the endpoint accepts, in seconds.
pub const MIN_TOKEN_TTL: u64 = 300;

/// Largest token lifetime the endpoint accepts, in seconds.
pub const MAX_TOKEN_TTL: u64 = 3600;

/// A short-lived, scoped session token.
///
/// There is no in-band renewal on the streaming socket. Expiry is a
/// terminal condition for the session holding the credential; the caller
/// mints a fresh one through the broker instead.
#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    issued_at: DateTime<Utc>,
    ttl: Duration,
}

impl Credential {
    pub fn new(token: String, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token,
            issued_at,
            ttl,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at() - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Failures surfaced by [`CredentialBroker::fetch_token`].
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The upstream rejected the API key. Not retryable.
    #[error("token endpoint rejected the API key (status {status}): {body}")]
    AuthFailure { status: u16, body: String },

    /// Network failure or upstream 5xx. Retryable by the caller.
    #[error("token endpoint unavailable: {0}")]
    TransientFailure(String),

    /// The endpoint answered with something other than the token contract.
    #[error("malformed token endpoint response: {detail}")]
    ProtocolFailure { detail: String, raw: String },

    /// The requested TTL is outside the accepted range.
    #[error("token ttl {0}s outside the accepted 300-3600s range")]
    InvalidTtl(u64),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::TransientFailure(_))
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest {
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Exchanges the long-lived API key for short-lived session tokens.
///
/// Stateless beyond the request/response: every call mints a fresh
/// credential and callers decide reuse policy.
pub struct CredentialBroker {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CredentialBroker {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Request a fresh session token valid for `ttl`.
    pub async fn fetch_token(&self, ttl: Duration) -> Result<Credential, BrokerError> {
        let ttl_secs = ttl.as_secs();
        if !(MIN_TOKEN_TTL..=MAX_TOKEN_TTL).contains(&ttl_secs) {
            return Err(BrokerError::InvalidTtl(ttl_secs));
        }

        debug!(
            "Requesting session token (key {}, ttl {}s)",
            redact_key(&self.api_key),
            ttl_secs
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header("authorization", &self.api_key)
            .json(&TokenRequest {
                expires_in: ttl_secs,
            })
            .send()
            .await
            .map_err(|e| BrokerError::TransientFailure(e.to_string()))?;

        let status = response.status();
        let issued_at = Utc::now();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::TransientFailure(e.to_string()))?;

        if status.is_success() {
            let parsed: TokenResponse =
                serde_json::from_str(&body).map_err(|e| {
                    warn!("Malformed token endpoint response: {}", body);
                    BrokerError::ProtocolFailure {
                        detail: e.to_string(),
                        raw: body.clone(),
                    }
                })?;

            info!("Session token issued (valid {}s)", ttl_secs);

            return Ok(Credential::new(parsed.token, issued_at, ttl));
        }

        // Non-2xx bodies are surfaced verbatim for diagnostics.
        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(BrokerError::AuthFailure {
                status: status.as_u16(),
                body,
            })
        } else if status.is_server_error() {
            Err(BrokerError::TransientFailure(format!(
                "status {}: {}",
                status, body
            )))
        } else {
            Err(BrokerError::ProtocolFailure {
                detail: format!("unexpected status {}", status),
                raw: body,
            })
        }
    }
}

/// Shorten a secret to a loggable prefix. The full key never hits the logs.
pub fn redact_key(key: &str) -> String {
    if key.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    format!("{}****", prefix)
}
