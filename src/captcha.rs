//! Optional human-presence challenge gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Why a challenge did not pass.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("no challenge response submitted")]
    Missing,
    #[error("challenge verification failed: {0}")]
    Failed(String),
}

/// Gate run before a submission is rate-limited and relayed.
#[async_trait]
pub trait ChallengeGate: Send + Sync {
    async fn check(&self, token: Option<&str>, remote_ip: &str) -> Result<(), ChallengeError>;
}

/// Lets every submission through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

#[async_trait]
impl ChallengeGate for Disabled {
    async fn check(&self, _token: Option<&str>, _remote_ip: &str) -> Result<(), ChallengeError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    response: &'a str,
    secret: &'a str,
    remoteip: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verifies tokens against a `siteverify`-style endpoint (Turnstile, hCaptcha).
#[derive(Debug, Clone)]
pub struct SiteVerify {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl SiteVerify {
    pub fn new(client: reqwest::Client, url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl ChallengeGate for SiteVerify {
    async fn check(&self, token: Option<&str>, remote_ip: &str) -> Result<(), ChallengeError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ChallengeError::Missing)?;

        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest {
                response: token,
                secret: &self.secret,
                remoteip: remote_ip,
            })
            .send()
            .await
            .map_err(|e| {
                log::warn!("Challenge verifier unreachable: {e}");
                ChallengeError::Failed(e.to_string())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ChallengeError::Failed(format!("verifier answered {status}")));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| ChallengeError::Failed(format!("unreadable verifier answer: {e}")))?;
        if body.success {
            Ok(())
        } else {
            Err(ChallengeError::Failed(body.error_codes.join(", ")))
        }
    }
}
