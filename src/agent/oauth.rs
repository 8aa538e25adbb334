//! The OAuth refresh collaborator (§6 LLM transport: "credentials object
//! with refresh"; §4.5 step 3). Grounded in `llm/anthropic.rs`'s existing
//! Anthropic HTTP client for the request shape; kept separate from it since
//! refreshing a token is a distinct concern from sending a message.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{CredentialStore, OAuthCredentials};

const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const CLIENT_ID: &str = "swarm-re-core";

#[derive(Debug, Error)]
pub enum OAuthRefreshError {
    #[error("no stored credentials to refresh")]
    NoCredentials,
    #[error("refresh request failed: {0}")]
    Transport(String),
    #[error("credential store error: {0}")]
    Store(#[from] crate::config::CredentialError),
}

pub type OAuthRefreshResult<T> = std::result::Result<T, OAuthRefreshError>;

/// The external OAuth collaborator the driver calls into on `AuthExpired`
/// (§4.5 step 3). A trait so the driver itself never talks HTTP directly —
/// it only knows "ask for a fresh token".
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self) -> OAuthRefreshResult<String>;
}

/// Talks to Anthropic's OAuth token endpoint using the locally stored
/// refresh token, then persists the renewed pair back through
/// `CredentialStore` so the next driver restart picks it up too.
pub struct AnthropicOAuthRefresher {
    http_client: Client,
    credentials: Arc<CredentialStore>,
}

impl AnthropicOAuthRefresher {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { http_client: Client::new(), credentials }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[async_trait]
impl OAuthRefresher for AnthropicOAuthRefresher {
    async fn refresh(&self) -> OAuthRefreshResult<String> {
        let current = self.credentials.load().map_err(|_| OAuthRefreshError::NoCredentials)?;

        let response = self
            .http_client
            .post(TOKEN_URL)
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": current.refresh_token,
                "client_id": CLIENT_ID,
            }))
            .send()
            .await
            .map_err(|e| OAuthRefreshError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthRefreshError::Transport(format!("http {status}: {body}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthRefreshError::Transport(format!("malformed token response: {e}")))?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let renewed = OAuthCredentials {
            access_token: parsed.access_token.clone(),
            refresh_token: parsed.refresh_token,
            expires_at: now + parsed.expires_in,
        };
        self.credentials.store(&renewed)?;

        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRefresher {
        token: String,
    }

    #[async_trait]
    impl OAuthRefresher for StubRefresher {
        async fn refresh(&self) -> OAuthRefreshResult<String> {
            Ok(self.token.clone())
        }
    }

    #[tokio::test]
    async fn stub_refresher_returns_configured_token() {
        let refresher = StubRefresher { token: "fresh-token".to_string() };
        assert_eq!(refresher.refresh().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn refresh_without_stored_credentials_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::with_backend_encrypted_file(dir.path()));
        let refresher = AnthropicOAuthRefresher::new(store);
        assert!(matches!(refresher.refresh().await, Err(OAuthRefreshError::NoCredentials)));
    }
}
