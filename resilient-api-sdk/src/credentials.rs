//! Credential storage seam
//!
//! Tokens are owned by a [`CredentialStore`]. The client reads the access
//! token once per dispatch and only handles the refresh token for the span of
//! a single refresh exchange.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;

use crate::error::SdkResult;

/// Access token plus the refresh token that renews it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Secure storage for the session's tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn access_token(&self) -> SdkResult<Option<String>>;

    async fn refresh_token(&self) -> SdkResult<Option<String>>;

    async fn store(&self, tokens: TokenPair) -> SdkResult<()>;

    /// Remove every stored token
    async fn clear(&self) -> SdkResult<()>;
}

/// Process-local store, for tests and embedders without secure storage
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn access_token(&self) -> SdkResult<Option<String>> {
        Ok(self
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone()))
    }

    async fn refresh_token(&self) -> SdkResult<Option<String>> {
        Ok(self
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone()))
    }

    async fn store(&self, tokens: TokenPair) -> SdkResult<()> {
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    async fn clear(&self) -> SdkResult<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
