//! Token storage in the system keyring

use async_trait::async_trait;
use resilient_api_sdk::{CredentialStore, SdkError, SdkResult, TokenPair};

const SERVICE: &str = "resilient-api-cli";

/// [`CredentialStore`] keeping one token pair per profile in the OS keyring
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    profile: String,
}

impl KeyringCredentialStore {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }

    fn entry(&self, kind: &str) -> SdkResult<keyring::Entry> {
        keyring::Entry::new(SERVICE, &format!("{}-{}", self.profile, kind))
            .map_err(|e| SdkError::ConfigurationError(format!("Failed to access keyring: {}", e)))
    }

    fn read(&self, kind: &str) -> SdkResult<Option<String>> {
        match self.entry(kind)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SdkError::ConfigurationError(format!(
                "Failed to read {} from keyring: {}",
                kind, e
            ))),
        }
    }

    fn write(&self, kind: &str, secret: &str) -> SdkResult<()> {
        self.entry(kind)?.set_password(secret).map_err(|e| {
            SdkError::ConfigurationError(format!("Failed to store {} in keyring: {}", kind, e))
        })
    }

    fn delete(&self, kind: &str) -> SdkResult<()> {
        match self.entry(kind)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SdkError::ConfigurationError(format!(
                "Failed to delete {} from keyring: {}",
                kind, e
            ))),
        }
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn access_token(&self) -> SdkResult<Option<String>> {
        self.read("access-token")
    }

    async fn refresh_token(&self) -> SdkResult<Option<String>> {
        self.read("refresh-token")
    }

    async fn store(&self, tokens: TokenPair) -> SdkResult<()> {
        self.write("access-token", &tokens.access_token)?;
        self.write("refresh-token", &tokens.refresh_token)
    }

    async fn clear(&self) -> SdkResult<()> {
        self.delete("access-token")?;
        self.delete("refresh-token")
    }
}
