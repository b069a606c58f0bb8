//! Bearer tokens for the OCR provider and the object store.
//!
//! A [`CredentialExchange`] turns a long-lived credential into a short-lived
//! token; [`TokenCache`] memoizes it until shortly before expiry.

pub mod service_account;
pub mod token_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::AuthError;

pub use service_account::{ServiceAccountExchange, ServiceAccountKey};
pub use token_cache::TokenCache;

/// A short-lived bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Exchanges a long-lived credential for an [`AccessToken`].
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, AuthError>;
}

/// Source of bearer tokens for outgoing provider calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<SecretString, AuthError>;
}

/// A fixed token, for local emulators and tests.
pub struct StaticToken(pub SecretString);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<SecretString, AuthError> {
        Ok(self.0.clone())
    }
}
