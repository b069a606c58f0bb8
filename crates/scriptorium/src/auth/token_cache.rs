//! Get-or-refresh cache around a [`CredentialExchange`].
//!
//! The async mutex is held across the refresh, so concurrent callers that
//! find the token stale wait for one exchange instead of each starting their
//! own.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;

use super::{AccessToken, CredentialExchange, TokenProvider};
use crate::error::AuthError;

/// Tokens are refreshed this long before they actually expire.
pub const REFRESH_MARGIN_SECS: i64 = 300;

pub struct TokenCache<E> {
    exchange: E,
    margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl<E: CredentialExchange> TokenCache<E> {
    pub fn new(exchange: E) -> Self {
        Self {
            exchange,
            margin: Duration::seconds(REFRESH_MARGIN_SECS),
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token while `now < expires_at - margin`, otherwise
    /// exchanges for a new one.
    pub async fn get_token(&self) -> Result<SecretString, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at - self.margin {
                return Ok(token.token.clone());
            }
        }

        tracing::debug!("refreshing access token");
        let fresh = self.exchange.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Drops the cached token so the next call exchanges again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl<E: CredentialExchange> TokenProvider for TokenCache<E> {
    async fn bearer_token(&self) -> Result<SecretString, AuthError> {
        self.get_token().await
    }
}
