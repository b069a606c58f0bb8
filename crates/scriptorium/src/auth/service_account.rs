//! Service-account JWT bearer exchange (RFC 7523).
//!
//! Signs an RS256 assertion with the account's private key and trades it at
//! the token endpoint for an access token scoped to `cloud-platform`.

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{AccessToken, CredentialExchange};
use crate::error::AuthError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertions are requested for one hour, the maximum the endpoint accepts.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Maximum length of an error body kept in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// The fields of a service-account key file this exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parses a key given either as raw JSON or as base64-encoded JSON.
    pub fn from_secret(secret: &SecretString) -> Result<Self, AuthError> {
        let raw = secret.expose_secret().trim();
        let json = if raw.starts_with('{') {
            raw.to_string()
        } else {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(raw)
                .map_err(|e| AuthError::InvalidKey(format!("not JSON and not base64: {}", e)))?;
            String::from_utf8(decoded)
                .map_err(|_| AuthError::InvalidKey("decoded key is not UTF-8".to_string()))?
        };

        let key: ServiceAccountKey = serde_json::from_str(&json)
            .map_err(|e| AuthError::InvalidKey(format!("unexpected key JSON: {}", e)))?;

        if key.client_email.is_empty() || key.private_key.expose_secret().is_empty() {
            return Err(AuthError::InvalidKey(
                "client_email and private_key are required".to_string(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

pub struct ServiceAccountExchange {
    client: Client,
    key: ServiceAccountKey,
}

impl ServiceAccountExchange {
    pub fn new(client: Client, key: ServiceAccountKey) -> Self {
        Self { client, key }
    }

    fn signed_assertion(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.expose_secret().as_bytes())?;
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &encoding_key,
        )?)
    }
}

#[async_trait]
impl CredentialExchange for ServiceAccountExchange {
    async fn exchange(&self) -> Result<AccessToken, AuthError> {
        let assertion = self.signed_assertion()?;
        let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status,
                body: truncate_body(&body),
            });
        }

        let token: TokenResponse = response.json().await?;
        log::info!(
            "Obtained access token for {} (expires in {}s)",
            self.key.client_email,
            token.expires_in
        );

        Ok(AccessToken {
            token: SecretString::from(token.access_token),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

/// Cuts an error body so token material never floods the logs.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
