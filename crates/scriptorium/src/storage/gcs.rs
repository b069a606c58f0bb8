//! Cloud Storage JSON API client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::object_store::{ByteStream, ObjectStore};
use crate::auth::service_account::truncate_body;
use crate::auth::TokenProvider;
use crate::error::StorageError;

pub struct GcsObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

impl GcsObjectStore {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            tokens,
        }
    }

    /// `{endpoint}/{prefix...}/{bucket}/o[/{key}]` with every segment escaped.
    fn object_url(&self, prefix: &[&str], key: Option<&str>) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::Stream(format!("invalid storage endpoint: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::Stream("storage endpoint cannot be a base".into()))?;
            segments.pop_if_empty();
            segments.extend(prefix);
            segments.push(&self.bucket).push("o");
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    async fn bearer(&self) -> Result<String, StorageError> {
        Ok(self.tokens.bearer_token().await?.expose_secret().to_string())
    }
}

async fn api_error(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Api {
        status,
        body: truncate_body(&body),
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, key: &str, body: ByteStream, content_type: &str) -> Result<(), StorageError> {
        let url = self.object_url(&["upload", "storage", "v1", "b"], None)?;
        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(self.bearer().await?)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        tracing::debug!(bucket = %self.bucket, key, "uploaded object");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let url = self.object_url(&["storage", "v1", "b"], None)?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .query(&[("prefix", prefix)])
                .bearer_auth(self.bearer().await?);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }

            let page: ListResponse = response.json().await?;
            keys.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let url = self.object_url(&["storage", "v1", "b"], Some(key))?;
        let response = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(key.to_string())),
            _ => Err(api_error(response).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let url = self.object_url(&["storage", "v1", "b"], Some(key))?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(api_error(response).await),
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    fn key_from_uri<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix("gs://")?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
    }
}
