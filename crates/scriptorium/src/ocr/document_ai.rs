//! Document AI REST client.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use super::{OcrProvider, OperationStatus};
use crate::auth::service_account::truncate_body;
use crate::auth::TokenProvider;
use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::retry::{is_transient_status, with_retry, RetryPolicy};

pub struct DocumentAiClient {
    client: Client,
    endpoint: String,
    processor_path: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    document: Option<ProcessedDocument>,
}

#[derive(Debug, Deserialize)]
struct ProcessedDocument {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OperationResource {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<serde_json::Value>,
    metadata: Option<OperationMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationMetadata {
    #[serde(default)]
    individual_process_statuses: Vec<IndividualProcessStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndividualProcessStatus {
    output_gcs_destination: Option<String>,
}

impl DocumentAiClient {
    pub fn new(client: Client, config: &OcrConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            endpoint: config.endpoint().trim_end_matches('/').to_string(),
            processor_path: format!(
                "projects/{}/locations/{}/processors/{}",
                config.project_id, config.location, config.processor_id
            ),
            tokens,
            retry: config.retry_policy(),
        }
    }

    fn processor_url(&self, method: &str) -> String {
        format!("{}/v1/{}:{}", self.endpoint, self.processor_path, method)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Response, OcrError> {
        let token = self.tokens.bearer_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

/// Maps throttling statuses to `Transient` and other failures to `Api`.
async fn check_status(response: Response) -> Result<Response, OcrError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let body = truncate_body(&response.text().await.unwrap_or_default());
    if is_transient_status(code) {
        Err(OcrError::Transient { status: code, body })
    } else {
        Err(OcrError::Api { status: code, body })
    }
}

#[async_trait]
impl OcrProvider for DocumentAiClient {
    async fn process(&self, content: Bytes, mime_type: &str) -> Result<String, OcrError> {
        let url = self.processor_url("process");
        let body = json!({
            "rawDocument": {
                "content": base64::engine::general_purpose::STANDARD.encode(&content),
                "mimeType": mime_type,
            }
        });

        let (url, body) = (&url, &body);
        let parsed: ProcessResponse = with_retry(self.retry, "ocr process", || async move {
            let response = self.post_json(url, body).await?;
            response
                .json::<ProcessResponse>()
                .await
                .map_err(|e| OcrError::Malformed(e.to_string()))
        })
        .await?;

        let text = parsed.document.map(|d| d.text).unwrap_or_default();
        tracing::debug!(bytes = content.len(), chars = text.len(), "sync OCR finished");
        Ok(text)
    }

    async fn submit(
        &self,
        input_uri: &str,
        mime_type: &str,
        output_uri: &str,
    ) -> Result<String, OcrError> {
        let url = self.processor_url("batchProcess");
        let body = json!({
            "inputDocuments": {
                "gcsDocuments": {
                    "documents": [{ "gcsUri": input_uri, "mimeType": mime_type }]
                }
            },
            "documentOutputConfig": {
                "gcsOutputConfig": { "gcsUri": output_uri }
            }
        });

        let (url, body) = (&url, &body);
        let operation: OperationResource = with_retry(self.retry, "ocr submit", || async move {
            let response = self.post_json(url, body).await?;
            response
                .json::<OperationResource>()
                .await
                .map_err(|e| OcrError::Malformed(e.to_string()))
        })
        .await?;

        operation
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| OcrError::Malformed("batch operation has no name".to_string()))
    }

    async fn status(&self, handle: &str) -> Result<OperationStatus, OcrError> {
        let url = format!("{}/v1/{}", self.endpoint, handle);

        let url = &url;
        let operation: OperationResource = with_retry(self.retry, "ocr status", || async move {
            let token = self.tokens.bearer_token().await?;
            let response = self
                .client
                .get(url)
                .bearer_auth(token.expose_secret())
                .send()
                .await?;
            check_status(response)
                .await?
                .json::<OperationResource>()
                .await
                .map_err(|e| OcrError::Malformed(e.to_string()))
        })
        .await?;

        Ok(operation_status(operation))
    }
}

fn operation_status(operation: OperationResource) -> OperationStatus {
    let output_location = operation.metadata.and_then(|m| {
        m.individual_process_statuses
            .into_iter()
            .find_map(|s| s.output_gcs_destination)
    });
    OperationStatus {
        done: operation.done,
        error: operation.error.map(|e| e.to_string()),
        output_location,
    }
}
