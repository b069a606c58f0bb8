//! OCR provider seam.
//!
//! Two modes: [`OcrProvider::process`] returns text for small inputs within
//! one call; [`OcrProvider::submit`] starts a long-running operation over an
//! object-store input and writes result shards under an output prefix, to be
//! observed with [`OcrProvider::status`].

pub mod document_ai;
pub mod output;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::OcrError;

pub use document_ai::DocumentAiClient;
pub use output::{merge_shards, OcrPage};

/// Snapshot of a remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationStatus {
    pub done: bool,
    /// Provider error, kept verbatim. Only meaningful once `done`.
    pub error: Option<String>,
    /// Where the provider reports it wrote results, if it says.
    pub output_location: Option<String>,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Synchronous OCR of an in-memory file.
    async fn process(&self, content: Bytes, mime_type: &str) -> Result<String, OcrError>;

    /// Starts an asynchronous operation and returns its handle.
    async fn submit(
        &self,
        input_uri: &str,
        mime_type: &str,
        output_uri: &str,
    ) -> Result<String, OcrError>;

    /// Checks an operation exactly once.
    async fn status(&self, handle: &str) -> Result<OperationStatus, OcrError>;
}
