use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptoriumError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Job error: {0}")]
    Job(#[from] crate::jobs::JobError),

    #[error(transparent)]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Blob of {size} bytes exceeds the {limit} byte buffer limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Object store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Object store returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Object store credentials unavailable: {0}")]
    Auth(#[from] AuthError),

    #[error("Stream error: {0}")]
    Stream(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to read service account key '{path}': {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR credentials unavailable: {0}")]
    Auth(#[from] AuthError),

    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OCR provider is throttling ({status})")]
    Transient { status: u16, body: String },

    #[error("OCR provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed OCR response: {0}")]
    Malformed(String),

    #[error("OCR output unavailable: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Chat completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Chat completion provider is throttling ({status})")]
    Transient { status: u16, body: String },

    #[error("Chat completion provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed chat completion response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum CleaningError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Cleaner returned unusable output: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Malformed generation output: {0}")]
    Malformed(String),

    #[error("Invalid generation parameters: {0}")]
    InvalidParams(String),

    #[error("Generation cache error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, ScriptoriumError>;
