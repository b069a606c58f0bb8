//! Document ingestion for teaching material.
//!
//! An uploaded file becomes per-page text through native extraction or OCR,
//! is cleaned by an LLM, edited by its owner while in draft, and frozen into
//! numbered versions on publish. Published versions feed question
//! generation. Every multi-step operation is a job row in SQLite, which is
//! also the per-document lock.

pub mod auth;
pub mod cleaning;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    AuthError, CleaningError, ConfigError, GenerationError, LlmError, OcrError, ProcessError,
    Result, ScriptoriumError, StorageError,
};
pub use generation::{GenerationCache, QuestionGenerationRunner, QuestionParams};
pub use jobs::{DocumentLock, JobError, JobLedger, SweepReport};
pub use model::{DocumentStatus, EventKind, JobStatus, JobType, PageSource};
pub use pipeline::{
    IngestOutcome, IngestionPipeline, PageEditor, PipelineConfig, PipelineError, PollWorker,
    PublishManager,
};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
