use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::cleaning::LanguageHint;
use crate::model::JobType;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub ocr: OcrConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `~/.scriptorium/data/scriptorium.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket holding OCR inputs and outputs while a job is polling.
    pub temp_bucket: String,
    /// Local directory that uploaded files' `storage_path` is relative to.
    pub uploads_root: String,
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

/// Where the service-account key comes from. First non-empty source wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub service_account_key: Option<String>,
    #[serde(default)]
    pub service_account_key_file: Option<String>,
    #[serde(default = "default_service_account_env_var")]
    pub service_account_key_env_var: Option<String>,
}

fn default_service_account_env_var() -> Option<String> {
    Some("GOOGLE_SERVICE_ACCOUNT_KEY".to_string())
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service_account_key: None,
            service_account_key_file: None,
            service_account_key_env_var: default_service_account_env_var(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub project_id: String,
    #[serde(default = "default_ocr_location")]
    pub location: String,
    pub processor_id: String,
    /// Overrides `https://{location}-documentai.googleapis.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Files above this size always go through the async operation.
    #[serde(default = "default_sync_size_limit")]
    pub sync_size_limit_bytes: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_ocr_location() -> String {
    "us".to_string()
}

fn default_sync_size_limit() -> u64 {
    20 * 1024 * 1024
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    90
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

impl OcrConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-documentai.googleapis.com", self.location))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub language_hint: LanguageHint,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_llm_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_cleaning_concurrency")]
    pub concurrency: usize,
    /// Trimmed input at or below this many characters is passed through.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_llm_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_llm_env_var() -> Option<String> {
    Some("GROQ_API_KEY".to_string())
}

fn default_cleaning_concurrency() -> usize {
    3
}

fn default_min_length() -> usize {
    15
}

impl CleaningConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            language_hint: LanguageHint::default(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_llm_env_var(),
            concurrency: default_cleaning_concurrency(),
            min_length: default_min_length(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// How a job type's remote operation is driven to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingDiscipline {
    /// Each `poll` call performs one bounded check; something outside
    /// re-invokes it.
    External,
    /// Ingestion blocks on a bounded in-process loop; `poll` only reports.
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Total native characters below which a paginated file is treated as scanned.
    #[serde(default = "default_native_text_threshold")]
    pub native_text_threshold: usize,
    #[serde(default = "default_native_size_limit")]
    pub native_size_limit_bytes: u64,
    #[serde(default = "default_page_insert_batch")]
    pub page_insert_batch: usize,
    #[serde(default = "default_reference_ttl")]
    pub signed_reference_ttl_secs: u64,
    #[serde(default = "default_polling")]
    pub polling: HashMap<JobType, PollingDiscipline>,
}

fn default_native_text_threshold() -> usize {
    50
}

fn default_native_size_limit() -> u64 {
    50 * 1024 * 1024
}

fn default_page_insert_batch() -> usize {
    10
}

fn default_reference_ttl() -> u64 {
    3600
}

fn default_polling() -> HashMap<JobType, PollingDiscipline> {
    HashMap::from([(JobType::DocumentExtract, PollingDiscipline::External)])
}

impl IngestConfig {
    pub fn discipline(&self, job_type: JobType) -> PollingDiscipline {
        self.polling
            .get(&job_type)
            .copied()
            .unwrap_or(PollingDiscipline::External)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            native_text_threshold: default_native_text_threshold(),
            native_size_limit_bytes: default_native_size_limit(),
            page_insert_batch: default_page_insert_batch(),
            signed_reference_ttl_secs: default_reference_ttl(),
            polling: default_polling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How far each heartbeat pushes `timeout_at` into the future.
    #[serde(default = "default_heartbeat_extension")]
    pub heartbeat_extension_secs: u64,
}

fn default_heartbeat_extension() -> u64 {
    600
}

impl JobsConfig {
    pub fn heartbeat_extension(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_extension_secs as i64)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            heartbeat_extension_secs: default_heartbeat_extension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Language the generated questions are written in.
    #[serde(default = "default_output_language")]
    pub output_language: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_llm_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_output_language() -> String {
    "Azerbaijani".to_string()
}

fn default_max_source_chars() -> usize {
    8000
}

fn default_max_tokens() -> u32 {
    3000
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            output_language: default_output_language(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_llm_env_var(),
            max_source_chars: default_max_source_chars(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}
