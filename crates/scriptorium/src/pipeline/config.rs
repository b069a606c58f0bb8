use std::collections::HashMap;
use std::time::Duration;

use crate::cleaning::LanguageHint;
use crate::config::{Config, PollingDiscipline};
use crate::model::JobType;

/// Settings the ingestion, poll and publish stages read, lifted out of
/// [`Config`] so tests can build them directly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub native_text_threshold: usize,
    /// Largest upload read into memory for native extraction.
    pub native_size_limit_bytes: u64,
    /// Larger files, and every paginated format, go to async OCR.
    pub sync_size_limit_bytes: u64,
    pub signed_reference_ttl: chrono::Duration,
    pub page_insert_batch: usize,
    pub cleaning_enabled: bool,
    pub cleaning_concurrency: usize,
    /// Pages of at most this many characters keep their raw text.
    pub cleaning_min_length: usize,
    pub language_hint: LanguageHint,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub polling: HashMap<JobType, PollingDiscipline>,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            native_text_threshold: config.ingest.native_text_threshold,
            native_size_limit_bytes: config.ingest.native_size_limit_bytes,
            sync_size_limit_bytes: config.ocr.sync_size_limit_bytes,
            signed_reference_ttl: chrono::Duration::seconds(
                config.ingest.signed_reference_ttl_secs as i64,
            ),
            page_insert_batch: config.ingest.page_insert_batch,
            cleaning_enabled: config.cleaning.enabled,
            cleaning_concurrency: config.cleaning.concurrency,
            cleaning_min_length: config.cleaning.min_length,
            language_hint: config.cleaning.language_hint,
            poll_interval: config.ocr.poll_interval(),
            max_poll_attempts: config.ocr.max_poll_attempts,
            polling: config.ingest.polling.clone(),
        }
    }

    pub fn discipline(&self, job_type: JobType) -> PollingDiscipline {
        self.polling
            .get(&job_type)
            .copied()
            .unwrap_or(PollingDiscipline::External)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            native_text_threshold: 50,
            native_size_limit_bytes: 50 * 1024 * 1024,
            sync_size_limit_bytes: 20 * 1024 * 1024,
            signed_reference_ttl: chrono::Duration::hours(1),
            page_insert_batch: 10,
            cleaning_enabled: true,
            cleaning_concurrency: 3,
            cleaning_min_length: 15,
            language_hint: LanguageHint::Az,
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 90,
            polling: HashMap::from([(JobType::DocumentExtract, PollingDiscipline::External)]),
        }
    }
}
