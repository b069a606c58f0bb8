//! Builds the pipeline services from a loaded [`Config`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use scriptorium::auth::{ServiceAccountExchange, ServiceAccountKey, TokenCache, TokenProvider};
use scriptorium::cleaning::{ChatTextCleaner, TextCleaner};
use scriptorium::db::{default_database_path, Database};
use scriptorium::generation::{GenerationCache, LlmQuestionGenerator, QuestionGenerationRunner};
use scriptorium::jobs::JobLedger;
use scriptorium::llm::ChatClient;
use scriptorium::ocr::DocumentAiClient;
use scriptorium::pipeline::{
    IngestionPipeline, PageEditor, PipelineConfig, PollWorker, PublishManager,
};
use scriptorium::processor::LopdfExtractor;
use scriptorium::storage::{FsUploadSource, GcsObjectStore};
use scriptorium::{resolve_secret, resolve_secret_optional, Config};

/// Everything the commands need, built once per invocation.
pub struct App {
    config: Config,
    http: reqwest::Client,
    pub ledger: JobLedger,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let db_path = match &config.database.path {
            Some(path) => PathBuf::from(path),
            None => default_database_path()
                .ok_or_else(|| anyhow!("cannot determine home directory for the database"))?,
        };
        let db = Database::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        let ledger = JobLedger::new(db, config.jobs.heartbeat_extension());

        Ok(Self {
            config,
            http: reqwest::Client::new(),
            ledger,
        })
    }

    pub fn database(&self) -> &Database {
        self.ledger.database()
    }

    fn tokens(&self) -> anyhow::Result<Arc<dyn TokenProvider>> {
        let creds = &self.config.credentials;
        let secret = resolve_secret(
            creds.service_account_key.as_deref(),
            creds.service_account_key_file.as_deref(),
            creds.service_account_key_env_var.as_deref(),
        )
        .context("service account key")?;
        let key = ServiceAccountKey::from_secret(&secret)?;
        info!(client_email = %key.client_email, "using service account");
        Ok(Arc::new(TokenCache::new(ServiceAccountExchange::new(
            self.http.clone(),
            key,
        ))))
    }

    /// `None` when cleanup is disabled or no API key is configured.
    fn cleaner(&self) -> anyhow::Result<Option<Arc<dyn TextCleaner>>> {
        let cleaning = &self.config.cleaning;
        if !cleaning.enabled {
            return Ok(None);
        }
        let Some(api_key) = resolve_secret_optional(
            cleaning.api_key.as_deref(),
            cleaning.api_key_file.as_deref(),
            cleaning.api_key_env_var.as_deref(),
        )?
        else {
            warn!("cleaning is enabled but no API key is configured; pages keep raw text");
            return Ok(None);
        };
        let client = ChatClient::new(
            self.http.clone(),
            cleaning.endpoint.clone(),
            api_key,
            cleaning.retry_policy(),
        );
        Ok(Some(Arc::new(ChatTextCleaner::new(
            client,
            cleaning.model.clone(),
            cleaning.min_length,
        ))))
    }

    pub fn poller(&self) -> anyhow::Result<PollWorker> {
        let tokens = self.tokens()?;
        let store = Arc::new(GcsObjectStore::new(
            self.http.clone(),
            self.config.storage.endpoint.clone(),
            self.config.storage.temp_bucket.clone(),
            tokens.clone(),
        ));
        let ocr = Arc::new(DocumentAiClient::new(self.http.clone(), &self.config.ocr, tokens));
        Ok(PollWorker::new(
            self.ledger.clone(),
            store,
            ocr,
            self.cleaner()?,
            Arc::new(PipelineConfig::from_config(&self.config)),
        ))
    }

    pub fn ingestion(&self) -> anyhow::Result<IngestionPipeline> {
        let tokens = self.tokens()?;
        let store = Arc::new(GcsObjectStore::new(
            self.http.clone(),
            self.config.storage.endpoint.clone(),
            self.config.storage.temp_bucket.clone(),
            tokens.clone(),
        ));
        let ocr = Arc::new(DocumentAiClient::new(self.http.clone(), &self.config.ocr, tokens));
        let pipeline_config = Arc::new(PipelineConfig::from_config(&self.config));
        let poller = PollWorker::new(
            self.ledger.clone(),
            store.clone(),
            ocr.clone(),
            self.cleaner()?,
            pipeline_config.clone(),
        );
        Ok(IngestionPipeline::new(
            self.ledger.clone(),
            Arc::new(FsUploadSource::new(&self.config.storage.uploads_root)),
            store,
            ocr,
            Arc::new(LopdfExtractor::new()),
            poller,
            pipeline_config,
        ))
    }

    pub fn editor(&self) -> PageEditor {
        PageEditor::new(self.database().clone())
    }

    pub fn publisher(&self) -> PublishManager {
        PublishManager::new(self.ledger.clone())
    }

    pub fn generation_runner(&self) -> anyhow::Result<QuestionGenerationRunner> {
        let generation = &self.config.generation;
        let api_key = resolve_secret(
            generation.api_key.as_deref(),
            generation.api_key_file.as_deref(),
            generation.api_key_env_var.as_deref(),
        )
        .context("generation API key")?;
        let client = ChatClient::new(
            self.http.clone(),
            generation.endpoint.clone(),
            api_key,
            generation.retry_policy(),
        );
        let generator = LlmQuestionGenerator::new(
            client,
            generation.model.clone(),
            generation.max_source_chars,
            generation.max_tokens,
        );
        Ok(QuestionGenerationRunner::new(
            self.ledger.clone(),
            GenerationCache::new(self.database().clone()),
            Arc::new(generator),
        ))
    }
}
