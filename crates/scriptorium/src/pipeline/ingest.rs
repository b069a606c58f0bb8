//! Document ingestion: lock, then native text or OCR dispatch.
//!
//! Native extraction and small-image OCR finish within the call. Everything
//! else is handed to an asynchronous OCR operation and the job is parked in
//! `polling` for the [`PollWorker`].

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::PipelineConfig;
use super::error::{ConflictKind, Entity, PipelineError};
use super::poll::{OcrJobParams, PollOutcome, PollWorker};
use crate::config::PollingDiscipline;
use crate::db::document_repo::{self, DocumentRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::page_repo::{self, NewPage};
use crate::db::{format_timestamp, now_timestamp, Database};
use crate::jobs::{ensure_changed, try_acquire, JobLedger, LockOutcome, NewJob};
use crate::model::{DocumentStatus, EventKind, JobStatus, JobType, PageSource};
use crate::ocr::OcrProvider;
use crate::processor::{FileType, NativeExtractor, NativeText};
use crate::storage::{ObjectStore, SourceReference, UploadSource};

/// Result of [`IngestionPipeline::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Pages are stored and the document is a draft.
    Completed { job_id: String, draft_ready: bool },
    /// An OCR operation is running; poll `job_id` until it settles.
    Polling { job_id: String },
    /// The in-process wait ended with the operation failed.
    Failed { job_id: String, error: String },
}

impl IngestOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            IngestOutcome::Completed { job_id, .. }
            | IngestOutcome::Polling { job_id }
            | IngestOutcome::Failed { job_id, .. } => job_id,
        }
    }
}

impl From<PollOutcome> for IngestOutcome {
    fn from(outcome: PollOutcome) -> Self {
        match outcome.status {
            JobStatus::Completed => IngestOutcome::Completed {
                job_id: outcome.job_id,
                draft_ready: outcome.draft_ready,
            },
            JobStatus::Failed => IngestOutcome::Failed {
                job_id: outcome.job_id,
                error: outcome.error.unwrap_or_default(),
            },
            _ => IngestOutcome::Polling {
                job_id: outcome.job_id,
            },
        }
    }
}

/// A new upload to register before ingestion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: String,
    pub file_name: String,
    pub storage_path: String,
    pub mime_type: Option<String>,
    pub file_size_bytes: u64,
    pub title: Option<String>,
}

pub struct IngestionPipeline {
    ledger: JobLedger,
    uploads: Arc<dyn UploadSource>,
    temp_store: Arc<dyn ObjectStore>,
    ocr: Arc<dyn OcrProvider>,
    native: Arc<dyn NativeExtractor>,
    poller: PollWorker,
    config: Arc<PipelineConfig>,
}

impl IngestionPipeline {
    pub fn new(
        ledger: JobLedger,
        uploads: Arc<dyn UploadSource>,
        temp_store: Arc<dyn ObjectStore>,
        ocr: Arc<dyn OcrProvider>,
        native: Arc<dyn NativeExtractor>,
        poller: PollWorker,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            ledger,
            uploads,
            temp_store,
            ocr,
            native,
            poller,
            config,
        }
    }

    fn db(&self) -> &Database {
        self.ledger.database()
    }

    /// Records an upload in `uploading` status. The file type comes from the
    /// MIME type, or the file name when the MIME type says nothing useful.
    pub fn register_document(&self, doc: NewDocument) -> Result<DocumentRow, PipelineError> {
        let file_type = FileType::detect(doc.mime_type.as_deref(), &doc.file_name);
        if !file_type.is_supported() {
            return Err(PipelineError::Precondition(format!(
                "unsupported file type for '{}'",
                doc.file_name
            )));
        }

        let now = now_timestamp();
        let row = DocumentRow {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: doc.owner_id,
            title: doc.title,
            file_name: doc.file_name,
            storage_path: doc.storage_path,
            mime_type: doc.mime_type,
            file_type: file_type.as_str().to_string(),
            file_size_bytes: doc.file_size_bytes,
            status: DocumentStatus::Uploading.as_str().to_string(),
            page_count: 0,
            active_version: 0,
            published_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.db().with_conn(|conn| document_repo::insert(conn, &row))?;
        info!(document_id = %row.id, file_type = %file_type, "document registered");
        Ok(row)
    }

    /// Extracts the text of an uploaded document.
    ///
    /// Fails with [`ConflictKind::AlreadyProcessing`] when the document
    /// already has an active job. Any failure after the lock is taken fails
    /// both the job and the document.
    pub async fn ingest(
        &self,
        document_id: &str,
        owner_id: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        let (document, job) = self.lock_document(document_id, owner_id)?;
        self.ledger.mark_running(&job.id)?;

        let span = info_span!("ingest", job_id = %job.id, document_id = %document.id);
        let result = self.extract(&document, &job).instrument(span).await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&job, &document, &e);
                Err(e)
            }
        }
    }

    /// Takes the lock and moves the document to `processing` atomically.
    /// Pages left by an earlier attempt are dropped in the same transaction.
    fn lock_document(
        &self,
        document_id: &str,
        owner_id: &str,
    ) -> Result<(DocumentRow, JobRow), PipelineError> {
        let extension = self.ledger.heartbeat_extension();
        self.db().with_tx(|tx| {
            let document = document_repo::find_by_id(tx, document_id)?
                .ok_or_else(|| PipelineError::NotFound(Entity::Document, document_id.to_string()))?;
            if document.owner_id != owner_id {
                return Err(PipelineError::Forbidden);
            }

            let job = NewJob::for_document(owner_id, document_id, JobType::DocumentExtract);
            let job = match try_acquire(tx, job, Utc::now(), extension)? {
                LockOutcome::Acquired(job) => job,
                LockOutcome::AlreadyLocked => {
                    return Err(PipelineError::Conflict(ConflictKind::AlreadyProcessing))
                }
            };

            let now = now_timestamp();
            let moved = document_repo::transition(
                tx,
                document_id,
                &[DocumentStatus::Uploading, DocumentStatus::Failed],
                DocumentStatus::Processing,
                &now,
            )?;
            if moved == 0 {
                return Err(match document.status()? {
                    DocumentStatus::Published => {
                        PipelineError::Conflict(ConflictKind::AlreadyPublished)
                    }
                    status => PipelineError::Precondition(format!(
                        "document is {}; only uploading or failed documents can be ingested",
                        status
                    )),
                });
            }

            let cleared = page_repo::delete_for_document(tx, document_id)?;
            job_repo::insert_event(
                tx,
                &job.id,
                EventKind::Info,
                Some("lock"),
                &format!("Lock acquired; cleared {} stale pages", cleared),
                None,
                &now,
            )?;
            Ok((document, job))
        })
    }

    async fn extract(
        &self,
        document: &DocumentRow,
        job: &JobRow,
    ) -> Result<IngestOutcome, PipelineError> {
        let file_type: FileType = document.file_type.parse()?;
        let reference = self
            .uploads
            .reference(&document.storage_path, self.config.signed_reference_ttl)
            .await?;

        if file_type.supports_native_pagination()
            && reference.size_bytes <= self.config.native_size_limit_bytes
        {
            self.ledger.update_progress(&job.id, 0, 1, "native_extraction")?;
            if let Some(text) = self.try_native(job, &reference).await? {
                return self.complete_native(document, job, text);
            }
        }

        let mime_type = document
            .mime_type
            .clone()
            .unwrap_or_else(|| file_type.default_mime().to_string());

        if file_type.is_paginated() || reference.size_bytes > self.config.sync_size_limit_bytes {
            self.dispatch_async(document, job, &reference, &mime_type)
                .await
        } else {
            self.ocr_sync(document, job, &reference, &mime_type).await
        }
    }

    /// Native per-page text, or `None` when OCR should take over.
    async fn try_native(
        &self,
        job: &JobRow,
        reference: &SourceReference,
    ) -> Result<Option<NativeText>, PipelineError> {
        let content = self
            .uploads
            .read_all(reference, self.config.native_size_limit_bytes)
            .await?;

        let pages = match self.native.extract_pages(content).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, "native extraction failed; falling back to OCR");
                self.ledger.log_event(
                    &job.id,
                    EventKind::Warning,
                    Some("native_extraction"),
                    "Native extraction failed, using OCR",
                    Some(&e),
                )?;
                return Ok(None);
            }
        };

        let text = NativeText::new(pages);
        if text.is_usable(self.config.native_text_threshold) {
            return Ok(Some(text));
        }

        debug!(
            pages = text.pages.len(),
            chars = text.total_chars(),
            "native text below threshold; treating as scanned"
        );
        self.ledger.log_event(
            &job.id,
            EventKind::Info,
            Some("native_extraction"),
            &format!(
                "Only {} characters of native text across {} pages, using OCR",
                text.total_chars(),
                text.pages.len()
            ),
            None,
        )?;
        Ok(None)
    }

    fn complete_native(
        &self,
        document: &DocumentRow,
        job: &JobRow,
        text: NativeText,
    ) -> Result<IngestOutcome, PipelineError> {
        let pages: Vec<NewPage> = text
            .pages
            .into_iter()
            .zip(1u32..)
            .map(|(page, page_no)| NewPage::uncleaned(page_no, page, PageSource::Native))
            .collect();
        self.finish_with_pages(document, job, &pages, "native")?;
        info!(page_count = pages.len(), "native text extracted");
        Ok(IngestOutcome::Completed {
            job_id: job.id.clone(),
            draft_ready: true,
        })
    }

    async fn ocr_sync(
        &self,
        document: &DocumentRow,
        job: &JobRow,
        reference: &SourceReference,
        mime_type: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        self.ledger.update_progress(&job.id, 0, 1, "ocr")?;
        let content: Bytes = self
            .uploads
            .read_all(reference, self.config.sync_size_limit_bytes)
            .await?;
        let text = self.ocr.process(content, mime_type).await?;

        let page = NewPage::uncleaned(1, text.trim().to_string(), PageSource::Ocr);
        self.finish_with_pages(document, job, std::slice::from_ref(&page), "ocr_sync")?;
        info!(chars = page.raw_text.len(), "synchronous OCR finished");
        Ok(IngestOutcome::Completed {
            job_id: job.id.clone(),
            draft_ready: true,
        })
    }

    /// Stores pages, flips the document to draft and completes the job in
    /// one transaction.
    fn finish_with_pages(
        &self,
        document: &DocumentRow,
        job: &JobRow,
        pages: &[NewPage],
        source: &str,
    ) -> Result<(), PipelineError> {
        let page_count = pages.len() as u32;
        let result = serde_json::json!({ "page_count": page_count, "source": source });
        let now = now_timestamp();

        self.db().with_tx(|tx| {
            for batch in pages.chunks(self.config.page_insert_batch.max(1)) {
                page_repo::upsert_batch(tx, &document.id, batch, &now)?;
            }
            if document_repo::mark_draft(tx, &document.id, page_count, &now)? == 0 {
                return Err(PipelineError::Precondition(
                    "document left processing during extraction".to_string(),
                ));
            }
            let changed = job_repo::mark_completed(tx, &job.id, Some(&result), &now)?;
            ensure_changed(tx, &job.id, changed)?;
            Ok(())
        })
    }

    /// Streams the upload into temporary storage and starts an async OCR
    /// operation over it.
    async fn dispatch_async(
        &self,
        document: &DocumentRow,
        job: &JobRow,
        reference: &SourceReference,
        mime_type: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        let stamp = Utc::now().timestamp_millis();
        let extension = Path::new(&document.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| document.file_type.clone());
        let input_key = format!(
            "inputs/{}/{}/{}.{}",
            document.owner_id, document.id, stamp, extension
        );
        let output_prefix = format!("outputs/{}/{}/{}/", document.owner_id, document.id, stamp);

        self.ledger.update_progress(&job.id, 0, 1, "staging")?;
        let body = self.uploads.open(reference).await?;
        self.temp_store.put(&input_key, body, mime_type).await?;
        debug!(key = %input_key, bytes = reference.size_bytes, "upload staged for OCR");

        let params = OcrJobParams {
            input_uri: self.temp_store.uri(&input_key),
            output_uri: self.temp_store.uri(&output_prefix),
            input_key,
            output_prefix,
            mime_type: mime_type.to_string(),
        };

        let handle = match self
            .ocr
            .submit(&params.input_uri, mime_type, &params.output_uri)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = self.temp_store.delete(&params.input_key).await {
                    warn!(error = %cleanup, "failed to remove staged input");
                }
                return Err(e.into());
            }
        };

        let params_json = serde_json::to_value(&params)
            .map_err(|e| PipelineError::Internal(format!("OCR job params: {}", e)))?;
        self.ledger.mark_polling(&job.id, &handle, &params_json)?;
        self.ledger.log_event(
            &job.id,
            EventKind::Info,
            Some("ocr_submit"),
            "Asynchronous OCR operation started",
            None,
        )?;
        info!(operation = %handle, "OCR operation submitted");

        match self.config.discipline(JobType::DocumentExtract) {
            PollingDiscipline::External => Ok(IngestOutcome::Polling {
                job_id: job.id.clone(),
            }),
            PollingDiscipline::InProcess => {
                Ok(self.poller.wait_until_settled(&job.id).await?.into())
            }
        }
    }

    /// Records a failed ingestion on the job and the document. Only the
    /// public message is stored on the job; the full error goes to the
    /// event's stack trace. Failures to record are only logged.
    fn fail(&self, job: &JobRow, document: &DocumentRow, error: &PipelineError) {
        let now = format_timestamp(Utc::now());
        let message = error.public_message();
        let detail = error.to_string();
        let recorded = self.db().with_tx(|tx| {
            job_repo::mark_failed(tx, &job.id, &message, &now)?;
            document_repo::mark_failed(tx, &document.id, &now)?;
            job_repo::insert_event(
                tx,
                &job.id,
                EventKind::Error,
                Some("ingest"),
                &format!("Ingestion failed: {}", message),
                Some(&detail),
                &now,
            )
        });
        if let Err(e) = recorded {
            warn!(job_id = %job.id, error = %e, "could not record ingestion failure");
        }
        warn!(job_id = %job.id, document_id = %document.id, error = %error, "ingestion failed");
    }
}
