//! Advancing extraction jobs parked on a remote OCR operation.
//!
//! [`PollWorker::poll`] is the externally re-invoked entry point: one status
//! check, never a wait. [`PollWorker::wait_until_settled`] is the bounded
//! in-process loop for job types configured to block instead. A job type
//! uses exactly one of the two.
//!
//! Everything is derived from the persisted job row, so a check that dies
//! halfway can simply be run again.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::PipelineConfig;
use super::error::PipelineError;
use crate::cleaning::{is_too_short, LanguageHint, TextCleaner};
use crate::config::PollingDiscipline;
use crate::db::job_repo::{self, JobRow};
use crate::db::page_repo::{self, NewPage};
use crate::db::{document_repo, now_timestamp, DatabaseError};
use crate::error::{CleaningError, StorageError};
use crate::jobs::{ensure_changed, JobLedger};
use crate::model::{EventKind, JobStatus, JobType, PageSource};
use crate::ocr::output::{is_shard_key, parse_shard};
use crate::ocr::{merge_shards, OcrPage, OcrProvider};
use crate::storage::ObjectStore;
use crate::worker::pool::WorkerPool;

/// Where an async OCR job's files live, stored in `Job.params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrJobParams {
    pub input_key: String,
    pub output_prefix: String,
    pub input_uri: String,
    pub output_uri: String,
    pub mime_type: String,
}

/// Point-in-time view of a job after a poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub draft_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollOutcome {
    fn polling(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Polling,
            draft_ready: false,
            page_count: None,
            error: None,
        }
    }

    fn completed(job_id: &str, page_count: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Completed,
            draft_ready: true,
            page_count: Some(page_count),
            error: None,
        }
    }

    fn failed(job_id: &str, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Failed,
            draft_ready: false,
            page_count: None,
            error: Some(error.to_string()),
        }
    }

    /// Reports a job as stored, without touching it.
    pub fn from_job(job: &JobRow) -> Result<Self, DatabaseError> {
        let status = job.status()?;
        let extraction = job.job_type()? == JobType::DocumentExtract;
        Ok(Self {
            job_id: job.id.clone(),
            status,
            draft_ready: extraction && status == JobStatus::Completed,
            page_count: job
                .result
                .as_ref()
                .and_then(|r| r.get("page_count"))
                .and_then(|n| n.as_u64())
                .map(|n| n as u32),
            error: job.error_message.clone(),
        })
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Clone)]
pub struct PollWorker {
    ledger: JobLedger,
    temp_store: Arc<dyn ObjectStore>,
    ocr: Arc<dyn OcrProvider>,
    cleaner: Option<Arc<dyn TextCleaner>>,
    config: Arc<PipelineConfig>,
}

impl PollWorker {
    /// `cleaner` is `None` when cleanup is disabled; pages then keep their
    /// raw text.
    pub fn new(
        ledger: JobLedger,
        temp_store: Arc<dyn ObjectStore>,
        ocr: Arc<dyn OcrProvider>,
        cleaner: Option<Arc<dyn TextCleaner>>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            ledger,
            temp_store,
            ocr,
            cleaner,
            config,
        }
    }

    /// One externally triggered check.
    ///
    /// A job that is not `polling`, or whose type is polled in-process, is
    /// reported as stored.
    pub async fn poll(&self, job_id: &str) -> Result<PollOutcome, PipelineError> {
        let job = self.ledger.find(job_id)?;
        if job.status()? != JobStatus::Polling {
            return Ok(PollOutcome::from_job(&job)?);
        }
        if self.config.discipline(job.job_type()?) == PollingDiscipline::InProcess {
            debug!(job_id, "job is polled in-process; reporting stored status");
            return Ok(PollOutcome::from_job(&job)?);
        }
        self.check_once(job).await
    }

    /// Checks until the operation settles, at most `max_poll_attempts` times
    /// `poll_interval` apart. A job still running after that is failed.
    ///
    /// Only for job types polled in-process; an externally polled job is
    /// left to [`PollWorker::poll`].
    pub async fn wait_until_settled(&self, job_id: &str) -> Result<PollOutcome, PipelineError> {
        let job = self.ledger.find(job_id)?;
        let job_type = job.job_type()?;
        if self.config.discipline(job_type) != PollingDiscipline::InProcess {
            return Err(PipelineError::Precondition(format!(
                "{} jobs are polled externally; check them with poll",
                job_type
            )));
        }

        let attempts = self.config.max_poll_attempts.max(1);

        for attempt in 1..=attempts {
            let job = self.ledger.find(job_id)?;
            if job.status()? != JobStatus::Polling {
                return Ok(PollOutcome::from_job(&job)?);
            }

            match self.check_once(job).await {
                Ok(outcome) if outcome.is_settled() => return Ok(outcome),
                Ok(_) => debug!(job_id, attempt, "operation still running"),
                Err(e) => warn!(job_id, attempt, error = %e, "poll check failed"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        let job = self.ledger.find(job_id)?;
        if job.status()? != JobStatus::Polling {
            return Ok(PollOutcome::from_job(&job)?);
        }
        self.fail(
            &job,
            &format!("OCR operation did not finish after {} checks", attempts),
            None,
        )
    }

    async fn check_once(&self, job: JobRow) -> Result<PollOutcome, PipelineError> {
        let span = info_span!(
            "poll",
            job_id = %job.id,
            document_id = job.document_id.as_deref().unwrap_or_default(),
        );
        self.check_job(job).instrument(span).await
    }

    async fn check_job(&self, job: JobRow) -> Result<PollOutcome, PipelineError> {
        let Some(handle) = job.operation_handle.as_deref() else {
            return self.fail(&job, "Job has no operation handle", None);
        };

        let status = match self.ocr.status(handle).await {
            Ok(status) => status,
            Err(e) => {
                // The job stays polling; the next check asks again.
                self.ledger.log_event(
                    &job.id,
                    EventKind::Warning,
                    Some("poll"),
                    "Operation status check failed",
                    Some(&e),
                )?;
                return Err(e.into());
            }
        };

        if !status.done {
            self.ledger.heartbeat(&job.id)?;
            return Ok(PollOutcome::polling(&job.id));
        }

        if let Some(error) = status.error {
            return self.fail(&job, &error, None);
        }

        match self.finalize(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                self.fail(&job, &e.public_message(), Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Collects the OCR output, cleans it, stores pages and flips the
    /// document to draft.
    async fn finalize(&self, job: &JobRow) -> Result<PollOutcome, PipelineError> {
        let params: OcrJobParams = serde_json::from_value(job.params.clone())
            .map_err(|e| PipelineError::Internal(format!("invalid OCR job params: {}", e)))?;
        let document_id = job
            .document_id
            .as_deref()
            .ok_or_else(|| PipelineError::Internal("extraction job has no document".to_string()))?;

        let shard_keys: Vec<String> = self
            .temp_store
            .list(&params.output_prefix)
            .await?
            .into_iter()
            .filter(|key| is_shard_key(key))
            .collect();

        let (page_count, cleaning_failures) = if shard_keys.is_empty() {
            self.resume_or_empty(job, document_id)?
        } else {
            let pages = self.read_pages(&shard_keys).await?;
            info!(pages = pages.len(), shards = shard_keys.len(), "OCR output collected");
            let cleaned = self.clean_pages(&job.id, &pages).await;
            let failures = cleaned.iter().filter(|p| p.cleaning_failed).count();
            self.store_pages(&job.id, document_id, &cleaned)?;
            (cleaned.len() as u32, failures)
        };

        let cleanup_failed = self.delete_temp_files(job, &params, &shard_keys).await?;

        let result = serde_json::json!({
            "page_count": page_count,
            "cleaning_failures": cleaning_failures,
            "cleanup_failed": cleanup_failed,
        });
        let now = now_timestamp();
        self.ledger.database().with_tx(|tx| {
            if document_repo::mark_draft(tx, document_id, page_count, &now)? == 0 {
                return Err(PipelineError::Precondition(format!(
                    "document '{}' is no longer processing",
                    document_id
                )));
            }
            let changed = job_repo::mark_completed(tx, &job.id, Some(&result), &now)?;
            ensure_changed(tx, &job.id, changed)?;
            job_repo::insert_event(
                tx,
                &job.id,
                EventKind::Info,
                Some("complete"),
                &format!("Extracted {} pages", page_count),
                None,
                &now,
            )?;
            Ok(())
        })?;

        info!(page_count, cleaning_failures, cleanup_failed, "document ready as draft");
        Ok(PollOutcome::completed(&job.id, page_count))
    }

    /// No shards left means an earlier check stored the pages and then
    /// deleted its output before it could finish.
    fn resume_or_empty(&self, job: &JobRow, document_id: &str) -> Result<(u32, usize), PipelineError> {
        let stored = self
            .ledger
            .database()
            .with_conn(|conn| page_repo::list_for_document(conn, document_id))?;
        if stored.is_empty() {
            warn!(job_id = %job.id, "OCR operation produced no output shards");
        } else {
            info!(pages = stored.len(), "output already consumed; resuming");
        }
        let failures = stored.iter().filter(|p| p.cleaning_failed).count();
        Ok((stored.len() as u32, failures))
    }

    async fn read_pages(&self, shard_keys: &[String]) -> Result<Vec<OcrPage>, PipelineError> {
        let mut shards = Vec::with_capacity(shard_keys.len());
        for key in shard_keys {
            let raw = self.temp_store.get(key).await?;
            shards.push(parse_shard(&raw)?);
        }
        Ok(merge_shards(shards))
    }

    /// Cleans every page with bounded concurrency. A page whose cleanup
    /// fails keeps its raw text and is flagged.
    async fn clean_pages(&self, job_id: &str, pages: &[OcrPage]) -> Vec<NewPage> {
        let Some(cleaner) = self.cleaner.as_deref().filter(|_| self.config.cleaning_enabled) else {
            return pages
                .iter()
                .map(|p| NewPage::uncleaned(p.page_no, p.raw_text.clone(), PageSource::Ocr))
                .collect();
        };

        let total = pages.len() as u32;
        let done = AtomicU32::new(0);
        let hint = self.config.language_hint;
        let min_length = self.config.cleaning_min_length;
        let pool = WorkerPool::new(self.config.cleaning_concurrency);

        pool.map_or_else(
            pages,
            |_, page| {
                let (done, ledger) = (&done, &self.ledger);
                async move {
                    let result = clean_page(cleaner, page, hint, min_length).await;
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Err(e) = ledger.update_progress(job_id, finished, total, "cleaning") {
                        debug!(error = %e, "progress update skipped");
                    }
                    result
                }
            },
            |page, err| {
                warn!(page_no = page.page_no, error = %err, "cleaning failed; keeping raw text");
                NewPage {
                    cleaning_failed: true,
                    ..NewPage::uncleaned(page.page_no, page.raw_text.clone(), PageSource::Ocr)
                }
            },
        )
        .await
    }

    fn store_pages(
        &self,
        job_id: &str,
        document_id: &str,
        pages: &[NewPage],
    ) -> Result<(), PipelineError> {
        let batch_size = self.config.page_insert_batch.max(1);
        let total = pages.len() as u32;
        let mut stored = 0u32;
        for batch in pages.chunks(batch_size) {
            let now = now_timestamp();
            self.ledger
                .database()
                .with_tx(|tx| page_repo::upsert_batch(tx, document_id, batch, &now))?;
            stored += batch.len() as u32;
            self.ledger.update_progress(job_id, stored, total, "saving")?;
        }
        Ok(())
    }

    /// Best-effort removal of the staged input and the result shards.
    /// Returns whether anything was left behind.
    async fn delete_temp_files(
        &self,
        job: &JobRow,
        params: &OcrJobParams,
        shard_keys: &[String],
    ) -> Result<bool, PipelineError> {
        let mut last_error: Option<StorageError> = None;
        for key in std::iter::once(&params.input_key).chain(shard_keys) {
            if let Err(e) = self.temp_store.delete(key).await {
                warn!(key = %key, error = %e, "failed to delete temporary file");
                last_error = Some(e);
            }
        }

        let Some(err) = last_error else {
            return Ok(false);
        };
        self.ledger.log_event(
            &job.id,
            EventKind::Warning,
            Some("cleanup"),
            "Temporary OCR files were not fully deleted",
            Some(&err),
        )?;
        Ok(true)
    }

    /// Fails the job and its document with `message` kept verbatim. The
    /// job's error is caller-visible; `detail` only goes to the event's
    /// stack trace.
    fn fail(
        &self,
        job: &JobRow,
        message: &str,
        detail: Option<&str>,
    ) -> Result<PollOutcome, PipelineError> {
        let now = now_timestamp();
        self.ledger.database().with_tx(|tx| {
            let changed = job_repo::mark_failed(tx, &job.id, message, &now)?;
            ensure_changed(tx, &job.id, changed)?;
            if let Some(document_id) = &job.document_id {
                document_repo::mark_failed(tx, document_id, &now)?;
            }
            job_repo::insert_event(
                tx,
                &job.id,
                EventKind::Error,
                Some("poll"),
                message,
                detail,
                &now,
            )?;
            Ok::<_, PipelineError>(())
        })?;
        warn!(job_id = %job.id, "extraction failed");
        Ok(PollOutcome::failed(&job.id, message))
    }
}

async fn clean_page(
    cleaner: &dyn TextCleaner,
    page: &OcrPage,
    hint: LanguageHint,
    min_length: usize,
) -> Result<NewPage, CleaningError> {
    if is_too_short(&page.raw_text, min_length) {
        return Ok(NewPage::uncleaned(page.page_no, page.raw_text.clone(), PageSource::Ocr));
    }
    let cleaned = cleaner.clean(&page.raw_text, hint).await?;
    Ok(NewPage {
        page_no: page.page_no,
        raw_text: page.raw_text.clone(),
        clean_text: cleaned.clean_text,
        source: PageSource::Ocr,
        cleaning_model: Some(cleaner.model().to_string()),
        cleaning_version: Some(cleaner.version().to_string()),
        cleaning_failed: false,
        changes_summary: cleaned.changes_summary,
    })
}
