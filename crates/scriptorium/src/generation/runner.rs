//! Runs `generate_questions` jobs enqueued by publishing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use super::cache::GenerationCache;
use super::questions::{Question, QuestionGenerator, QuestionParams};
use crate::db::version_repo;
use crate::jobs::JobLedger;
use crate::model::{EventKind, JobStatus, JobType};
use crate::pipeline::{ConflictKind, Entity, PipelineError};

/// Parameters stored on a `generate_questions` job. The job points at an
/// immutable version, so later page edits never change its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJobParams {
    pub version_id: String,
    #[serde(flatten)]
    pub questions: QuestionParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub job_id: String,
    pub version_id: String,
    pub cache_hit: bool,
    pub questions: Vec<Question>,
}

#[derive(Clone)]
pub struct QuestionGenerationRunner {
    ledger: JobLedger,
    cache: GenerationCache,
    generator: Arc<dyn QuestionGenerator>,
}

impl QuestionGenerationRunner {
    pub fn new(
        ledger: JobLedger,
        cache: GenerationCache,
        generator: Arc<dyn QuestionGenerator>,
    ) -> Self {
        Self {
            ledger,
            cache,
            generator,
        }
    }

    /// Executes one queued generation job to a terminal status.
    pub async fn run(&self, job_id: &str) -> Result<GenerationOutcome, PipelineError> {
        let job = self.ledger.find(job_id)?;
        if job.job_type()? != JobType::GenerateQuestions {
            return Err(PipelineError::Precondition(format!(
                "job {} is a {} job",
                job_id, job.job_type
            )));
        }
        let status = job.status()?;
        if status.is_terminal() {
            return Err(PipelineError::Conflict(ConflictKind::JobFinished(status)));
        }
        if status == JobStatus::Queued {
            self.ledger.mark_running(job_id)?;
        }

        let span = info_span!("generate", job_id = %job_id);
        let result = self
            .generate(job_id, &job.owner_id, &job.params)
            .instrument(span)
            .await;

        match result {
            Ok(outcome) => {
                let summary = serde_json::json!({
                    "question_count": outcome.questions.len(),
                    "cache_hit": outcome.cache_hit,
                    "version_id": outcome.version_id,
                });
                self.ledger.mark_completed(job_id, Some(&summary))?;
                self.ledger.log_event(
                    job_id,
                    EventKind::Info,
                    Some("generate"),
                    &format!("Generated {} questions", outcome.questions.len()),
                    None,
                )?;
                Ok(outcome)
            }
            Err(err) => {
                self.ledger.mark_failed(job_id, &err.public_message())?;
                self.ledger.log_event(
                    job_id,
                    EventKind::Error,
                    Some("generate"),
                    "Question generation failed",
                    Some(&err),
                )?;
                Err(err)
            }
        }
    }

    async fn generate(
        &self,
        job_id: &str,
        owner_id: &str,
        params: &serde_json::Value,
    ) -> Result<GenerationOutcome, PipelineError> {
        let params: GenerationJobParams = serde_json::from_value(params.clone())
            .map_err(|e| PipelineError::Precondition(format!("invalid job params: {}", e)))?;

        let version = self
            .ledger
            .database()
            .with_conn(|conn| version_repo::find_by_id(conn, &params.version_id))?
            .ok_or_else(|| PipelineError::NotFound(Entity::Version, params.version_id.clone()))?;

        let source_text = version.joined_text();
        let cached = self
            .cache
            .get_or_generate(
                owner_id,
                Some(&version.document_id),
                &source_text,
                &params.questions,
                self.generator.as_ref(),
            )
            .await?;

        info!(
            version = version.version,
            count = cached.questions.len(),
            cache_hit = cached.cache_hit,
            "generation finished"
        );
        Ok(GenerationOutcome {
            job_id: job_id.to_string(),
            version_id: version.id,
            cache_hit: cached.cache_hit,
            questions: cached.questions,
        })
    }
}
