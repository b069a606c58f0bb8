//! Publishing: freezing a draft's page text into an immutable version.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::error::{ConflictKind, Entity, PipelineError};
use crate::db::version_repo::{self, SnapshotPage, VersionRow};
use crate::db::{document_repo, format_timestamp, job_repo, page_repo};
use crate::generation::{GenerationJobParams, QuestionParams};
use crate::jobs::{JobLedger, NewJob};
use crate::model::{DocumentStatus, JobType};

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Replaces the document's display title when set.
    pub title: Option<String>,
    pub notes: Option<String>,
    /// Enqueue question generation over the new version.
    pub trigger_downstream: bool,
    pub questions: QuestionParams,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            title: None,
            notes: None,
            trigger_downstream: true,
            questions: QuestionParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub document_id: String,
    pub version_id: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream_job_id: Option<String>,
}

#[derive(Clone)]
pub struct PublishManager {
    ledger: JobLedger,
}

impl PublishManager {
    pub fn new(ledger: JobLedger) -> Self {
        Self { ledger }
    }

    /// Snapshots every page's final text as the document's next version and
    /// marks it published.
    ///
    /// Only the owner may publish, and only from `draft`. A downstream job
    /// references the new version, never the live pages.
    pub fn publish(
        &self,
        document_id: &str,
        owner_id: &str,
        options: PublishOptions,
    ) -> Result<Published, PipelineError> {
        if options.trigger_downstream {
            options.questions.validate()?;
        }

        let now = Utc::now();
        let stamp = format_timestamp(now);
        let extension = self.ledger.heartbeat_extension();

        let published = self.ledger.database().with_tx(|tx| {
            let document = document_repo::find_by_id(tx, document_id)?
                .ok_or_else(|| PipelineError::NotFound(Entity::Document, document_id.to_string()))?;
            if document.owner_id != owner_id {
                return Err(PipelineError::Forbidden);
            }
            match document.status()? {
                DocumentStatus::Draft => {}
                DocumentStatus::Published => {
                    return Err(PipelineError::Conflict(ConflictKind::AlreadyPublished))
                }
                status => {
                    return Err(PipelineError::Precondition(format!(
                        "document is {}; only drafts can be published",
                        status
                    )))
                }
            }

            let snapshot: Vec<SnapshotPage> = page_repo::list_for_document(tx, document_id)?
                .iter()
                .map(|page| SnapshotPage {
                    page_no: page.page_no,
                    final_text: page.final_text().to_string(),
                })
                .collect();

            let version = version_repo::next_version(tx, document_id, document.active_version)?;
            let row = VersionRow {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                version,
                snapshot,
                created_by: owner_id.to_string(),
                created_at: stamp.clone(),
                publish_notes: options.notes.clone(),
            };
            version_repo::insert(tx, &row)?;

            if document_repo::mark_published(tx, document_id, version, options.title.as_deref(), &stamp)?
                == 0
            {
                return Err(PipelineError::Precondition(
                    "document left draft while publishing".to_string(),
                ));
            }

            let downstream_job_id = if options.trigger_downstream {
                let params = GenerationJobParams {
                    version_id: row.id.clone(),
                    questions: options.questions,
                };
                let params = serde_json::to_value(&params)
                    .map_err(|e| PipelineError::Internal(format!("generation params: {}", e)))?;
                let job = NewJob {
                    owner_id: owner_id.to_string(),
                    document_id: None,
                    job_type: JobType::GenerateQuestions,
                    params,
                }
                .into_row(now, extension);
                job_repo::insert(tx, &job)?;
                Some(job.id)
            } else {
                None
            };

            Ok(Published {
                document_id: document_id.to_string(),
                version_id: row.id,
                version,
                downstream_job_id,
            })
        })?;

        info!(
            document_id,
            version = published.version,
            downstream = published.downstream_job_id.is_some(),
            "document published"
        );
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document_repo::tests::sample_document;
    use crate::db::page_repo::NewPage;
    use crate::db::Database;
    use crate::model::PageSource;

    fn manager_with_draft() -> PublishManager {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            document_repo::insert(conn, &sample_document("d1", DocumentStatus::Draft))?;
            let mut edited = NewPage::uncleaned(1, "R1".to_string(), PageSource::Ocr);
            edited.clean_text = "C1".to_string();
            page_repo::upsert(conn, "d1", &edited, "t0")?;
            page_repo::set_edit(conn, "d1", 1, Some("E1"), "owner-1", "t1")?;
            let mut cleaned = NewPage::uncleaned(2, "R2".to_string(), PageSource::Ocr);
            cleaned.clean_text = "C2".to_string();
            page_repo::upsert(conn, "d1", &cleaned, "t0")?;
            page_repo::upsert(conn, "d1", &NewPage::uncleaned(3, "R3".to_string(), PageSource::Native), "t0")
        })
        .unwrap();
        PublishManager::new(JobLedger::new(db, chrono::Duration::minutes(10)))
    }

    fn reopen_as_draft(manager: &PublishManager) {
        manager
            .ledger
            .database()
            .with_conn(|conn| {
                conn.execute("UPDATE documents SET status = 'draft' WHERE id = 'd1'", [])?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_publish_snapshots_final_text_in_page_order() {
        let manager = manager_with_draft();
        let published = manager
            .publish("d1", "owner-1", PublishOptions {
                title: Some("Fotosintez".to_string()),
                notes: Some("first cut".to_string()),
                ..PublishOptions::default()
            })
            .unwrap();
        assert_eq!(published.version, 1);

        let db = manager.ledger.database();
        let version = db
            .with_conn(|conn| version_repo::find_by_id(conn, &published.version_id))
            .unwrap()
            .unwrap();
        let texts: Vec<&str> = version.snapshot.iter().map(|p| p.final_text.as_str()).collect();
        assert_eq!(texts, vec!["E1", "C2", "R3"]);
        assert_eq!(version.publish_notes.as_deref(), Some("first cut"));

        let doc = db
            .with_conn(|conn| document_repo::find_by_id(conn, "d1"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.status().unwrap(), DocumentStatus::Published);
        assert_eq!(doc.active_version, 1);
        assert_eq!(doc.title.as_deref(), Some("Fotosintez"));
        assert!(doc.published_at.is_some());
    }

    #[test]
    fn test_downstream_job_references_version_only() {
        let manager = manager_with_draft();
        let published = manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap();

        let job_id = published.downstream_job_id.unwrap();
        let job = manager.ledger.find(&job_id).unwrap();
        assert_eq!(job.job_type().unwrap(), JobType::GenerateQuestions);
        assert!(job.document_id.is_none());
        assert_eq!(job.params["version_id"], published.version_id.as_str());
        assert_eq!(job.params["question_type"], "mcq");
    }

    #[test]
    fn test_publish_without_downstream() {
        let manager = manager_with_draft();
        let published = manager
            .publish("d1", "owner-1", PublishOptions {
                trigger_downstream: false,
                ..PublishOptions::default()
            })
            .unwrap();
        assert!(published.downstream_job_id.is_none());
    }

    #[test]
    fn test_second_publish_is_already_published() {
        let manager = manager_with_draft();
        manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap();
        let err = manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Conflict(ConflictKind::AlreadyPublished)
        ));
    }

    #[test]
    fn test_versions_increase_and_skip_orphaned_snapshots() {
        let manager = manager_with_draft();
        let first = manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap();
        assert_eq!(first.version, 1);

        // A publish that stored its snapshot but never flipped the status.
        manager
            .ledger
            .database()
            .with_conn(|conn| {
                version_repo::insert(
                    conn,
                    &VersionRow {
                        id: "orphan".to_string(),
                        document_id: "d1".to_string(),
                        version: 2,
                        snapshot: vec![],
                        created_by: "owner-1".to_string(),
                        created_at: "t2".to_string(),
                        publish_notes: None,
                    },
                )
            })
            .unwrap();
        reopen_as_draft(&manager);

        let next = manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap();
        assert_eq!(next.version, 3);
    }

    #[test]
    fn test_only_owner_may_publish() {
        let manager = manager_with_draft();
        let err = manager
            .publish("d1", "someone-else", PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden));
    }

    #[test]
    fn test_non_draft_is_precondition_failure() {
        let manager = manager_with_draft();
        manager
            .ledger
            .database()
            .with_conn(|conn| {
                conn.execute("UPDATE documents SET status = 'processing' WHERE id = 'd1'", [])?;
                Ok(())
            })
            .unwrap();
        let err = manager
            .publish("d1", "owner-1", PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));

        let err = manager
            .publish("missing", "owner-1", PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(Entity::Document, _)));
    }
}
