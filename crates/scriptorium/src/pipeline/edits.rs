//! Manual page edits on draft documents.

use tracing::debug;

use super::error::{Entity, PipelineError};
use crate::db::{document_repo, now_timestamp, page_repo, Database};
use crate::model::DocumentStatus;

#[derive(Clone)]
pub struct PageEditor {
    db: Database,
}

impl PageEditor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Sets the edited text of one page, or clears it with `None` so the
    /// cleaned or raw text applies again. Returns the edit timestamp.
    pub fn save_edit(
        &self,
        document_id: &str,
        owner_id: &str,
        page_no: u32,
        edited_text: Option<&str>,
    ) -> Result<String, PipelineError> {
        let saved_at = now_timestamp();
        self.db.with_tx(|tx| {
            let document = document_repo::find_by_id(tx, document_id)?
                .ok_or_else(|| PipelineError::NotFound(Entity::Document, document_id.to_string()))?;
            if document.owner_id != owner_id {
                return Err(PipelineError::Forbidden);
            }
            let status = document.status()?;
            if status != DocumentStatus::Draft {
                return Err(PipelineError::Precondition(format!(
                    "document is {}; pages can only be edited in draft",
                    status
                )));
            }

            let changed =
                page_repo::set_edit(tx, document_id, page_no, edited_text, owner_id, &saved_at)?;
            if changed == 0 {
                return Err(PipelineError::NotFound(
                    Entity::Page,
                    format!("{}#{}", document_id, page_no),
                ));
            }
            Ok(())
        })?;

        debug!(document_id, page_no, cleared = edited_text.is_none(), "page edit saved");
        Ok(saved_at)
    }
}
