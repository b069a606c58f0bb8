//! Test harness for isolated pipeline runs.
//!
//! Each `TestHarness` owns an in-memory database, a temporary uploads
//! directory read through `FsUploadSource`, an in-memory temp bucket and
//! scripted remote services, wired the same way the binary wires the real
//! ones.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use scriptorium::db::document_repo::{self, DocumentRow};
use scriptorium::db::job_repo::{self, JobEventRow, JobRow};
use scriptorium::db::page_repo::{self, PageRow};
use scriptorium::db::Database;
use scriptorium::generation::{GenerationCache, QuestionGenerationRunner};
use scriptorium::jobs::JobLedger;
use scriptorium::pipeline::{
    IngestionPipeline, NewDocument, PageEditor, PipelineConfig, PollWorker, PublishManager,
};
use scriptorium::processor::LopdfExtractor;
use scriptorium::storage::{FsUploadSource, InMemoryObjectStore};

use super::fakes::{CountingGenerator, FlakyCleaner, ScriptedOcr};

pub const OWNER: &str = "teacher-1";

pub struct TestHarness {
    temp_dir: TempDir,
    pub uploads_dir: PathBuf,
    pub db: Database,
    pub ledger: JobLedger,
    pub store: Arc<InMemoryObjectStore>,
    pub ocr: Arc<ScriptedOcr>,
    pub cleaner: Arc<FlakyCleaner>,
    pub generator: Arc<CountingGenerator>,
    pub pipeline: IngestionPipeline,
    pub poller: PollWorker,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Self::fast_config(), FlakyCleaner::default())
    }

    pub fn with_cleaner(cleaner: FlakyCleaner) -> Self {
        Self::with_config(Self::fast_config(), cleaner)
    }

    /// Defaults, with polling waits short enough for tests.
    pub fn fast_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(1),
            max_poll_attempts: 5,
            ..PipelineConfig::default()
        }
    }

    pub fn with_config(config: PipelineConfig, cleaner: FlakyCleaner) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let uploads_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).expect("Failed to create uploads dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let ledger = JobLedger::new(db.clone(), chrono::Duration::minutes(10));
        let store = Arc::new(InMemoryObjectStore::new("scriptorium-temp"));
        let ocr = Arc::new(ScriptedOcr::new(store.clone()));
        let cleaner = Arc::new(cleaner);
        let config = Arc::new(config);

        let poller = PollWorker::new(
            ledger.clone(),
            store.clone(),
            ocr.clone(),
            Some(cleaner.clone()),
            config.clone(),
        );
        let pipeline = IngestionPipeline::new(
            ledger.clone(),
            Arc::new(FsUploadSource::new(&uploads_dir)),
            store.clone(),
            ocr.clone(),
            Arc::new(LopdfExtractor::new()),
            poller.clone(),
            config,
        );

        Self {
            temp_dir,
            uploads_dir,
            db,
            ledger,
            store,
            ocr,
            cleaner,
            generator: Arc::new(CountingGenerator::default()),
            pipeline,
            poller,
        }
    }

    /// Writes an upload for [`OWNER`] and registers it.
    pub fn upload(&self, file_name: &str, mime_type: Option<&str>, content: &[u8]) -> DocumentRow {
        let storage_path = format!("{}/{}", OWNER, file_name);
        let path = self.uploads_dir.join(&storage_path);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create upload dir");
        std::fs::write(&path, content).expect("Failed to write upload");

        self.pipeline
            .register_document(NewDocument {
                owner_id: OWNER.to_string(),
                file_name: file_name.to_string(),
                storage_path,
                mime_type: mime_type.map(String::from),
                file_size_bytes: content.len() as u64,
                title: None,
            })
            .expect("Failed to register document")
    }

    pub fn document(&self, id: &str) -> DocumentRow {
        self.db
            .with_conn(|conn| document_repo::find_by_id(conn, id))
            .unwrap()
            .expect("document exists")
    }

    pub fn pages(&self, document_id: &str) -> Vec<PageRow> {
        self.db
            .with_conn(|conn| page_repo::list_for_document(conn, document_id))
            .unwrap()
    }

    pub fn job(&self, id: &str) -> JobRow {
        self.ledger.find(id).unwrap()
    }

    pub fn events(&self, job_id: &str) -> Vec<JobEventRow> {
        self.ledger.events(job_id).unwrap()
    }

    pub fn jobs_for_document(&self, document_id: &str) -> usize {
        self.db
            .with_conn(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE document_id = ?1",
                    [document_id],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .unwrap()
    }

    pub fn active_job(&self, document_id: &str) -> Option<JobRow> {
        self.db
            .with_conn(|conn| job_repo::find_active_for_document(conn, document_id))
            .unwrap()
    }

    pub fn editor(&self) -> PageEditor {
        PageEditor::new(self.db.clone())
    }

    pub fn publisher(&self) -> PublishManager {
        PublishManager::new(self.ledger.clone())
    }

    pub fn generation_runner(&self) -> QuestionGenerationRunner {
        QuestionGenerationRunner::new(
            self.ledger.clone(),
            GenerationCache::new(self.db.clone()),
            self.generator.clone(),
        )
    }
}
