pub mod config;
pub mod edits;
pub mod error;
pub mod ingest;
pub mod poll;
pub mod publish;

pub use config::PipelineConfig;
pub use edits::PageEditor;
pub use error::{ConflictKind, Entity, PipelineError};
pub use ingest::{IngestOutcome, IngestionPipeline, NewDocument};
pub use poll::{OcrJobParams, PollOutcome, PollWorker};
pub use publish::{PublishManager, PublishOptions, Published};
