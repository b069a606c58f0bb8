//! scriptorium - drive the document ingestion pipeline from the shell.
//!
//! Every command prints JSON on stdout. Pipeline failures print their public
//! message on stderr and exit with status 1.

mod app;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use scriptorium::generation::{Difficulty, QuestionParams, QuestionType};
use scriptorium::load_config;
use scriptorium::logging::{self, LogFormat};
use scriptorium::pipeline::{NewDocument, PipelineError, PublishOptions};

use app::App;

#[derive(Parser)]
#[command(name = "scriptorium")]
#[command(about = "Turn uploaded teaching material into editable, versioned page text")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "SCRIPTORIUM_CONFIG", default_value = "scriptorium.json")]
    config: PathBuf,

    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an uploaded file so it can be ingested
    Register {
        #[arg(long)]
        owner: String,
        /// Original file name; decides the file type when --mime is generic
        #[arg(long)]
        file_name: String,
        /// Path of the upload, relative to the uploads root
        #[arg(long)]
        storage_path: String,
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },

    /// Extract the text of a registered document
    Ingest {
        document_id: String,
        #[arg(long)]
        owner: String,
    },

    /// Check an OCR job once
    Poll { job_id: String },

    /// Drive an in-process OCR job until it completes or fails
    Wait { job_id: String },

    /// Set or clear the edited text of a draft page
    Edit {
        document_id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        page: u32,
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        text: Option<String>,
        /// Drop the edit so the cleaned or raw text applies again
        #[arg(long)]
        clear: bool,
    },

    /// Freeze a draft into a new version
    Publish(PublishArgs),

    /// Run a queued question generation job
    Generate { job_id: String },

    /// Fail jobs whose heartbeat deadline has passed
    Sweep,

    /// Show a job and its event log
    Status { job_id: String },
}

#[derive(Args)]
struct PublishArgs {
    document_id: String,
    #[arg(long)]
    owner: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    /// Do not enqueue question generation
    #[arg(long)]
    no_generate: bool,
    /// mcq, open_ended, true_false or fill_in_blank
    #[arg(long, default_value = "mcq", value_parser = parse_snake_case::<QuestionType>)]
    question_type: QuestionType,
    #[arg(long, default_value_t = 5)]
    count: u32,
    /// easy, medium or hard
    #[arg(long, default_value = "medium", value_parser = parse_snake_case::<Difficulty>)]
    difficulty: Difficulty,
}

impl PublishArgs {
    fn options(&self) -> PublishOptions {
        PublishOptions {
            title: self.title.clone(),
            notes: self.notes.clone(),
            trigger_downstream: !self.no_generate,
            questions: QuestionParams {
                question_type: self.question_type,
                count: self.count,
                difficulty: self.difficulty,
            },
        }
    }
}

/// Parses a unit enum through its snake_case serde names.
fn parse_snake_case<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct JobStatusView {
    job: scriptorium::db::job_repo::JobRow,
    events: Vec<scriptorium::db::job_repo::JobEventRow>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline) => eprintln!("error: {}", pipeline.public_message()),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let uploads_root = PathBuf::from(&config.storage.uploads_root);
    let app = App::new(config)?;

    match cli.command {
        Commands::Register {
            owner,
            file_name,
            storage_path,
            mime,
            title,
        } => {
            let file_size_bytes = upload_size(&uploads_root, &storage_path)?;
            let row = app.ingestion()?.register_document(NewDocument {
                owner_id: owner,
                file_name,
                storage_path,
                mime_type: mime,
                file_size_bytes,
                title,
            })?;
            print_json(&row)
        }
        Commands::Ingest { document_id, owner } => {
            let outcome = app.ingestion()?.ingest(&document_id, &owner).await?;
            print_json(&outcome)
        }
        Commands::Poll { job_id } => print_json(&app.poller()?.poll(&job_id).await?),
        Commands::Wait { job_id } => {
            print_json(&app.poller()?.wait_until_settled(&job_id).await?)
        }
        Commands::Edit {
            document_id,
            owner,
            page,
            text,
            clear,
        } => {
            let edited = if clear { None } else { text.as_deref() };
            let saved_at = app.editor().save_edit(&document_id, &owner, page, edited)?;
            print_json(&serde_json::json!({
                "document_id": document_id,
                "page_no": page,
                "saved_at": saved_at,
            }))
        }
        Commands::Publish(args) => {
            let published = app
                .publisher()
                .publish(&args.document_id, &args.owner, args.options())?;
            print_json(&published)
        }
        Commands::Generate { job_id } => {
            print_json(&app.generation_runner()?.run(&job_id).await?)
        }
        Commands::Sweep => print_json(&app.ledger.sweep_stale(Utc::now())?),
        Commands::Status { job_id } => {
            let view = JobStatusView {
                job: app.ledger.find(&job_id).map_err(PipelineError::from)?,
                events: app.ledger.events(&job_id)?,
            };
            print_json(&view)
        }
    }
}

fn upload_size(root: &Path, storage_path: &str) -> anyhow::Result<u64> {
    let path = root.join(storage_path);
    let metadata = std::fs::metadata(&path)
        .with_context(|| format!("reading upload {}", path.display()))?;
    Ok(metadata.len())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
