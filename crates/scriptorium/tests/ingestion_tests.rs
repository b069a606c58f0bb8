//! Ingestion: locking, native extraction and OCR dispatch.

mod common;

use std::sync::atomic::Ordering;

use common::{pdf_with_pages, scanned_pdf, TestHarness, OWNER};
use scriptorium::db::page_repo::{self, NewPage};
use scriptorium::model::{DocumentStatus, EventKind, JobStatus, PageSource};
use scriptorium::pipeline::{ConflictKind, IngestOutcome, OcrJobParams, PipelineError, PublishOptions};

const LESSON: [&str; 3] = [
    "Fotosintez bitkilerde gunes isigi ile gedir",
    "Xlorofil yarpaqlara yasil rengi verir",
    "Qlukoza ve oksigen prosesin mehsullaridir",
];

#[tokio::test]
async fn test_native_pdf_becomes_three_page_draft() {
    let harness = TestHarness::new();
    let doc = harness.upload("lesson.pdf", Some("application/pdf"), &pdf_with_pages(&LESSON));
    assert_eq!(doc.status().unwrap(), DocumentStatus::Uploading);

    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    let IngestOutcome::Completed { job_id, draft_ready } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert!(draft_ready);

    let doc = harness.document(&doc.id);
    assert_eq!(doc.status().unwrap(), DocumentStatus::Draft);
    assert_eq!(doc.page_count, 3);

    let pages = harness.pages(&doc.id);
    assert_eq!(pages.len(), 3);
    for (page, line) in pages.iter().zip(LESSON) {
        assert_eq!(page.source().unwrap(), PageSource::Native);
        assert!(
            page.final_text().contains(line),
            "page {} text {:?} lacks {:?}",
            page.page_no,
            page.final_text(),
            line
        );
        assert!(page.cleaning_model.is_none());
    }
    assert_eq!(
        pages.iter().map(|p| p.page_no).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let job = harness.job(&job_id);
    assert_eq!(job.status().unwrap(), JobStatus::Completed);
    assert_eq!(job.result.unwrap()["source"], "native");
    assert!(harness.ocr.submissions().is_empty());
    assert!(harness.store.is_empty());
    assert!(harness.active_job(&doc.id).is_none());
}

#[tokio::test]
async fn test_scanned_pdf_is_staged_for_async_ocr() {
    let harness = TestHarness::new();
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(2));

    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    let IngestOutcome::Polling { job_id } = outcome else {
        panic!("expected polling, got {:?}", outcome);
    };

    let job = harness.job(&job_id);
    assert_eq!(job.status().unwrap(), JobStatus::Polling);
    assert_eq!(job.operation_handle.as_deref(), Some("operations/op-1"));
    let params: OcrJobParams = serde_json::from_value(job.params.clone()).unwrap();
    assert!(params
        .input_key
        .starts_with(&format!("inputs/{}/{}/", OWNER, doc.id)));
    assert!(params.input_key.ends_with(".pdf"));
    assert!(params
        .output_prefix
        .starts_with(&format!("outputs/{}/{}/", OWNER, doc.id)));
    assert!(harness.store.contains(&params.input_key));
    assert_eq!(
        harness.store.content_type(&params.input_key).as_deref(),
        Some("application/pdf")
    );

    let (input_uri, mime, output_uri) = harness.ocr.submissions().remove(0);
    assert_eq!(input_uri, format!("mem://scriptorium-temp/{}", params.input_key));
    assert_eq!(mime, "application/pdf");
    assert_eq!(output_uri, format!("mem://scriptorium-temp/{}", params.output_prefix));

    assert_eq!(
        harness.document(&doc.id).status().unwrap(),
        DocumentStatus::Processing
    );
    let events = harness.events(&job_id);
    assert!(events
        .iter()
        .any(|e| e.step.as_deref() == Some("native_extraction")
            && e.kind().unwrap() == EventKind::Info));
}

#[tokio::test]
async fn test_small_image_uses_synchronous_ocr() {
    let harness = TestHarness::new();
    harness.ocr.set_sync_text("  Lövhədəki yazı: H2O suyun formuludur.\n");
    let doc = harness.upload("board.png", Some("image/png"), b"\x89PNG\r\n\x1a\nfake image body");

    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Completed { draft_ready: true, .. }));
    assert_eq!(harness.ocr.process_calls.load(Ordering::SeqCst), 1);
    assert!(harness.ocr.submissions().is_empty());

    let pages = harness.pages(&doc.id);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].page_no, 1);
    assert_eq!(pages[0].source().unwrap(), PageSource::Ocr);
    assert_eq!(pages[0].final_text(), "Lövhədəki yazı: H2O suyun formuludur.");
    assert_eq!(harness.document(&doc.id).page_count, 1);
}

#[tokio::test]
async fn test_second_ingest_while_polling_is_a_conflict() {
    let harness = TestHarness::new();
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(1));

    let first = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    let err = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Conflict(ConflictKind::AlreadyProcessing)
    ));
    assert_eq!(harness.jobs_for_document(&doc.id), 1);
    assert_eq!(harness.active_job(&doc.id).unwrap().id, first.job_id());
    assert_eq!(harness.ocr.submissions().len(), 1);
}

#[tokio::test]
async fn test_concurrent_ingests_take_one_lock() {
    let harness = TestHarness::new();
    let doc = harness.upload("lesson.pdf", Some("application/pdf"), &pdf_with_pages(&LESSON));

    let (a, b) = tokio::join!(
        harness.pipeline.ingest(&doc.id, OWNER),
        harness.pipeline.ingest(&doc.id, OWNER)
    );

    let outcomes = [a, b];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one ingest wins: {:?}", outcomes);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(PipelineError::Conflict(ConflictKind::AlreadyProcessing))
    )));
    assert_eq!(harness.jobs_for_document(&doc.id), 1);
    assert_eq!(harness.pages(&doc.id).len(), 3);
}

#[tokio::test]
async fn test_published_document_cannot_be_reingested() {
    let harness = TestHarness::new();
    let doc = harness.upload("lesson.pdf", Some("application/pdf"), &pdf_with_pages(&LESSON));
    harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    harness
        .publisher()
        .publish(&doc.id, OWNER, PublishOptions::default())
        .unwrap();

    let err = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Conflict(ConflictKind::AlreadyPublished)
    ));
    assert!(harness.active_job(&doc.id).is_none());
}

#[tokio::test]
async fn test_draft_document_cannot_be_reingested() {
    let harness = TestHarness::new();
    let doc = harness.upload("lesson.pdf", Some("application/pdf"), &pdf_with_pages(&LESSON));
    harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();

    let err = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(_)));
    assert_eq!(harness.jobs_for_document(&doc.id), 1);
}

#[tokio::test]
async fn test_failed_submit_fails_everything_and_allows_retry() {
    let harness = TestHarness::new();
    harness.ocr.fail_next_submit("Unsupported input file format");
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(2));

    let err = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap_err();
    assert!(matches!(err, PipelineError::Upstream(_)));
    assert!(!err.is_retryable());

    assert_eq!(
        harness.document(&doc.id).status().unwrap(),
        DocumentStatus::Failed
    );
    assert!(harness.active_job(&doc.id).is_none());
    assert!(harness.store.is_empty(), "staged input is removed");

    // Leftovers from the failed attempt must not survive the retry.
    harness
        .db
        .with_conn(|conn| {
            page_repo::upsert(
                conn,
                &doc.id,
                &NewPage::uncleaned(9, "stale".to_string(), PageSource::Ocr),
                "2026-01-01T00:00:00.000Z",
            )
        })
        .unwrap();

    let retry = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    assert!(matches!(retry, IngestOutcome::Polling { .. }));
    assert!(harness.pages(&doc.id).is_empty());
    assert_eq!(harness.jobs_for_document(&doc.id), 2);
}

#[tokio::test]
async fn test_failure_is_recorded_on_job_events() {
    let harness = TestHarness::new();
    harness.ocr.fail_next_submit("bad request");
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(1));
    harness.pipeline.ingest(&doc.id, OWNER).await.unwrap_err();

    let events = harness
        .db
        .with_conn(|conn| {
            let job_id: String = conn.query_row(
                "SELECT id FROM jobs WHERE document_id = ?1",
                [doc.id.as_str()],
                |row| row.get(0),
            )?;
            Ok(job_id)
        })
        .map(|job_id| harness.events(&job_id))
        .unwrap();
    let error = events
        .iter()
        .find(|e| e.kind().unwrap() == EventKind::Error)
        .expect("an error event");
    assert_eq!(error.step.as_deref(), Some("ingest"));
    assert!(error.message.contains("bad request"));
    assert!(error.stack_trace.as_deref().unwrap_or_default().contains("bad request"));
}

#[tokio::test]
async fn test_only_owner_may_ingest() {
    let harness = TestHarness::new();
    let doc = harness.upload("lesson.pdf", Some("application/pdf"), &pdf_with_pages(&LESSON));

    let err = harness.pipeline.ingest(&doc.id, "someone-else").await.unwrap_err();
    assert!(matches!(err, PipelineError::Forbidden));
    assert_eq!(harness.jobs_for_document(&doc.id), 0);

    let err = harness.pipeline.ingest("missing", OWNER).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(..)));
}

#[test]
fn test_unsupported_upload_is_rejected_at_registration() {
    let harness = TestHarness::new();
    let err = harness
        .pipeline
        .register_document(scriptorium::pipeline::NewDocument {
            owner_id: OWNER.to_string(),
            file_name: "notes.txt".to_string(),
            storage_path: format!("{}/notes.txt", OWNER),
            mime_type: Some("text/plain".to_string()),
            file_size_bytes: 12,
            title: None,
        })
        .unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(_)));
}

#[test]
fn test_file_type_comes_from_name_when_mime_is_generic() {
    let harness = TestHarness::new();
    let doc = harness.upload("scan.tif", Some("application/octet-stream"), b"II*\0");
    assert_eq!(doc.file_type, "tiff");
}
