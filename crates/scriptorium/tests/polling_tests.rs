//! Polling asynchronous OCR operations to completion, and sweeping the ones
//! that stop reporting.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use chrono::Utc;
use common::{ocr_shard, scanned_pdf, FlakyCleaner, StatusStep, TestHarness, OWNER};
use scriptorium::config::PollingDiscipline;
use scriptorium::model::{DocumentStatus, EventKind, JobStatus, JobType, PageSource};
use scriptorium::pipeline::{IngestOutcome, PipelineConfig, PipelineError};

/// Registers and ingests a scanned PDF, returning `(document_id, job_id)`.
async fn start_scan(harness: &TestHarness, pages: usize) -> (String, String) {
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(pages));
    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Polling { .. }));
    (doc.id, outcome.job_id().to_string())
}

#[tokio::test]
async fn test_scanned_document_completes_with_sorted_cleaned_pages() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 3).await;

    // Shards arrive out of order and the second holds pages out of order.
    harness.ocr.add_shard("scan-1.json", ocr_shard(&[(3, "Ucuncu sehife: nəticə")]));
    harness.ocr.add_shard(
        "scan-0.json",
        ocr_shard(&[(2, "Ikinci sehife: xlorofi|"), (1, "Birinci sehife: fotosintez")]),
    );
    harness
        .ocr
        .script_status(&[StatusStep::Running, StatusStep::Done]);

    let timeout_before = harness.job(&job_id).timeout_at.unwrap();
    let first = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(first.status, JobStatus::Polling);
    assert!(!first.draft_ready);
    let job = harness.job(&job_id);
    assert!(job.heartbeat_at.is_some());
    assert!(job.timeout_at.unwrap() >= timeout_before);

    let second = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second.draft_ready);
    assert_eq!(second.page_count, Some(3));

    let pages = harness.pages(&doc_id);
    assert_eq!(
        pages.iter().map(|p| p.page_no).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(pages[0].raw_text.as_deref(), Some("Birinci sehife: fotosintez"));
    assert_eq!(pages[1].raw_text.as_deref(), Some("Ikinci sehife: xlorofi|"));
    assert_eq!(pages[1].final_text(), "Ikinci sehife: xlorofil");
    for page in &pages {
        assert_eq!(page.source().unwrap(), PageSource::Ocr);
        assert_eq!(page.cleaning_model.as_deref(), Some("fake-cleaner"));
        assert_eq!(page.cleaning_version.as_deref(), Some("v1"));
        assert!(!page.cleaning_failed);
    }

    let doc = harness.document(&doc_id);
    assert_eq!(doc.status().unwrap(), DocumentStatus::Draft);
    assert_eq!(doc.page_count, 3);

    let job = harness.job(&job_id);
    let result = job.result.unwrap();
    assert_eq!(result["page_count"], 3);
    assert_eq!(result["cleaning_failures"], 0);
    assert_eq!(result["cleanup_failed"], false);
    assert_eq!(job.percent, 100.0);
    assert!(harness.store.is_empty(), "staged input and shards are deleted");
}

#[tokio::test]
async fn test_settled_job_is_reported_without_calling_provider() {
    let harness = TestHarness::new();
    let (_doc_id, job_id) = start_scan(&harness, 1).await;
    harness.ocr.add_shard("out-0.json", ocr_shard(&[(1, "Yeganə sehife")]));

    harness.poller.poll(&job_id).await.unwrap();
    let calls = harness.ocr.status_calls.load(Ordering::SeqCst);

    let again = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.page_count, Some(1));
    assert_eq!(harness.ocr.status_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_operation_error_fails_job_and_document_verbatim() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 2).await;
    let provider_error = r#"{"code":3,"message":"Unsupported input file format."}"#;
    harness
        .ocr
        .script_status(&[StatusStep::DoneWithError(provider_error.to_string())]);

    let outcome = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some(provider_error));

    let job = harness.job(&job_id);
    assert_eq!(job.error_message.as_deref(), Some(provider_error));
    assert!(job.completed_at.is_some());
    assert_eq!(
        harness.document(&doc_id).status().unwrap(),
        DocumentStatus::Failed
    );
    assert!(harness.pages(&doc_id).is_empty());
}

#[tokio::test]
async fn test_cleaning_failure_keeps_raw_text() {
    let harness = TestHarness::with_cleaner(FlakyCleaner::failing_on(&["Cədvəl"]));
    let (doc_id, job_id) = start_scan(&harness, 3).await;
    harness.ocr.add_shard(
        "out-0.json",
        ocr_shard(&[
            (1, "Birinci sehife: fotosinte|"),
            (2, "Cədvəl 1: temperatur"),
            (3, "Ucuncu sehife: nəticələr"),
        ]),
    );

    let outcome = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    let pages = harness.pages(&doc_id);
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].final_text(), "Birinci sehife: fotosintel");
    assert!(pages[1].cleaning_failed);
    assert_eq!(pages[1].final_text(), "Cədvəl 1: temperatur");
    assert!(pages[1].cleaning_model.is_none());
    assert!(!pages[2].cleaning_failed);

    let result = harness.job(&job_id).result.unwrap();
    assert_eq!(result["cleaning_failures"], 1);
    assert_eq!(harness.cleaner.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_short_and_empty_pages_skip_cleaner() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 3).await;
    harness.ocr.add_shard(
        "out-0.json",
        ocr_shard(&[(1, "Fotosintez gunes isigi ile gedir"), (2, ""), (3, "Cədvəl 1")]),
    );

    harness.poller.poll(&job_id).await.unwrap();
    let pages = harness.pages(&doc_id);
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].cleaning_model.as_deref(), Some("fake-cleaner"));
    assert_eq!(pages[1].final_text(), "");
    assert_eq!(pages[2].final_text(), "Cədvəl 1");
    assert!(pages[2].cleaning_model.is_none());
    assert!(!pages[2].cleaning_failed);
    assert_eq!(harness.cleaner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_status_check_error_leaves_job_polling() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 1).await;
    harness.ocr.add_shard("out-0.json", ocr_shard(&[(1, "Sehife")]));
    harness
        .ocr
        .script_status(&[StatusStep::Throttled, StatusStep::Done]);

    let err = harness.poller.poll(&job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transient(_)));
    assert!(err.is_retryable());
    assert_eq!(harness.job(&job_id).status().unwrap(), JobStatus::Polling);
    assert!(harness
        .events(&job_id)
        .iter()
        .any(|e| e.kind().unwrap() == EventKind::Warning && e.step.as_deref() == Some("poll")));

    let outcome = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(
        harness.document(&doc_id).status().unwrap(),
        DocumentStatus::Draft
    );
}

#[tokio::test]
async fn test_operation_without_output_completes_empty() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 1).await;

    let outcome = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.page_count, Some(0));
    assert_eq!(harness.document(&doc_id).page_count, 0);
}

#[tokio::test]
async fn test_internal_failure_is_stored_without_detail() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 1).await;
    harness
        .db
        .with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET params = '{}' WHERE id = ?1",
                [job_id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

    let err = harness.poller.poll(&job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Internal(_)));
    assert_eq!(err.public_message(), "Internal error");

    let job = harness.job(&job_id);
    assert_eq!(job.status().unwrap(), JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("Internal error"));
    assert_eq!(
        harness.document(&doc_id).status().unwrap(),
        DocumentStatus::Failed
    );

    let reported = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(reported.error.as_deref(), Some("Internal error"));

    let events = harness.events(&job_id);
    let failure = events
        .iter()
        .find(|e| e.kind().unwrap() == EventKind::Error)
        .expect("an error event");
    assert_eq!(failure.message, "Internal error");
    assert!(failure
        .stack_trace
        .as_deref()
        .unwrap_or_default()
        .contains("input_key"));
}

#[tokio::test]
async fn test_wait_refuses_externally_polled_job() {
    let harness = TestHarness::new();
    let (_doc_id, job_id) = start_scan(&harness, 1).await;
    harness.ocr.script_status(&vec![StatusStep::Running; 6]);

    let err = harness.poller.wait_until_settled(&job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(_)));
    assert_eq!(harness.ocr.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.job(&job_id).status().unwrap(), JobStatus::Polling);
    assert!(harness.job(&job_id).error_message.is_none());
}

fn in_process_config(max_poll_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        max_poll_attempts,
        polling: HashMap::from([(JobType::DocumentExtract, PollingDiscipline::InProcess)]),
        ..TestHarness::fast_config()
    }
}

#[tokio::test]
async fn test_in_process_discipline_waits_within_ingest() {
    let harness = TestHarness::with_config(in_process_config(5), FlakyCleaner::default());
    harness.ocr.add_shard("out-0.json", ocr_shard(&[(1, "Birinci"), (2, "Ikinci")]));
    harness
        .ocr
        .script_status(&[StatusStep::Running, StatusStep::Running, StatusStep::Done]);
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(2));

    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Completed { draft_ready: true, .. }));
    assert_eq!(harness.ocr.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.pages(&doc.id).len(), 2);

    // External polls of an in-process job only report.
    let reported = harness.poller.poll(outcome.job_id()).await.unwrap();
    assert_eq!(reported.status, JobStatus::Completed);
    assert_eq!(harness.ocr.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_in_process_wait_gives_up_after_attempt_ceiling() {
    let harness = TestHarness::with_config(in_process_config(2), FlakyCleaner::default());
    harness.ocr.script_status(&[
        StatusStep::Running,
        StatusStep::Running,
        StatusStep::Running,
    ]);
    let doc = harness.upload("scan.pdf", Some("application/pdf"), &scanned_pdf(1));

    let outcome = harness.pipeline.ingest(&doc.id, OWNER).await.unwrap();
    let IngestOutcome::Failed { error, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error.contains("did not finish after 2 checks"));
    assert_eq!(harness.ocr.status_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.document(&doc.id).status().unwrap(),
        DocumentStatus::Failed
    );
}

#[tokio::test]
async fn test_sweep_fails_stale_jobs_and_releases_lock() {
    let harness = TestHarness::new();
    let (doc_id, job_id) = start_scan(&harness, 1).await;

    let nothing = harness.ledger.sweep_stale(Utc::now()).unwrap();
    assert!(nothing.is_empty());

    let later = Utc::now() + chrono::Duration::hours(1);
    let report = harness.ledger.sweep_stale(later).unwrap();
    assert_eq!(report.failed_jobs, vec![job_id.clone()]);
    assert_eq!(report.failed_documents, vec![doc_id.clone()]);

    let job = harness.job(&job_id);
    assert_eq!(job.status().unwrap(), JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("Timed out"));
    assert_eq!(
        harness.document(&doc_id).status().unwrap(),
        DocumentStatus::Failed
    );

    // A late poll of the swept job changes nothing.
    let late = harness.poller.poll(&job_id).await.unwrap();
    assert_eq!(late.status, JobStatus::Failed);

    let retry = harness.pipeline.ingest(&doc_id, OWNER).await.unwrap();
    assert!(matches!(retry, IngestOutcome::Polling { .. }));
}

#[tokio::test]
async fn test_poll_unknown_job_is_not_found() {
    let harness = TestHarness::new();
    let err = harness.poller.poll("no-such-job").await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(..)));
}
