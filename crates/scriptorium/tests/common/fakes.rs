//! Scripted stand-ins for the remote services.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use scriptorium::cleaning::{CleanedText, LanguageHint, TextCleaner};
use scriptorium::error::{CleaningError, GenerationError, LlmError, OcrError};
use scriptorium::generation::{Question, QuestionGenerator, QuestionParams};
use scriptorium::ocr::{OcrProvider, OperationStatus};
use scriptorium::storage::{InMemoryObjectStore, ObjectStore};

/// What the next `status` call reports.
#[derive(Debug, Clone)]
pub enum StatusStep {
    Running,
    /// Finished; pending shards are written to the output prefix.
    Done,
    DoneWithError(String),
    /// The status request itself fails with a throttling error.
    Throttled,
}

#[derive(Default)]
struct OcrScript {
    steps: VecDeque<StatusStep>,
    shards: Vec<(String, Vec<u8>)>,
    output_uri: Option<String>,
    submissions: Vec<(String, String, String)>,
    fail_submit: Option<String>,
    sync_text: String,
}

/// OCR provider that plays back a script and writes result shards into an
/// [`InMemoryObjectStore`] the way the real service writes to a bucket.
pub struct ScriptedOcr {
    store: Arc<InMemoryObjectStore>,
    script: Mutex<OcrScript>,
    pub status_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            store,
            script: Mutex::new(OcrScript::default()),
            status_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_status(&self, steps: &[StatusStep]) {
        self.script.lock().unwrap().steps.extend(steps.iter().cloned());
    }

    /// Queues a shard written under the output prefix once the operation
    /// reports done.
    pub fn add_shard(&self, name: &str, content: Vec<u8>) {
        self.script
            .lock()
            .unwrap()
            .shards
            .push((name.to_string(), content));
    }

    pub fn fail_next_submit(&self, message: &str) {
        self.script.lock().unwrap().fail_submit = Some(message.to_string());
    }

    pub fn set_sync_text(&self, text: &str) {
        self.script.lock().unwrap().sync_text = text.to_string();
    }

    pub fn submissions(&self) -> Vec<(String, String, String)> {
        self.script.lock().unwrap().submissions.clone()
    }

    fn write_shards(&self, script: &mut OcrScript) {
        let Some(output_uri) = script.output_uri.clone() else {
            return;
        };
        let prefix = self
            .store
            .key_from_uri(&output_uri)
            .expect("output URI points into the temp store")
            .to_string();
        for (name, content) in script.shards.drain(..) {
            self.store
                .insert(&format!("{}{}", prefix, name), content, "application/json");
        }
    }
}

#[async_trait]
impl OcrProvider for ScriptedOcr {
    async fn process(&self, _content: Bytes, _mime_type: &str) -> Result<String, OcrError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().sync_text.clone())
    }

    async fn submit(
        &self,
        input_uri: &str,
        mime_type: &str,
        output_uri: &str,
    ) -> Result<String, OcrError> {
        let mut script = self.script.lock().unwrap();
        if let Some(message) = script.fail_submit.take() {
            return Err(OcrError::Api {
                status: 400,
                body: message,
            });
        }
        script.submissions.push((
            input_uri.to_string(),
            mime_type.to_string(),
            output_uri.to_string(),
        ));
        script.output_uri = Some(output_uri.to_string());
        Ok(format!("operations/op-{}", script.submissions.len()))
    }

    async fn status(&self, _handle: &str) -> Result<OperationStatus, OcrError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let step = script.steps.pop_front().unwrap_or(StatusStep::Done);
        match step {
            StatusStep::Running => Ok(OperationStatus::default()),
            StatusStep::Done => {
                self.write_shards(&mut script);
                Ok(OperationStatus {
                    done: true,
                    error: None,
                    output_location: script.output_uri.clone(),
                })
            }
            StatusStep::DoneWithError(error) => Ok(OperationStatus {
                done: true,
                error: Some(error),
                output_location: None,
            }),
            StatusStep::Throttled => Err(OcrError::Transient {
                status: 429,
                body: "quota exceeded".to_string(),
            }),
        }
    }
}

/// Cleaner that repairs `|` misreads as `l`, and fails on any page
/// containing one of its trigger words.
#[derive(Default)]
pub struct FlakyCleaner {
    failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl FlakyCleaner {
    pub fn failing_on(words: &[&str]) -> Self {
        Self {
            failing: words.iter().map(|w| w.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextCleaner for FlakyCleaner {
    async fn clean(&self, text: &str, _hint: LanguageHint) -> Result<CleanedText, CleaningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|w| text.contains(w.as_str())) {
            return Err(CleaningError::Llm(LlmError::Api {
                status: 500,
                body: "upstream exploded".to_string(),
            }));
        }
        Ok(CleanedText {
            clean_text: text.replace('|', "l"),
            changes_summary: Some("Fixed misread characters".to_string()),
        })
    }

    fn model(&self) -> &str {
        "fake-cleaner"
    }
}

/// Generator that numbers its questions and counts how often it is asked.
#[derive(Default)]
pub struct CountingGenerator {
    pub calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for CountingGenerator {
    async fn generate(
        &self,
        source_text: &str,
        params: &QuestionParams,
    ) -> Result<Vec<Question>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let topic = source_text.split_whitespace().next().unwrap_or("Mətn");
        Ok((1..=params.count)
            .map(|i| Question {
                question_text: format!("{}: sual {}", topic, i),
                options: vec![],
                answer_key: "Doğru".to_string(),
                correct_index: None,
            })
            .collect())
    }
}
