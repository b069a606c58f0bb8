//! OCR text cleanup.

pub mod chat;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CleaningError;

pub use chat::ChatTextCleaner;

/// Summary reported for input too short to be worth a cleanup call.
pub const TOO_SHORT_SUMMARY: &str = "Too short to clean";

/// Language the cleaner should expect in the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageHint {
    #[default]
    Az,
    En,
    Mixed,
}

impl LanguageHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageHint::Az => "az",
            LanguageHint::En => "en",
            LanguageHint::Mixed => "mixed",
        }
    }
}

impl fmt::Display for LanguageHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedText {
    pub clean_text: String,
    pub changes_summary: Option<String>,
}

impl CleanedText {
    /// The input returned as-is.
    pub fn passthrough(text: &str, summary: Option<&str>) -> Self {
        Self {
            clean_text: text.to_string(),
            changes_summary: summary.map(String::from),
        }
    }
}

#[async_trait]
pub trait TextCleaner: Send + Sync {
    /// Fixes recognition errors without changing content. Very short input
    /// comes back unchanged.
    async fn clean(&self, text: &str, hint: LanguageHint) -> Result<CleanedText, CleaningError>;

    /// Recorded on each cleaned page.
    fn model(&self) -> &str;

    fn version(&self) -> &str {
        "v1"
    }
}

/// True when `text` is short enough to skip cleanup.
pub fn is_too_short(text: &str, min_length: usize) -> bool {
    text.trim().chars().count() <= min_length
}
