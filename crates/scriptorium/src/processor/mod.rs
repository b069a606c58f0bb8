pub mod pdf;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProcessError;

pub use pdf::{LopdfExtractor, NativeText};

/// Coarse file type of an upload, deciding how its text is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Tiff,
    Image,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Tiff => "tiff",
            FileType::Image => "image",
            FileType::Other => "other",
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => FileType::Pdf,
            "image/tiff" => FileType::Tiff,
            m if m.starts_with("image/") => FileType::Image,
            _ => FileType::Other,
        }
    }

    /// Uses the MIME type when it is informative, otherwise guesses from
    /// the file name's extension.
    pub fn detect(mime_type: Option<&str>, file_name: &str) -> Self {
        let declared = mime_type
            .map(FileType::from_mime)
            .unwrap_or(FileType::Other);
        if declared != FileType::Other {
            return declared;
        }
        mime_guess::from_path(file_name)
            .first()
            .map(|m| FileType::from_mime(m.essence_str()))
            .unwrap_or(FileType::Other)
    }

    /// Text can be read page by page without OCR.
    pub fn supports_native_pagination(&self) -> bool {
        matches!(self, FileType::Pdf)
    }

    /// May hold more than one page; always OCR'd asynchronously.
    pub fn is_paginated(&self) -> bool {
        matches!(self, FileType::Pdf | FileType::Tiff)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, FileType::Other)
    }

    /// MIME type to declare to the OCR provider when the upload has none.
    pub fn default_mime(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Tiff => "image/tiff",
            FileType::Image => "image/png",
            FileType::Other => "application/octet-stream",
        }
    }
}

impl FromStr for FileType {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "tiff" => Ok(FileType::Tiff),
            "image" => Ok(FileType::Image),
            "other" => Ok(FileType::Other),
            other => Err(ProcessError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local per-page text extraction for natively paginated files.
#[async_trait]
pub trait NativeExtractor: Send + Sync {
    /// Trimmed text of every page, in page order.
    async fn extract_pages(&self, content: Bytes) -> Result<Vec<String>, ProcessError>;
}
