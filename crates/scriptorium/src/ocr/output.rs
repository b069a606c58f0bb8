//! Parsing of asynchronous OCR result shards.
//!
//! Each shard is a serialized document whose pages point into the shared
//! `text` field through byte-offset segments. Shards may arrive in any
//! order, so pages are merged across shards and sorted by page number.

use serde::Deserialize;

use crate::error::OcrError;

/// Text of one page as recognized by OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrPage {
    pub page_no: u32,
    pub raw_text: String,
}

#[derive(Debug, Deserialize)]
struct Shard {
    document: Option<ShardDocument>,
    // Some writers emit the document at top level.
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    pages: Option<Vec<ShardPage>>,
}

#[derive(Debug, Deserialize)]
struct ShardDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<ShardPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShardPage {
    page_number: Option<NumberOrString>,
    layout: Option<Layout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Layout {
    text_anchor: Option<TextAnchor>,
    text_segment: Option<TextSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextAnchor {
    #[serde(default)]
    text_segments: Vec<TextSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextSegment {
    start_index: Option<NumberOrString>,
    end_index: Option<NumberOrString>,
}

/// int64 fields are serialized as strings by the REST API, as numbers by
/// some client libraries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn value(&self) -> Option<u64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn index(value: &Option<NumberOrString>) -> usize {
    value.as_ref().and_then(|v| v.value()).unwrap_or(0) as usize
}

/// Slices `text[start..end]` by byte offsets, clamped to the text and
/// tolerant of offsets that split a UTF-8 sequence.
fn slice_bytes(text: &str, start: usize, end: usize) -> String {
    let bytes = text.as_bytes();
    let end = end.min(bytes.len());
    let start = start.min(end);
    String::from_utf8_lossy(&bytes[start..end]).into_owned()
}

impl Layout {
    fn segments(&self) -> impl Iterator<Item = &TextSegment> {
        self.text_anchor
            .iter()
            .flat_map(|anchor| anchor.text_segments.iter())
            .chain(self.text_segment.iter())
    }
}

/// Whether a listed output object is a result shard.
pub fn is_shard_key(key: &str) -> bool {
    key.ends_with(".json")
}

/// Parses the pages of one shard. Pages without a layout yield empty text.
pub fn parse_shard(raw: &[u8]) -> Result<Vec<OcrPage>, OcrError> {
    let shard: Shard =
        serde_json::from_slice(raw).map_err(|e| OcrError::Malformed(e.to_string()))?;

    let (text, pages) = match shard.document {
        Some(doc) => (doc.text, doc.pages),
        None => (
            shard.text.unwrap_or_default(),
            shard.pages.unwrap_or_default(),
        ),
    };

    let parsed = pages
        .iter()
        .map(|page| {
            let page_no = page
                .page_number
                .as_ref()
                .and_then(|n| n.value())
                .unwrap_or(1) as u32;
            let raw_text = page
                .layout
                .as_ref()
                .map(|layout| {
                    layout
                        .segments()
                        .map(|seg| slice_bytes(&text, index(&seg.start_index), index(&seg.end_index)))
                        .collect::<String>()
                })
                .unwrap_or_default();
            OcrPage {
                page_no,
                raw_text: raw_text.trim().to_string(),
            }
        })
        .collect();

    Ok(parsed)
}

/// Merges the pages of every shard and sorts them by page number.
pub fn merge_shards(shards: Vec<Vec<OcrPage>>) -> Vec<OcrPage> {
    let mut pages: Vec<OcrPage> = shards.into_iter().flatten().collect();
    pages.sort_by_key(|p| p.page_no);
    pages
}
