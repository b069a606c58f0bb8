//! Fixture builders.

#![allow(dead_code)]

use lopdf::{dictionary, Document, Object, Stream};
use serde_json::json;

/// A PDF with one page per entry, each holding that line as real text.
/// Empty entries give pages without a text layer, like a scan.
pub fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let kids: Vec<Object> = lines
        .iter()
        .map(|line| {
            let content = if line.is_empty() {
                "q 612 0 0 792 0 0 cm Q".to_string()
            } else {
                format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", line)
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("Failed to serialize PDF fixture");
    out
}

/// A PDF whose pages carry no text at all.
pub fn scanned_pdf(pages: usize) -> Vec<u8> {
    pdf_with_pages(&vec![""; pages])
}

/// One OCR result shard in the provider's JSON layout, covering `pages`
/// given as `(page_number, text)`.
pub fn ocr_shard(pages: &[(u32, &str)]) -> Vec<u8> {
    let mut text = String::new();
    let mut entries = Vec::new();
    for (page_no, page_text) in pages {
        let start = text.len();
        text.push_str(page_text);
        text.push('\n');
        entries.push(json!({
            "pageNumber": page_no,
            "layout": {
                "textAnchor": {
                    "textSegments": [
                        { "startIndex": start.to_string(), "endIndex": text.len().to_string() }
                    ]
                }
            }
        }));
    }
    serde_json::to_vec(&json!({ "document": { "text": text, "pages": entries } }))
        .expect("Failed to serialize OCR shard")
}
