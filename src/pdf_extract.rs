// src/pdf_extract.rs

use lopdf::{Dictionary, Document};
use std::path::Path;
use tracing::{info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// The PDF appears to be scanned / image-only — needs OCR.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Read a PDF from disk and classify/extract its text.
pub fn extract_from_file(path: &Path) -> PdfContent {
    if path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| !e.eq_ignore_ascii_case("pdf"))
    {
        return PdfContent::Error(format!("Not a PDF file: {}", path.display()));
    }
    match std::fs::read(path) {
        Ok(bytes) => extract_text_from_pdf(&bytes),
        Err(e) => PdfContent::Error(format!("Failed to read {}: {e}", path.display())),
    }
}

/// Main entry point: takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // --- Phase 1: structural check with lopdf ---
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    // --- Phase 2: attempt full text extraction ---
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let visible = text.chars().filter(|c| !c.is_whitespace()).count();
            if visible < MIN_TEXT_CHARS {
                info!(chars = visible, "Extracted text too short — treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = visible, "Text extracted successfully");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed — may be scanned or corrupted");
            PdfContent::ScannedImage
        }
    }
}

/// Whether a page's `Resources` dictionary carries a non-empty entry
/// under `key`. Pages routinely indirect both the resource dictionary
/// and its entries, so every hop chases references.
fn page_has_resource(doc: &Document, page_dict: &Dictionary, key: &[u8]) -> bool {
    page_dict
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|entry| doc.dereference(entry).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|entries| !entries.is_empty())
}

/// Heuristic: a page with XObject images but no Font resources is
/// almost certainly a scan. When most pages look that way, the whole
/// document gets routed to the scanned path without wasting a full
/// text-extraction pass.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // Can't tell — let text extraction try
    }

    let mut image_only_pages = 0;
    for object_id in pages.values() {
        let Ok(page_dict) = doc.get_object(*object_id).and_then(|obj| obj.as_dict()) else {
            continue;
        };
        if page_has_resource(doc, page_dict, b"XObject")
            && !page_has_resource(doc, page_dict, b"Font")
        {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    // If ≥80% of pages are image-only, treat the whole PDF as scanned
    ratio >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn non_pdf_path_is_an_error() {
        let result = extract_from_file(Path::new("invoice.txt"));
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = extract_from_file(Path::new("/no/such/dir/invoice.pdf"));
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn empty_document_defers_to_text_extraction() {
        let doc = Document::with_version("1.5");
        assert!(!looks_like_scanned(&doc));
    }
}
