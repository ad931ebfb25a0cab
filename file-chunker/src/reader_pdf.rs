//! PDF text extraction via `lopdf`, page by page.

use std::path::Path;

use lopdf::Document;

use crate::{Extracted, SkipReason};

/// Extract the text of every page, concatenated with newlines.
pub fn extract_pdf(path: &Path) -> Extracted {
    let doc = match Document::load(path) {
        Ok(doc) => doc,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "failed to load PDF");
            return Extracted::Skip(SkipReason::DecodeFailed);
        }
    };

    let mut out = String::new();
    for (page_num, _object_id) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => {
                let trimmed = text.trim_end();
                if !trimmed.is_empty() {
                    out.push_str(trimmed);
                    out.push('\n');
                }
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), page = page_num, %err, "page text extraction failed");
            }
        }
    }

    if out.trim().is_empty() {
        Extracted::Skip(SkipReason::DecodeFailed)
    } else {
        Extracted::Text(out)
    }
}
