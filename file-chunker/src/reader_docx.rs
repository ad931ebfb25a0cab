//! DOCX text extraction: unzip `word/document.xml` and concatenate the
//! text runs of each paragraph.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{Extracted, SkipReason};

fn local_name(q: &[u8]) -> &[u8] {
    match q.iter().position(|&b| b == b':') {
        Some(i) => &q[i + 1..],
        None => q,
    }
}

/// Extract paragraphs from a .docx file, one per line.
pub fn extract_docx(path: &Path) -> Extracted {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            return Extracted::Skip(match err.kind() {
                std::io::ErrorKind::NotFound => SkipReason::NotFound,
                std::io::ErrorKind::PermissionDenied => SkipReason::PermissionDenied,
                _ => SkipReason::DecodeFailed,
            })
        }
    };
    let mut zip = match zip::ZipArchive::new(file) {
        Ok(z) => z,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "not a valid .docx (zip) file");
            return Extracted::Skip(SkipReason::DecodeFailed);
        }
    };

    let mut document_xml = String::new();
    match zip.by_name("word/document.xml") {
        Ok(mut entry) => {
            if entry.read_to_string(&mut document_xml).is_err() {
                return Extracted::Skip(SkipReason::DecodeFailed);
            }
        }
        Err(_) => return Extracted::Skip(SkipReason::DecodeFailed),
    }

    let mut reader = Reader::from_str(&document_xml);
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text_run = false;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"p" => paragraph.clear(),
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text_run = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        out.push_str(text);
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_text_run {
                    if let Ok(cow) = t.unescape() {
                        paragraph.push_str(&cow);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "docx XML parse error");
                break;
            }
            _ => {}
        }
    }

    if out.trim().is_empty() {
        Extracted::Skip(SkipReason::DecodeFailed)
    } else {
        Extracted::Text(out)
    }
}
