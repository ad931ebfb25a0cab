//! Content extraction and chunking.
//!
//! The extractor registry maps a file to a UTF-8 text body (or a skip
//! reason); the chunker turns that body into size-bounded, self-describing
//! envelopes keyed by `(path, chunk_index)`.

pub mod chunker;
pub mod reader_docx;
pub mod reader_pdf;
pub mod reader_txt;

use std::io;
use std::path::Path;

pub use chunker::{Chunker, CODE_TARGET, PROSE_OVERLAP_PERCENT, PROSE_TARGET};

/// Input byte cap honoured by every extractor.
pub const MAX_EXTRACT_BYTES: u64 = 10 * 1024 * 1024;

/// Why a file produced no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    PermissionDenied,
    NotFound,
    EncodingError,
    Unsupported,
    DecodeFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooLarge => "too_large",
            SkipReason::PermissionDenied => "permission_denied",
            SkipReason::NotFound => "not_found",
            SkipReason::EncodingError => "encoding_error",
            SkipReason::Unsupported => "unsupported",
            SkipReason::DecodeFailed => "decode_failed",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an extraction attempt. A skip is data, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Text(String),
    Skip(SkipReason),
}

impl Extracted {
    pub fn text(self) -> Option<String> {
        match self {
            Extracted::Text(t) => Some(t),
            Extracted::Skip(_) => None,
        }
    }
}

/// Registry of format handlers keyed by file extension.
#[derive(Debug, Clone, Copy)]
pub struct ExtractorRegistry {
    byte_cap: u64,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self {
            byte_cap: MAX_EXTRACT_BYTES,
        }
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_cap(byte_cap: u64) -> Self {
        Self { byte_cap }
    }

    /// Whether an extractor exists for this path (by extension).
    pub fn supports(&self, path: &Path) -> bool {
        matches!(
            extension_of(path).as_str(),
            "pdf" | "docx"
        ) || reader_txt::is_text_extension(&extension_of(path))
    }

    /// Extract a UTF-8 text body from `path`. `encoding` is a hint for
    /// text files; binary formats ignore it.
    pub fn extract(&self, path: &Path, encoding: Option<&str>) -> Extracted {
        let size = match std::fs::metadata(path) {
            Ok(md) => md.len(),
            Err(err) => return Extracted::Skip(skip_for_io(&err)),
        };
        if size > self.byte_cap {
            tracing::debug!(path = %path.display(), size, "extraction skipped, over byte cap");
            return Extracted::Skip(SkipReason::TooLarge);
        }

        match extension_of(path).as_str() {
            "pdf" => reader_pdf::extract_pdf(path),
            "docx" => reader_docx::extract_docx(path),
            ext if reader_txt::is_text_extension(ext) => {
                reader_txt::extract_text(path, encoding)
            }
            _ => Extracted::Skip(SkipReason::Unsupported),
        }
    }
}

fn skip_for_io(err: &io::Error) -> SkipReason {
    match err.kind() {
        io::ErrorKind::NotFound => SkipReason::NotFound,
        io::ErrorKind::PermissionDenied => SkipReason::PermissionDenied,
        _ => SkipReason::DecodeFailed,
    }
}

/// Lowercased extension without the dot; empty string when none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn registry_skips_files_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![b'a'; 64]).unwrap();

        let registry = ExtractorRegistry::with_byte_cap(10);
        assert_eq!(
            registry.extract(&path, None),
            Extracted::Skip(SkipReason::TooLarge)
        );
    }

    #[test]
    fn registry_reports_missing_files() {
        let registry = ExtractorRegistry::new();
        let got = registry.extract(Path::new("/no/such/file.txt"), None);
        assert_eq!(got, Extracted::Skip(SkipReason::NotFound));
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.xcf");
        std::fs::write(&path, b"\x00\x01").unwrap();

        let registry = ExtractorRegistry::new();
        assert_eq!(
            registry.extract(&path, None),
            Extracted::Skip(SkipReason::Unsupported)
        );
    }
}
