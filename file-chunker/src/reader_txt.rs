//! Plain-text extraction with encoding detection.
//!
//! Detection order: BOM, then the candidate list utf-8, latin-1, cp1252,
//! ascii, then a lossy UTF-8 decode as last resort. latin-1 decodes any byte
//! sequence, so in practice the chain collapses to utf-8-or-latin-1 unless a
//! caller passes an explicit hint.

use std::io;
use std::path::Path;

use crate::{Extracted, SkipReason};

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "py", "js", "ts", "html", "css", "json", "xml", "yml", "yaml",
    "csv", "tsv", "log", "cfg", "ini", "conf", "sh", "bat", "ps1", "c", "cpp", "h", "hpp",
    "java", "cs", "php", "rb", "go", "rs", "sql", "r", "m", "swift", "kt", "dart", "scala",
    "clj", "hs", "tex", "rtf", "org", "rst", "wiki", "toml", "properties", "srt", "bash",
    "zsh",
];

/// Extensions handled by the plain-text reader.
pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSIONS.contains(&ext)
}

/// Candidate encodings tried in order when no BOM and no hint applies.
pub const ENCODING_CANDIDATES: &[&str] = &["utf-8", "latin-1", "cp1252", "ascii"];

/// Detect an encoding label for `bytes` without decoding the whole buffer.
pub fn detect_encoding(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some("utf-8");
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some("utf-16le");
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some("utf-16be");
    }
    for label in ENCODING_CANDIDATES {
        if decode_strict(bytes, label).is_some() {
            return Some(match *label {
                "utf-8" => "utf-8",
                "latin-1" => "latin-1",
                "cp1252" => "cp1252",
                _ => "ascii",
            });
        }
    }
    None
}

/// Strict decode with one named encoding; `None` when the bytes do not fit.
pub fn decode_strict(bytes: &[u8], label: &str) -> Option<String> {
    match label {
        "utf-8" => std::str::from_utf8(strip_utf8_bom(bytes))
            .ok()
            .map(str::to_owned),
        "ascii" => {
            if bytes.is_ascii() {
                Some(String::from_utf8_lossy(bytes).into_owned())
            } else {
                None
            }
        }
        // ISO-8859-1 maps every byte 1:1 onto the first 256 code points.
        "latin-1" | "iso-8859-1" => Some(bytes.iter().map(|&b| b as char).collect()),
        "cp1252" | "windows-1252" => {
            let (text, had_errors) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            if had_errors {
                None
            } else {
                Some(text.into_owned())
            }
        }
        "utf-16le" => {
            let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(bytes);
            if had_errors {
                None
            } else {
                Some(text.into_owned())
            }
        }
        "utf-16be" => {
            let (text, _, had_errors) = encoding_rs::UTF_16BE.decode(bytes);
            if had_errors {
                None
            } else {
                Some(text.into_owned())
            }
        }
        other => encoding_rs::Encoding::for_label(other.as_bytes()).and_then(|enc| {
            let (text, _, had_errors) = enc.decode(bytes);
            if had_errors {
                None
            } else {
                Some(text.into_owned())
            }
        }),
    }
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

/// Decode `bytes` honouring an optional hint, falling back through the
/// candidate list and finally a lossy decode.
pub fn decode(bytes: &[u8], encoding: Option<&str>) -> String {
    if let Some(label) = encoding {
        if let Some(text) = decode_strict(bytes, label) {
            return text;
        }
        tracing::debug!(label, "encoding hint did not apply, falling back");
    }
    if let Some(label) = detect_encoding(bytes) {
        if let Some(text) = decode_strict(bytes, label) {
            return text;
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read and decode a text file. I/O failures map to skip reasons.
pub fn extract_text(path: &Path, encoding: Option<&str>) -> Extracted {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(err) => {
            return Extracted::Skip(match err.kind() {
                io::ErrorKind::NotFound => SkipReason::NotFound,
                io::ErrorKind::PermissionDenied => SkipReason::PermissionDenied,
                _ => SkipReason::DecodeFailed,
            })
        }
    };
    Extracted::Text(decode(&bytes, encoding))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_detected_first() {
        assert_eq!(detect_encoding("héllo".as_bytes()), Some("utf-8"));
        assert_eq!(detect_encoding(b"plain ascii"), Some("utf-8"));
    }

    #[test]
    fn bom_wins_over_content() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"abc");
        assert_eq!(detect_encoding(&bytes), Some("utf-8"));
        assert_eq!(decode(&bytes, None), "abc");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        // 0xE9 alone is é in latin-1 but invalid UTF-8.
        let bytes = b"caf\xE9";
        assert_eq!(detect_encoding(bytes), Some("latin-1"));
        assert_eq!(decode(bytes, None), "café");
    }

    #[test]
    fn explicit_hint_is_honoured() {
        let bytes = b"f\xFCr";
        assert_eq!(decode(bytes, Some("latin-1")), "für");
    }
}
