//! Per-file metadata extraction: stat, permissions, content hash, text
//! probe, encoding detection. Failures produce degraded records with the
//! matching status and sentinel hash instead of errors.

use std::fs;
use std::io::Read;
use std::path::Path;

use file_chunker::reader_txt;
use index_model::{now_utc, system_time_utc, FileRecord, ProcessingStatus};

/// Content hashing reads at most this many bytes; larger files get the
/// `too_large` sentinel without failing the record.
pub const HASH_READ_CAP: u64 = 10 * 1024 * 1024;

const ENCODING_SAMPLE_BYTES: usize = 10_000;
const TEXT_PROBE_BYTES: usize = 1024;

/// Build a full [`FileRecord`] for `path`. `max_file_size` is the policy
/// limit above which the record is flagged `size_limit_exceeded`.
pub fn extract_file_metadata(path: &Path, max_file_size: u64) -> FileRecord {
    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let directory = canonical
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_type = canonical
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let stat = match fs::metadata(&canonical) {
        Ok(md) => md,
        Err(err) => {
            let (status, hash) = match err.kind() {
                std::io::ErrorKind::NotFound => {
                    (ProcessingStatus::FileNotFound, "file_not_found")
                }
                std::io::ErrorKind::PermissionDenied => {
                    (ProcessingStatus::PermissionDenied, "permission_denied")
                }
                _ => (ProcessingStatus::UnknownError, "error"),
            };
            return degraded_record(
                &canonical, &name, &directory, &file_type, 0, status, hash,
                Some(err.to_string()),
            );
        }
    };

    if stat.len() > max_file_size {
        let mut record = degraded_record(
            &canonical,
            &name,
            &directory,
            &file_type,
            stat.len(),
            ProcessingStatus::SizeLimitExceeded,
            "too_large",
            Some(format!("File too large: {} bytes", stat.len())),
        );
        record.permissions = file_permissions(&stat);
        fill_timestamps(&mut record, &stat);
        return record;
    }

    let mut status = ProcessingStatus::Success;
    let mut error_message: Option<String> = None;

    let permissions = file_permissions(&stat);

    let (hash, hash_error) = hash_file(&canonical, HASH_READ_CAP);
    if let Some(err) = hash_error {
        if status == ProcessingStatus::Success {
            status = if hash == "permission_denied" {
                ProcessingStatus::PermissionDenied
            } else {
                ProcessingStatus::UnknownError
            };
            error_message = Some(err);
        }
    }

    let ext = file_type.trim_start_matches('.');
    let mime = guess_mime(ext);
    let is_text = is_text_file(&canonical, ext, mime);

    let encoding = if is_text {
        let detected = detect_file_encoding(&canonical);
        if detected.is_none() && status == ProcessingStatus::Success {
            status = ProcessingStatus::EncodingError;
            error_message = Some("Could not detect encoding".into());
        }
        detected
    } else {
        None
    };

    let mut record = FileRecord {
        path: canonical.to_string_lossy().into_owned(),
        name,
        directory,
        size: stat.len(),
        file_type,
        mime: mime.to_string(),
        created_at: "unknown".into(),
        modified_at: "unknown".into(),
        accessed_at: "unknown".into(),
        permissions,
        hash,
        is_text,
        encoding: encoding.map(str::to_owned),
        processing_status: status,
        error_message,
        indexed_at: now_utc(),
    };
    fill_timestamps(&mut record, &stat);
    record
}

#[allow(clippy::too_many_arguments)]
fn degraded_record(
    path: &Path,
    name: &str,
    directory: &str,
    file_type: &str,
    size: u64,
    status: ProcessingStatus,
    hash: &str,
    error_message: Option<String>,
) -> FileRecord {
    FileRecord {
        path: path.to_string_lossy().into_owned(),
        name: name.to_string(),
        directory: directory.to_string(),
        size,
        file_type: file_type.to_string(),
        mime: "unknown".into(),
        created_at: "unknown".into(),
        modified_at: "unknown".into(),
        accessed_at: "unknown".into(),
        permissions: "unknown".into(),
        hash: hash.to_string(),
        is_text: false,
        encoding: None,
        processing_status: status,
        error_message,
        indexed_at: now_utc(),
    }
}

fn fill_timestamps(record: &mut FileRecord, stat: &fs::Metadata) {
    if let Ok(t) = stat.created() {
        record.created_at = system_time_utc(t);
    }
    if let Ok(t) = stat.modified() {
        record.modified_at = system_time_utc(t);
    }
    if let Ok(t) = stat.accessed() {
        record.accessed_at = system_time_utc(t);
    }
}

#[cfg(unix)]
fn file_permissions(stat: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", stat.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_permissions(stat: &fs::Metadata) -> String {
    if stat.permissions().readonly() {
        "r".to_string()
    } else {
        "rw".to_string()
    }
}

/// MD5 of content up to `cap` bytes. Returns the hex digest or a sentinel
/// string, plus an error description for degraded outcomes.
pub fn hash_file(path: &Path, cap: u64) -> (String, Option<String>) {
    let size = match fs::metadata(path) {
        Ok(md) => md.len(),
        Err(err) => return (hash_sentinel(&err), Some(err.to_string())),
    };
    if size > cap {
        tracing::debug!(path = %path.display(), size, "file skipped for hashing");
        return ("too_large".into(), None);
    }
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(err) => return (hash_sentinel(&err), Some(err.to_string())),
    };
    let mut context = md5::Context::new();
    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => context.consume(&buf[..n]),
            Err(err) => return ("error".into(), Some(err.to_string())),
        }
    }
    (format!("{:x}", context.compute()), None)
}

fn hash_sentinel(err: &std::io::Error) -> String {
    match err.kind() {
        std::io::ErrorKind::NotFound => "file_not_found".into(),
        std::io::ErrorKind::PermissionDenied => "permission_denied".into(),
        _ => "error".into(),
    }
}

/// Extension table first, then MIME, then a 1024-byte binary probe.
fn is_text_file(path: &Path, ext: &str, mime: &str) -> bool {
    if reader_txt::is_text_extension(ext) {
        return true;
    }
    if mime.starts_with("text/") {
        return true;
    }
    let mut sample = vec![0u8; TEXT_PROBE_BYTES];
    let n = match fs::File::open(path).and_then(|mut f| f.read(&mut sample)) {
        Ok(n) => n,
        Err(_) => return false,
    };
    let sample = &sample[..n];
    !sample.contains(&0)
}

fn detect_file_encoding(path: &Path) -> Option<&'static str> {
    let mut sample = vec![0u8; ENCODING_SAMPLE_BYTES];
    let n = fs::File::open(path)
        .and_then(|mut f| f.read(&mut sample))
        .ok()?;
    reader_txt::detect_encoding(&sample[..n])
}

/// Lowercased-extension MIME table; `unknown` when the type is not listed.
pub fn guess_mime(ext: &str) -> &'static str {
    match ext {
        "txt" | "log" | "cfg" | "ini" | "conf" | "properties" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "xml" => "text/xml",
        "json" => "application/json",
        "yml" | "yaml" => "application/yaml",
        "toml" => "application/toml",
        "py" => "text/x-python",
        "js" => "text/javascript",
        "ts" => "text/x-typescript",
        "rs" => "text/x-rust",
        "go" => "text/x-go",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" => "text/x-c++",
        "java" => "text/x-java",
        "cs" => "text/x-csharp",
        "rb" => "text/x-ruby",
        "php" => "text/x-php",
        "sh" | "bash" | "zsh" => "text/x-shellscript",
        "sql" => "application/sql",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "rtf" => "application/rtf",
        "tex" => "text/x-tex",
        "rst" => "text/x-rst",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn text_file_gets_full_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.py");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"print('hello')\n").unwrap();

        let record = extract_file_metadata(&path, 100 * 1024 * 1024);
        assert_eq!(record.processing_status, ProcessingStatus::Success);
        assert_eq!(record.file_type, ".py");
        assert_eq!(record.mime, "text/x-python");
        assert!(record.is_text);
        assert_eq!(record.encoding.as_deref(), Some("utf-8"));
        assert_eq!(record.hash.len(), 32);
        assert!(record.modified_at.ends_with('Z'));
        assert_eq!(record.size, 15);
    }

    #[test]
    fn missing_file_yields_degraded_record() {
        let record =
            extract_file_metadata(Path::new("/no/such/place/gone.txt"), 100 * 1024 * 1024);
        assert_eq!(record.processing_status, ProcessingStatus::FileNotFound);
        assert_eq!(record.hash, "file_not_found");
        assert!(!record.is_text);
    }

    #[test]
    fn oversized_file_is_flagged_not_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, vec![b'x'; 128]).unwrap();

        let record = extract_file_metadata(&path, 64);
        assert_eq!(
            record.processing_status,
            ProcessingStatus::SizeLimitExceeded
        );
        assert_eq!(record.hash, "too_large");
        assert_eq!(record.size, 128);
    }

    #[test]
    fn binary_file_is_not_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.xyz");
        fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let record = extract_file_metadata(&path, 100 * 1024 * 1024);
        assert!(!record.is_text);
        assert!(record.encoding.is_none());
    }
}
