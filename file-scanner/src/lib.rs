//! Directory discovery with skip/allow policies and change detection.
//!
//! The scanner walks a tree, prunes hidden/system/denylisted directories,
//! applies extension filters, and yields candidate files whose mtime is newer
//! than the previous successful run. It is cancellable between directory
//! entries and does no I/O beyond one readdir/stat per entry.

pub mod metadata;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

pub use metadata::extract_file_metadata;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("bad denylist pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Discovery policy. Defaults mirror what the engine ships with; every field
/// can be overridden by the caller.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Directories deeper than this are pruned.
    pub max_depth: usize,
    /// Files larger than this still pass discovery; the orchestrator flags
    /// them as size_limit_exceeded.
    pub max_file_size: u64,
    /// Applies to every path component below the root.
    pub skip_hidden: bool,
    pub system_dir_names: Vec<String>,
    /// Glob patterns anchored at the directory name.
    pub denylist_patterns: Vec<String>,
    /// Absolute paths that override the denylist (but not hidden/system
    /// checks). Subdirectories inherit the allow.
    pub allowlist_paths: Vec<PathBuf>,
    /// When set, files with other extensions are skipped at discovery.
    pub allowed_extensions: Option<Vec<String>>,
    pub skip_file_extensions: Vec<String>,
    pub skip_file_names: Vec<String>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_file_size: 100 * 1024 * 1024,
            skip_hidden: true,
            system_dir_names: [
                ".git",
                ".svn",
                ".hg",
                "__pycache__",
                "node_modules",
                "venv",
                ".venv",
                "env",
                ".env",
                "build",
                "dist",
                "target",
                "bin",
                "obj",
                ".gradle",
                ".mvn",
                "vendor",
                "site-packages",
                "virtualenv",
                "Lib",
                "conda-env",
                "conda-envs",
                ".pixi",
                ".conda",
                ".virtualenv",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            denylist_patterns: [
                "linux-6.*",
                "kernel-*",
                "llvm-project*",
                "chromium*",
                "gecko-dev*",
                "webkit*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowlist_paths: Vec::new(),
            allowed_extensions: None,
            skip_file_extensions: [
                "exe", "dll", "so", "dylib", "bin", "dat", "db", "sqlite", "sqlite3", "img",
                "iso", "dmg", "zip", "rar", "7z", "tar", "gz", "mp4", "avi", "mkv", "mov", "mp3",
                "wav", "flac", "aac", "jpg", "jpeg", "png", "gif", "bmp", "tiff", "xls", "xlsx",
                "ppt", "pptx", "lock", "tmp", "temp", "cache",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_file_names: [
                "thumbs.db",
                ".ds_store",
                "desktop.ini",
                "package-lock.json",
                "yarn.lock",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Policy with the denylist globs compiled once.
pub struct Scanner {
    policy: ScanPolicy,
    denylist: GlobSet,
}

impl Scanner {
    pub fn new(policy: ScanPolicy) -> Result<Scanner, ScanError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &policy.denylist_patterns {
            builder.add(Glob::new(pattern)?);
        }
        let denylist = builder.build()?;
        Ok(Scanner { policy, denylist })
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Lazily yield candidate files under `root`.
    ///
    /// Files are candidates when `force` is set, when `last_scan_time` is
    /// unknown, or when their mtime is newer than it. The cancel flag is
    /// checked between directory entries.
    pub fn discover<'a>(
        &'a self,
        root: &Path,
        last_scan_time: Option<SystemTime>,
        force: bool,
        cancel: Arc<AtomicBool>,
    ) -> Result<impl Iterator<Item = PathBuf> + 'a, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::InvalidRoot(root.to_path_buf()));
        }
        let root = root.to_path_buf();

        let walker = WalkDir::new(&root)
            .max_depth(self.policy.max_depth)
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if entry.file_type().is_dir() {
                    self.keep_directory(entry.path())
                } else {
                    true
                }
            });

        Ok(walker
            .take_while(move |_| !cancel.load(Ordering::Relaxed))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| self.keep_file(entry.path()))
            .filter(move |entry| {
                if force || last_scan_time.is_none() {
                    return true;
                }
                match entry.metadata().ok().and_then(|md| md.modified().ok()) {
                    Some(mtime) => Some(mtime) > last_scan_time,
                    // Cannot determine: emit and let processing decide.
                    None => true,
                }
            })
            .map(|entry| entry.into_path()))
    }

    fn keep_directory(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy(),
            None => return true,
        };
        if self.policy.skip_hidden && name.starts_with('.') {
            return false;
        }
        if self.policy.system_dir_names.iter().any(|d| d == name.as_ref()) {
            return false;
        }
        if self.denylist.is_match(name.as_ref()) && !self.is_allowlisted(path) {
            tracing::debug!(path = %path.display(), "directory denylisted");
            return false;
        }
        true
    }

    /// Allow overrides deny: a path is allowed when it sits under an
    /// allowlist entry, or is an ancestor of one (so the walk can reach it).
    fn is_allowlisted(&self, path: &Path) -> bool {
        self.policy
            .allowlist_paths
            .iter()
            .any(|allowed| path.starts_with(allowed) || allowed.starts_with(path))
    }

    fn keep_file(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_lowercase(),
            None => return false,
        };
        if self.policy.skip_hidden && name.starts_with('.') {
            return false;
        }
        if self.policy.skip_file_names.iter().any(|s| s == &name) {
            return false;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if self.policy.skip_file_extensions.iter().any(|s| s == &ext) {
            return false;
        }
        if let Some(allowed) = &self.policy.allowed_extensions {
            if !allowed.iter().any(|a| a == &ext) {
                return false;
            }
        }
        true
    }
}
