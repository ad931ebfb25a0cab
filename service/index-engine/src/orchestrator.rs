//! End-to-end ingestion: discovery, a bounded worker pool pulling from a
//! shared queue, per-file pipeline, run accounting, and post-scan
//! compaction. Per-file errors are captured into counters, never thrown.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use file_chunker::{Extracted, SkipReason};
use file_scanner::{extract_file_metadata, Scanner};
use index_model::{now_utc, system_time_utc, ProcessingRun, ProcessingStatus};
use metadata_store::Store;

use crate::{lock_or_recover, Engine, EngineError};

const MAX_WORKERS: usize = 8;

pub(crate) fn scan_directory(
    engine: &Engine,
    root: &Path,
    workers: usize,
    force: bool,
) -> Result<ProcessingRun, EngineError> {
    let workers = workers.clamp(1, MAX_WORKERS);
    let root = root
        .canonicalize()
        .map_err(|_| EngineError::InvalidRoot(root.display().to_string()))?;
    if !root.is_dir() {
        return Err(EngineError::InvalidRoot(root.display().to_string()));
    }
    let root_str = root.to_string_lossy().into_owned();

    let started = Instant::now();
    let store = engine.open_store()?;
    store.ping()?;

    let last_scan = if force {
        None
    } else {
        store.last_scan_time(&root_str)?.and_then(|s| parse_utc(&s))
    };

    let scanner = Scanner::new(engine.config.scan_policy.clone())?;
    let mut run = ProcessingRun {
        session_id: format!("scan_{}", Utc::now().timestamp()),
        directory: root_str.clone(),
        started_at: now_utc(),
        ..Default::default()
    };

    // The change-detection watermark is applied here rather than inside the
    // scanner so unchanged files still show up in the skip counter.
    let mut candidates: Vec<PathBuf> = Vec::new();
    for path in scanner.discover(&root, None, false, engine.cancel_flag())? {
        match last_scan {
            Some(watermark) if !is_newer_than(&path, watermark) => {
                run.record(ProcessingStatus::Skipped);
            }
            _ => candidates.push(path),
        }
    }
    run.total_files = candidates.len();
    tracing::info!(
        directory = %root_str,
        candidates = run.total_files,
        skipped_unchanged = run.skipped_unchanged,
        "discovery complete"
    );

    if !candidates.is_empty() {
        let queue = Mutex::new(VecDeque::from(candidates.clone()));
        let outcomes = Mutex::new(Vec::<ProcessingStatus>::new());

        std::thread::scope(|scope| {
            for _ in 0..workers.min(candidates.len()) {
                scope.spawn(|| {
                    let store = match engine.open_store() {
                        Ok(store) => store,
                        Err(err) => {
                            tracing::error!(%err, "worker could not open store");
                            return;
                        }
                    };
                    loop {
                        if engine.shutdown_requested() {
                            break;
                        }
                        let next = lock_or_recover(&queue).pop_front();
                        let Some(path) = next else { break };
                        let status = process_single_file(engine, &store, &path, force);
                        lock_or_recover(&outcomes).push(status);
                    }
                });
            }
        });

        for status in lock_or_recover(&outcomes).drain(..) {
            run.record(status);
        }
    }

    let mut directories: BTreeSet<String> = BTreeSet::new();
    for path in &candidates {
        if let Some(parent) = path.parent() {
            directories.insert(parent.to_string_lossy().into_owned());
        }
    }
    for directory in &directories {
        if let Err(err) = store.update_directory_stats(directory) {
            tracing::warn!(directory, %err, "directory stat refresh failed");
        }
    }

    run.interrupted = engine.shutdown_requested();
    run.ended_at = now_utc();
    run.duration_s = started.elapsed().as_secs_f64();
    store.record_run(&run)?;

    if engine.config.auto_compact
        && !run.interrupted
        && engine
            .index
            .needs_compaction(engine.config.compaction_threshold)
    {
        match engine.index.compact() {
            Ok(report) => tracing::info!(
                merged = report.pre_minor,
                post_major = report.post_major,
                "post-scan compaction"
            ),
            Err(err) => tracing::warn!(%err, "post-scan compaction failed"),
        }
    }

    tracing::info!(
        session = %run.session_id,
        total = run.total_files,
        successful = run.successful_files,
        failed = run.failed_files,
        skipped_unchanged = run.skipped_unchanged,
        interrupted = run.interrupted,
        duration_s = run.duration_s,
        "scan complete"
    );
    Ok(run)
}

fn process_single_file(engine: &Engine, store: &Store, path: &Path, force: bool) -> ProcessingStatus {
    match process_inner(engine, store, path, force) {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "file processing failed");
            ProcessingStatus::UnknownError
        }
    }
}

fn process_inner(
    engine: &Engine,
    store: &Store,
    path: &Path,
    force: bool,
) -> Result<ProcessingStatus, EngineError> {
    let permit = engine.fd_gate.acquire();

    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let canonical_str = canonical.to_string_lossy().into_owned();

    if !force {
        if let Some(stored) = store.get_file_modified(&canonical_str)? {
            let fs_modified = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(system_time_utc)
                .unwrap_or_default();
            if !stored.is_empty() && !fs_modified.is_empty() && stored == fs_modified {
                return Ok(ProcessingStatus::Skipped);
            }
        }
    }

    let record = extract_file_metadata(path, engine.config.scan_policy.max_file_size);
    store.upsert_file(&record)?;
    if record.processing_status == ProcessingStatus::SizeLimitExceeded {
        return Ok(ProcessingStatus::SizeLimitExceeded);
    }

    let ext = record.file_type.trim_start_matches('.');
    let content_eligible = ext == "pdf"
        || ext == "docx"
        || (record.is_text && record.processing_status == ProcessingStatus::Success);
    if !content_eligible {
        return Ok(record.processing_status);
    }

    let started = Instant::now();
    let extracted = engine.extractors.extract(path, record.encoding.as_deref());
    drop(permit);

    let content = match extracted {
        Extracted::Text(content) => content,
        Extracted::Skip(reason) => {
            return Ok(match reason {
                SkipReason::TooLarge => ProcessingStatus::SizeLimitExceeded,
                SkipReason::PermissionDenied => ProcessingStatus::PermissionDenied,
                SkipReason::NotFound => ProcessingStatus::FileNotFound,
                SkipReason::EncodingError => ProcessingStatus::EncodingError,
                SkipReason::Unsupported => record.processing_status,
                SkipReason::DecodeFailed => ProcessingStatus::UnknownError,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(record.processing_status);
    }

    let envelopes = engine.chunker.chunk_file(&record.name, &content, false);
    let chunk_texts: Vec<String> = envelopes.iter().map(|e| e.content.clone()).collect();
    let mut analysis = engine
        .analyzer
        .analyze(&record.path, &record.hash, &content, &chunk_texts);

    // Embedding runs outside any store transaction.
    let embeddings = match engine.embedder.as_ref() {
        Some(embedder) => {
            let refs: Vec<&str> = chunk_texts.iter().map(String::as_str).collect();
            match embedder.embed_batch(&refs) {
                Ok(vectors) => Some(vectors),
                Err(err) => {
                    tracing::warn!(path = %record.path, %err, "embedding failed, continuing without vectors");
                    None
                }
            }
        }
        None => None,
    };

    analysis.processing_time_s = started.elapsed().as_secs_f64();
    store.replace_chunks_with_analysis(
        &record.path,
        &envelopes,
        embeddings.as_deref(),
        &analysis,
        analysis.processing_time_s,
    )?;

    if let Some(embeddings) = embeddings {
        if !envelopes.is_empty() {
            let inserts: Vec<vector_index::ChunkInsert> = envelopes
                .iter()
                .map(|envelope| vector_index::ChunkInsert {
                    file_path: record.path.clone(),
                    file_name: record.name.clone(),
                    file_type: ext.to_string(),
                    chunk_index: envelope.metadata.chunk_index,
                    total_chunks: envelope.metadata.total_chunks,
                    chunk_text: envelope.content.clone(),
                    keywords: analysis.keywords.clone(),
                    file_hash: record.hash.clone(),
                })
                .collect();
            engine.index.add(&inserts, &embeddings, Some(&record.hash))?;
        }
    }

    Ok(record.processing_status)
}

fn is_newer_than(path: &Path, watermark: SystemTime) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => mtime > watermark,
        // Cannot determine: process it.
        Err(_) => true,
    }
}

fn parse_utc(timestamp: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(SystemTime::from)
}
