use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use embedding_provider::config::{asset_base, detect_embedder};
use index_engine::{Engine, EngineConfig};
use index_model::ProcessingRun;
use metadata_store::MetadataFilter;
use serde_json::json;

fn print_usage() {
    eprintln!(
        "Usage:\n\
         index-cli scan DIR [--workers N] [--force] [--json]\n\
         index-cli search QUERY [--k N] [--json]\n\
         index-cli semantic QUERY [--k N] [--json]\n\
         index-cli query [--name PAT] [--type T] [--dir D] [--min-size N] [--max-size N] [--modified-since TS] [--k N] [--json]\n\
         index-cli keywords KW [KW...] [--k N] [--json]\n\
         index-cli info PATH [--json]\n\
         index-cli chunks PATH [--index I] [--json]\n\
         index-cli dirs [--parent D] [--k N] [--json]\n\
         index-cli stats [--json]\n\
         index-cli compact [--json]\n\
         index-cli rebuild [--json]\n\
         index-cli migrate [--json]\n\
         index-cli autograph log --context C --command CMD [--offered S...] [--accepted S...] [--rejected S...] [--json]\n\
         index-cli autograph query CONTEXT [--k N] [--json]\n\
         index-cli autograph suggest CONTEXT [--threshold T] [--json]\n\
         index-cli autograph stats [--json]\n\
         \n\
         Data locations come from FILE_METADATA_DB, FAISS_DATA_DIR and KG_PATH\n\
         (defaults under ~/data).\n"
    );
}

/// Pull `--flag VALUE` out of args, removing both tokens.
fn take_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let i = args.iter().position(|a| a == flag)?;
    if i + 1 >= args.len() {
        return None;
    }
    let value = args.remove(i + 1);
    args.remove(i);
    Some(value)
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    }
}

/// Pull `--flag V1 V2 ...` (values until the next `--` option).
fn take_values(args: &mut Vec<String>, flag: &str) -> Vec<String> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Vec::new();
    };
    args.remove(i);
    let mut values = Vec::new();
    while i < args.len() && !args[i].starts_with("--") {
        values.push(args.remove(i));
    }
    values
}

fn build_engine() -> Result<Engine> {
    let config = EngineConfig::from_env();
    let embedder = detect_embedder(&asset_base());
    if embedder.is_none() {
        tracing::info!("no embedding model found, semantic search disabled");
    }
    Engine::new(config, embedder).context("engine initialization failed")
}

fn print_run_summary(run: &ProcessingRun, as_json: bool) {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(run).unwrap_or_else(|_| "{}".into())
        );
        return;
    }
    println!("Scan results:");
    println!("  Session ID: {}", run.session_id);
    println!("  Total files: {}", run.total_files);
    println!("  Successful: {}", run.successful_files);
    println!("  Failed: {}", run.failed_files);
    println!("    - Permission denied: {}", run.permission_denied_files);
    println!("    - Size limit exceeded: {}", run.size_limit_exceeded_files);
    println!("    - Encoding errors: {}", run.encoding_error_files);
    println!("    - File not found: {}", run.file_not_found_files);
    println!("    - Timeout: {}", run.timeout_files);
    println!("    - Unknown errors: {}", run.unknown_error_files);
    println!("  Skipped (unchanged): {}", run.skipped_unchanged);
    println!("  Duration: {:.2}s", run.duration_s);
    println!("  Success rate (processed): {:.1}%", run.success_rate());
    if run.interrupted {
        println!("  Scan was interrupted");
    }
}

fn do_scan(mut args: Vec<String>) -> Result<ExitCode> {
    let workers: usize = take_value(&mut args, "--workers")
        .map(|v| v.parse().unwrap_or(4))
        .unwrap_or(4);
    let force = take_flag(&mut args, "--force");
    let as_json = take_flag(&mut args, "--json");
    let dir = args
        .first()
        .ok_or_else(|| anyhow!("scan requires a directory"))?;

    let engine = build_engine()?;
    let cancel = engine.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .context("could not install signal handler")?;

    let run = engine.scan_directory(Path::new(dir), workers, force)?;
    print_run_summary(&run, as_json);

    if run.interrupted {
        return Ok(ExitCode::from(1));
    }
    if run.processed_files() > 0 && run.success_rate() < 50.0 {
        eprintln!("Low success rate for processed files");
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn do_search(mut args: Vec<String>) -> Result<ExitCode> {
    let k: usize = take_value(&mut args, "--k")
        .map(|v| v.parse().unwrap_or(10))
        .unwrap_or(10);
    let as_json = take_flag(&mut args, "--json");
    let query = args
        .first()
        .ok_or_else(|| anyhow!("search requires a query"))?;

    let engine = build_engine()?;
    let hits = engine.queries().full_text_search(query, k)?;
    if as_json {
        let rows: Vec<_> = hits
            .iter()
            .map(|h| {
                json!({
                    "file_path": h.path,
                    "file_name": h.name,
                    "file_type": h.file_type,
                    "modified_date": h.modified_at,
                    "snippet": h.snippet,
                    "rank": h.rank,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("FTS hits: {}", hits.len());
        for (i, hit) in hits.iter().enumerate() {
            println!("{:>2}. {} [{}]", i + 1, hit.path, hit.file_type);
            println!("    {}", hit.snippet.replace('\n', " "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_semantic(mut args: Vec<String>) -> Result<ExitCode> {
    let k: usize = take_value(&mut args, "--k")
        .map(|v| v.parse().unwrap_or(10))
        .unwrap_or(10);
    let as_json = take_flag(&mut args, "--json");
    let query = args
        .first()
        .ok_or_else(|| anyhow!("semantic requires a query"))?;

    let engine = build_engine()?;
    let hits = engine.queries().semantic_search(query, k)?;
    if as_json {
        let rows: Vec<_> = hits
            .iter()
            .map(|h| {
                json!({
                    "vector_id": h.vector_id,
                    "file_path": h.file_path,
                    "chunk_index": h.chunk_index,
                    "similarity": h.similarity,
                    "tier": h.tier.as_str(),
                    "chunk_text": h.chunk_text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("Semantic hits: {}", hits.len());
        for (i, hit) in hits.iter().enumerate() {
            println!(
                "{:>2}. [{:.4}] {}#{} ({})",
                i + 1,
                hit.similarity,
                hit.file_path,
                hit.chunk_index,
                hit.tier
            );
            println!("    {}", truncate_chars(&hit.chunk_text, 100));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_query(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let k: usize = take_value(&mut args, "--k")
        .map(|v| v.parse().unwrap_or(20))
        .unwrap_or(20);
    let filter = MetadataFilter {
        name_pattern: take_value(&mut args, "--name"),
        file_type: take_value(&mut args, "--type"),
        directory: take_value(&mut args, "--dir"),
        modified_since: take_value(&mut args, "--modified-since"),
        created_since: take_value(&mut args, "--created-since"),
        min_size: take_value(&mut args, "--min-size").and_then(|v| v.parse().ok()),
        max_size: take_value(&mut args, "--max-size").and_then(|v| v.parse().ok()),
        permissions: take_value(&mut args, "--permissions"),
    };

    let engine = build_engine()?;
    let records = engine.queries().search_files(&filter, k)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("Matches: {}", records.len());
        for record in &records {
            println!(
                "{:>10}  {}  {}",
                record.size, record.modified_at, record.path
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_keywords(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let k: usize = take_value(&mut args, "--k")
        .map(|v| v.parse().unwrap_or(20))
        .unwrap_or(20);
    if args.is_empty() {
        bail!("keywords requires at least one keyword");
    }

    let engine = build_engine()?;
    let hits = engine.queries().search_by_keywords(&args, k)?;
    if as_json {
        let rows: Vec<_> = hits
            .iter()
            .map(|h| {
                json!({
                    "file_path": h.path,
                    "file_name": h.name,
                    "matched": h.matched,
                    "keywords": h.keywords,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("Keyword matches: {}", hits.len());
        for hit in &hits {
            println!("  {}  (matched: {})", hit.path, hit.matched.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_info(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let path = args.first().ok_or_else(|| anyhow!("info requires a path"))?;

    let engine = build_engine()?;
    let Some(info) = engine.queries().get_file_info(path)? else {
        eprintln!("No record for {path}");
        return Ok(ExitCode::from(2));
    };
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "record": info.record,
                "analysis": info.analysis,
                "chunk_count": info.chunk_count,
            }))?
        );
    } else {
        let r = &info.record;
        println!("{}", r.path);
        println!("  size: {}  type: {}  mime: {}", r.size, r.file_type, r.mime);
        println!("  modified: {}  status: {}", r.modified_at, r.processing_status);
        println!("  chunks: {}", info.chunk_count);
        if let Some(analysis) = &info.analysis {
            println!("  words: {}  language: {}", analysis.word_count, analysis.language);
            println!("  keywords: {}", analysis.keywords.join(", "));
            println!("  summary: {}", analysis.summary);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_chunks(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let index: Option<usize> = take_value(&mut args, "--index").and_then(|v| v.parse().ok());
    let path = args
        .first()
        .ok_or_else(|| anyhow!("chunks requires a path"))?;

    let engine = build_engine()?;
    let chunks = engine.queries().get_file_chunks(path, index)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
    } else {
        println!("Chunks: {}", chunks.len());
        for chunk in &chunks {
            println!(
                "--- chunk {}/{} ({} chars, {})",
                chunk.metadata.chunk_index,
                chunk.metadata.total_chunks,
                chunk.metadata.chunk_size,
                chunk.metadata.chunk_strategy
            );
            println!("{}", chunk.content);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_dirs(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let parent = take_value(&mut args, "--parent");
    let k: usize = take_value(&mut args, "--k")
        .map(|v| v.parse().unwrap_or(50))
        .unwrap_or(50);

    let engine = build_engine()?;
    let dirs = engine.queries().list_directories(parent.as_deref(), k)?;
    if as_json {
        let rows: Vec<_> = dirs
            .iter()
            .map(|d| {
                json!({
                    "directory": d.directory,
                    "file_count": d.file_count,
                    "total_size": d.total_size,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for dir in &dirs {
            println!("{:>6} files  {:>12} bytes  {}", dir.file_count, dir.total_size, dir.directory);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn do_stats(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let engine = build_engine()?;
    let stats = engine.queries().get_stats()?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "store": {
                    "total_files": stats.store.total_files,
                    "total_size_bytes": stats.store.total_size_bytes,
                    "files_with_analysis": stats.store.files_with_analysis,
                    "total_chunks": stats.store.total_chunks,
                    "total_directories": stats.store.total_directories,
                    "top_file_types": stats.store.top_file_types,
                },
                "index": {
                    "major_vectors": stats.index.major.vector_count,
                    "minor_vectors": stats.index.minor.vector_count,
                    "total_vectors": stats.index.total_vectors,
                    "indexed_files": stats.index.indexed_files,
                    "stale_vectors": stats.index.stale_vectors,
                    "needs_compaction": stats.index.needs_compaction,
                },
            }))?
        );
    } else {
        println!("Store:");
        println!("  files: {}", stats.store.total_files);
        println!("  chunks: {}", stats.store.total_chunks);
        println!("  analyzed: {}", stats.store.files_with_analysis);
        println!("  directories: {}", stats.store.total_directories);
        println!("Index:");
        println!("  major vectors: {}", stats.index.major.vector_count);
        println!("  minor vectors: {}", stats.index.minor.vector_count);
        println!("  stale vectors: {}", stats.index.stale_vectors);
        println!("  needs compaction: {}", stats.index.needs_compaction);
    }
    Ok(ExitCode::SUCCESS)
}

fn do_compact(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let engine = build_engine()?;
    let report = engine.compact_index()?;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "compacted": report.compacted,
                "pre_major": report.pre_major,
                "pre_minor": report.pre_minor,
                "post_major": report.post_major,
                "stale_vectors": report.stale_vectors,
            }))?
        );
    } else if report.compacted {
        println!(
            "Merged {} minor vectors into major ({} total)",
            report.pre_minor, report.post_major
        );
    } else {
        println!("Minor tier is empty, nothing to compact");
    }
    Ok(ExitCode::SUCCESS)
}

fn do_rebuild(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let engine = build_engine()?;
    let report = engine.rebuild_major_from_store()?;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "total_vectors": report.total_vectors,
                "indexed_files": report.indexed_files,
            }))?
        );
    } else {
        println!(
            "Rebuilt major index: {} vectors across {} files",
            report.total_vectors, report.indexed_files
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn do_migrate(mut args: Vec<String>) -> Result<ExitCode> {
    let as_json = take_flag(&mut args, "--json");
    let engine = build_engine()?;
    let migrated = engine.migrate_legacy_index()?;
    if as_json {
        println!("{}", json!({ "migrated": migrated }));
    } else if migrated {
        println!("Migrated legacy index to the two-tier layout");
    } else {
        println!("No legacy index to migrate");
    }
    Ok(ExitCode::SUCCESS)
}

fn do_autograph(mut args: Vec<String>) -> Result<ExitCode> {
    if args.is_empty() {
        bail!("autograph requires a subcommand: log | query | suggest | stats");
    }
    let sub = args.remove(0);
    let as_json = take_flag(&mut args, "--json");
    let engine = build_engine()?;

    match sub.as_str() {
        "log" => {
            let context = take_value(&mut args, "--context")
                .ok_or_else(|| anyhow!("autograph log requires --context"))?;
            let command = take_value(&mut args, "--command")
                .ok_or_else(|| anyhow!("autograph log requires --command"))?;
            let offered = take_values(&mut args, "--offered");
            let accepted = take_values(&mut args, "--accepted");
            let rejected = take_values(&mut args, "--rejected");

            let mut kg = engine
                .autograph()
                .lock()
                .map_err(|_| anyhow!("knowledge graph lock poisoned"))?;
            let outcome = kg.log(&context, &command, &offered, &accepted, &rejected)?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "Logged {} edges for {} (accepted {}, rejected {}, ignored {})",
                    outcome.edges_created,
                    outcome.context_node,
                    outcome.accepted,
                    outcome.rejected,
                    outcome.ignored
                );
            }
        }
        "query" => {
            let k: usize = take_value(&mut args, "--k")
                .map(|v| v.parse().unwrap_or(10))
                .unwrap_or(10);
            let context = args
                .first()
                .ok_or_else(|| anyhow!("autograph query requires a context"))?;
            let kg = engine
                .autograph()
                .lock()
                .map_err(|_| anyhow!("knowledge graph lock poisoned"))?;
            let matches = kg.query(context, k)?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                for m in &matches {
                    println!(
                        "{} -[{:?}]-> {}  (sim {:.3})",
                        m.edge.source_node,
                        m.edge.edge_type,
                        m.edge.target_node,
                        m.context_similarity.unwrap_or(0.0)
                    );
                }
            }
        }
        "suggest" => {
            let threshold: Option<f64> =
                take_value(&mut args, "--threshold").and_then(|v| v.parse().ok());
            let context = args
                .first()
                .ok_or_else(|| anyhow!("autograph suggest requires a context"))?;
            let kg = engine
                .autograph()
                .lock()
                .map_err(|_| anyhow!("knowledge graph lock poisoned"))?;
            let suggestions = kg.suggest(context, threshold)?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else {
                for s in &suggestions {
                    println!("{}  confidence={:.3}  weight={:.3}", s.source, s.confidence, s.total_weight);
                }
            }
        }
        "stats" => {
            let kg = engine
                .autograph()
                .lock()
                .map_err(|_| anyhow!("knowledge graph lock poisoned"))?;
            let stats = kg.stats();
            if as_json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Nodes: {}  Edges: {}", stats.total_nodes, stats.total_edges);
                println!("Phase: {}", stats.bootstrap_phase);
                println!("Embeddings: {}", stats.embeddings_count);
            }
        }
        other => bail!("unknown autograph subcommand: {other}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    let mut it = s.chars();
    let truncated: String = it.by_ref().take(max_chars).collect();
    if it.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return ExitCode::from(2);
    }
    let command = args.remove(0);

    let result = match command.as_str() {
        "scan" => do_scan(args),
        "search" => do_search(args),
        "semantic" => do_semantic(args),
        "query" => do_query(args),
        "keywords" => do_keywords(args),
        "info" => do_info(args),
        "chunks" => do_chunks(args),
        "dirs" => do_dirs(args),
        "stats" => do_stats(args),
        "compact" => do_compact(args),
        "rebuild" => do_rebuild(args),
        "migrate" => do_migrate(args),
        "autograph" => do_autograph(args),
        _ => {
            print_usage();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}
