use std::path::Path;
use std::sync::Arc;

use embedding_provider::{Embedder, HashEmbedder};
use index_engine::{Engine, EngineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: cargo run -p index-engine --example scan_and_search -- <DIR> <QUERY>");
        std::process::exit(1);
    }
    let dir = &args[1];
    let query = &args[2];

    // Deterministic embedder so the demo runs without model assets.
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(384)?);
    let engine = Engine::new(EngineConfig::from_env(), Some(embedder))?;

    let run = engine.scan_directory(Path::new(dir), 4, false)?;
    println!(
        "Scanned {}: {} candidates, {} successful, {} skipped",
        run.directory, run.total_files, run.successful_files, run.skipped_unchanged
    );

    let hits = engine.queries().semantic_search(query, 10)?;
    println!("Results: {}", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.chunk_text.chars().take(80).collect();
        println!(
            "{:>2}. [{:.4}] {}#{} ({}) {}",
            i + 1,
            hit.similarity,
            hit.file_path,
            hit.chunk_index,
            hit.tier,
            preview
        );
    }
    Ok(())
}
