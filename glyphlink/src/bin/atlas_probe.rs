//! Build the sample atlas on the headless device and write it out as a PNG.
//!
//! ```text
//! RUST_LOG=glyphlink=debug atlas_probe --config glyphlink.json --out atlas.png
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use glyphlink::atlas::sample_alphabet;
use glyphlink::{EngineConfig, GlyphEngine, GlyphWorkers};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "atlas_probe", about = "Pack the sample glyph alphabet and dump the atlas")]
struct Args {
    /// JSON engine config. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the atlas PNG.
    #[arg(short, long, default_value = "atlas.png")]
    out: PathBuf,

    /// Resolve glyphs on the worker pool instead of one batch.
    #[arg(long)]
    workers: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let engine = Arc::new(GlyphEngine::headless(config.clone()).context("creating engine")?);
    let glyphs = sample_alphabet();

    let failed = if args.workers {
        let workers = GlyphWorkers::spawn(engine.clone(), config.workers);
        let results = workers.warm(glyphs.iter().cloned())?;
        let failed = results
            .iter()
            .take(glyphs.len())
            .filter(|warmed| warmed.result.is_err())
            .count();
        workers.shutdown();
        failed
    } else {
        engine
            .resolve_batch(&glyphs)
            .iter()
            .filter(|result| result.is_err())
            .count()
    };

    let stats = engine.stats();
    let cache = engine.raster_cache().stats();
    tracing::info!(
        glyphs = stats.glyphs,
        rejected = stats.rejected,
        submissions = stats.submissions,
        copies = stats.copies,
        raster_builds = cache.builds,
        raster_hits = cache.hits,
        failed,
        "sample atlas built"
    );

    engine
        .atlas()
        .texture()
        .read_pixels()
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("{} glyphs packed, atlas written to {}", stats.glyphs, args.out.display());
    Ok(())
}
