//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::backpressure::BackpressureGate;
use crate::cache::ChunkCache;
use crate::config::ScribeConfig;
use crate::error::ScribeResult;
use crate::model::{ChunkingMode, TranscriptionRequest};
use crate::object_store::HttpObjectStore;
use crate::output;
use crate::pipeline::Pipeline;
use crate::silence::SilenceProbe;
use crate::whisper::HttpWhisperClient;

#[derive(Debug, Parser)]
#[command(
    name = "rangescribe",
    about = "Transcribe very large object-store recordings in bounded memory",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transcribe a recording and print or save the merged transcript.
    Transcribe(TranscribeArgs),
    /// Plan chunk boundaries without transcribing anything.
    Plan(PlanArgs),
    /// Cut a time range of a remote recording into a local MP3.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Object-store bucket holding the recording.
    #[arg(long)]
    pub bucket: String,

    /// Object key of the recording.
    #[arg(long)]
    pub key: String,

    /// Optional TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TranscribeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Chunking strategy.
    #[arg(long, value_enum, default_value_t = ChunkingMode::SilenceAware)]
    pub mode: ChunkingMode,

    /// Write the transcript as JSON to this path.
    #[arg(long)]
    pub json_out: Option<PathBuf>,

    /// Write the transcript as SRT to this path.
    #[arg(long)]
    pub srt_out: Option<PathBuf>,

    /// Print the full run outcome as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Chunking strategy.
    #[arg(long, value_enum, default_value_t = ChunkingMode::SilenceAware)]
    pub mode: ChunkingMode,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Range start in seconds.
    #[arg(long)]
    pub start: f64,

    /// Range end in seconds.
    #[arg(long)]
    pub end: f64,

    /// Destination MP3 path.
    #[arg(long)]
    pub output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> ScribeResult<ScribeConfig> {
    match path {
        Some(path) => ScribeConfig::load(path),
        None => {
            let config = ScribeConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Wire up the production collaborators for a config.
fn build_pipeline(config: ScribeConfig) -> ScribeResult<Pipeline> {
    let store = Arc::new(HttpObjectStore::new(
        config.object_store.endpoint.clone(),
        Duration::from_secs(config.object_store.connect_timeout_secs),
        Duration::from_secs(config.object_store.read_timeout_secs),
    )?);
    let transcriber = Arc::new(HttpWhisperClient::new(&config.whisper)?);
    let analyzer = Arc::new(SilenceProbe::new(
        config.silence_noise_db,
        config.silence_min_duration,
    ));
    let cache = Arc::new(ChunkCache::new(&config.cache));
    let gate = Arc::new(BackpressureGate::new());
    Pipeline::new(config, store, transcriber, analyzer, cache, gate)
}

pub fn run(cli: Cli) -> ScribeResult<()> {
    match cli.command {
        Command::Transcribe(args) => {
            let config = load_config(args.common.config.as_ref())?;
            let pipeline = build_pipeline(config)?;
            let request =
                TranscriptionRequest::new(args.common.bucket, args.common.key, args.mode);
            let outcome = pipeline.transcribe(&request)?;

            if let Some(path) = &args.json_out {
                std::fs::write(path, output::write_json(&outcome.segments, &outcome.language)?)?;
                eprintln!("wrote {}", path.display());
            }
            if let Some(path) = &args.srt_out {
                std::fs::write(path, output::write_srt(&outcome.segments))?;
                eprintln!("wrote {}", path.display());
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                for segment in &outcome.segments {
                    println!(
                        "[{:>9.2} - {:>9.2}] {}",
                        segment.start, segment.end, segment.text
                    );
                }
                eprintln!(
                    "{} segments, {} chunks ({} cached), language {}",
                    outcome.segments.len(),
                    outcome.diagnostics.chunk_count,
                    outcome.diagnostics.cached_chunks,
                    outcome.language
                );
            }
            Ok(())
        }
        Command::Plan(args) => {
            let config = load_config(args.common.config.as_ref())?;
            let pipeline = build_pipeline(config)?;
            let request =
                TranscriptionRequest::new(args.common.bucket, args.common.key, args.mode);
            let preview = pipeline.preview(&request)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
        Command::Extract(args) => {
            let config = load_config(args.common.config.as_ref())?;
            let pipeline = build_pipeline(config)?;
            let clip = pipeline.extract(
                &args.common.bucket,
                &args.common.key,
                args.start,
                args.end,
                &args.output,
            )?;
            eprintln!(
                "extracted {:.2}s-{:.2}s to {}",
                clip.start_seconds,
                clip.end_seconds,
                clip.path.display()
            );
            Ok(())
        }
    }
}
