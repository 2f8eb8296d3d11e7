//! scroll-audio CLI: build the app's soundscapes and inspect the output tree.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use scroll_audio_core::config::{ExportFormat, PipelineConfig};
use scroll_audio_core::fetch::bulk::tool_available;
use scroll_audio_core::fetch::NetworkFetcher;
use scroll_audio_core::layout::AudioRef;
use scroll_audio_core::report::scan_outputs;
use scroll_audio_core::run_pipeline;
use scroll_audio_core::types::{SourceKind, StoryState};

// ─── Top-level CLI ───────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "scroll-audio",
    about = "Offline soundscape builder: download, condense, level and mix story audio",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build every story whose outputs are missing
    Build(BuildArgs),
    /// Show which story outputs exist
    Status(StatusArgs),
}

// ─── Shared arguments (embedded in each subcommand) ──────────────

#[derive(Parser, Debug)]
struct SharedArgs {
    /// Soundscape config (JSON); the built-in catalog when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output root (overrides the config's output_root)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Export format (overrides the config)
    #[arg(long, value_parser = ["wav", "mp3"])]
    format: Option<String>,

    /// Show verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct BuildArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Only build this chapter
    #[arg(long)]
    chapter: Option<String>,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    #[command(flatten)]
    shared: SharedArgs,
}

// ─── Entry point ─────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Build(a) if a.shared.verbose => "debug",
        Command::Status(a) if a.shared.verbose => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Build(args) => run_build(args),
        Command::Status(args) => run_status(args),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Load the config and apply command-line overrides.
fn load_config(shared: &SharedArgs) -> Result<PipelineConfig> {
    let mut config = match &shared.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Invalid config: {}", path.display()))?,
        None => PipelineConfig::builtin().context("Invalid built-in catalog")?,
    };
    if let Some(root) = &shared.root {
        config.output_root = root.clone();
    }
    if let Some(format) = &shared.format {
        config.export.format = format.parse::<ExportFormat>().map_err(anyhow::Error::msg)?;
    }
    Ok(config)
}

/// Warn about missing external tools. The run continues either way:
/// direct sources and WAV export need neither.
fn preflight(config: &PipelineConfig, chapter: Option<&str>) {
    let needs_bulk = config
        .chapters
        .iter()
        .filter(|c| chapter.map_or(true, |k| k == c.key))
        .flat_map(|c| &c.stories)
        .flat_map(|s| &s.sources)
        .any(|s| s.kind == SourceKind::Bulk);
    if needs_bulk && !tool_available(&config.bulk.program) {
        log::warn!(
            "{} not found: bulk sources can only be served from existing downloads",
            config.bulk.program
        );
    }
    if config.export.format == ExportFormat::Mp3 && !tool_available(&config.export.ffmpeg) {
        log::warn!(
            "{} not found: MP3 export will fail (use --format wav)",
            config.export.ffmpeg
        );
    }
}

// ─── Build runner ────────────────────────────────────────────────

fn run_build(args: BuildArgs) -> Result<()> {
    let config = load_config(&args.shared)?;
    if let Some(key) = &args.chapter {
        if config.chapter(key).is_none() {
            let known: Vec<&str> = config.chapters.iter().map(|c| c.key.as_str()).collect();
            bail!("Unknown chapter '{}' (known: {})", key, known.join(", "));
        }
    }

    preflight(&config, args.chapter.as_deref());
    log::info!("Building soundscapes into {}", config.output_root.display());

    let fetcher = NetworkFetcher::new(&config).context("Failed to set up downloads")?;
    let report = run_pipeline(&config, &fetcher, args.chapter.as_deref());

    for summary in report.chapter_summaries() {
        println!(
            "{}: {} exported, {} skipped, {} failed",
            summary.chapter, summary.exported, summary.skipped, summary.failed
        );
    }
    for outcome in report.failed() {
        println!("  failed {}/{}: {}", outcome.chapter, outcome.story, outcome.detail);
    }
    if report.count(StoryState::Failed) > 0 {
        log::warn!(
            "{} of {} stories failed; rerun to retry them",
            report.count(StoryState::Failed),
            report.outcomes.len()
        );
    }
    Ok(())
}

// ─── Status runner ───────────────────────────────────────────────

fn run_status(args: StatusArgs) -> Result<()> {
    let config = load_config(&args.shared)?;
    let statuses = scan_outputs(&config);

    let mut current_chapter = "";
    for status in &statuses {
        if status.chapter != current_chapter {
            current_chapter = &status.chapter;
            println!("{} ({})", status.chapter, status.style);
        }
        let mark = if status.is_complete() { "built" } else { "missing" };
        println!("  {:<24} {}", status.story, mark);
        for (path, present) in &status.outputs {
            println!("    [{}] {}", if *present { "x" } else { " " }, path.display());
        }
        if let AudioRef::Present(path) = &status.audio.ambient {
            println!("    ambient: {}", path.display());
        }
    }

    let built = statuses.iter().filter(|s| s.is_complete()).count();
    println!("{}/{} stories built", built, statuses.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_args() {
        let cli = Cli::try_parse_from([
            "scroll-audio",
            "build",
            "--root",
            "/tmp/out",
            "--chapter",
            "weapon_quest",
            "--format",
            "wav",
            "-v",
        ])
        .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.chapter.as_deref(), Some("weapon_quest"));
        assert!(args.shared.verbose);

        let config = load_config(&args.shared).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(config.export.format, ExportFormat::Wav);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["scroll-audio", "status", "--format", "ogg"]).is_err());
    }
}
