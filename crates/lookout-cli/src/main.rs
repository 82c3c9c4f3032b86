mod render;
mod session;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use lookout_contracts::analysis::AnalysisError;
use lookout_contracts::errors::{ClassifiedError, ErrorCategory};
use lookout_contracts::presentation::{AnalysisMode, Completion, Phase, PresentationState, Slot};
use lookout_engine::{EngineConfig, ImageHandle, LookoutEngine};

use crate::render::Renderer;

#[derive(Debug, Parser)]
#[command(name = "lookout", version, about = "Object listing and image comparison")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Vision model; unknown names fall back to the default.
    #[arg(long, global = true)]
    model: Option<String>,
    /// Append a JSONL run log here.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Print results and errors as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Per-character delay of the result reveal, in milliseconds.
    #[arg(long, global = true, default_value_t = 12)]
    reveal_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the objects visible in one image.
    Analyze { image: String },
    /// List objects present in the reference image but missing from the comparison.
    Compare { reference: String, comparison: String },
    /// Interactive session.
    Session {
        #[arg(long, default_value = "single")]
        mode: AnalysisMode,
    },
    /// List vision-capable models.
    Models,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lookout error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env().with_model(cli.model.as_deref());
    let engine = LookoutEngine::new(config, cli.events.clone())?;
    if let Some(reason) = engine.fallback_reason() {
        eprintln!("{reason}");
    }
    info!("run {} using model {}", engine.run_id(), engine.model().name);

    let delay = Duration::from_millis(cli.reveal_ms);
    match cli.command {
        Command::Analyze { image } => {
            let renderer = Renderer::new(io::stdout(), delay, cli.json);
            run_once(&engine, renderer, vec![(Slot::Image, image)])
        }
        Command::Compare {
            reference,
            comparison,
        } => {
            let renderer = Renderer::new(io::stdout(), delay, cli.json);
            run_once(
                &engine,
                renderer,
                vec![(Slot::Reference, reference), (Slot::Comparison, comparison)],
            )
        }
        Command::Session { mode } => {
            let renderer = Renderer::new(io::stdout(), delay, cli.json);
            session::run_session(engine, mode, renderer)?;
            Ok(0)
        }
        Command::Models => {
            list_models(&engine, io::stdout().lock())?;
            Ok(0)
        }
    }
}

/// Drives one submission through the same state machine the session uses and
/// returns the process exit code.
fn run_once<W: Write>(
    engine: &LookoutEngine,
    mut renderer: Renderer<W>,
    sources: Vec<(Slot, String)>,
) -> Result<i32> {
    let mode = if sources.len() == 1 {
        AnalysisMode::Single
    } else {
        AnalysisMode::Differential
    };
    let mut state: PresentationState<ImageHandle> = PresentationState::new(mode);
    for (slot, source) in sources {
        let handle = engine
            .load_image(&source)
            .with_context(|| format!("failed to load {slot} image '{source}'"))?;
        state.fill_slot(slot, handle)?;
    }

    let submission = state.submit()?;
    let token = submission.token;
    let outcome = match engine.prepare(submission) {
        Ok(job) => job.run(),
        Err(err) => Err(AnalysisError::new(
            match mode {
                AnalysisMode::Single => "analyze_single_image",
                AnalysisMode::Differential => "compare_images",
            },
            ClassifiedError::new(ErrorCategory::Unknown, &format!("{err:#}")),
        )),
    };
    if let Completion::Stale = state.complete(token, outcome) {
        anyhow::bail!("analysis completion was not applied");
    }
    renderer.outcome(&mut state)?;
    Ok(exit_code(state.phase()))
}

fn exit_code(phase: Phase) -> i32 {
    match phase {
        Phase::Error => 2,
        _ => 0,
    }
}

fn list_models<W: Write>(engine: &LookoutEngine, mut out: W) -> Result<()> {
    let current = engine.model().name.clone();
    for model in engine.vision_models() {
        let marker = if model.name == current { "*" } else { " " };
        let window = model
            .context_window
            .map(|tokens| tokens.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(out, "{marker} {:<20} {:<8} {window}", model.name, model.provider)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use image::{ImageFormat, Rgb, RgbImage};
    use lookout_contracts::presentation::{Phase, Slot};
    use lookout_engine::{EngineConfig, LookoutEngine};

    use super::{exit_code, list_models, run_once};
    use crate::render::Renderer;

    fn dryrun_engine() -> Result<LookoutEngine> {
        LookoutEngine::new(
            EngineConfig::default().with_model(Some("dryrun-vision-1")),
            None,
        )
    }

    #[test]
    fn one_shot_analyze_exits_zero_with_listing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("desk.png");
        RgbImage::from_pixel(2, 2, Rgb([5, 90, 200])).save_with_format(&path, ImageFormat::Png)?;

        let mut out = Vec::new();
        let code = run_once(
            &dryrun_engine()?,
            Renderer::new(&mut out, Duration::ZERO, false),
            vec![(Slot::Image, path.to_string_lossy().to_string())],
        )?;
        assert_eq!(code, 0);
        let text = String::from_utf8(out)?;
        assert!(text.starts_with("Objects found:\n  1. "));
        assert_eq!(text.lines().count(), 4);
        Ok(())
    }

    #[test]
    fn one_shot_compare_with_unreadable_image_exits_two() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let good = temp.path().join("a.png");
        RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])).save_with_format(&good, ImageFormat::Png)?;
        let bad = temp.path().join("b.png");
        std::fs::write(&bad, b"not really a png")?;

        let mut out = Vec::new();
        let code = run_once(
            &dryrun_engine()?,
            Renderer::new(&mut out, Duration::ZERO, true),
            vec![
                (Slot::Reference, good.to_string_lossy().to_string()),
                (Slot::Comparison, bad.to_string_lossy().to_string()),
            ],
        )?;
        assert_eq!(code, 2);
        let value: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(value["error"]["category"], "unknown");
        Ok(())
    }

    #[test]
    fn missing_file_is_a_cli_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("nope.png");
        let result = run_once(
            &dryrun_engine()?,
            Renderer::new(Vec::new(), Duration::ZERO, false),
            vec![(Slot::Image, missing.to_string_lossy().to_string())],
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn exit_codes_follow_the_final_phase() {
        assert_eq!(exit_code(Phase::Result), 0);
        assert_eq!(exit_code(Phase::Error), 2);
    }

    #[test]
    fn models_listing_marks_the_active_model() -> Result<()> {
        let mut out = Vec::new();
        list_models(&dryrun_engine()?, &mut out)?;
        let text = String::from_utf8(out)?;
        assert!(text.lines().any(|line| line.starts_with("* dryrun-vision-1")));
        assert!(text.contains("gemini-2.0-flash"));
        assert!(!text.contains("text-embedding-004"));
        Ok(())
    }
}
