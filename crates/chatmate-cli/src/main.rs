use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chatmate_contracts::analysis::Analysis;
use chatmate_contracts::events::{EventPayload, EventWriter};
use chatmate_contracts::review::format_review_table;
use chatmate_engine::{
    default_analysis_registry, AnalysisRequest, BadgeAtlas, ChatRenderer, RenderConfig,
};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_FONT_PATH: &str = "assets/fonts/Inter.ttf";
const DEFAULT_BADGE_DIR: &str = "assets/badges";

#[derive(Debug, Parser)]
#[command(name = "chatmate", version, about = "Conversation game-review analyzer and renderer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Analyze(AnalyzeArgs),
    Render(RenderArgs),
    Tally(TallyArgs),
    Badges(BadgesArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Transcript of `Username: message` lines, oldest first; `-` reads stdin.
    #[arg(long)]
    transcript: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "gemini-2.5-flash")]
    model: String,
    #[arg(long, default_value = "gemini")]
    provider: String,
    /// Conversation screenshot to analyze alongside (or instead of) the transcript.
    #[arg(long)]
    screenshot: Option<PathBuf>,
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long)]
    badges: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    /// Stored analysis JSON; `-` reads stdin.
    #[arg(long)]
    analysis: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long)]
    badges: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct TallyArgs {
    /// Stored analysis JSON; `-` reads stdin.
    #[arg(long)]
    analysis: PathBuf,
}

#[derive(Debug, Parser)]
struct BadgesArgs {
    #[arg(long)]
    badges: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chatmate error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Render(args) => run_render(args),
        Command::Tally(args) => run_tally(args),
        Command::Badges(args) => run_badges(args),
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let transcript = transcript_lines(&read_input(&args.transcript)?);
    if transcript.is_empty() && args.screenshot.is_none() {
        bail!("transcript is empty and no screenshot was given");
    }

    let events = event_writer(&args.out)?;
    events.emit(
        "run_started",
        payload(json!({
            "provider": args.provider,
            "model": args.model,
            "messages": transcript.len(),
        })),
    )?;

    let registry = default_analysis_registry();
    let Some(provider) = registry.get(&args.provider) else {
        bail!(
            "unknown analysis provider '{}' (available: {})",
            args.provider,
            registry.names().join(", ")
        );
    };

    let request = AnalysisRequest {
        transcript,
        screenshot: args.screenshot.clone(),
        model: args.model.clone(),
        weekday: Local::now().weekday(),
    };
    let analysis = provider.analyze(&request)?;
    events.emit(
        "analysis_received",
        payload(json!({ "messages": analysis.messages.len() })),
    )?;

    let analysis_path = args.out.join("analysis.json");
    fs::write(&analysis_path, analysis.to_json()?)
        .with_context(|| format!("failed writing {}", analysis_path.display()))?;

    render_review(&analysis, args.font.as_deref(), args.badges.as_deref(), &args.out, &events)?;
    print_review(&analysis);
    Ok(0)
}

fn run_render(args: RenderArgs) -> Result<i32> {
    let analysis = Analysis::from_json(&read_input(&args.analysis)?)?;
    let events = event_writer(&args.out)?;
    events.emit(
        "run_started",
        payload(json!({ "messages": analysis.messages.len() })),
    )?;

    render_review(&analysis, args.font.as_deref(), args.badges.as_deref(), &args.out, &events)?;
    print_review(&analysis);
    Ok(0)
}

fn run_tally(args: TallyArgs) -> Result<i32> {
    let analysis = Analysis::from_json(&read_input(&args.analysis)?)?;
    print_review(&analysis);
    Ok(0)
}

fn run_badges(args: BadgesArgs) -> Result<i32> {
    let dir = resolve_badge_dir(args.badges.as_deref());
    let atlas = BadgeAtlas::load(&dir);
    let available = atlas.available();
    println!(
        "badge catalog at {}: {} of 21 assets available",
        dir.display(),
        available.len()
    );
    for key in &available {
        println!("  {key}");
    }
    for warning in atlas.warnings() {
        eprintln!("chatmate warning: {warning}");
    }
    Ok(0)
}

fn render_review(
    analysis: &Analysis,
    font: Option<&Path>,
    badges: Option<&Path>,
    out: &Path,
    events: &EventWriter,
) -> Result<()> {
    let font_path = resolve_font(font);
    let badge_dir = resolve_badge_dir(badges);
    let renderer = ChatRenderer::with_assets(RenderConfig::default(), &font_path, &badge_dir)?;
    for warning in renderer.badge_warnings() {
        events.emit("badge_missing", payload(json!({ "detail": warning })))?;
    }

    let conversation = analysis.conversation()?;
    let theme = analysis.theme()?;
    let outcome = renderer.render(&conversation, &theme)?;
    for warning in &outcome.warnings {
        eprintln!("chatmate warning: {warning}");
        events.emit("badge_missing", payload(json!({ "detail": warning })))?;
    }

    let image_path = out.join("review.png");
    fs::write(&image_path, &outcome.png)
        .with_context(|| format!("failed writing {}", image_path.display()))?;
    events.emit(
        "render_finished",
        payload(json!({
            "path": image_path.to_string_lossy(),
            "width": outcome.width,
            "height": outcome.height,
        })),
    )?;
    println!(
        "wrote {} ({}x{})",
        image_path.display(),
        outcome.width,
        outcome.height
    );
    Ok(())
}

fn print_review(analysis: &Analysis) {
    println!("Game Review");
    if !analysis.comment.is_empty() {
        println!("{}", analysis.comment);
    }
    if !analysis.opening_name.is_empty() {
        println!("{}", analysis.opening_name);
    }
    println!();
    print!(
        "{}",
        format_review_table(analysis, &mut rand::thread_rng())
    );
}

fn event_writer(out: &Path) -> Result<EventWriter> {
    fs::create_dir_all(out).with_context(|| format!("failed creating {}", out.display()))?;
    let run_id = out
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("review-{}", Uuid::new_v4()));
    Ok(EventWriter::new(out.join("events.jsonl"), run_id))
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed reading stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))
}

fn transcript_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn resolve_font(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| non_empty_env("CHATMATE_FONT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT_PATH))
}

fn resolve_badge_dir(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| non_empty_env("CHATMATE_BADGE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BADGE_DIR))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{transcript_lines, resolve_badge_dir, resolve_font};

    #[test]
    fn transcript_lines_drop_blank_lines_and_trim() {
        let lines = transcript_lines("Al: hi\n\n  Bea: yo  \n\n");
        assert_eq!(lines, vec!["Al: hi".to_string(), "Bea: yo".to_string()]);
    }

    #[test]
    fn asset_flags_beat_defaults() {
        assert_eq!(
            resolve_font(Some(Path::new("/tmp/face.ttf"))),
            Path::new("/tmp/face.ttf")
        );
        assert_eq!(
            resolve_badge_dir(Some(Path::new("/tmp/badges"))),
            Path::new("/tmp/badges")
        );
    }
}
