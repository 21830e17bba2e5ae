use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use chatreel::config::{load_and_validate_options, load_transcript};
use chatreel::encoding::FfmpegMode;
use chatreel::error_codes::{envelope_for, find_coded_error, CodedError, CodedErrorKind, INVALID_OPTIONS};
use chatreel::fonts::{FixedFontProvider, FontProvider, SystemFontProvider};
use chatreel::image_pack::load_image_pack;
use chatreel::images::ImageCollections;
use chatreel::options::ChatRenderOptions;
use chatreel::preprocess::preprocess_comments;
use chatreel::render::{render_chat, CancellationToken, RenderJob, RenderWindow, TracingProgress};

const LONG_VERSION: &str = match option_env!("CHATREEL_GIT_HASH") {
    Some(hash) => hash,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Debug, Parser)]
#[command(name = "chatreel")]
#[command(about = "Render chat transcripts into scrolling chat overlay video")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Print failures as a JSON error envelope on stdout.
    #[arg(long = "json", global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a transcript to video.
    Render {
        transcript: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Render options (YAML). Defaults apply when omitted.
        #[arg(short = 'c', long = "options")]
        options: Option<PathBuf>,
        /// Directory of pre-fetched emote, badge, emoji and avatar images.
        #[arg(long = "images")]
        images: Option<PathBuf>,
        /// Font files to use instead of installed fonts. The first is the primary face.
        #[arg(long = "font")]
        fonts: Vec<PathBuf>,
        #[arg(long = "mask-output")]
        mask_output: Option<PathBuf>,
        #[arg(long = "start")]
        start: Option<f64>,
        #[arg(long = "end")]
        end: Option<f64>,
        #[arg(long = "ffmpeg", value_enum, default_value_t = FfmpegArg::Auto)]
        ffmpeg: FfmpegArg,
    },
    /// Validate options and transcript without rendering.
    Check {
        transcript: PathBuf,
        #[arg(short = 'c', long = "options")]
        options: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FfmpegArg {
    Auto,
    System,
    Sidecar,
}

impl From<FfmpegArg> for FfmpegMode {
    fn from(value: FfmpegArg) -> Self {
        match value {
            FfmpegArg::Auto => Self::Auto,
            FfmpegArg::System => Self::System,
            FfmpegArg::Sidecar => Self::Sidecar,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let result = match cli.command {
        Commands::Render {
            transcript,
            output,
            options,
            images,
            fonts,
            mask_output,
            start,
            end,
            ffmpeg,
        } => run_render(
            &transcript,
            output,
            options.as_deref(),
            images.as_deref(),
            &fonts,
            mask_output,
            (start, end),
            ffmpeg.into(),
            &cancel,
        ),
        Commands::Check {
            transcript,
            options,
        } => run_check(&transcript, options.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_error(&error, cli.json),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CHATREEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(error: &anyhow::Error, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(&envelope_for(error)) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("error: {error:#}"),
        }
    } else {
        eprintln!("error: {error:#}");
    }
    ExitCode::from(exit_status(error))
}

fn exit_status(error: &anyhow::Error) -> u8 {
    match find_coded_error(error).map(|coded| coded.kind) {
        Some(CodedErrorKind::Usage) => 2,
        Some(CodedErrorKind::Cancelled) => 130,
        _ => 1,
    }
}

/// First Ctrl+C cancels the render so partial outputs are cleaned up; a second one
/// exits immediately.
fn install_interrupt_handler(cancel: &CancellationToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel.cancel_again() {
            std::process::exit(130);
        }
        eprintln!("interrupt received, cancelling render (press Ctrl+C again to exit now)");
    })
    .context("failed to install Ctrl+C handler")
}

fn load_options(path: Option<&Path>) -> Result<ChatRenderOptions> {
    match path {
        Some(path) => load_and_validate_options(path)
            .map_err(|error| anyhow!(CodedError::usage(INVALID_OPTIONS, format!("{error:#}")))),
        None => Ok(ChatRenderOptions::default()),
    }
}

fn font_provider(fonts: &[PathBuf]) -> Result<Box<dyn FontProvider>> {
    if fonts.is_empty() {
        return Ok(Box::new(SystemFontProvider::new(&[])));
    }
    let paths = fonts.iter().map(PathBuf::as_path).collect::<Vec<_>>();
    Ok(Box::new(
        FixedFontProvider::from_files(&paths).context("failed to load --font files")?,
    ))
}

fn run_render(
    transcript: &Path,
    output: PathBuf,
    options_path: Option<&Path>,
    images_dir: Option<&Path>,
    fonts: &[PathBuf],
    mask_output: Option<PathBuf>,
    (start, end): (Option<f64>, Option<f64>),
    ffmpeg_mode: FfmpegMode,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Err(error) = install_interrupt_handler(cancel) {
        warn!(error = %format!("{error:#}"), "render cannot be interrupted cleanly");
    }
    let mut options = load_options(options_path)?;
    options.start_time = start.or(options.start_time);
    options.end_time = end.or(options.end_time);
    if mask_output.is_some() {
        options.generate_mask = true;
    }

    let comments = load_transcript(transcript)?;
    let images = match images_dir {
        Some(dir) => load_image_pack(dir, &comments)?,
        None => ImageCollections::default(),
    };
    let job = RenderJob {
        options,
        comments,
        images,
        fonts: font_provider(fonts)?,
        output,
        mask_output,
        ffmpeg_mode,
    };

    let summary = render_chat(job, cancel, &mut TracingProgress)?;
    for path in &summary.outputs {
        println!("Wrote {}", path.display());
    }
    println!(
        "{} frames ({:.1}s to {:.1}s) in {:.1}s",
        summary.frames,
        summary.window.start_seconds,
        summary.window.end_seconds,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

fn run_check(transcript: &Path, options_path: Option<&Path>) -> Result<()> {
    let options = load_options(options_path)?;
    let mut comments = load_transcript(transcript)?;
    let loaded = comments.len();
    preprocess_comments(&mut comments, &options)?;
    let window = RenderWindow::resolve(&options, &comments)?;

    println!(
        "OK: {} ({}x{}, {} fps, {} frames)",
        transcript.display(),
        options.chat_width,
        options.chat_height,
        options.framerate,
        window.total_frames(options.framerate)
    );
    println!(
        "Comments: {} kept of {} ({:.1}s to {:.1}s)",
        comments.len(),
        loaded,
        window.start_seconds,
        window.end_seconds
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{exit_status, run_render};
    use chatreel::encoding::FfmpegMode;
    use chatreel::render::CancellationToken;

    const TRANSCRIPT: &str = r#"[{
        "_id": "1",
        "created_at": "2024-05-01T20:00:00Z",
        "content_offset_seconds": 0.0,
        "commenter": {"display_name": "Alice", "_id": "1", "name": "alice"},
        "message": {"body": "hi", "fragments": [{"text": "hi"}]}
    }]"#;

    #[test]
    fn cancelled_render_exits_130_without_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcript = dir.path().join("chat.json");
        fs::write(&transcript, TRANSCRIPT).expect("write transcript");
        let output = dir.path().join("chat.mp4");
        let mask = dir.path().join("chat_mask.mp4");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let error = run_render(
            &transcript,
            output.clone(),
            None,
            None,
            &[],
            Some(mask.clone()),
            (None, Some(1.0)),
            FfmpegMode::System,
            &cancel,
        )
        .expect_err("cancelled render");

        assert_eq!(exit_status(&error), 130);
        assert!(!output.exists());
        assert!(!mask.exists());
    }
}
