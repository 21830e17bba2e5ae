//! The tick loop: drives the frame pipeline into frame sinks, with cancellation,
//! progress reporting and cleanup of claimed output files.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};

use crate::comment::Comment;
use crate::encoding::{
    encoder_args, pixmap_to_bytes, resolve_program, EncoderSettings, FfmpegMode, FfmpegPipe,
    FrameSink,
};
use crate::error_codes::{CodedError, DESTINATION_UNAVAILABLE, INVALID_OPTIONS};
use crate::fonts::{FontFallbackCache, FontProvider, FontSet};
use crate::frame::FramePipeline;
use crate::images::{ImageCache, ImageCollections};
use crate::options::ChatRenderOptions;
use crate::preprocess::preprocess_comments;
use crate::section::SectionAssembler;

/// Cooperative cancellation flag, checked once per tick.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancels, returning whether cancellation had already been requested.
    pub fn cancel_again(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub frame: u64,
    pub total_frames: u64,
    pub percent: f64,
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
}

pub trait ProgressReporter {
    fn report(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressReporter for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&mut self, progress: &Progress) {
        info!(
            frame = progress.frame,
            total = progress.total_frames,
            percent = %format_args!("{:.1}", progress.percent),
            elapsed_s = progress.elapsed.as_secs(),
            remaining = ?progress.remaining,
            "rendering"
        );
    }
}

/// The span of transcript time rendered, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderWindow {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl RenderWindow {
    /// Explicit start/end options win; otherwise the window runs from the first
    /// comment to one second past the last.
    pub fn resolve(options: &ChatRenderOptions, comments: &[Comment]) -> Result<Self> {
        let first = comments.first().map_or(0.0, |comment| comment.content_offset_seconds);
        let last = comments.last().map_or(0.0, |comment| comment.content_offset_seconds);
        let start_seconds = options.start_time.unwrap_or(first.max(0.0).floor());
        let end_seconds = options.end_time.unwrap_or(last.ceil() + 1.0);
        if end_seconds < start_seconds {
            bail!("render window ends at {end_seconds}s, before its start at {start_seconds}s");
        }
        Ok(Self {
            start_seconds,
            end_seconds,
        })
    }

    pub fn total_frames(&self, fps: u32) -> u64 {
        ((self.end_seconds - self.start_seconds) * f64::from(fps)).ceil() as u64
    }
}

/// Output files created up front and removed again unless the render commits.
#[derive(Debug)]
pub struct DestinationClaim {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl DestinationClaim {
    pub fn claim(paths: &[&Path]) -> Result<Self> {
        let mut claim = Self {
            paths: Vec::with_capacity(paths.len()),
            committed: false,
        };
        for path in paths {
            File::create(path).map_err(|error| {
                anyhow!(CodedError::fatal(
                    DESTINATION_UNAVAILABLE,
                    format!("cannot write output {}: {error}", path.display()),
                ))
            })?;
            claim.paths.push(path.to_path_buf());
        }
        Ok(claim)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn commit(mut self) -> Vec<PathBuf> {
        self.committed = true;
        std::mem::take(&mut self.paths)
    }
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed unfinished output"),
                Err(error) => warn!(path = %path.display(), %error, "failed to remove unfinished output"),
            }
        }
    }
}

/// Streams `total_frames` ticks into `sink` (and the alpha matte into `mask`). On
/// error or cancellation both sinks are aborted.
pub fn render_frames(
    pipeline: &mut FramePipeline,
    total_frames: u64,
    sink: &mut dyn FrameSink,
    mut mask: Option<&mut dyn FrameSink>,
    cancel: &CancellationToken,
    progress: &mut dyn ProgressReporter,
) -> Result<u64> {
    let result = drive_ticks(pipeline, total_frames, sink, mask.as_mut().map(|m| &mut **m as &mut dyn FrameSink), cancel, progress);
    match result {
        Ok(()) => {
            sink.finish().context("failed to finish video output")?;
            if let Some(mask) = mask {
                mask.finish().context("failed to finish mask output")?;
            }
            Ok(total_frames)
        }
        Err(error) => {
            sink.abort();
            if let Some(mask) = mask {
                mask.abort();
            }
            Err(error)
        }
    }
}

fn drive_ticks(
    pipeline: &mut FramePipeline,
    total_frames: u64,
    sink: &mut dyn FrameSink,
    mut mask: Option<&mut dyn FrameSink>,
    cancel: &CancellationToken,
    progress: &mut dyn ProgressReporter,
) -> Result<()> {
    let options = pipeline.assembler().options();
    let format = options.pixel_format;
    let fps = u64::from(options.framerate.max(1));
    let started = Instant::now();
    let mut bytes = Vec::new();

    for tick in 0..total_frames {
        if cancel.is_cancelled() {
            info!(tick, "render cancelled");
            return Err(anyhow!(CodedError::cancelled()));
        }
        pipeline.with_frame(tick, |frame| pixmap_to_bytes(frame, format, &mut bytes))?;
        sink.write_frame(&bytes)
            .with_context(|| format!("failed to write frame {tick}"))?;
        if let Some(mask) = mask.as_deref_mut() {
            let matte = pipeline.mask_frame(tick)?;
            pixmap_to_bytes(&matte, format, &mut bytes);
            mask.write_frame(&bytes)
                .with_context(|| format!("failed to write mask frame {tick}"))?;
        }

        let done = tick + 1;
        if done % fps == 0 || done == total_frames {
            let elapsed = started.elapsed();
            let remaining = (done < total_frames).then(|| {
                elapsed.mul_f64((total_frames - done) as f64 / done as f64)
            });
            progress.report(&Progress {
                frame: done,
                total_frames,
                percent: done as f64 * 100.0 / total_frames as f64,
                elapsed,
                remaining,
            });
        }
    }
    Ok(())
}

/// Preprocesses `comments` and builds the frame pipeline over them.
pub fn prepare_pipeline(
    options: &ChatRenderOptions,
    mut comments: Vec<Comment>,
    images: ImageCollections,
    mut fonts: Box<dyn FontProvider>,
) -> Result<(FramePipeline, RenderWindow)> {
    options.validate().map_err(|error| {
        anyhow!(CodedError::usage(INVALID_OPTIONS, format!("{error:#}")))
    })?;
    preprocess_comments(&mut comments, options)?;
    let window = RenderWindow::resolve(options, &comments)?;

    let images = Arc::new(ImageCache::prepare(images, options)?);
    let font_set = FontSet::resolve(fonts.as_mut(), options)?;
    let fallback = FontFallbackCache::new(fonts, Arc::clone(&font_set.message));
    let assembler = SectionAssembler::new(options.clone(), font_set, fallback, images);
    let pipeline = FramePipeline::new(assembler, comments, window.start_seconds)?;
    Ok((pipeline, window))
}

/// A full render to video files.
pub struct RenderJob {
    pub options: ChatRenderOptions,
    pub comments: Vec<Comment>,
    pub images: ImageCollections,
    pub fonts: Box<dyn FontProvider>,
    pub output: PathBuf,
    /// Defaults to `<output stem>_mask.<ext>` when masks are enabled.
    pub mask_output: Option<PathBuf>,
    pub ffmpeg_mode: FfmpegMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub frames: u64,
    pub window: RenderWindow,
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
}

pub fn default_mask_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chat".to_owned());
    let name = match output.extension() {
        Some(ext) => format!("{stem}_mask.{}", ext.to_string_lossy()),
        None => format!("{stem}_mask"),
    };
    output.with_file_name(name)
}

pub fn render_chat(
    job: RenderJob,
    cancel: &CancellationToken,
    progress: &mut dyn ProgressReporter,
) -> Result<RenderSummary> {
    let started = Instant::now();
    let RenderJob {
        options,
        comments,
        images,
        fonts,
        output,
        mask_output,
        ffmpeg_mode,
    } = job;

    let (mut pipeline, window) = prepare_pipeline(&options, comments, images, fonts)?;
    let total_frames = window.total_frames(options.framerate);
    let mask_output = options
        .generate_mask
        .then(|| mask_output.unwrap_or_else(|| default_mask_path(&output)));

    let mut destinations = vec![output.as_path()];
    destinations.extend(mask_output.as_deref());
    let claim = DestinationClaim::claim(&destinations)?;
    if cancel.is_cancelled() {
        info!("render cancelled before encoding");
        return Err(anyhow!(CodedError::cancelled()));
    }

    let program = resolve_program(&options.encoder.program, ffmpeg_mode)?;
    let settings = EncoderSettings {
        width: options.chat_width,
        height: options.chat_height,
        fps: options.framerate,
        pixel_format: options.pixel_format,
    };
    let args = encoder_args(&options.encoder, &options.encoder.output_args, &settings, &output)?;
    let mut video = FfmpegPipe::spawn(&program, args, &output)?;
    let mut mask = match mask_output.as_deref() {
        Some(path) => {
            let args = encoder_args(&options.encoder, &options.encoder.mask_output_args, &settings, path)?;
            Some(FfmpegPipe::spawn(&program, args, path)?)
        }
        None => None,
    };

    info!(
        comments = pipeline.comments().len(),
        start = window.start_seconds,
        end = window.end_seconds,
        frames = total_frames,
        output = %output.display(),
        "starting chat render"
    );
    let frames = render_frames(
        &mut pipeline,
        total_frames,
        &mut video,
        mask.as_mut().map(|mask| mask as &mut dyn FrameSink),
        cancel,
        progress,
    )?;

    let outputs = claim.commit();
    let elapsed = started.elapsed();
    info!(frames, elapsed_s = elapsed.as_secs_f64(), "chat render finished");
    Ok(RenderSummary {
        frames,
        window,
        outputs,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use std::sync::Arc;

    use super::{
        default_mask_path, render_chat, CancellationToken, DestinationClaim, Progress, RenderJob,
        RenderWindow,
    };
    use crate::comment::Comment;
    use crate::encoding::FfmpegMode;
    use crate::error_codes::{find_coded_error, DESTINATION_UNAVAILABLE, RENDER_CANCELLED};
    use crate::fonts::{BoxTypeface, FixedFontProvider};
    use crate::images::ImageCollections;
    use crate::options::ChatRenderOptions;

    fn comment(offset: f64) -> Comment {
        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        Comment::plain("1", offset, created, "alice", "Alice", "hi")
    }

    #[test]
    fn window_defaults_to_transcript_span() {
        let comments = vec![comment(2.0), comment(9.5)];
        let window = RenderWindow::resolve(&ChatRenderOptions::default(), &comments).expect("window");
        assert_eq!(window.start_seconds, 2.0);
        assert_eq!(window.end_seconds, 11.0);
        assert_eq!(window.total_frames(30), 270);

        let explicit = ChatRenderOptions {
            start_time: Some(0.0),
            end_time: Some(1.5),
            ..ChatRenderOptions::default()
        };
        let window = RenderWindow::resolve(&explicit, &comments).expect("window");
        assert_eq!(window.total_frames(30), 45);
    }

    #[test]
    fn unfinished_claims_are_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let video = dir.path().join("chat.mp4");
        let mask = default_mask_path(&video);
        assert_eq!(mask, dir.path().join("chat_mask.mp4"));

        let claim = DestinationClaim::claim(&[video.as_path(), mask.as_path()]).expect("claim");
        assert!(video.exists() && mask.exists());
        drop(claim);
        assert!(!video.exists() && !mask.exists());

        let claim = DestinationClaim::claim(&[video.as_path()]).expect("claim");
        let kept = claim.commit();
        assert_eq!(kept, vec![video.clone()]);
        assert!(video.exists());
    }

    #[test]
    fn unwritable_destination_is_coded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no/such/dir/chat.mp4");
        let error = DestinationClaim::claim(&[missing.as_path()]).expect_err("claim");
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(DESTINATION_UNAVAILABLE)
        );
    }

    #[test]
    fn repeated_cancel_is_reported() {
        let token = CancellationToken::new();
        assert!(!token.cancel_again());
        assert!(token.is_cancelled());
        assert!(token.clone().cancel_again());
    }

    #[test]
    fn cancelled_render_removes_claimed_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("chat.mp4");
        let job = RenderJob {
            options: ChatRenderOptions {
                generate_mask: true,
                ..ChatRenderOptions::default()
            },
            comments: vec![comment(0.0), comment(1.0)],
            images: ImageCollections::default(),
            fonts: Box::new(FixedFontProvider::new(Arc::new(BoxTypeface::new()))),
            output: output.clone(),
            mask_output: None,
            ffmpeg_mode: FfmpegMode::System,
        };
        let token = CancellationToken::new();
        token.cancel();

        let error = render_chat(job, &token, &mut |_: &Progress| {}).expect_err("cancelled");
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(RENDER_CANCELLED)
        );
        assert!(!output.exists());
        assert!(!default_mask_path(&output).exists());
    }
}
