use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use tiny_skia::Pixmap;
use tracing::{debug, warn};

use crate::error_codes::{CodedError, ENCODER_SPAWN_FAILED};
use crate::options::{EncoderOptions, PixelFormat};

/// Receives raw frames in tick order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Flushes and closes the stream after the last frame.
    fn finish(&mut self) -> Result<()>;

    /// Stops the stream without completing it.
    fn abort(&mut self);
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Vec<u8>>,
    pub finished: bool,
    pub aborted: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.finished || self.aborted {
            bail!("frame written to a closed sink");
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// Writes `pixmap` into `out` as straight-alpha bytes in `format`.
pub fn pixmap_to_bytes(pixmap: &Pixmap, format: PixelFormat, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        match format {
            PixelFormat::Rgba => {
                out.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()])
            }
            PixelFormat::Bgra => {
                out.extend_from_slice(&[color.blue(), color.green(), color.red(), color.alpha()])
            }
        }
    }
}

/// Values substituted into encoder argument templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

pub fn expand_template(template: &str, settings: &EncoderSettings, save_path: &Path) -> String {
    template
        .replace("{fps}", &settings.fps.to_string())
        .replace("{width}", &settings.width.to_string())
        .replace("{height}", &settings.height.to_string())
        .replace("{pix_fmt}", settings.pixel_format.ffmpeg_name())
        .replace("{max_int}", &i32::MAX.to_string())
        .replace("{save_path}", &save_path.to_string_lossy())
}

/// Splits an argument string on whitespace, keeping double-quoted spans together.
pub fn split_args(command_line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    for ch in command_line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if started {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            ch => {
                current.push(ch);
                started = true;
            }
        }
    }
    if quoted {
        bail!("unterminated quote in encoder arguments: {command_line}");
    }
    if started {
        args.push(current);
    }
    Ok(args)
}

/// Full argument list for one output stream.
pub fn encoder_args(
    encoder: &EncoderOptions,
    output_template: &str,
    settings: &EncoderSettings,
    save_path: &Path,
) -> Result<Vec<String>> {
    let mut args = split_args(&expand_template(&encoder.input_args, settings, save_path))?;
    args.extend(split_args(&expand_template(output_template, settings, save_path))?);
    Ok(args)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegMode {
    Auto,
    System,
    Sidecar,
}

/// Encoder executable for `mode`.
pub fn resolve_program(program: &str, mode: FfmpegMode) -> Result<PathBuf> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(PathBuf::from(program)),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                let path = ffmpeg_sidecar::paths::ffmpeg_path();
                if !path.exists() {
                    ffmpeg_sidecar::download::auto_download()
                        .context("failed to auto-download ffmpeg sidecar binary")?;
                }
                Ok(path)
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but chatreel was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

/// An encoder child process fed raw frames over stdin from a writer thread.
pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Option<Child>,
    stderr: Option<ChildStderr>,
    description: String,
}

impl FfmpegPipe {
    pub fn spawn(program: &Path, args: Vec<String>, output_path: &Path) -> Result<Self> {
        let path_str = output_path.to_string_lossy();
        if path_str.len() > 1024 {
            bail!("Output path is suspiciously long");
        }
        if path_str.chars().any(|c| c.is_control()) {
            bail!("Output path contains invalid control characters");
        }

        let description = format!("{} {}", program.display(), args.join(" "));
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                let message = if error.kind() == ErrorKind::NotFound {
                    format!(
                        "encoder executable not found (resolved_path={}). Install ffmpeg or use sidecar mode with `--features sidecar_ffmpeg`.",
                        program.display()
                    )
                } else {
                    format!("failed to spawn encoder ({description}): {error}")
                };
                anyhow!(CodedError::fatal(ENCODER_SPAWN_FAILED, message))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture encoder stdin"))?;
        let stderr = child.stderr.take();
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let worker = thread::Builder::new()
            .name("chatreel-encoder-writer".to_owned())
            .spawn(move || -> Result<()> {
                while let Ok(frame) = receiver.recv() {
                    stdin
                        .write_all(&frame)
                        .context("failed to write frame to encoder stdin")?;
                }
                stdin.flush().context("failed to flush encoder stdin")?;
                Ok(())
            })
            .context("failed to spawn encoder writer thread")?;
        debug!(command = %description, output = %output_path.display(), "encoder started");

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            child: Some(child),
            stderr,
            description,
        })
    }

    fn join_worker(&mut self) -> Result<()> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("encoder writer thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl FrameSink for FfmpegPipe {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        sender
            .send(frame.to_vec())
            .map_err(|_| anyhow!("failed to enqueue frame for the encoder"))
    }

    fn finish(&mut self) -> Result<()> {
        let written = self.join_worker();
        let Some(mut child) = self.child.take() else {
            return written;
        };
        let status = child.wait().context("failed waiting for encoder process")?;
        let stderr_tail = read_stderr_tail(&mut self.stderr)?;
        if !status.success() {
            bail!(
                "encoder failed with status {status} (command='{}', stderr_tail='{}')",
                self.description,
                stderr_tail
            );
        }
        written
    }

    fn abort(&mut self) {
        drop(self.sender.take());
        if let Some(mut child) = self.child.take() {
            if let Err(error) = child.kill() {
                warn!(%error, "failed to kill encoder process");
            }
            let _ = child.wait();
        }
        if let Err(error) = self.join_worker() {
            debug!(%error, "encoder writer stopped after abort");
        }
    }
}

impl Drop for FfmpegPipe {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

fn read_stderr_tail(stderr: &mut Option<ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading encoder stderr")?;
    let text = String::from_utf8_lossy(&buf).to_string();
    Ok(last_n_chars(&text, 500))
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}
