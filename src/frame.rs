//! Frame assembly: keeps a base frame of the visible comments, rebuilds it only when
//! the newest visible comment changes, and draws animated emotes on top every tick.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tiny_skia::Pixmap;
use tracing::{debug, trace};

use crate::comment::Comment;
use crate::inline::draw_pixmap;
use crate::section::{CommentSection, SectionAssembler};

/// The cached base frame and the sections painted into it.
pub struct UpdateFrame {
    pub base: Pixmap,
    /// Visible sections, oldest first.
    pub window: VecDeque<CommentSection>,
    /// Top edge of each window section in the frame, aligned with `window`.
    pub tops: Vec<f32>,
    /// Index of the newest comment at or before the current update time.
    pub newest: Option<usize>,
}

pub struct FramePipeline {
    assembler: SectionAssembler,
    comments: Vec<Comment>,
    frame: UpdateFrame,
    built: bool,
    scratch: Mutex<Pixmap>,
    fps: u32,
    interval_ticks: u64,
    lookback: usize,
    start_seconds: f64,
    /// `start_seconds` on the absolute tick grid that update ticks align to.
    start_tick: i64,
}

impl FramePipeline {
    /// `comments` must be preprocessed (non-decreasing offsets). Tick 0 is
    /// `start_seconds` on the transcript clock.
    pub fn new(assembler: SectionAssembler, comments: Vec<Comment>, start_seconds: f64) -> Result<Self> {
        let options = assembler.options();
        let (width, height) = (options.chat_width, options.chat_height);
        let blank = || {
            Pixmap::new(width, height)
                .ok_or_else(|| anyhow!("failed to allocate {width}x{height} frame"))
        };
        let fps = options.framerate.max(1);
        let interval_ticks = options.update_interval_ticks();
        let lookback = options.cold_start_lookback.max(1);
        Ok(Self {
            frame: UpdateFrame {
                base: blank()?,
                window: VecDeque::new(),
                tops: Vec::new(),
                newest: None,
            },
            scratch: Mutex::new(blank()?),
            assembler,
            comments,
            built: false,
            fps,
            interval_ticks,
            lookback,
            start_seconds,
            start_tick: (start_seconds * f64::from(fps)).round() as i64,
        })
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn update_frame(&self) -> &UpdateFrame {
        &self.frame
    }

    pub fn assembler(&self) -> &SectionAssembler {
        &self.assembler
    }

    /// Transcript time, in seconds, of `tick`.
    pub fn tick_seconds(&self, tick: u64) -> f64 {
        self.start_seconds + tick as f64 / f64::from(self.fps)
    }

    /// Animation clock in milliseconds at `tick`.
    pub fn elapsed_ms(&self, tick: u64) -> u64 {
        (self.tick_seconds(tick).max(0.0) * 1000.0) as u64
    }

    /// Index of the newest comment shown at `tick`. Layout only refreshes on update
    /// ticks, counted from transcript time zero, so ticks between two updates share
    /// a result whatever the window start.
    pub fn newest_index_at(&self, tick: u64) -> Option<usize> {
        let absolute = self.start_tick.saturating_add(tick as i64);
        let update_tick = absolute - absolute.rem_euclid(self.interval_ticks as i64);
        let time = update_tick as f64 / f64::from(self.fps);
        self.comments
            .partition_point(|comment| comment.content_offset_seconds <= time)
            .checked_sub(1)
    }

    /// Brings the base frame up to date for `tick`. Returns whether it was rebuilt.
    pub fn update(&mut self, tick: u64) -> Result<bool> {
        let newest = self.newest_index_at(tick);
        if self.built && newest == self.frame.newest {
            return Ok(false);
        }
        self.regenerate(newest)?;
        self.built = true;
        Ok(true)
    }

    /// Rebuilds the window ending at `newest`, reusing sections already laid out and
    /// laying out at most `lookback` comments back from it.
    fn regenerate(&mut self, newest: Option<usize>) -> Result<()> {
        let options = self.assembler.options();
        let frame_height = options.chat_height as f32;
        let padding = options.vertical_padding;
        let background = options.background_color;

        let mut previous = std::mem::take(&mut self.frame.window);
        let mut window = VecDeque::new();
        let mut assembled = 0usize;
        if let Some(newest) = newest {
            let oldest = (newest + 1).saturating_sub(self.lookback);
            let mut filled = 0.0f32;
            for index in (oldest..=newest).rev() {
                let reused = previous
                    .iter()
                    .position(|section| section.comment_index == index)
                    .and_then(|position| previous.remove(position));
                let section = match reused {
                    Some(section) => Some(section),
                    None => {
                        assembled += 1;
                        self.assembler.assemble(&self.comments[index], index)?
                    }
                };
                let Some(section) = section else {
                    continue;
                };
                filled += section.height() as f32 + padding;
                window.push_front(section);
                if filled > frame_height + padding {
                    break;
                }
            }
        }
        for stale in previous {
            self.assembler.recycle(stale);
        }

        let base = &mut self.frame.base;
        base.fill(background.to_skia());
        let mut tops = vec![0.0; window.len()];
        let mut bottom = frame_height;
        for (slot, section) in window.iter().enumerate().rev() {
            let top = bottom - section.height() as f32;
            draw_pixmap(base, &section.image, 0.0, top);
            tops[slot] = top;
            bottom = top - padding;
        }

        debug!(
            newest = ?newest,
            visible = window.len(),
            assembled,
            "regenerated update frame"
        );
        self.frame.window = window;
        self.frame.tops = tops;
        self.frame.newest = newest;
        Ok(())
    }

    /// Draws the current frame of every animated emote in the window.
    fn draw_overlays(frame: &UpdateFrame, target: &mut Pixmap, elapsed_ms: u64) {
        for (section, top) in frame.window.iter().zip(&frame.tops) {
            for placement in &section.emotes {
                let image = placement.emote.frame_at(elapsed_ms);
                draw_pixmap(target, image, placement.x, top + placement.y);
            }
        }
    }

    /// Composites the frame for `tick` into the shared scratch buffer and hands it
    /// to `f`. The base frame is left untouched.
    pub fn with_frame<R>(&mut self, tick: u64, f: impl FnOnce(&Pixmap) -> R) -> Result<R> {
        self.update(tick)?;
        let elapsed_ms = self.elapsed_ms(tick);
        let mut scratch = self
            .scratch
            .lock()
            .map_err(|_| anyhow!("frame scratch buffer lock poisoned"))?;
        scratch.data_mut().copy_from_slice(self.frame.base.data());
        Self::draw_overlays(&self.frame, &mut scratch, elapsed_ms);
        trace!(tick, elapsed_ms, "composited frame");
        Ok(f(&scratch))
    }

    /// The alpha matte of the frame for `tick`: every pixel becomes
    /// `(a, a, a, 255)`. Composited on a private copy.
    pub fn mask_frame(&mut self, tick: u64) -> Result<Pixmap> {
        self.update(tick)?;
        let mut mask = self.frame.base.clone();
        Self::draw_overlays(&self.frame, &mut mask, self.elapsed_ms(tick));
        for pixel in mask.data_mut().chunks_exact_mut(4) {
            let alpha = pixel[3];
            pixel.copy_from_slice(&[alpha, alpha, alpha, 255]);
        }
        Ok(mask)
    }
}
