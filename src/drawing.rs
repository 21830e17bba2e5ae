//! Per-comment layout cursor and the line operations every renderer shares.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tiny_skia::Pixmap;

use crate::bitmap_cache::SurfacePool;
use crate::geometry::Geometry;
use crate::images::TwitchEmote;

/// An animated emote to redraw every tick, positioned in comment coordinates.
#[derive(Debug, Clone)]
pub struct EmotePlacement {
    pub x: f32,
    pub y: f32,
    pub emote: Arc<TwitchEmote>,
}

/// Where the last emote was drawn, for zero-width emotes stacked on top of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmoteSlot {
    pub x: f32,
    pub width: f32,
    pub line: usize,
}

/// Layout cursor for one comment. Holds one pixmap per line; the bound canvas is
/// always the last line and exists whenever a line does.
pub struct DrawingState {
    pub x: f32,
    /// Where new lines start. Raised by accent layouts that indent continuation lines.
    pub default_x: f32,
    pub line_height: f32,
    pub last_emote: Option<EmoteSlot>,
    sections: Vec<Pixmap>,
    canvas: Option<usize>,
    placements: Vec<EmotePlacement>,
}

impl DrawingState {
    pub fn new(line_start_x: f32, line_height: f32) -> Self {
        Self {
            x: line_start_x,
            default_x: line_start_x,
            line_height,
            last_emote: None,
            sections: Vec::new(),
            canvas: None,
            placements: Vec::new(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.sections.len()
    }

    /// Index of the line being drawn.
    pub fn line_index(&self) -> usize {
        self.canvas.unwrap_or(0)
    }

    pub fn has_canvas(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn sections(&self) -> &[Pixmap] {
        &self.sections
    }

    /// Records an animated emote drawn at `(x, y)` within the current line.
    pub fn record_emote(&mut self, x: f32, y: f32, emote: Arc<TwitchEmote>) {
        let top = self.line_index() as f32 * self.line_height;
        self.placements.push(EmotePlacement {
            x,
            y: top + y,
            emote,
        });
    }

    pub fn placements(&self) -> &[EmotePlacement] {
        &self.placements
    }

    pub fn into_parts(self) -> (Vec<Pixmap>, Vec<EmotePlacement>) {
        (self.sections, self.placements)
    }
}

/// Line-wrap and canvas operations, shared by every inline renderer. Built before
/// any renderer and borrowed by all of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionLayout {
    pub width: u32,
    pub height: u32,
    pub line_start_x: f32,
    pub max_x: f32,
}

impl SectionLayout {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            width: geometry.section_width,
            height: geometry.section_height,
            line_start_x: geometry.line_start_x,
            max_x: geometry.max_x,
        }
    }

    /// A cursor with its first line bound.
    pub fn begin(&self, pool: &mut SurfacePool) -> Result<DrawingState> {
        let mut state = DrawingState::new(self.line_start_x, self.height as f32);
        self.ensure_canvas(&mut state, pool)?;
        Ok(state)
    }

    /// Whether an element `width` wide would cross the right edge. An element at the
    /// start of a line never wraps.
    pub fn needs_wrap(&self, state: &DrawingState, width: f32) -> bool {
        state.x > state.default_x && state.x + width > self.max_x
    }

    pub fn remaining(&self, state: &DrawingState) -> f32 {
        (self.max_x - state.x).max(0.0)
    }

    pub fn new_line(&self, state: &mut DrawingState, pool: &mut SurfacePool) -> Result<()> {
        state.sections.push(pool.borrow(self.width, self.height)?);
        state.canvas = Some(state.sections.len() - 1);
        state.x = state.default_x;
        state.last_emote = None;
        Ok(())
    }

    /// Starts a new line when `width` does not fit on the current one.
    pub fn wrap_for(
        &self,
        state: &mut DrawingState,
        pool: &mut SurfacePool,
        width: f32,
    ) -> Result<()> {
        if self.needs_wrap(state, width) {
            self.new_line(state, pool)?;
        }
        Ok(())
    }

    /// The bound canvas, binding a first line when none exists yet.
    pub fn ensure_canvas<'s>(
        &self,
        state: &'s mut DrawingState,
        pool: &mut SurfacePool,
    ) -> Result<&'s mut Pixmap> {
        if state.canvas.is_none() {
            state.sections.push(pool.borrow(self.width, self.height)?);
            state.canvas = Some(state.sections.len() - 1);
        }
        let index = state.canvas.unwrap_or_default();
        state
            .sections
            .get_mut(index)
            .ok_or_else(|| anyhow!("drawing canvas {index} is not bound"))
    }
}

#[cfg(test)]
mod tests {
    use super::SectionLayout;
    use crate::bitmap_cache::SurfacePool;

    fn layout() -> SectionLayout {
        SectionLayout {
            width: 100,
            height: 20,
            line_start_x: 4.0,
            max_x: 96.0,
        }
    }

    #[test]
    fn begin_binds_first_line() {
        let mut pool = SurfacePool::default();
        let state = layout().begin(&mut pool).expect("begin");
        assert!(state.has_canvas());
        assert_eq!(state.line_count(), 1);
        assert_eq!(state.x, 4.0);
    }

    #[test]
    fn wraps_only_after_line_start() {
        let layout = layout();
        let mut pool = SurfacePool::default();
        let mut state = layout.begin(&mut pool).expect("begin");
        assert!(!layout.needs_wrap(&state, 500.0));
        state.x = 80.0;
        assert!(layout.needs_wrap(&state, 17.0));
        assert!(!layout.needs_wrap(&state, 16.0));

        layout.wrap_for(&mut state, &mut pool, 17.0).expect("wrap");
        assert_eq!(state.line_count(), 2);
        assert_eq!(state.line_index(), 1);
        assert_eq!(state.x, 4.0);
    }

    #[test]
    fn emote_positions_are_comment_relative() {
        let layout = layout();
        let mut pool = SurfacePool::default();
        let mut state = layout.begin(&mut pool).expect("begin");
        layout.new_line(&mut state, &mut pool).expect("new line");
        let emote = std::sync::Arc::new(crate::images::TwitchEmote::new_static(
            "1",
            "x",
            tiny_skia::Pixmap::new(2, 2).expect("pixmap"),
            1.0,
        ));
        state.record_emote(10.0, 3.0, emote);
        assert_eq!(state.placements()[0].y, 23.0);
    }
}
