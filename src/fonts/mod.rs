//! Typefaces and font fallback.
//!
//! Everything that draws text goes through [`Typeface`]: the fontdue/rustybuzz
//! backed [`FontdueTypeface`] for real fonts and [`BoxTypeface`] when no font file is
//! available (headless machines, tests). [`FontFallbackCache`] resolves characters
//! the message font cannot draw.

mod fallback;
mod fontdue_face;
mod system;

use std::ops::RangeInclusive;
use std::sync::Arc;

use anyhow::Result;
use tiny_skia::PathBuilder;

use crate::options::{ChatRenderOptions, FontStyle};

pub use fallback::FontFallbackCache;
pub use fontdue_face::FontdueTypeface;
pub use system::{FixedFontProvider, SystemFontProvider};

/// Coverage bitmap of one glyph, positioned relative to the pen on the baseline.
#[derive(Debug, Clone)]
pub struct GlyphRaster {
    /// Horizontal offset from the pen to the left edge.
    pub left: i32,
    /// Vertical offset from the baseline to the top row (y grows downwards).
    pub top: i32,
    pub width: usize,
    pub height: usize,
    pub coverage: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub ascent: f32,
    /// Negative below the baseline.
    pub descent: f32,
}

/// A glyph placed by shaping, in pixels relative to the run origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub glyph: u16,
    pub x: f32,
    pub y: f32,
    pub advance: f32,
}

pub trait Typeface: Send + Sync {
    fn family(&self) -> &str;

    /// Glyph id for `ch`, `0` when the face has no glyph.
    fn glyph_index(&self, ch: char) -> u16;

    fn advance(&self, glyph: u16, px: f32) -> f32;

    fn kerning(&self, _left: char, _right: char, _px: f32) -> f32 {
        0.0
    }

    fn line_metrics(&self, px: f32) -> LineMetrics;

    fn rasterize(&self, glyph: u16, px: f32) -> GlyphRaster;

    /// Shapes a run. The default places glyphs by advance, in visual order.
    fn shape(&self, text: &str, px: f32, rtl: bool) -> Vec<ShapedGlyph> {
        let mut chars = text.chars().collect::<Vec<_>>();
        if rtl {
            chars.reverse();
        }
        let mut pen = 0.0;
        chars
            .into_iter()
            .map(|ch| {
                let glyph = self.glyph_index(ch);
                let advance = self.advance(glyph, px);
                let shaped = ShapedGlyph {
                    glyph,
                    x: pen,
                    y: 0.0,
                    advance,
                };
                pen += advance;
                shaped
            })
            .collect()
    }

    /// Appends the glyph outline at `(x, y)` (baseline origin). Returns `false` when the
    /// face has no outline data.
    fn outline(&self, _glyph: u16, _px: f32, _x: f32, _y: f32, _path: &mut PathBuilder) -> bool {
        false
    }

    fn has_glyph(&self, ch: char) -> bool {
        self.glyph_index(ch) != 0
    }
}

/// Identity of a shared typeface, stable while the `Arc` lives.
pub fn typeface_key(face: &Arc<dyn Typeface>) -> usize {
    Arc::as_ptr(face) as *const u8 as usize
}

/// Monospaced face that draws every glyph as a solid box.
#[derive(Debug, Clone)]
pub struct BoxTypeface {
    family: String,
    advance_ratio: f32,
    missing: Vec<RangeInclusive<char>>,
}

impl BoxTypeface {
    pub fn new() -> Self {
        Self {
            family: "box".to_owned(),
            advance_ratio: 0.5,
            missing: Vec::new(),
        }
    }

    pub fn named(family: &str) -> Self {
        Self {
            family: family.to_owned(),
            ..Self::new()
        }
    }

    /// Characters in `range` report no glyph.
    pub fn without(mut self, range: RangeInclusive<char>) -> Self {
        self.missing.push(range);
        self
    }

    pub fn with_advance_ratio(mut self, ratio: f32) -> Self {
        self.advance_ratio = ratio;
        self
    }
}

impl Typeface for BoxTypeface {
    fn family(&self) -> &str {
        &self.family
    }

    fn glyph_index(&self, ch: char) -> u16 {
        if ch.is_control() || self.missing.iter().any(|range| range.contains(&ch)) {
            return 0;
        }
        if ch.is_whitespace() {
            2
        } else {
            1
        }
    }

    fn advance(&self, _glyph: u16, px: f32) -> f32 {
        (px * self.advance_ratio).round()
    }

    fn line_metrics(&self, px: f32) -> LineMetrics {
        LineMetrics {
            ascent: (px * 0.8).round(),
            descent: -(px * 0.2).round(),
        }
    }

    fn rasterize(&self, glyph: u16, px: f32) -> GlyphRaster {
        if glyph != 1 {
            return GlyphRaster {
                left: 0,
                top: 0,
                width: 0,
                height: 0,
                coverage: Vec::new(),
            };
        }
        let width = (self.advance(glyph, px) - 2.0).max(1.0) as usize;
        let height = (px * 0.7).round().max(1.0) as usize;
        GlyphRaster {
            left: 1,
            top: -(height as i32),
            width,
            height,
            coverage: vec![255; width * height],
        }
    }
}

/// Source of typefaces by family and by character coverage.
pub trait FontProvider: Send {
    fn family(&mut self, family: &str, style: FontStyle) -> Result<Arc<dyn Typeface>>;

    /// A face with a glyph for `ch`, if any font known to the provider has one.
    fn face_for_char(&mut self, ch: char) -> Option<Arc<dyn Typeface>>;
}

/// The two faces a comment is laid out with.
#[derive(Clone)]
pub struct FontSet {
    pub message: Arc<dyn Typeface>,
    pub username: Arc<dyn Typeface>,
}

impl FontSet {
    pub fn resolve(provider: &mut dyn FontProvider, options: &ChatRenderOptions) -> Result<Self> {
        let message = provider.family(&options.font_family, options.message_font_style)?;
        let username = if options.username_font_style == options.message_font_style {
            Arc::clone(&message)
        } else {
            provider.family(&options.font_family, options.username_font_style)?
        };
        Ok(Self { message, username })
    }

    pub fn uniform(face: Arc<dyn Typeface>) -> Self {
        Self {
            message: Arc::clone(&face),
            username: face,
        }
    }
}
