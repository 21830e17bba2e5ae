use anyhow::{anyhow, Result};
use fontdue::{Font, FontSettings};
use rustybuzz::ttf_parser;
use tiny_skia::PathBuilder;

use super::{GlyphRaster, LineMetrics, ShapedGlyph, Typeface};

/// A font file rasterized with fontdue and shaped with rustybuzz.
pub struct FontdueTypeface {
    family: String,
    font: Font,
    /// Parsed once at load; `None` when rustybuzz cannot read the face.
    shaping: Option<rustybuzz::Face<'static>>,
}

impl FontdueTypeface {
    /// Parses `data` for rasterizing and shaping. The bytes are leaked to `'static`
    /// for the parsed face; providers load each font file at most once.
    pub fn from_bytes(family: &str, data: Vec<u8>, index: u32) -> Result<Self> {
        let font = Font::from_bytes(
            data.as_slice(),
            FontSettings {
                collection_index: index,
                ..FontSettings::default()
            },
        )
        .map_err(|error| anyhow!("failed to parse font '{family}': {error}"))?;
        let data: &'static [u8] = Box::leak(data.into_boxed_slice());
        let shaping = rustybuzz::Face::from_slice(data, index);
        Ok(Self {
            family: family.to_owned(),
            font,
            shaping,
        })
    }

    fn units_scale(&self, face_units_per_em: f32, px: f32) -> f32 {
        if face_units_per_em <= 0.0 {
            return 0.0;
        }
        px / face_units_per_em
    }
}

impl Typeface for FontdueTypeface {
    fn family(&self) -> &str {
        &self.family
    }

    fn glyph_index(&self, ch: char) -> u16 {
        self.font.lookup_glyph_index(ch)
    }

    fn advance(&self, glyph: u16, px: f32) -> f32 {
        self.font.metrics_indexed(glyph, px).advance_width
    }

    fn kerning(&self, left: char, right: char, px: f32) -> f32 {
        self.font.horizontal_kern(left, right, px).unwrap_or(0.0)
    }

    fn line_metrics(&self, px: f32) -> LineMetrics {
        match self.font.horizontal_line_metrics(px) {
            Some(metrics) => LineMetrics {
                ascent: metrics.ascent,
                descent: metrics.descent,
            },
            None => LineMetrics {
                ascent: px * 0.8,
                descent: -px * 0.2,
            },
        }
    }

    fn rasterize(&self, glyph: u16, px: f32) -> GlyphRaster {
        let (metrics, coverage) = self.font.rasterize_indexed(glyph, px);
        GlyphRaster {
            left: metrics.xmin,
            top: -(metrics.ymin + metrics.height as i32),
            width: metrics.width,
            height: metrics.height,
            coverage,
        }
    }

    fn shape(&self, text: &str, px: f32, rtl: bool) -> Vec<ShapedGlyph> {
        let Some(face) = self.shaping.as_ref() else {
            return default_shape(self, text, px, rtl);
        };
        let scale = self.units_scale(face.units_per_em() as f32, px);

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.guess_segment_properties();
        buffer.set_direction(if rtl {
            rustybuzz::Direction::RightToLeft
        } else {
            rustybuzz::Direction::LeftToRight
        });
        let output = rustybuzz::shape(face, &[], buffer);

        let mut pen = 0.0;
        output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, position)| {
                let advance = position.x_advance as f32 * scale;
                let shaped = ShapedGlyph {
                    glyph: info.glyph_id as u16,
                    x: pen + position.x_offset as f32 * scale,
                    y: -(position.y_offset as f32 * scale),
                    advance,
                };
                pen += advance;
                shaped
            })
            .collect()
    }

    fn outline(&self, glyph: u16, px: f32, x: f32, y: f32, path: &mut PathBuilder) -> bool {
        let Some(face) = self.shaping.as_ref() else {
            return false;
        };
        let scale = self.units_scale(face.units_per_em() as f32, px);
        let mut sink = OutlineSink {
            path,
            scale,
            x,
            y,
        };
        face.outline_glyph(ttf_parser::GlyphId(glyph), &mut sink)
            .is_some()
    }
}

fn default_shape(face: &FontdueTypeface, text: &str, px: f32, rtl: bool) -> Vec<ShapedGlyph> {
    let mut chars = text.chars().collect::<Vec<_>>();
    if rtl {
        chars.reverse();
    }
    let mut pen = 0.0;
    chars
        .into_iter()
        .map(|ch| {
            let glyph = face.glyph_index(ch);
            let advance = face.advance(glyph, px);
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

/// Maps font units (y up) onto pixel space (y down) at a baseline origin.
struct OutlineSink<'a> {
    path: &'a mut PathBuilder,
    scale: f32,
    x: f32,
    y: f32,
}

impl OutlineSink<'_> {
    fn map(&self, fx: f32, fy: f32) -> (f32, f32) {
        (self.x + fx * self.scale, self.y - fy * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for OutlineSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.path.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.path.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.path.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.path.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.path.close();
    }
}
