//! Text measurement, line breaking, and glyph drawing onto section pixmaps.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tiny_skia::{LineCap, LineJoin, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Stroke, Transform};

use crate::fonts::{typeface_key, FontFallbackCache, GlyphRaster, ShapedGlyph, Typeface};
use crate::options::Rgba8;

/// Hebrew and Arabic blocks, including presentation forms.
fn is_rtl_char(ch: char) -> bool {
    matches!(ch as u32, 0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF)
}

/// Right-to-left iff the first character is Hebrew or Arabic.
pub fn is_rtl(text: &str) -> bool {
    text.chars().next().is_some_and(is_rtl_char)
}

/// True when any character of `text` is Hebrew or Arabic.
pub fn contains_rtl(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[\x{0590}-\x{08FF}\x{FB1D}-\x{FDFF}\x{FE70}-\x{FEFF}]").ok())
        .as_ref()
        .map_or_else(|| text.chars().any(is_rtl_char), |pattern| pattern.is_match(text))
}

/// Glyphs placed by advance and kerning, left to right.
fn direct_layout(face: &dyn Typeface, text: &str, px: f32) -> Vec<ShapedGlyph> {
    let mut glyphs = Vec::with_capacity(text.len());
    let mut pen = 0.0;
    let mut previous: Option<char> = None;
    for ch in text.chars() {
        if let Some(left) = previous {
            pen += face.kerning(left, ch, px);
        }
        let glyph = face.glyph_index(ch);
        let advance = face.advance(glyph, px);
        glyphs.push(ShapedGlyph {
            glyph,
            x: pen,
            y: 0.0,
            advance,
        });
        pen += advance;
        previous = Some(ch);
    }
    glyphs
}

/// Laid-out width of `text`. RTL text is shaped first.
pub fn measure(face: &dyn Typeface, text: &str, px: f32) -> f32 {
    if text.is_empty() {
        return 0.0;
    }
    if is_rtl(text) {
        return face.shape(text, px, true).iter().map(|glyph| glyph.advance).sum();
    }
    let mut width = 0.0;
    let mut previous: Option<char> = None;
    for ch in text.chars() {
        if let Some(left) = previous {
            width += face.kerning(left, ch, px);
        }
        width += face.advance(face.glyph_index(ch), px);
        previous = Some(ch);
    }
    width
}

/// Byte length of the longest prefix of `text` that fits in `max_width`. When
/// `delimiters` is non-empty the cut backs up to just after the last delimiter in the
/// prefix, if there is one.
pub fn substring_to_width(
    face: &dyn Typeface,
    text: &str,
    px: f32,
    max_width: f32,
    delimiters: &[char],
) -> usize {
    if text.is_empty() || max_width <= 0.0 {
        return 0;
    }

    if delimiters.is_empty() && !is_rtl(text) {
        let mut width = 0.0;
        let mut previous: Option<char> = None;
        for (index, ch) in text.char_indices() {
            if let Some(left) = previous {
                width += face.kerning(left, ch, px);
            }
            width += face.advance(face.glyph_index(ch), px);
            if width > max_width {
                return index;
            }
            previous = Some(ch);
        }
        return text.len();
    }

    let boundaries = text
        .char_indices()
        .map(|(index, _)| index)
        .skip(1)
        .chain(std::iter::once(text.len()))
        .collect::<Vec<_>>();
    let prefix = |count: usize| {
        if count == 0 {
            ""
        } else {
            &text[..boundaries[count - 1]]
        }
    };

    let mut count = boundaries.len();
    while count > 0 && measure(face, prefix(count), px) > max_width {
        count /= 2;
    }
    while count < boundaries.len() && measure(face, prefix(count + 1), px) <= max_width {
        count += 1;
    }
    if count == boundaries.len() {
        return text.len();
    }

    let candidate = prefix(count);
    match candidate
        .char_indices()
        .rfind(|(index, ch)| *index > 0 && delimiters.contains(ch))
    {
        Some((index, ch)) => index + ch.len_utf8(),
        None => candidate.len(),
    }
}

/// Splits `text` on spaces and reverses each run of consecutive right-to-left
/// tokens, giving visual word order for mixed-direction messages. Empty tokens from
/// repeated spaces are dropped.
pub fn reorder_rtl_runs(text: &str) -> Vec<&str> {
    let mut ordered = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    for token in text.split(' ').filter(|token| !token.is_empty()) {
        if is_rtl(token) {
            stack.push(token);
            continue;
        }
        while let Some(rtl) = stack.pop() {
            ordered.push(rtl);
        }
        ordered.push(token);
    }
    while let Some(rtl) = stack.pop() {
        ordered.push(rtl);
    }
    ordered
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outline {
    pub color: Rgba8,
    pub width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: Rgba8,
    pub px: f32,
    pub outline: Option<Outline>,
    /// Filled behind the text across the full line height.
    pub highlight: Option<Rgba8>,
    /// Added to the returned advance after the text.
    pub spacing: f32,
}

impl TextStyle {
    pub fn new(color: Rgba8, px: f32) -> Self {
        Self {
            color,
            px,
            outline: None,
            highlight: None,
            spacing: 0.0,
        }
    }

    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_outline(mut self, outline: Option<Outline>) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_highlight(mut self, highlight: Option<Rgba8>) -> Self {
        self.highlight = highlight;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GlyphKey {
    face: usize,
    glyph: u16,
    px_bits: u32,
}

/// Draws text onto pixmaps, caching rasterized glyphs per face and size.
pub struct TextPainter {
    glyphs: HashMap<GlyphKey, Arc<GlyphRaster>>,
    fallback: FontFallbackCache,
}

impl TextPainter {
    pub fn new(fallback: FontFallbackCache) -> Self {
        Self {
            glyphs: HashMap::new(),
            fallback,
        }
    }

    /// Face able to draw `ch`, through the fallback cache.
    pub fn fallback_face(&mut self, ch: char) -> Arc<dyn Typeface> {
        self.fallback.face_for(ch)
    }

    pub fn cached_glyphs(&self) -> usize {
        self.glyphs.len()
    }

    fn raster(&mut self, face: &Arc<dyn Typeface>, glyph: u16, px: f32) -> Arc<GlyphRaster> {
        let key = GlyphKey {
            face: typeface_key(face),
            glyph,
            px_bits: px.to_bits(),
        };
        Arc::clone(
            self.glyphs
                .entry(key)
                .or_insert_with(|| Arc::new(face.rasterize(glyph, px))),
        )
    }

    /// Draws `text` with its pen at `x` on `baseline`. Returns the advance: the
    /// measured width plus `style.spacing`, or `0.0` for empty text.
    pub fn draw_text(
        &mut self,
        canvas: &mut Pixmap,
        face: &Arc<dyn Typeface>,
        text: &str,
        x: f32,
        baseline: f32,
        style: &TextStyle,
    ) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        let rtl = is_rtl(text);
        let width = measure(face.as_ref(), text, style.px);

        if let Some(highlight) = style.highlight {
            fill_rect(canvas, x, 0.0, width, canvas.height() as f32, highlight);
        }

        let shaped = rtl || contains_rtl(text);
        let glyphs = if shaped {
            face.shape(text, style.px, rtl)
        } else {
            direct_layout(face.as_ref(), text, style.px)
        };

        if let Some(outline) = style.outline.filter(|outline| outline.width > 0.0) {
            let mut builder = PathBuilder::new();
            let mut any = false;
            for glyph in &glyphs {
                any |= face.outline(glyph.glyph, style.px, x + glyph.x, baseline + glyph.y, &mut builder);
            }
            if any {
                if let Some(path) = builder.finish() {
                    let mut paint = Paint::default();
                    paint.set_color(outline.color.to_skia());
                    paint.anti_alias = true;
                    let stroke = Stroke {
                        width: outline.width,
                        line_join: LineJoin::Round,
                        line_cap: LineCap::Round,
                        ..Stroke::default()
                    };
                    canvas.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
        }

        for glyph in &glyphs {
            let raster = self.raster(face, glyph.glyph, style.px);
            blend_glyph(
                canvas,
                (x + glyph.x).round() as i32 + raster.left,
                (baseline + glyph.y).round() as i32 + raster.top,
                &raster,
                style.color,
            );
        }

        width + style.spacing
    }
}

/// Source-over blends a coverage mask tinted with `color` onto a premultiplied pixmap.
pub fn blend_glyph(pixmap: &mut Pixmap, x: i32, y: i32, glyph: &GlyphRaster, color: Rgba8) {
    let frame_width = pixmap.width() as i32;
    let frame_height = pixmap.height() as i32;
    let pixels = pixmap.pixels_mut();
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height {
            continue;
        }
        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width {
                continue;
            }
            let mask = glyph.coverage[row * glyph.width + col];
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color.a)) / 255) as u8;
            let idx = (py * frame_width + px) as usize;
            pixels[idx] = blend_pixel(pixels[idx], color.with_alpha(alpha));
        }
    }
}

fn blend_pixel(dst: PremultipliedColorU8, src: Rgba8) -> PremultipliedColorU8 {
    let alpha = u16::from(src.a);
    if alpha == 0 {
        return dst;
    }
    let inv_alpha = 255_u16.saturating_sub(alpha);
    let over = |src_c: u8, dst_c: u8| -> u8 {
        ((u16::from(src_c) * alpha + u16::from(dst_c) * inv_alpha + 127) / 255) as u8
    };
    let out_alpha = (alpha + (u16::from(dst.alpha()) * inv_alpha + 127) / 255).min(255) as u8;
    let r = over(src.r, dst.red()).min(out_alpha);
    let g = over(src.g, dst.green()).min(out_alpha);
    let b = over(src.b, dst.blue()).min(out_alpha);
    PremultipliedColorU8::from_rgba(r, g, b, out_alpha).unwrap_or(dst)
}

pub fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, width: f32, height: f32, color: Rgba8) {
    if color.a == 0 {
        return;
    }
    let Some(rect) = Rect::from_xywh(x, y, width, height) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
}
