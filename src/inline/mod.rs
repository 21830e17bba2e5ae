//! Inline elements: timestamps, avatars, badges, emotes and text runs. Each one
//! measures itself, asks [`SectionLayout`] whether to wrap, then draws onto the
//! bound canvas.

pub mod avatar;
pub mod badge;
pub mod emote;
pub mod timestamp;
pub mod username;

use std::sync::Arc;

use anyhow::Result;
use tiny_skia::{Pixmap, PixmapPaint, Transform};

use crate::bitmap_cache::BitmapCache;
use crate::drawing::{DrawingState, SectionLayout};
use crate::emoji::EmojiTable;
use crate::fonts::{FontSet, Typeface};
use crate::geometry::Geometry;
use crate::images::ImageCache;
use crate::options::{ChatRenderOptions, Rgba8};
use crate::text::{measure, substring_to_width, Outline, TextPainter, TextStyle};

/// Everything a renderer reads plus the two caches it writes, borrowed for the
/// layout of one comment.
pub struct InlineContext<'a> {
    pub options: &'a ChatRenderOptions,
    pub geometry: &'a Geometry,
    pub layout: &'a SectionLayout,
    pub fonts: &'a FontSet,
    pub images: &'a ImageCache,
    pub emoji: &'a EmojiTable,
    pub painter: &'a mut TextPainter,
    pub bitmaps: &'a mut BitmapCache,
}

impl InlineContext<'_> {
    /// Message text style in `color`, with the configured outline.
    pub fn text_style(&self, color: Rgba8) -> TextStyle {
        let outline = self.options.outline.then_some(Outline {
            color: self.options.outline_color,
            width: self.options.outline_size,
        });
        TextStyle::new(color, self.options.font_size).with_outline(outline)
    }

    /// Draws one run of text that must stay in `face`, wrapping before it when it
    /// does not fit. A run wider than a whole line is broken across lines.
    pub fn draw_run(
        &mut self,
        state: &mut DrawingState,
        face: &Arc<dyn Typeface>,
        text: &str,
        style: &TextStyle,
    ) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let width = measure(face.as_ref(), text, style.px);
        let line_width = self.layout.max_x - state.default_x;
        if width <= line_width {
            self.layout.wrap_for(state, &mut self.bitmaps.pool, width)?;
            let (x, baseline) = (state.x, self.geometry.baseline_y);
            let canvas = self.layout.ensure_canvas(state, &mut self.bitmaps.pool)?;
            let advance = self.painter.draw_text(canvas, face, text, x, baseline, style);
            state.x += advance;
            return Ok(());
        }

        let mut rest = text;
        while !rest.is_empty() {
            let mut room = self.layout.remaining(state);
            let mut cut = substring_to_width(face.as_ref(), rest, style.px, room, &[]);
            if cut == 0 && state.x > state.default_x {
                self.layout.new_line(state, &mut self.bitmaps.pool)?;
                room = self.layout.remaining(state);
                cut = substring_to_width(face.as_ref(), rest, style.px, room, &[]);
            }
            if cut == 0 {
                cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            let (head, tail) = rest.split_at(cut);
            let (x, baseline) = (state.x, self.geometry.baseline_y);
            let canvas = self.layout.ensure_canvas(state, &mut self.bitmaps.pool)?;
            let advance = self.painter.draw_text(canvas, face, head, x, baseline, style);
            state.x += advance;
            rest = tail;
            if !rest.is_empty() {
                self.layout.new_line(state, &mut self.bitmaps.pool)?;
            }
        }
        Ok(())
    }

    /// Draws a still image vertically centered in the line at the cursor, wrapping
    /// first when needed. Returns the x it was drawn at.
    pub fn draw_image(&mut self, state: &mut DrawingState, image: &Pixmap) -> Result<f32> {
        self.layout
            .wrap_for(state, &mut self.bitmaps.pool, image.width() as f32)?;
        let x = state.x;
        let y = centered_y(self.geometry.section_height, image.height());
        let canvas = self.layout.ensure_canvas(state, &mut self.bitmaps.pool)?;
        draw_pixmap(canvas, image, x, y);
        state.x += image.width() as f32;
        Ok(x)
    }
}

/// Top of an element `height` tall centered in a line.
pub fn centered_y(section_height: u32, height: u32) -> f32 {
    ((section_height as f32 - height as f32) / 2.0).round()
}

pub fn draw_pixmap(canvas: &mut Pixmap, image: &Pixmap, x: f32, y: f32) {
    canvas.draw_pixmap(
        x.round() as i32,
        y.round() as i32,
        image.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::bitmap_cache::BitmapCache;
    use crate::drawing::SectionLayout;
    use crate::emoji::EmojiTable;
    use crate::fonts::{BoxTypeface, FixedFontProvider, FontFallbackCache, FontSet, Typeface};
    use crate::geometry::Geometry;
    use crate::images::ImageCache;
    use crate::options::ChatRenderOptions;
    use crate::text::TextPainter;

    use super::InlineContext;

    /// Owned pieces of an [`InlineContext`] over the box typeface.
    pub struct Fixture {
        pub options: ChatRenderOptions,
        pub geometry: Geometry,
        pub layout: SectionLayout,
        pub fonts: FontSet,
        pub images: ImageCache,
        pub emoji: EmojiTable,
        pub painter: TextPainter,
        pub bitmaps: BitmapCache,
    }

    impl Fixture {
        pub fn new(options: ChatRenderOptions, images: ImageCache) -> Self {
            let face: Arc<dyn Typeface> = Arc::new(BoxTypeface::new());
            let fonts = FontSet::uniform(Arc::clone(&face));
            let mut painter = TextPainter::new(FontFallbackCache::new(
                Box::new(FixedFontProvider::new(Arc::clone(&face))),
                face,
            ));
            let geometry = Geometry::new(&options, &fonts, &mut painter);
            let layout = SectionLayout::new(&geometry);
            let emoji = EmojiTable::from_keys(images.emoji_keys());
            Self {
                options,
                geometry,
                layout,
                fonts,
                images,
                emoji,
                painter,
                bitmaps: BitmapCache::new(),
            }
        }

        pub fn context(&mut self) -> InlineContext<'_> {
            InlineContext {
                options: &self.options,
                geometry: &self.geometry,
                layout: &self.layout,
                fonts: &self.fonts,
                images: &self.images,
                emoji: &self.emoji,
                painter: &mut self.painter,
                bitmaps: &mut self.bitmaps,
            }
        }
    }
}
