use crate::fonts::FontSet;
use crate::options::{ChatRenderOptions, TimestampFormat};
use crate::text::{measure, TextPainter};

const BLOCK_GLYPH: char = '\u{2588}';

/// Fixed layout geometry, derived once per render.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub section_width: u32,
    pub section_height: u32,
    /// Baseline of text within one section, centering the message font's line box.
    pub baseline_y: f32,
    /// Advance of a full block (`█`), the unit block-art tokens are wrapped in.
    pub block_glyph_width: f32,
    pub line_start_x: f32,
    pub max_x: f32,
    timestamp_columns: Vec<(String, f32)>,
}

impl Geometry {
    pub fn new(options: &ChatRenderOptions, fonts: &FontSet, painter: &mut TextPainter) -> Self {
        let px = options.font_size;
        let section_height = options.section_height();
        let metrics = fonts.message.line_metrics(px);
        let text_height = metrics.ascent - metrics.descent;
        let baseline_y = ((section_height as f32 - text_height) / 2.0 + metrics.ascent).round();

        let block_face = if fonts.message.has_glyph(BLOCK_GLYPH) {
            fonts.message.clone()
        } else {
            painter.fallback_face(BLOCK_GLYPH)
        };
        let block_glyph_width = measure(block_face.as_ref(), &BLOCK_GLYPH.to_string(), px);

        let templates: &[&str] = match options.timestamp_format {
            TimestampFormat::Relative => &["0:00", "00:00", "0:00:00", "00:00:00"],
            TimestampFormat::Utc => &["00:00"],
            TimestampFormat::UtcFull => &["00:00:00"],
        };
        let timestamp_columns = templates
            .iter()
            .map(|template| {
                let width = measure(fonts.message.as_ref(), template, px) + options.word_spacing;
                ((*template).to_owned(), width.ceil())
            })
            .collect();

        Self {
            section_width: options.chat_width,
            section_height,
            baseline_y,
            block_glyph_width,
            line_start_x: options.side_padding,
            max_x: options.max_line_x(),
            timestamp_columns,
        }
    }

    /// Column width reserved for a timestamp: the width of its digit-normalized
    /// template, so every timestamp of the same shape occupies the same space.
    pub fn timestamp_column_width(&self, text: &str) -> f32 {
        let template = timestamp_template(text);
        self.timestamp_columns
            .iter()
            .find(|(candidate, _)| *candidate == template)
            .or_else(|| self.timestamp_columns.last())
            .map_or(0.0, |(_, width)| *width)
    }

    /// Drawable width of one line.
    pub fn line_width(&self) -> f32 {
        self.max_x - self.line_start_x
    }
}

fn timestamp_template(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_ascii_digit() { '0' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Geometry;
    use crate::fonts::{BoxTypeface, FixedFontProvider, FontFallbackCache, FontSet, Typeface};
    use crate::options::ChatRenderOptions;
    use crate::text::TextPainter;

    #[test]
    fn derives_section_metrics_from_font() {
        let face: Arc<dyn Typeface> = Arc::new(BoxTypeface::new());
        let mut painter = TextPainter::new(FontFallbackCache::new(
            Box::new(FixedFontProvider::new(face.clone())),
            face.clone(),
        ));
        let options = ChatRenderOptions::default();
        let geometry = Geometry::new(&options, &FontSet::uniform(face), &mut painter);

        assert_eq!(geometry.section_height, 41);
        // Box face: ascent 19, descent -5 at 24px, centered in 41px.
        assert_eq!(geometry.baseline_y, 28.0);
        assert_eq!(geometry.block_glyph_width, 12.0);
        assert_eq!(geometry.line_width(), 334.0);
        assert_eq!(geometry.timestamp_column_width("1:23"), 54.0);
        assert_eq!(geometry.timestamp_column_width("12:34"), 66.0);
        assert_eq!(geometry.timestamp_column_width("1:02:03"), 90.0);
    }
}
