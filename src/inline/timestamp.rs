use anyhow::{anyhow, Result};
use tiny_skia::Pixmap;

use super::{draw_pixmap, InlineContext};
use crate::comment::Comment;
use crate::drawing::DrawingState;
use crate::options::TimestampFormat;

/// Text of a comment's timestamp column.
pub fn format_timestamp(comment: &Comment, format: TimestampFormat) -> String {
    match format {
        TimestampFormat::Relative => {
            let total = comment.content_offset_seconds.max(0.0).floor() as u64;
            let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
            if hours > 0 {
                format!("{hours}:{minutes:02}:{seconds:02}")
            } else {
                format!("{minutes}:{seconds:02}")
            }
        }
        TimestampFormat::Utc => comment.created_at.format("%H:%M").to_string(),
        TimestampFormat::UtcFull => comment.created_at.format("%H:%M:%S").to_string(),
    }
}

/// Draws the timestamp column. Each distinct second is rendered once and reused.
pub fn draw_timestamp(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    comment: &Comment,
) -> Result<()> {
    let text = format_timestamp(comment, ctx.options.timestamp_format);
    let column = ctx.geometry.timestamp_column_width(&text);

    if ctx.bitmaps.timestamps.get(&text).is_none() {
        let width = column.ceil().max(1.0) as u32;
        let mut bitmap = Pixmap::new(width, ctx.geometry.section_height)
            .ok_or_else(|| anyhow!("failed to allocate timestamp bitmap"))?;
        let style = ctx.text_style(ctx.options.message_color);
        ctx.painter.draw_text(
            &mut bitmap,
            &ctx.fonts.message,
            &text,
            0.0,
            ctx.geometry.baseline_y,
            &style,
        );
        ctx.bitmaps.timestamps.insert(text.clone(), bitmap);
    }

    ctx.layout.wrap_for(state, &mut ctx.bitmaps.pool, column)?;
    let x = state.x;
    let canvas = ctx.layout.ensure_canvas(state, &mut ctx.bitmaps.pool)?;
    if let Some(bitmap) = ctx.bitmaps.timestamps.get(&text) {
        draw_pixmap(canvas, bitmap, x, 0.0);
    }
    state.x += column;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{draw_timestamp, format_timestamp};
    use crate::comment::Comment;
    use crate::images::ImageCache;
    use crate::inline::test_support::Fixture;
    use crate::options::{ChatRenderOptions, TimestampFormat};

    fn comment(offset: f64) -> Comment {
        let created = Utc
            .with_ymd_and_hms(2024, 3, 1, 18, 5, 9)
            .single()
            .expect("valid time");
        Comment::plain("1", offset, created, "alice", "Alice", "hi")
    }

    #[test]
    fn formats_relative_and_wall_clock() {
        assert_eq!(format_timestamp(&comment(83.9), TimestampFormat::Relative), "1:23");
        assert_eq!(
            format_timestamp(&comment(3723.0), TimestampFormat::Relative),
            "1:02:03"
        );
        assert_eq!(format_timestamp(&comment(0.0), TimestampFormat::Utc), "18:05");
        assert_eq!(format_timestamp(&comment(0.0), TimestampFormat::UtcFull), "18:05:09");
    }

    #[test]
    fn memoizes_one_bitmap_per_second() {
        let mut options = ChatRenderOptions::default();
        options.timestamps = true;
        let mut fixture = Fixture::new(options, ImageCache::default());
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");

        draw_timestamp(&mut ctx, &mut state, &comment(83.2)).expect("draw");
        let after_first = state.x;
        assert_eq!(after_first, 8.0 + 54.0);
        draw_timestamp(&mut ctx, &mut state, &comment(83.7)).expect("draw");
        assert_eq!(ctx.bitmaps.timestamps.len(), 1);
        draw_timestamp(&mut ctx, &mut state, &comment(84.0)).expect("draw");
        assert_eq!(ctx.bitmaps.timestamps.len(), 2);
    }
}
