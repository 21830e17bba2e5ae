use anyhow::Result;
use tiny_skia::{FilterQuality, Paint, PathBuilder, Pattern, SpreadMode, Transform};

use super::{centered_y, InlineContext};
use crate::comment::Comment;
use crate::drawing::DrawingState;

/// Draws the commenter's avatar clipped to a circle. Comments without a known
/// avatar draw nothing.
pub fn draw_avatar(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    comment: &Comment,
) -> Result<()> {
    let Some(image) = comment
        .commenter
        .as_ref()
        .and_then(|commenter| commenter.logo.as_deref())
        .and_then(|url| ctx.images.avatar(url))
    else {
        return Ok(());
    };

    let size = image.width().min(image.height()) as f32;
    ctx.layout.wrap_for(state, &mut ctx.bitmaps.pool, size)?;
    let x = state.x;
    let y = centered_y(ctx.geometry.section_height, image.height());
    let radius = size / 2.0;

    let canvas = ctx.layout.ensure_canvas(state, &mut ctx.bitmaps.pool)?;
    if let Some(circle) = PathBuilder::from_circle(x + radius, y + radius, radius) {
        let paint = Paint {
            shader: Pattern::new(
                image.as_ref(),
                SpreadMode::Pad,
                FilterQuality::Bilinear,
                1.0,
                Transform::from_translate(x, y),
            ),
            anti_alias: true,
            ..Paint::default()
        };
        canvas.fill_path(&circle, &paint, tiny_skia::FillRule::Winding, Transform::identity(), None);
    }
    state.x += size + ctx.options.word_spacing;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use tiny_skia::{Color, Pixmap};

    use super::draw_avatar;
    use crate::comment::Comment;
    use crate::images::{ImageCache, ImageCollections};
    use crate::inline::test_support::Fixture;
    use crate::options::ChatRenderOptions;

    #[test]
    fn clips_avatar_to_circle() {
        let mut avatar = Pixmap::new(30, 30).expect("pixmap");
        avatar.fill(Color::WHITE);
        let images = ImageCache::new(ImageCollections {
            avatars: HashMap::from([("https://a/alice.png".to_owned(), avatar)]),
            ..ImageCollections::default()
        });
        let mut fixture = Fixture::new(ChatRenderOptions::default(), images);
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");

        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        let mut comment = Comment::plain("1", 0.0, created, "alice", "Alice", "hi");
        if let Some(commenter) = comment.commenter.as_mut() {
            commenter.logo = Some("https://a/alice.png".to_owned());
        }
        draw_avatar(&mut ctx, &mut state, &comment).expect("draw");
        assert_eq!(state.x, 8.0 + 30.0 + 6.0);

        let canvas = &state.sections()[0];
        let top = 6;
        let corner = canvas.pixel(8, top).expect("in bounds");
        let center = canvas.pixel(8 + 15, top + 15).expect("in bounds");
        assert_eq!(corner.alpha(), 0);
        assert_eq!(center.alpha(), 255);
    }

    #[test]
    fn unknown_avatar_draws_nothing() {
        let mut fixture = Fixture::new(ChatRenderOptions::default(), ImageCache::default());
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");
        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        let comment = Comment::plain("1", 0.0, created, "bob", "Bob", "hi");
        draw_avatar(&mut ctx, &mut state, &comment).expect("draw");
        assert_eq!(state.x, 8.0);
    }
}
