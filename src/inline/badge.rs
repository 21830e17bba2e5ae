use anyhow::Result;

use super::InlineContext;
use crate::comment::Comment;
use crate::drawing::DrawingState;

/// Draws the commenter's chat badges in order. Badges or versions missing from the
/// image cache are skipped.
pub fn draw_badges(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    comment: &Comment,
) -> Result<()> {
    let Some(badges) = comment.message.user_badges.as_ref() else {
        return Ok(());
    };
    let images = ctx.images;
    for badge in badges {
        let Some(image) = images
            .badge_by_name(&badge.name)
            .and_then(|chat_badge| chat_badge.version(&badge.version))
        else {
            continue;
        };
        ctx.draw_image(state, image)?;
        state.x += ctx.options.emote_spacing;
    }
    Ok(())
}
