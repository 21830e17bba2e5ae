use std::sync::Arc;

use anyhow::Result;

use super::{centered_y, draw_pixmap, InlineContext};
use crate::drawing::{DrawingState, EmoteSlot};
use crate::images::TwitchEmote;

/// Draws an emote at the cursor and advances past it. Animated emotes are only
/// recorded; the frame pipeline draws their current frame every tick.
pub fn draw_emote(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    emote: &Arc<TwitchEmote>,
) -> Result<()> {
    let width = emote.width() as f32;
    ctx.layout.wrap_for(state, &mut ctx.bitmaps.pool, width)?;
    let x = state.x;
    place(ctx, state, emote, x)?;
    state.last_emote = Some(EmoteSlot {
        x,
        width,
        line: state.line_index(),
    });
    state.x += width;
    Ok(())
}

/// Draws a zero-width emote centered over the previous emote on this line, without
/// moving the cursor. With nothing to stack on it is drawn like a normal emote.
pub fn draw_zero_width_emote(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    emote: &Arc<TwitchEmote>,
) -> Result<bool> {
    let Some(slot) = state
        .last_emote
        .filter(|slot| slot.line == state.line_index())
    else {
        draw_emote(ctx, state, emote)?;
        return Ok(false);
    };
    let x = slot.x + ((slot.width - emote.width() as f32) / 2.0).round();
    place(ctx, state, emote, x)?;
    Ok(true)
}

fn place(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    emote: &Arc<TwitchEmote>,
    x: f32,
) -> Result<()> {
    let y = centered_y(ctx.geometry.section_height, emote.height());
    if emote.is_animated() {
        ctx.layout.ensure_canvas(state, &mut ctx.bitmaps.pool)?;
        state.record_emote(x, y, Arc::clone(emote));
        return Ok(());
    }
    let canvas = ctx.layout.ensure_canvas(state, &mut ctx.bitmaps.pool)?;
    draw_pixmap(canvas, emote.frame_at(0), x, y);
    Ok(())
}
