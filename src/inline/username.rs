use std::sync::Arc;

use anyhow::Result;

use super::InlineContext;
use crate::comment::Comment;
use crate::drawing::DrawingState;
use crate::options::Rgba8;

/// Chat colors assigned to users who never picked one.
const DEFAULT_COLORS: [Rgba8; 15] = [
    Rgba8::opaque(0xFF, 0x00, 0x00),
    Rgba8::opaque(0x00, 0x00, 0xFF),
    Rgba8::opaque(0x00, 0x80, 0x00),
    Rgba8::opaque(0xB2, 0x22, 0x22),
    Rgba8::opaque(0xFF, 0x7F, 0x50),
    Rgba8::opaque(0x9A, 0xCD, 0x32),
    Rgba8::opaque(0xFF, 0x45, 0x00),
    Rgba8::opaque(0x2E, 0x8B, 0x57),
    Rgba8::opaque(0xDA, 0xA5, 0x20),
    Rgba8::opaque(0xD2, 0x69, 0x1E),
    Rgba8::opaque(0x5F, 0x9E, 0xA0),
    Rgba8::opaque(0x1E, 0x90, 0xFF),
    Rgba8::opaque(0xFF, 0x69, 0xB4),
    Rgba8::opaque(0x8A, 0x2B, 0xE2),
    Rgba8::opaque(0x00, 0xFF, 0x7F),
];

const MIN_CONTRAST: f32 = 0.3;

/// The commenter's chosen color, or a stable default derived from the login.
pub fn user_color(comment: &Comment) -> Rgba8 {
    if let Some(color) = comment
        .message
        .user_color
        .as_deref()
        .and_then(|raw| Rgba8::parse_hex(raw).ok())
    {
        return color;
    }
    let login = comment
        .commenter
        .as_ref()
        .map_or("", |commenter| commenter.name.as_str());
    let hash = login
        .bytes()
        .fold(0usize, |acc, byte| acc.wrapping_add(usize::from(byte)));
    DEFAULT_COLORS[hash % DEFAULT_COLORS.len()]
}

/// Moves `color` toward white on dark backgrounds (black on light ones) until its
/// luminance differs from the background by at least [`MIN_CONTRAST`].
pub fn adjust_visibility(color: Rgba8, background: Rgba8) -> Rgba8 {
    if background.a == 0 {
        return color;
    }
    let target = if background.luminance() < 0.5 {
        Rgba8::WHITE
    } else {
        Rgba8::BLACK
    };
    let mut adjusted = color;
    for step in 1..=10 {
        if (adjusted.luminance() - background.luminance()).abs() >= MIN_CONTRAST {
            break;
        }
        adjusted = mix(color, target, step as f32 / 10.0);
    }
    adjusted
}

fn mix(from: Rgba8, to: Rgba8, amount: f32) -> Rgba8 {
    let channel = |a: u8, b: u8| -> u8 {
        (f32::from(a) + (f32::from(b) - f32::from(a)) * amount).round() as u8
    };
    Rgba8 {
        r: channel(from.r, to.r),
        g: channel(from.g, to.g),
        b: channel(from.b, to.b),
        a: from.a,
    }
}

/// Draws the commenter's name in `color` followed by `suffix`, then word spacing.
pub fn draw_username(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    comment: &Comment,
    color: Rgba8,
    suffix: &str,
) -> Result<()> {
    let Some(commenter) = comment.commenter.as_ref() else {
        return Ok(());
    };
    let text = format!("{}{suffix}", commenter.shown_name());
    let face = Arc::clone(&ctx.fonts.username);
    let style = ctx.text_style(color);
    ctx.draw_run(state, &face, &text, &style)?;
    state.x += ctx.options.word_spacing;
    Ok(())
}

/// Color a plain message's username is drawn in.
pub fn display_color(ctx: &InlineContext<'_>, comment: &Comment) -> Rgba8 {
    let color = user_color(comment);
    if ctx.options.adjust_username_visibility {
        adjust_visibility(color, ctx.options.background_color)
    } else {
        color
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{adjust_visibility, user_color};
    use crate::comment::Comment;
    use crate::options::Rgba8;

    fn comment(login: &str) -> Comment {
        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        Comment::plain("1", 0.0, created, login, login, "hi")
    }

    #[test]
    fn explicit_color_wins_and_default_is_stable() {
        let mut with_color = comment("alice");
        with_color.message.user_color = Some("#1E90FF".to_owned());
        assert_eq!(user_color(&with_color), Rgba8::opaque(0x1E, 0x90, 0xFF));
        assert_eq!(user_color(&comment("bob")), user_color(&comment("bob")));
    }

    #[test]
    fn dark_names_are_lifted_on_dark_backgrounds() {
        let background = Rgba8::opaque(0x11, 0x11, 0x11);
        let navy = Rgba8::opaque(0x00, 0x00, 0x80);
        let adjusted = adjust_visibility(navy, background);
        assert!((adjusted.luminance() - background.luminance()).abs() >= 0.3);
        let white = adjust_visibility(Rgba8::WHITE, background);
        assert_eq!(white, Rgba8::WHITE);
    }
}
