//! Message body layout: fragments are split into words and every word is routed to
//! the renderer that can draw it.

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use regex::Regex;

use crate::comment::Fragment;
use crate::drawing::DrawingState;
use crate::emoji::{looks_like_emoji, EmojiPiece};
use crate::fonts::{typeface_key, Typeface};
use crate::images::{CheerEmote, CheerTier};
use crate::inline::emote::{draw_emote, draw_zero_width_emote};
use crate::inline::InlineContext;
use crate::options::EmojiVendor;
use crate::text::{reorder_rtl_runs, TextStyle};

/// Tag character that renders as a blank box in most fallback fonts.
const LANGUAGE_TAG: char = '\u{E0000}';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Draw words over the highlight background color.
    pub highlight_words: bool,
    /// The caller already ruled out third-party emote names.
    pub skip_third_party: bool,
    /// Treat `<prefix><digits>` words as cheermotes.
    pub cheers: bool,
}

/// Box-drawing, block element and braille characters.
pub fn is_block_art(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[\x{2500}-\x{259F}\x{2800}-\x{28FF}]").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

/// Characters that never need a glyph of their own.
fn is_joiner(ch: char) -> bool {
    matches!(ch, '\u{200D}' | '\u{FE0E}' | '\u{FE0F}' | '\u{200B}' | '\u{200C}') || ch.is_whitespace()
}

/// Whether `face` can draw every visible character of `text`.
pub fn face_covers(face: &dyn Typeface, text: &str) -> bool {
    text.chars()
        .all(|ch| ch == LANGUAGE_TAG || is_joiner(ch) || face.has_glyph(ch))
}

/// Splits a cheer word into its letter prefix and bit amount.
pub fn split_cheer_token(token: &str) -> Option<(&str, u32)> {
    let digits_at = token.find(|ch: char| ch.is_ascii_digit())?;
    let (prefix, digits) = token.split_at(digits_at);
    if prefix.is_empty()
        || !prefix.chars().all(char::is_alphabetic)
        || !digits.chars().all(|ch| ch.is_ascii_digit())
    {
        return None;
    }
    Some((prefix, digits.parse().ok()?))
}

/// Lays out a full message.
pub fn draw_message(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    fragments: &[Fragment],
    options: &MessageOptions,
) -> Result<()> {
    let images = ctx.images;
    for fragment in fragments {
        if let Some(emoticon) = fragment.emoticon.as_ref() {
            if let Some(emote) = images.emote_by_id(&emoticon.emoticon_id) {
                draw_emote(ctx, state, emote)?;
                state.x += ctx.options.emote_spacing;
                continue;
            }
            for word in fragment.text.split(' ').filter(|word| !word.is_empty()) {
                draw_text_piece(ctx, state, word, &MessageOptions {
                    cheers: false,
                    ..*options
                })?;
                state.x += ctx.options.word_spacing;
            }
            continue;
        }

        for token in reorder_rtl_runs(&fragment.text) {
            draw_token(ctx, state, token, options)?;
        }
    }
    Ok(())
}

/// Draws one whitespace-free word and the spacing after it.
pub fn draw_token(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    token: &str,
    options: &MessageOptions,
) -> Result<()> {
    let images = ctx.images;
    if !options.skip_third_party {
        if let Some(emote) = images.third_party_by_name(token) {
            let stacked = emote.zero_width && draw_zero_width_emote(ctx, state, emote)?;
            if !stacked {
                if !emote.zero_width {
                    draw_emote(ctx, state, emote)?;
                }
                state.x += ctx.options.emote_spacing;
            }
            return Ok(());
        }
    }

    if ctx.options.emoji_vendor != EmojiVendor::None && looks_like_emoji(token) {
        draw_emoji_token(ctx, state, token, options)?;
    } else {
        draw_text_piece(ctx, state, token, options)?;
    }
    state.x += ctx.options.word_spacing;
    Ok(())
}

/// Emoji with an image are drawn as images; the text between them goes through the
/// text path.
fn draw_emoji_token(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    token: &str,
    options: &MessageOptions,
) -> Result<()> {
    let images = ctx.images;
    for piece in ctx.emoji.split(token) {
        match piece {
            EmojiPiece::Text(text) => draw_text_piece(ctx, state, &text, options)?,
            EmojiPiece::Emoji { key, text } => match images.emoji(&key) {
                Some(image) => {
                    ctx.draw_image(state, image)?;
                }
                None => draw_text_piece(ctx, state, &text, options)?,
            },
        }
    }
    Ok(())
}

/// Text that is not an emote or emoji: font coverage, cheermote, or plain text.
fn draw_text_piece(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    text: &str,
    options: &MessageOptions,
) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let face = Arc::clone(&ctx.fonts.message);
    let style = message_style(ctx, options);

    if is_block_art(text) {
        let width = text.chars().count() as f32 * ctx.geometry.block_glyph_width;
        ctx.layout.wrap_for(state, &mut ctx.bitmaps.pool, width)?;
    }

    if !face_covers(face.as_ref(), text) {
        return draw_outside_font(ctx, state, text, &style);
    }

    if options.cheers {
        if let Some((tier, amount)) = cheer_tier(ctx, text) {
            draw_emote(ctx, state, &tier.emote)?;
            let amount_style = TextStyle {
                color: tier.color,
                ..style
            };
            return ctx.draw_run(state, &face, &amount.to_string(), &amount_style);
        }
    }

    ctx.draw_run(state, &face, text, &style)
}

fn message_style(ctx: &InlineContext<'_>, options: &MessageOptions) -> TextStyle {
    ctx.text_style(ctx.options.message_color)
        .with_highlight(
            options
                .highlight_words
                .then_some(ctx.options.highlight_background_color),
        )
}

fn cheer_tier(ctx: &InlineContext<'_>, token: &str) -> Option<(CheerTier, u32)> {
    if !token.chars().any(char::is_alphabetic) {
        return None;
    }
    let (prefix, amount) = split_cheer_token(token)?;
    let cheer: &CheerEmote = ctx.images.cheer_by_prefix(prefix)?;
    Some((cheer.tier_for(amount)?.clone(), amount))
}

/// Splits `text` into runs the message font can draw and runs it cannot, drawing
/// the latter with fallback faces. The language tag is dropped.
fn draw_outside_font(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    text: &str,
    style: &TextStyle,
) -> Result<()> {
    let face = Arc::clone(&ctx.fonts.message);
    let mut run = String::new();
    let mut run_in_font = true;

    for ch in text.chars() {
        if ch == LANGUAGE_TAG {
            flush_run(ctx, state, &mut run, run_in_font, style)?;
            continue;
        }
        let in_font = is_joiner(ch) || face.has_glyph(ch);
        if in_font != run_in_font && !run.is_empty() {
            flush_run(ctx, state, &mut run, run_in_font, style)?;
        }
        run_in_font = in_font;
        run.push(ch);
    }
    flush_run(ctx, state, &mut run, run_in_font, style)
}

fn flush_run(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    run: &mut String,
    in_font: bool,
    style: &TextStyle,
) -> Result<()> {
    if run.is_empty() {
        return Ok(());
    }
    let text = std::mem::take(run);
    if in_font {
        let face = Arc::clone(&ctx.fonts.message);
        return ctx.draw_run(state, &face, &text, style);
    }

    // Consecutive characters resolved to the same fallback face share one draw.
    let mut group = String::new();
    let mut group_face: Option<Arc<dyn Typeface>> = None;
    for ch in text.chars() {
        let face = ctx.painter.fallback_face(ch);
        let same = group_face
            .as_ref()
            .is_some_and(|current| typeface_key(current) == typeface_key(&face));
        if !same {
            if let Some(current) = group_face.take() {
                ctx.draw_run(state, &current, &group, style)?;
                group.clear();
            }
            group_face = Some(face);
        }
        group.push(ch);
    }
    if let Some(current) = group_face {
        ctx.draw_run(state, &current, &group, style)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tiny_skia::{Color, Pixmap};

    use super::{draw_message, face_covers, is_block_art, split_cheer_token, MessageOptions};
    use crate::comment::Fragment;
    use crate::fonts::BoxTypeface;
    use crate::images::{CheerEmote, CheerTier, ImageCache, ImageCollections, TwitchEmote};
    use crate::inline::test_support::Fixture;
    use crate::options::{ChatRenderOptions, EmojiVendor, Rgba8};

    fn solid(size: u32) -> Pixmap {
        let mut pixmap = Pixmap::new(size, size).expect("pixmap");
        pixmap.fill(Color::WHITE);
        pixmap
    }

    #[test]
    fn cheer_tokens_split_into_prefix_and_amount() {
        assert_eq!(split_cheer_token("Cheer100"), Some(("Cheer", 100)));
        assert_eq!(split_cheer_token("100"), None);
        assert_eq!(split_cheer_token("Cheer"), None);
        assert_eq!(split_cheer_token("Cheer10x"), None);
    }

    #[test]
    fn block_art_and_coverage() {
        assert!(is_block_art("██▓"));
        assert!(is_block_art("⣿⣿"));
        assert!(!is_block_art("hello"));
        let face = BoxTypeface::new().without('\u{3040}'..='\u{30FF}');
        assert!(face_covers(&face, "abc\u{200D}"));
        assert!(!face_covers(&face, "aあ"));
        assert!(face_covers(&face, "a\u{E0000}"));
    }

    #[test]
    fn words_wrap_at_word_boundaries() {
        let mut fixture = Fixture::new(ChatRenderOptions::default(), ImageCache::default());
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");
        // Ten 5-letter words: 60px each plus 6px spacing; five fit per 334px line.
        let body = vec!["hello"; 10].join(" ");
        draw_message(&mut ctx, &mut state, &[Fragment::text(body)], &MessageOptions::default())
            .expect("draw");
        assert_eq!(state.line_count(), 2);
        assert_eq!(state.x, 8.0 + 5.0 * 66.0);
    }

    #[test]
    fn emotes_emoji_and_cheers_are_dispatched() {
        let tier_emote = Arc::new(TwitchEmote::new_static("c1", "cheer", solid(28), 1.0));
        let images = ImageCache::new(ImageCollections {
            emotes: vec![TwitchEmote::new_static("25", "Kappa", solid(28), 1.0)],
            third_party_emotes: vec![TwitchEmote::new_static("x", "catJAM", solid(28), 1.0)],
            cheer_emotes: vec![CheerEmote::new(
                "Cheer",
                vec![CheerTier {
                    min_bits: 1,
                    emote: tier_emote,
                    color: Rgba8::opaque(0x97, 0x9D, 0xA9),
                }],
            )],
            emoji: HashMap::from([("1f600".to_owned(), solid(24))]),
            ..ImageCollections::default()
        });
        let mut fixture = Fixture::new(ChatRenderOptions::default(), images);
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");

        let fragments = vec![
            Fragment::emote("Kappa", "25"),
            Fragment::text(" catJAM 😀"),
        ];
        draw_message(&mut ctx, &mut state, &fragments, &MessageOptions::default())
            .expect("draw");
        // Kappa 28+3, catJAM 28+3, emoji 24+6.
        assert_eq!(state.x, 8.0 + 31.0 + 31.0 + 30.0);

        let before = state.x;
        draw_message(
            &mut ctx,
            &mut state,
            &[Fragment::text("Cheer100")],
            &MessageOptions {
                cheers: true,
                ..MessageOptions::default()
            },
        )
        .expect("draw");
        // Emote 28, then "100" 36, then word spacing.
        assert_eq!(state.x, before + 28.0 + 36.0 + 6.0);
    }

    #[test]
    fn unknown_emote_id_draws_text_and_vendor_none_skips_emoji() {
        let mut options = ChatRenderOptions::default();
        options.emoji_vendor = EmojiVendor::None;
        let images = ImageCache::new(ImageCollections {
            emoji: HashMap::from([("1f600".to_owned(), solid(24))]),
            ..ImageCollections::default()
        });
        let mut fixture = Fixture::new(options, images);
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");
        draw_message(
            &mut ctx,
            &mut state,
            &[Fragment::emote("Gone", "404"), Fragment::text("😀")],
            &MessageOptions::default(),
        )
        .expect("draw");
        // "Gone" 48+6, the emoji as one 12px box glyph + 6.
        assert_eq!(state.x, 8.0 + 54.0 + 18.0);
    }
}
