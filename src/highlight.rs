//! System-event comments (subscriptions, gifts, streaks, donations, bits badges)
//! and their accented layouts.

use anyhow::Result;
use tiny_skia::{FillRule, Paint, Path, PathBuilder, Rect, Transform};
use tracing::debug;

use crate::comment::{Comment, Fragment};
use crate::drawing::DrawingState;
use crate::inline::username::{display_color, draw_username};
use crate::inline::InlineContext;
use crate::message::{draw_message, MessageOptions};
use crate::options::Rgba8;

/// Accent bar and accented username color.
pub const ACCENT_COLOR: Rgba8 = Rgba8::opaque(0x7B, 0x2C, 0xF2);

/// Notice kinds a comment may carry; anything else is not rendered.
const KNOWN_MSG_IDS: [&str; 4] = ["highlighted-message", "sub", "resub", "subgift"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighlightType {
    None,
    ChannelPointHighlight,
    SubscribedTier,
    SubscribedPrime,
    BitBadgeTierNotification,
    WatchStreak,
    CharityDonation,
    GiftedMany,
    GiftedSingle,
    GiftedAnonymous,
    ContinuingAnonymousGift,
    ContinuingGift,
    PayingForward,
    Raid,
    Combo,
    /// Not yet resolved.
    #[default]
    Unknown,
}

impl HighlightType {
    /// Laid out by [`draw_accent_body`] rather than as a plain chat line.
    pub fn is_accented(self) -> bool {
        !matches!(self, Self::None | Self::ChannelPointHighlight | Self::Unknown)
    }

    pub fn is_gift(self) -> bool {
        matches!(
            self,
            Self::GiftedMany
                | Self::GiftedSingle
                | Self::GiftedAnonymous
                | Self::ContinuingAnonymousGift
        )
    }

    /// Whether the section gets an accent bar and highlight strip.
    pub fn is_highlighted(self) -> bool {
        self.is_accented() || self == Self::ChannelPointHighlight
    }

    pub fn icon(self) -> Option<Icon> {
        match self {
            Self::SubscribedTier | Self::SubscribedPrime => Some(Icon::Star),
            Self::WatchStreak => Some(Icon::Flame),
            Self::CharityDonation => Some(Icon::Heart),
            Self::BitBadgeTierNotification => Some(Icon::Diamond),
            kind if kind.is_gift() => Some(Icon::Gift),
            _ => None,
        }
    }

    /// Text that ends the system-generated part of a notice, before any message the
    /// user attached.
    fn custom_message_boundaries(self) -> &'static [&'static str] {
        match self {
            Self::SubscribedTier | Self::SubscribedPrime => &["month! ", "months! ", "streak! "],
            Self::WatchStreak => &["watch streak! "],
            _ => &[],
        }
    }
}

/// Resolves how a comment is displayed. Returns `None` for notice kinds that are
/// not rendered at all.
pub fn resolve_highlight(comment: &Comment) -> Option<HighlightType> {
    match comment.msg_id() {
        Some("highlighted-message") => return Some(HighlightType::ChannelPointHighlight),
        Some(id) if !id.is_empty() && !KNOWN_MSG_IDS.contains(&id) => {
            debug!(comment = %comment.id, msg_id = id, "skipping comment with unsupported notice kind");
            return None;
        }
        _ => {}
    }
    Some(detect_from_content(comment))
}

/// Classifies a comment by the system text its body starts with.
pub fn detect_from_content(comment: &Comment) -> HighlightType {
    let body = comment.message.body.as_str();
    if body == "bits badge tier notification" {
        return HighlightType::BitBadgeTierNotification;
    }
    if body.starts_with("An anonymous user gifted ") || body.starts_with("An anonymous gifter gifted")
    {
        return HighlightType::GiftedAnonymous;
    }
    let Some(name) = comment
        .commenter
        .as_ref()
        .map(|commenter| commenter.display_name.as_str())
    else {
        return HighlightType::None;
    };
    let Some(rest) = body.strip_prefix(name) else {
        return HighlightType::None;
    };

    if rest.starts_with(" subscribed at Tier ") {
        HighlightType::SubscribedTier
    } else if rest.starts_with(" subscribed with Prime") {
        HighlightType::SubscribedPrime
    } else if rest.starts_with(" watched ") && rest.contains("consecutive streams") {
        HighlightType::WatchStreak
    } else if rest.starts_with(": Donated ") {
        HighlightType::CharityDonation
    } else if rest.starts_with(" is gifting ") {
        HighlightType::GiftedMany
    } else if rest.starts_with(" gifted a Tier ") {
        HighlightType::GiftedSingle
    } else if rest.starts_with(" is continuing the Gift Sub they got from an anonymous") {
        HighlightType::ContinuingAnonymousGift
    } else if rest.starts_with(" is continuing the Gift Sub") {
        HighlightType::ContinuingGift
    } else if rest.starts_with(" is paying forward the Gift") {
        HighlightType::PayingForward
    } else if rest.starts_with(" is raiding with a party of") {
        HighlightType::Raid
    } else if rest.starts_with(" sent a Combo") {
        HighlightType::Combo
    } else {
        HighlightType::None
    }
}

/// Bits badge tier as shown in the notice: versions longer than `threshold_len`
/// characters are shown in thousands (`"5000"` → `"5K"`).
pub fn bits_tier_label(version: &str, threshold_len: usize) -> String {
    if version.len() > threshold_len {
        if let Ok(bits) = version.parse::<u64>() {
            return format!("{}K", bits / 1000);
        }
    }
    version.to_owned()
}

/// Bits badge tier a notice announces: the commenter's `bits` badge version, else
/// the bits spent on the message.
pub fn bits_tier_version(comment: &Comment) -> Option<String> {
    comment
        .badge_version("bits")
        .map(str::to_owned)
        .or_else(|| {
            let bits = comment.message.bits_spent;
            (bits > 0).then(|| bits.to_string())
        })
}

/// Drops the first `count` characters of the message, taken from the first fragment.
pub fn strip_leading_chars(fragments: &[Fragment], count: usize) -> Vec<Fragment> {
    let mut stripped = fragments.to_vec();
    if let Some(first) = stripped.first_mut() {
        if first.text.chars().count() > count {
            first.text = first.text.chars().skip(count).collect();
        } else {
            stripped.remove(0);
        }
    }
    stripped
}

/// Splits a notice into its system text and the user's custom message at the
/// earliest boundary found in the first fragment.
pub fn split_custom_message(
    fragments: &[Fragment],
    boundaries: &[&str],
) -> (Vec<Fragment>, Option<Vec<Fragment>>) {
    let Some(first) = fragments.first() else {
        return (Vec::new(), None);
    };
    let Some(end) = boundaries
        .iter()
        .filter_map(|boundary| {
            first
                .text
                .find(boundary)
                .map(|index| index + boundary.len() - 1)
        })
        .min()
    else {
        return (fragments.to_vec(), None);
    };

    let standard = vec![Fragment::text(&first.text[..end])];
    let mut custom = Vec::with_capacity(fragments.len());
    let tail = &first.text[end + 1..];
    if !tail.is_empty() {
        custom.push(Fragment::text(tail));
    }
    custom.extend(fragments[1..].iter().cloned());
    let has_custom = custom
        .iter()
        .any(|fragment| fragment.emoticon.is_some() || !fragment.text.trim().is_empty());
    (standard, has_custom.then_some(custom))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Star,
    Gift,
    Flame,
    Heart,
    Diamond,
}

impl Icon {
    /// Outline of the icon in a `size` square at `(x, y)`.
    pub fn path(self, x: f32, y: f32, size: f32) -> Option<Path> {
        let at = |u: f32, v: f32| (x + u * size, y + v * size);
        let mut pb = PathBuilder::new();
        match self {
            Self::Star => {
                for point in 0..10 {
                    let radius = if point % 2 == 0 { 0.5 } else { 0.2 };
                    let angle = std::f32::consts::PI * (point as f32 / 5.0) - std::f32::consts::FRAC_PI_2;
                    let (px, py) = at(0.5 + radius * angle.cos(), 0.55 + radius * angle.sin());
                    if point == 0 {
                        pb.move_to(px, py);
                    } else {
                        pb.line_to(px, py);
                    }
                }
                pb.close();
            }
            Self::Gift => {
                pb.push_rect(Rect::from_xywh(x, y + 0.25 * size, size, 0.2 * size)?);
                pb.push_rect(Rect::from_xywh(
                    x + 0.08 * size,
                    y + 0.5 * size,
                    0.84 * size,
                    0.5 * size,
                )?);
                let (bx, by) = at(0.5, 0.25);
                pb.move_to(bx, by);
                let (lx, ly) = at(0.2, 0.0);
                let (rx, ry) = at(0.8, 0.0);
                pb.line_to(lx, ly);
                pb.line_to(bx - 0.05 * size, by);
                pb.close();
                pb.move_to(bx, by);
                pb.line_to(rx, ry);
                pb.line_to(bx + 0.05 * size, by);
                pb.close();
            }
            Self::Flame => {
                let (sx, sy) = at(0.5, 0.0);
                pb.move_to(sx, sy);
                let (c1x, c1y) = at(0.95, 0.4);
                let (c2x, c2y) = at(0.95, 1.0);
                let (bx, by) = at(0.5, 1.0);
                pb.cubic_to(c1x, c1y, c2x, c2y, bx, by);
                let (c3x, c3y) = at(0.05, 1.0);
                let (c4x, c4y) = at(0.05, 0.4);
                pb.cubic_to(c3x, c3y, c4x, c4y, sx, sy);
                pb.close();
            }
            Self::Heart => {
                let (tx, ty) = at(0.5, 0.3);
                pb.move_to(tx, ty);
                let (c1x, c1y) = at(0.5, 0.0);
                let (c2x, c2y) = at(1.0, 0.0);
                let (rx, ry) = at(1.0, 0.35);
                pb.cubic_to(c1x, c1y, c2x, c2y, rx, ry);
                let (bx, by) = at(0.5, 1.0);
                let (c3x, c3y) = at(1.0, 0.6);
                pb.quad_to(c3x, c3y, bx, by);
                let (c4x, c4y) = at(0.0, 0.6);
                let (lx, ly) = at(0.0, 0.35);
                pb.quad_to(c4x, c4y, lx, ly);
                let (c5x, c5y) = at(0.0, 0.0);
                let (c6x, c6y) = at(0.5, 0.0);
                pb.cubic_to(c5x, c5y, c6x, c6y, tx, ty);
                pb.close();
            }
            Self::Diamond => {
                let (topx, topy) = at(0.5, 0.0);
                let (rx, ry) = at(0.9, 0.5);
                let (bx, by) = at(0.5, 1.0);
                let (lx, ly) = at(0.1, 0.5);
                pb.move_to(topx, topy);
                pb.line_to(rx, ry);
                pb.line_to(bx, by);
                pb.line_to(lx, ly);
                pb.close();
            }
        }
        pb.finish()
    }
}

/// Draws `icon` at the cursor, vertically centered, without advancing. Returns its
/// width.
pub fn draw_icon(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    icon: Icon,
    color: Rgba8,
) -> Result<f32> {
    let size = (ctx.geometry.section_height as f32 * 0.6).round();
    let x = state.x;
    let y = ((ctx.geometry.section_height as f32 - size) / 2.0).round();
    let canvas = ctx.layout.ensure_canvas(state, &mut ctx.bitmaps.pool)?;
    if let Some(path) = icon.path(x, y, size) {
        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint.anti_alias = true;
        canvas.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }
    Ok(size)
}

/// Lays out the body of an accented comment.
pub fn draw_accent_body(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    comment: &Comment,
    kind: HighlightType,
) -> Result<()> {
    let fragments = comment.message.fragments.as_deref().unwrap_or_default();
    let name_len = comment
        .commenter
        .as_ref()
        .map_or(0, |commenter| commenter.display_name.chars().count());
    let plain = MessageOptions {
        cheers: comment.message.bits_spent > 0,
        ..MessageOptions::default()
    };

    match kind {
        HighlightType::SubscribedTier | HighlightType::SubscribedPrime | HighlightType::WatchStreak => {
            draw_leading_icon(ctx, state, kind)?;
            draw_username(ctx, state, comment, ACCENT_COLOR, "")?;
            ctx.layout.new_line(state, &mut ctx.bitmaps.pool)?;

            let stripped = strip_leading_chars(fragments, name_len + 1);
            let (standard, custom) = split_custom_message(&stripped, kind.custom_message_boundaries());
            draw_message(ctx, state, &standard, &MessageOptions::default())?;
            if let Some(custom) = custom {
                ctx.layout.new_line(state, &mut ctx.bitmaps.pool)?;
                draw_message(ctx, state, &custom, &plain)?;
            }
        }
        HighlightType::BitBadgeTierNotification => {
            draw_leading_icon(ctx, state, kind)?;
            let color = display_color(ctx, comment);
            match bits_tier_version(comment) {
                Some(version) if fragments.len() == 1 => {
                    let label = bits_tier_label(&version, ctx.options.bits_tier_threshold_len);
                    draw_username(ctx, state, comment, color, "")?;
                    let body = Fragment::text(format!("just earned a new {label} Bits badge!"));
                    draw_message(ctx, state, &[body], &MessageOptions::default())?;
                }
                _ => {
                    draw_username(ctx, state, comment, color, ":")?;
                    draw_message(ctx, state, fragments, &plain)?;
                }
            }
        }
        HighlightType::CharityDonation => {
            draw_leading_icon(ctx, state, kind)?;
            draw_username(ctx, state, comment, ACCENT_COLOR, "")?;
            ctx.layout.new_line(state, &mut ctx.bitmaps.pool)?;
            let stripped = strip_leading_chars(fragments, name_len + 2);
            draw_message(ctx, state, &stripped, &plain)?;
        }
        kind if kind.is_gift() => {
            let width = draw_icon(ctx, state, Icon::Gift, ACCENT_COLOR)?;
            state.x += width + ctx.options.accent_indent_width - ctx.options.accent_stroke_width;
            state.default_x = state.x;
            draw_message(ctx, state, fragments, &plain)?;
        }
        _ => draw_message(ctx, state, fragments, &plain)?,
    }
    Ok(())
}

/// Icon, then indent every later line of the comment to just after it.
fn draw_leading_icon(
    ctx: &mut InlineContext<'_>,
    state: &mut DrawingState,
    kind: HighlightType,
) -> Result<()> {
    if let Some(icon) = kind.icon() {
        let width = draw_icon(ctx, state, icon, ACCENT_COLOR)?;
        state.x += width + ctx.options.word_spacing;
        state.default_x = state.x;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        bits_tier_label, bits_tier_version, detect_from_content, draw_accent_body,
        resolve_highlight, split_custom_message, strip_leading_chars, HighlightType, Icon,
    };
    use crate::comment::{Comment, Fragment, UserBadge, UserNoticeParams};
    use crate::images::ImageCache;
    use crate::inline::test_support::Fixture;
    use crate::options::ChatRenderOptions;

    fn comment(name: &str, body: &str, msg_id: Option<&str>) -> Comment {
        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        let mut comment = Comment::plain("1", 0.0, created, &name.to_lowercase(), name, body);
        comment.message.user_notice_params = msg_id.map(|id| UserNoticeParams {
            msg_id: Some(id.to_owned()),
        });
        comment
    }

    #[test]
    fn detects_notice_kinds_from_body() {
        let cases = [
            ("Alice subscribed at Tier 1. They've subscribed for 3 months!", HighlightType::SubscribedTier),
            ("Alice subscribed with Prime. They've subscribed for 2 months!", HighlightType::SubscribedPrime),
            ("Alice watched 10 consecutive streams this month", HighlightType::WatchStreak),
            ("Alice: Donated USD 5 to support Charity", HighlightType::CharityDonation),
            ("Alice is gifting 5 Tier 1 Subs to Chan's community!", HighlightType::GiftedMany),
            ("Alice gifted a Tier 1 sub to Bob!", HighlightType::GiftedSingle),
            ("An anonymous user gifted a Tier 1 sub to Bob!", HighlightType::GiftedAnonymous),
            ("Alice is continuing the Gift Sub they got from an anonymous user!", HighlightType::ContinuingAnonymousGift),
            ("Alice is continuing the Gift Sub they got from Bob!", HighlightType::ContinuingGift),
            ("Alice is paying forward the Gift they got from Bob!", HighlightType::PayingForward),
            ("Alice is raiding with a party of 12.", HighlightType::Raid),
            ("Alice sent a Combo of 3 hearts", HighlightType::Combo),
            ("bits badge tier notification", HighlightType::BitBadgeTierNotification),
            ("Alice subscribed to nothing", HighlightType::None),
            ("hello everyone", HighlightType::None),
        ];
        for (body, expected) in cases {
            assert_eq!(detect_from_content(&comment("Alice", body, None)), expected, "{body}");
        }
    }

    #[test]
    fn unknown_notice_kinds_are_rejected() {
        assert_eq!(
            resolve_highlight(&comment("Alice", "hi", Some("highlighted-message"))),
            Some(HighlightType::ChannelPointHighlight)
        );
        assert_eq!(
            resolve_highlight(&comment("Alice", "hi", Some("resub"))),
            Some(HighlightType::None)
        );
        assert_eq!(resolve_highlight(&comment("Alice", "hi", Some(""))), Some(HighlightType::None));
        assert_eq!(resolve_highlight(&comment("Alice", "hi", Some("raid"))), None);
    }

    #[test]
    fn bits_labels_use_thousands_past_threshold() {
        assert_eq!(bits_tier_label("100", 3), "100");
        assert_eq!(bits_tier_label("1000", 3), "1K");
        assert_eq!(bits_tier_label("25000", 3), "25K");
        assert_eq!(bits_tier_label("1000", 4), "1000");
    }

    #[test]
    fn bits_tier_comes_from_badge_then_bits_spent() {
        let mut notice = comment("Alice", "bits badge tier notification", None);
        assert_eq!(bits_tier_version(&notice), None);

        notice.message.bits_spent = 5000;
        assert_eq!(bits_tier_version(&notice).as_deref(), Some("5000"));

        notice.message.user_badges = Some(vec![UserBadge {
            name: "bits".to_owned(),
            version: "1000".to_owned(),
        }]);
        assert_eq!(bits_tier_version(&notice).as_deref(), Some("1000"));
    }

    #[test]
    fn gift_notices_wrap_under_the_body() {
        let options = ChatRenderOptions::default();
        let indent = 8.0 + 25.0 + options.accent_indent_width - options.accent_stroke_width;
        let mut fixture = Fixture::new(options, ImageCache::default());
        let mut ctx = fixture.context();
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool).expect("begin");

        let gift = comment(
            "Alice",
            "Alice gifted a Tier 1 sub to Bob! They have given 5 Gift Subs in the channel!",
            None,
        );
        draw_accent_body(&mut ctx, &mut state, &gift, HighlightType::GiftedSingle).expect("draw");
        assert_eq!(state.default_x, indent);
        assert!(state.line_index() > 0);
    }

    #[test]
    fn strips_username_prefix_from_first_fragment() {
        let fragments = vec![
            Fragment::text("Alice subscribed at Tier 1."),
            Fragment::emote("Kappa", "25"),
        ];
        let stripped = strip_leading_chars(&fragments, "Alice".len() + 1);
        assert_eq!(stripped[0].text, "subscribed at Tier 1.");
        assert_eq!(stripped.len(), 2);
        assert_eq!(fragments[0].text, "Alice subscribed at Tier 1.");
    }

    #[test]
    fn splits_custom_message_after_boundary() {
        let fragments = vec![
            Fragment::text("subscribed at Tier 1. They've subscribed for 5 months! thanks for "),
            Fragment::emote("Kappa", "25"),
        ];
        let (standard, custom) =
            split_custom_message(&fragments, &["month! ", "months! ", "streak! "]);
        assert_eq!(
            standard[0].text,
            "subscribed at Tier 1. They've subscribed for 5 months!"
        );
        let custom = custom.expect("custom message");
        assert_eq!(custom[0].text, "thanks for ");
        assert_eq!(custom[1], Fragment::emote("Kappa", "25"));

        let (standard, custom) = split_custom_message(
            &[Fragment::text("subscribed with Prime. They've subscribed for 2 months! ")],
            &["month! ", "months! ", "streak! "],
        );
        assert_eq!(standard.len(), 1);
        assert!(custom.is_none());
    }

    #[test]
    fn icons_produce_paths() {
        for icon in [Icon::Star, Icon::Gift, Icon::Flame, Icon::Heart, Icon::Diamond] {
            let path = icon.path(2.0, 3.0, 24.0).expect("icon path");
            let bounds = path.bounds();
            assert!(bounds.left() >= 2.0 - 0.01 && bounds.right() <= 26.01, "{icon:?}");
        }
    }
}
