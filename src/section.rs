//! Lays out one comment and composites its lines into a single section pixmap.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tiny_skia::Pixmap;
use tracing::debug;

use crate::bitmap_cache::{BitmapCache, SurfacePoolStats};
use crate::comment::Comment;
use crate::drawing::{EmotePlacement, SectionLayout};
use crate::emoji::EmojiTable;
use crate::fonts::{FontFallbackCache, FontSet};
use crate::geometry::Geometry;
use crate::highlight::{draw_accent_body, resolve_highlight, HighlightType, ACCENT_COLOR};
use crate::images::ImageCache;
use crate::inline::avatar::draw_avatar;
use crate::inline::badge::draw_badges;
use crate::inline::timestamp::draw_timestamp;
use crate::inline::username::{display_color, draw_username};
use crate::inline::{draw_pixmap, InlineContext};
use crate::message::{draw_message, MessageOptions};
use crate::options::{ChatRenderOptions, EmojiVendor};
use crate::text::{fill_rect, TextPainter};

/// A fully composited comment.
pub struct CommentSection {
    pub image: Pixmap,
    /// Animated emotes, positioned relative to the top-left of `image`.
    pub emotes: Vec<EmotePlacement>,
    pub comment_index: usize,
    pub highlight: HighlightType,
}

impl CommentSection {
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Owns everything needed to turn comments into [`CommentSection`]s.
pub struct SectionAssembler {
    options: ChatRenderOptions,
    geometry: Geometry,
    layout: SectionLayout,
    fonts: FontSet,
    images: Arc<ImageCache>,
    emoji: Arc<EmojiTable>,
    painter: TextPainter,
    bitmaps: BitmapCache,
}

impl SectionAssembler {
    pub fn new(
        options: ChatRenderOptions,
        fonts: FontSet,
        fallback: FontFallbackCache,
        images: Arc<ImageCache>,
    ) -> Self {
        let mut painter = TextPainter::new(fallback);
        let geometry = Geometry::new(&options, &fonts, &mut painter);
        let layout = SectionLayout::new(&geometry);
        let emoji = if options.emoji_vendor == EmojiVendor::None {
            EmojiTable::default()
        } else {
            EmojiTable::from_keys(images.emoji_keys())
        };
        debug!(
            section_height = geometry.section_height,
            emoji_sequences = emoji.len(),
            "section assembler ready"
        );
        Self {
            options,
            geometry,
            layout,
            fonts,
            images,
            emoji: Arc::new(emoji),
            painter,
            bitmaps: BitmapCache::new(),
        }
    }

    pub fn options(&self) -> &ChatRenderOptions {
        &self.options
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn pool_stats(&self) -> SurfacePoolStats {
        self.bitmaps.pool.stats()
    }

    /// Returns a section's pixmap to the buffer pool once it scrolls out of view.
    pub fn recycle(&mut self, section: CommentSection) {
        self.bitmaps.pool.release(section.image);
    }

    /// Lays out and composites `comment`. Returns `None` for comments that are not
    /// rendered: missing author or fragments, unsupported notice kinds, and system
    /// notices while those are disabled.
    pub fn assemble(&mut self, comment: &Comment, index: usize) -> Result<Option<CommentSection>> {
        let (Some(_), Some(fragments)) = (comment.commenter.as_ref(), comment.message.fragments.as_deref())
        else {
            debug!(comment = %comment.id, "skipping comment without author or fragments");
            return Ok(None);
        };
        let Some(highlight) = resolve_highlight(comment) else {
            return Ok(None);
        };
        if highlight.is_accented() && !self.options.sub_messages {
            debug!(comment = %comment.id, ?highlight, "skipping system notice");
            return Ok(None);
        }

        let mut ctx = InlineContext {
            options: &self.options,
            geometry: &self.geometry,
            layout: &self.layout,
            fonts: &self.fonts,
            images: &self.images,
            emoji: &self.emoji,
            painter: &mut self.painter,
            bitmaps: &mut self.bitmaps,
        };
        let mut state = ctx.layout.begin(&mut ctx.bitmaps.pool)?;

        if ctx.options.timestamps {
            draw_timestamp(&mut ctx, &mut state, comment)?;
        }
        if ctx.options.avatars {
            draw_avatar(&mut ctx, &mut state, comment)?;
        }
        if highlight.is_accented() {
            draw_accent_body(&mut ctx, &mut state, comment, highlight)?;
        } else {
            if ctx.options.badges {
                draw_badges(&mut ctx, &mut state, comment)?;
            }
            let color = display_color(&ctx, comment);
            draw_username(&mut ctx, &mut state, comment, color, ":")?;
            let message = MessageOptions {
                highlight_words: highlight == HighlightType::ChannelPointHighlight,
                skip_third_party: false,
                cheers: comment.message.bits_spent > 0,
            };
            draw_message(&mut ctx, &mut state, fragments, &message)?;
        }

        let (lines, emotes) = state.into_parts();
        let image = self.composite(&lines, index, highlight);
        self.bitmaps.pool.release_all(lines);
        Ok(Some(CommentSection {
            image: image?,
            emotes,
            comment_index: index,
            highlight,
        }))
    }

    /// Stacks the line pixmaps over the comment's background, highlight strip and
    /// accent bar.
    fn composite(&mut self, lines: &[Pixmap], index: usize, highlight: HighlightType) -> Result<Pixmap> {
        let line_height = self.geometry.section_height;
        let height = line_height * lines.len().max(1) as u32;
        let width = self.geometry.section_width;
        let mut image = self.bitmaps.pool.borrow(width, height)?;
        let (w, h) = (width as f32, height as f32);

        if self.options.alternate_backgrounds && index % 2 == 1 {
            fill_rect(&mut image, 0.0, 0.0, w, h, self.options.alternate_background_color);
        }
        if highlight.is_highlighted() {
            let strip = self.options.highlight_background_color;
            let alpha = (f32::from(strip.a) * self.options.background_opacity()).round() as u8;
            fill_rect(&mut image, 0.0, 0.0, w, h, strip.with_alpha(alpha));
            fill_rect(&mut image, 0.0, 0.0, self.options.accent_stroke_width, h, ACCENT_COLOR);
        }
        for (line, pixmap) in lines.iter().enumerate() {
            if pixmap.width() != width {
                return Err(anyhow!(
                    "line {line} is {}px wide, expected {width}px",
                    pixmap.width()
                ));
            }
            draw_pixmap(&mut image, pixmap, 0.0, (line as u32 * line_height) as f32);
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::SectionAssembler;
    use crate::comment::{Comment, UserNoticeParams};
    use crate::fonts::{BoxTypeface, FixedFontProvider, FontFallbackCache, FontSet, Typeface};
    use crate::highlight::HighlightType;
    use crate::images::ImageCache;
    use crate::options::ChatRenderOptions;

    fn assembler(options: ChatRenderOptions) -> SectionAssembler {
        let face: Arc<dyn Typeface> = Arc::new(BoxTypeface::new());
        let fallback = FontFallbackCache::new(
            Box::new(FixedFontProvider::new(Arc::clone(&face))),
            Arc::clone(&face),
        );
        SectionAssembler::new(
            options,
            FontSet::uniform(face),
            fallback,
            Arc::new(ImageCache::default()),
        )
    }

    fn comment(body: &str) -> Comment {
        let created = Utc.timestamp_opt(0, 0).single().expect("epoch");
        Comment::plain("1", 0.0, created, "alice", "Alice", body)
    }

    #[test]
    fn plain_comment_is_one_line() {
        let mut assembler = assembler(ChatRenderOptions::default());
        let section = assembler
            .assemble(&comment("hi"), 0)
            .expect("assemble")
            .expect("rendered");
        assert_eq!(section.image.width(), 350);
        assert_eq!(section.height(), 41);
        assert_eq!(section.highlight, HighlightType::None);
        assert!(section.emotes.is_empty());
    }

    #[test]
    fn long_comment_wraps_into_taller_section() {
        let mut assembler = assembler(ChatRenderOptions::default());
        let body = ["word"; 20].join(" ");
        let section = assembler
            .assemble(&comment(&body), 0)
            .expect("assemble")
            .expect("rendered");
        assert_eq!(section.height() % 41, 0);
        assert!(section.height() >= 82);
    }

    #[test]
    fn rejects_unrenderable_comments() {
        let mut assembler = assembler(ChatRenderOptions::default());

        let mut anonymous = comment("hi");
        anonymous.commenter = None;
        assert!(assembler.assemble(&anonymous, 0).expect("assemble").is_none());

        let mut no_fragments = comment("hi");
        no_fragments.message.fragments = None;
        assert!(assembler.assemble(&no_fragments, 0).expect("assemble").is_none());

        let mut raid = comment("hi");
        raid.message.user_notice_params = Some(UserNoticeParams {
            msg_id: Some("raid".to_owned()),
        });
        assert!(assembler.assemble(&raid, 0).expect("assemble").is_none());

        let mut quiet = self::assembler(ChatRenderOptions {
            sub_messages: false,
            ..ChatRenderOptions::default()
        });
        let sub = comment("Alice subscribed at Tier 1. They've subscribed for 2 months!");
        assert!(quiet.assemble(&sub, 0).expect("assemble").is_none());
    }

    #[test]
    fn odd_comments_get_alternate_background() {
        let mut assembler = assembler(ChatRenderOptions {
            alternate_backgrounds: true,
            ..ChatRenderOptions::default()
        });
        let even = assembler.assemble(&comment("hi"), 0).expect("assemble").expect("rendered");
        let odd = assembler.assemble(&comment("hi"), 1).expect("assemble").expect("rendered");
        assert_eq!(even.image.pixel(349, 0).map(|p| p.alpha()), Some(0));
        let pixel = odd.image.pixel(349, 0).expect("pixel");
        assert_eq!((pixel.red(), pixel.alpha()), (0x19, 255));
    }

    #[test]
    fn highlighted_comments_get_strip_and_accent_bar() {
        let mut assembler = assembler(ChatRenderOptions::default());
        let mut highlighted = comment("look at me");
        highlighted.message.user_notice_params = Some(UserNoticeParams {
            msg_id: Some("highlighted-message".to_owned()),
        });
        let section = assembler
            .assemble(&highlighted, 0)
            .expect("assemble")
            .expect("rendered");
        assert_eq!(section.highlight, HighlightType::ChannelPointHighlight);
        assert_eq!(section.image.pixel(349, 0).map(|p| p.alpha()), Some(0x3C));
        let bar = section.image.pixel(1, 0).expect("pixel");
        assert_eq!((bar.red(), bar.alpha()), (0x7B, 255));
    }

    #[test]
    fn subscription_notice_uses_two_lines() {
        let mut assembler = assembler(ChatRenderOptions {
            chat_width: 1000,
            ..ChatRenderOptions::default()
        });
        let sub = comment("Alice subscribed at Tier 1. They've subscribed for 2 months!");
        let section = assembler.assemble(&sub, 0).expect("assemble").expect("rendered");
        assert_eq!(section.highlight, HighlightType::SubscribedTier);
        assert_eq!(section.height(), 82);
    }
}
