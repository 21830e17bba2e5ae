//! Pre-fetched chat images, kept sorted for binary-search lookup.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tiny_skia::{ColorU8, FilterQuality, Pixmap, PixmapPaint, Transform};

use crate::options::{ChatRenderOptions, Rgba8};

/// Frame delay browsers substitute for a zero GIF delay, in centiseconds.
const ZERO_DELAY_SUBSTITUTE: u32 = 10;

/// A first- or third-party emote. Animated emotes carry one pixmap per frame and
/// per-frame durations in centiseconds.
#[derive(Debug, Clone)]
pub struct TwitchEmote {
    pub id: String,
    pub name: String,
    pub frames: Vec<Pixmap>,
    pub durations: Vec<u32>,
    pub total_duration: u32,
    /// Pixel density of the source images (2.0 for a 2x asset).
    pub image_scale: f32,
    /// Drawn over the previous emote instead of after it.
    pub zero_width: bool,
    pub listed: bool,
}

impl TwitchEmote {
    pub fn new_static(id: &str, name: &str, image: Pixmap, image_scale: f32) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            frames: vec![image],
            durations: vec![0],
            total_duration: 0,
            image_scale,
            zero_width: false,
            listed: true,
        }
    }

    pub fn new_animated(
        id: &str,
        name: &str,
        frames: Vec<Pixmap>,
        durations: Vec<u32>,
        image_scale: f32,
    ) -> Result<Self> {
        if frames.is_empty() {
            bail!("emote '{name}' has no frames");
        }
        if frames.len() != durations.len() {
            bail!(
                "emote '{name}' has {} frames but {} durations",
                frames.len(),
                durations.len()
            );
        }
        let durations = durations
            .into_iter()
            .map(|duration| {
                if duration == 0 {
                    ZERO_DELAY_SUBSTITUTE
                } else {
                    duration
                }
            })
            .collect::<Vec<_>>();
        let total_duration = durations.iter().sum();
        Ok(Self {
            id: id.to_owned(),
            name: name.to_owned(),
            frames,
            durations,
            total_duration,
            image_scale,
            zero_width: false,
            listed: true,
        })
    }

    /// Builds an emote from frames decoded with the `image` crate.
    pub fn from_image_frames(
        id: &str,
        name: &str,
        frames: Vec<image::Frame>,
        image_scale: f32,
    ) -> Result<Self> {
        if frames.len() == 1 {
            let frame = frames
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("emote '{name}' has no frames"))?;
            return Ok(Self::new_static(
                id,
                name,
                pixmap_from_rgba(frame.buffer())?,
                image_scale,
            ));
        }
        let mut pixmaps = Vec::with_capacity(frames.len());
        let mut durations = Vec::with_capacity(frames.len());
        for frame in frames {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = if denom == 0 { 0 } else { numer / denom };
            durations.push(millis / 10);
            pixmaps.push(pixmap_from_rgba(frame.buffer())?);
        }
        Self::new_animated(id, name, pixmaps, durations, image_scale)
    }

    pub fn with_zero_width(mut self, zero_width: bool) -> Self {
        self.zero_width = zero_width;
        self
    }

    pub fn with_listed(mut self, listed: bool) -> Self {
        self.listed = listed;
        self
    }

    pub fn width(&self) -> u32 {
        self.frames.first().map_or(0, Pixmap::width)
    }

    pub fn height(&self) -> u32 {
        self.frames.first().map_or(0, Pixmap::height)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    /// Frame shown `elapsed_ms` into playback. Durations are centiseconds, so each
    /// is scaled by 10 to milliseconds; playback loops every `total_duration * 10` ms.
    pub fn frame_index_at(&self, elapsed_ms: u64) -> usize {
        if self.frames.len() <= 1 || self.total_duration == 0 {
            return 0;
        }
        let mut remaining = elapsed_ms % (u64::from(self.total_duration) * 10);
        for (index, duration) in self.durations.iter().enumerate() {
            let span = u64::from(*duration) * 10;
            if remaining < span {
                return index;
            }
            remaining -= span;
        }
        self.frames.len() - 1
    }

    pub fn frame_at(&self, elapsed_ms: u64) -> &Pixmap {
        &self.frames[self.frame_index_at(elapsed_ms)]
    }

    /// Rescales every frame so the emote draws at `factor` times its source size.
    pub fn scaled(mut self, factor: f32) -> Result<Self> {
        if (factor - 1.0).abs() > f32::EPSILON {
            self.frames = self
                .frames
                .iter()
                .map(|frame| scale_pixmap(frame, factor))
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ChatBadge {
    pub name: String,
    /// Badge version (`"1"`, `"12"`, `"5000"`) → image.
    pub versions: HashMap<String, Pixmap>,
    pub image_scale: f32,
}

impl ChatBadge {
    pub fn new(name: &str, versions: HashMap<String, Pixmap>, image_scale: f32) -> Self {
        Self {
            name: name.to_owned(),
            versions,
            image_scale,
        }
    }

    pub fn version(&self, version: &str) -> Option<&Pixmap> {
        self.versions.get(version)
    }
}

#[derive(Debug, Clone)]
pub struct CheerTier {
    pub min_bits: u32,
    pub emote: Arc<TwitchEmote>,
    pub color: Rgba8,
}

#[derive(Debug, Clone)]
pub struct CheerEmote {
    pub prefix: String,
    /// Ascending by `min_bits`.
    pub tiers: Vec<CheerTier>,
}

impl CheerEmote {
    pub fn new(prefix: &str, mut tiers: Vec<CheerTier>) -> Self {
        tiers.sort_by_key(|tier| tier.min_bits);
        Self {
            prefix: prefix.to_owned(),
            tiers,
        }
    }

    /// The highest tier whose threshold `amount` reaches, or the lowest tier for
    /// amounts below every threshold.
    pub fn tier_for(&self, amount: u32) -> Option<&CheerTier> {
        self.tiers
            .iter()
            .rev()
            .find(|tier| tier.min_bits <= amount)
            .or_else(|| self.tiers.first())
    }
}

/// Input to [`ImageCache`]: collections in any order.
#[derive(Debug, Default)]
pub struct ImageCollections {
    pub badges: Vec<ChatBadge>,
    pub emotes: Vec<TwitchEmote>,
    pub third_party_emotes: Vec<TwitchEmote>,
    pub cheer_emotes: Vec<CheerEmote>,
    /// Emoji key (see [`crate::emoji::emoji_key`]) → image.
    pub emoji: HashMap<String, Pixmap>,
    /// Avatar URL → image.
    pub avatars: HashMap<String, Pixmap>,
}

/// Owns every pre-fetched image. Keyed collections are sorted on construction and
/// stay sorted on insert, so lookups can always binary search.
#[derive(Debug, Default)]
pub struct ImageCache {
    badges: Vec<ChatBadge>,
    emotes: Vec<Arc<TwitchEmote>>,
    third_party: Vec<Arc<TwitchEmote>>,
    cheers: Vec<CheerEmote>,
    emoji: HashMap<String, Pixmap>,
    avatars: HashMap<String, Pixmap>,
}

impl ImageCache {
    pub fn new(collections: ImageCollections) -> Self {
        let mut badges = collections.badges;
        badges.sort_by(|a, b| a.name.cmp(&b.name));
        let mut emotes = collections
            .emotes
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();
        emotes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut third_party = collections
            .third_party_emotes
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();
        third_party.sort_by(|a, b| a.name.cmp(&b.name));
        let mut cheers = collections.cheer_emotes;
        cheers.sort_by(|a, b| cheer_key_cmp(&a.prefix, &b.prefix));

        Self {
            badges,
            emotes,
            third_party,
            cheers,
            emoji: collections.emoji,
            avatars: collections.avatars,
        }
    }

    /// Filters and rescales the collections to output size, then sorts them.
    pub fn prepare(mut collections: ImageCollections, options: &ChatRenderOptions) -> Result<Self> {
        let reference = options.reference_scale();

        if !options.allow_unlisted_emotes {
            collections.third_party_emotes.retain(|emote| emote.listed);
        }

        collections.emotes = collections
            .emotes
            .into_iter()
            .map(|emote| {
                let factor = options.emote_scale * reference / emote.image_scale;
                emote.scaled(factor)
            })
            .collect::<Result<Vec<_>>>()?;
        collections.third_party_emotes = collections
            .third_party_emotes
            .into_iter()
            .map(|emote| {
                let factor = options.emote_scale * reference / emote.image_scale;
                emote.scaled(factor)
            })
            .collect::<Result<Vec<_>>>()?;
        for cheer in &mut collections.cheer_emotes {
            for tier in &mut cheer.tiers {
                let factor = options.emote_scale * reference / tier.emote.image_scale;
                tier.emote = Arc::new(tier.emote.as_ref().clone().scaled(factor)?);
            }
        }
        for badge in &mut collections.badges {
            let factor = options.badge_scale * reference / badge.image_scale;
            for image in badge.versions.values_mut() {
                *image = scale_pixmap(image, factor)?;
            }
            badge.image_scale = 1.0;
        }

        let emoji_height = (options.font_size * 1.2 * options.emoji_scale).round().max(1.0);
        for image in collections.emoji.values_mut() {
            *image = scale_pixmap(image, emoji_height / image.height().max(1) as f32)?;
        }

        let avatar_size =
            (options.section_height() as f32 * 0.8 * options.avatar_scale).round().max(1.0);
        for image in collections.avatars.values_mut() {
            *image = resize_pixmap(image, avatar_size as u32, avatar_size as u32)?;
        }

        Ok(Self::new(collections))
    }

    pub fn emote_by_id(&self, id: &str) -> Option<&Arc<TwitchEmote>> {
        self.emotes
            .binary_search_by(|emote| emote.id.as_str().cmp(id))
            .ok()
            .map(|index| &self.emotes[index])
    }

    pub fn third_party_by_name(&self, name: &str) -> Option<&Arc<TwitchEmote>> {
        self.third_party
            .binary_search_by(|emote| emote.name.as_str().cmp(name))
            .ok()
            .map(|index| &self.third_party[index])
    }

    pub fn badge_by_name(&self, name: &str) -> Option<&ChatBadge> {
        self.badges
            .binary_search_by(|badge| badge.name.as_str().cmp(name))
            .ok()
            .map(|index| &self.badges[index])
    }

    /// Case-insensitive cheer prefix lookup.
    pub fn cheer_by_prefix(&self, prefix: &str) -> Option<&CheerEmote> {
        self.cheers
            .binary_search_by(|cheer| cheer_key_cmp(&cheer.prefix, prefix))
            .ok()
            .map(|index| &self.cheers[index])
    }

    pub fn emoji(&self, key: &str) -> Option<&Pixmap> {
        self.emoji.get(key)
    }

    pub fn avatar(&self, url: &str) -> Option<&Pixmap> {
        self.avatars.get(url)
    }

    pub fn emoji_keys(&self) -> impl Iterator<Item = &str> {
        self.emoji.keys().map(String::as_str)
    }

    pub fn has_third_party_emotes(&self) -> bool {
        !self.third_party.is_empty()
    }

    pub fn has_cheer_emotes(&self) -> bool {
        !self.cheers.is_empty()
    }

    pub fn insert_emote(&mut self, emote: TwitchEmote) {
        match self
            .emotes
            .binary_search_by(|existing| existing.id.cmp(&emote.id))
        {
            Ok(index) => self.emotes[index] = Arc::new(emote),
            Err(index) => self.emotes.insert(index, Arc::new(emote)),
        }
    }

    pub fn insert_third_party_emote(&mut self, emote: TwitchEmote) {
        match self
            .third_party
            .binary_search_by(|existing| existing.name.cmp(&emote.name))
        {
            Ok(index) => self.third_party[index] = Arc::new(emote),
            Err(index) => self.third_party.insert(index, Arc::new(emote)),
        }
    }

    pub fn insert_badge(&mut self, badge: ChatBadge) {
        match self
            .badges
            .binary_search_by(|existing| existing.name.cmp(&badge.name))
        {
            Ok(index) => self.badges[index] = badge,
            Err(index) => self.badges.insert(index, badge),
        }
    }

    pub fn insert_cheer(&mut self, cheer: CheerEmote) {
        match self
            .cheers
            .binary_search_by(|existing| cheer_key_cmp(&existing.prefix, &cheer.prefix))
        {
            Ok(index) => self.cheers[index] = cheer,
            Err(index) => self.cheers.insert(index, cheer),
        }
    }
}

fn cheer_key_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Premultiplies a decoded RGBA image into a pixmap.
pub fn pixmap_from_rgba(image: &image::RgbaImage) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height()).ok_or_else(|| {
        anyhow!(
            "failed to allocate {}x{} pixmap",
            image.width(),
            image.height()
        )
    })?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

pub fn scale_pixmap(source: &Pixmap, factor: f32) -> Result<Pixmap> {
    let width = (source.width() as f32 * factor).round().max(1.0) as u32;
    let height = (source.height() as f32 * factor).round().max(1.0) as u32;
    resize_pixmap(source, width, height)
}

pub fn resize_pixmap(source: &Pixmap, width: u32, height: u32) -> Result<Pixmap> {
    if source.width() == width && source.height() == height {
        return Ok(source.clone());
    }
    let mut target = Pixmap::new(width, height)
        .ok_or_else(|| anyhow!("failed to allocate {width}x{height} pixmap"))?;
    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    let transform = Transform::from_scale(
        width as f32 / source.width().max(1) as f32,
        height as f32 / source.height().max(1) as f32,
    );
    target.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tiny_skia::Pixmap;

    use super::{CheerEmote, CheerTier, ChatBadge, ImageCache, ImageCollections, TwitchEmote};
    use crate::options::Rgba8;

    fn pixmap(size: u32) -> Pixmap {
        Pixmap::new(size, size).expect("pixmap should allocate")
    }

    fn emote(id: &str, name: &str) -> TwitchEmote {
        TwitchEmote::new_static(id, name, pixmap(4), 1.0)
    }

    fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for index in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(index);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn lookups_find_exact_records_for_any_input_order() {
        let keys = ["b", "d", "a", "c"];
        for order in permutations(&keys) {
            let cache = ImageCache::new(ImageCollections {
                emotes: order.iter().map(|key| emote(key, &format!("n{key}"))).collect(),
                third_party_emotes: order.iter().map(|key| emote(&format!("i{key}"), key)).collect(),
                badges: order
                    .iter()
                    .map(|key| ChatBadge::new(key, HashMap::new(), 1.0))
                    .collect(),
                cheer_emotes: order
                    .iter()
                    .map(|key| CheerEmote::new(&key.to_uppercase(), Vec::new()))
                    .collect(),
                ..ImageCollections::default()
            });
            for key in keys {
                assert_eq!(cache.emote_by_id(key).map(|e| e.name.clone()), Some(format!("n{key}")));
                assert_eq!(
                    cache.third_party_by_name(key).map(|e| e.id.clone()),
                    Some(format!("i{key}"))
                );
                assert_eq!(cache.badge_by_name(key).map(|b| b.name.as_str()), Some(key));
                assert!(cache.cheer_by_prefix(key).is_some());
            }
            assert!(cache.emote_by_id("z").is_none());
            assert!(cache.third_party_by_name("").is_none());
            assert!(cache.badge_by_name("aa").is_none());
            assert!(cache.cheer_by_prefix("e").is_none());
        }
    }

    #[test]
    fn inserts_keep_collections_sorted() {
        let mut cache = ImageCache::new(ImageCollections::default());
        for id in ["m", "c", "x", "a"] {
            cache.insert_emote(emote(id, id));
            cache.insert_third_party_emote(emote(id, id));
        }
        for id in ["m", "c", "x", "a"] {
            assert!(cache.emote_by_id(id).is_some());
            assert!(cache.third_party_by_name(id).is_some());
        }
    }

    #[test]
    fn inserting_a_known_emote_replaces_it() {
        let mut cache = ImageCache::new(ImageCollections {
            emotes: vec![emote("25", "Kappa"), emote("30", "Other")],
            ..ImageCollections::default()
        });
        cache.insert_emote(emote("25", "KappaHD"));
        assert_eq!(cache.emotes.len(), 2);
        assert_eq!(
            cache.emote_by_id("25").map(|e| e.name.clone()),
            Some("KappaHD".to_owned())
        );
    }

    #[test]
    fn animated_frames_cycle_with_exact_share_per_period() {
        let frames = vec![pixmap(2), pixmap(2), pixmap(2)];
        let emote = TwitchEmote::new_animated("1", "spin", frames, vec![3, 5, 2], 1.0)
            .expect("animated emote should build");
        let period_ms = 100;
        assert_eq!(u64::from(emote.total_duration) * 10, period_ms);

        let mut shares = [0u64; 3];
        for elapsed in 0..period_ms {
            let index = emote.frame_index_at(elapsed);
            assert!(index < emote.frame_count());
            assert_eq!(index, emote.frame_index_at(elapsed + period_ms));
            assert_eq!(index, emote.frame_index_at(elapsed + 7 * period_ms));
            shares[index] += 1;
        }
        assert_eq!(shares, [30, 50, 20]);
        assert_eq!(emote.frame_index_at(29), 0);
        assert_eq!(emote.frame_index_at(30), 1);
        assert_eq!(emote.frame_index_at(99), 2);
        assert_eq!(emote.frame_index_at(100), 0);
    }

    #[test]
    fn zero_delays_are_substituted_and_mismatched_lengths_fail() {
        let emote = TwitchEmote::new_animated("1", "x", vec![pixmap(1), pixmap(1)], vec![0, 4], 1.0)
            .expect("animated emote should build");
        assert_eq!(emote.durations, vec![10, 4]);
        assert!(TwitchEmote::new_animated("1", "x", vec![pixmap(1)], vec![1, 2], 1.0).is_err());
    }

    #[test]
    fn cheer_tier_picks_highest_reached_threshold() {
        let tier = |min_bits| CheerTier {
            min_bits,
            emote: Arc::new(emote(&min_bits.to_string(), "cheer")),
            color: Rgba8::WHITE,
        };
        let cheer = CheerEmote::new("Cheer", vec![tier(100), tier(1), tier(1000)]);
        assert_eq!(cheer.tier_for(1).map(|t| t.min_bits), Some(1));
        assert_eq!(cheer.tier_for(99).map(|t| t.min_bits), Some(1));
        assert_eq!(cheer.tier_for(100).map(|t| t.min_bits), Some(100));
        assert_eq!(cheer.tier_for(5000).map(|t| t.min_bits), Some(1000));
        assert_eq!(cheer.tier_for(0).map(|t| t.min_bits), Some(1));
    }

    #[test]
    fn scaling_rounds_to_whole_pixels() {
        let scaled = emote("1", "x").scaled(2.5).expect("scale should succeed");
        assert_eq!(scaled.width(), 10);
        assert_eq!(scaled.height(), 10);
    }
}
