//! Loads a local directory of chat images into [`ImageCollections`].
//!
//! ```text
//! pack/
//!   emotes/<id>.png                 first-party emotes, by emote id
//!   third_party/<name>.gif          third-party emotes, by name
//!   third_party/zero_width/<name>.gif
//!   third_party/unlisted/<name>.png
//!   badges/<name>/<version>.png
//!   cheers/<prefix>/<min_bits>.gif
//!   emoji/<codepoints>.png          `1f44d`, `1f468-200d-1f469`, or `emoji_u1f44d`
//!   avatars/<file name of the avatar URL>
//! ```
//!
//! A `@2x` (or `@3x`, `@4x`) stem suffix marks a high-density asset.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use rayon::prelude::*;
use tiny_skia::Pixmap;
use tracing::{debug, info};

use crate::comment::Comment;
use crate::images::{pixmap_from_rgba, ChatBadge, CheerEmote, CheerTier, ImageCollections, TwitchEmote};
use crate::options::Rgba8;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "gif", "webp", "jpg", "jpeg"];

/// Loads every image under `root`. Avatars are keyed by the logo URLs of `comments`
/// whose file name matches an avatar file.
pub fn load_image_pack(root: &Path, comments: &[Comment]) -> Result<ImageCollections> {
    let mut collections = ImageCollections::default();
    if !root.is_dir() {
        debug!(path = %root.display(), "no image pack directory");
        return Ok(collections);
    }

    collections.emotes = load_emotes(&root.join("emotes"))?;
    let third_party = root.join("third_party");
    collections.third_party_emotes = load_emotes(&third_party)?;
    collections.third_party_emotes.extend(
        load_emotes(&third_party.join("zero_width"))?
            .into_iter()
            .map(|emote| emote.with_zero_width(true)),
    );
    collections.third_party_emotes.extend(
        load_emotes(&third_party.join("unlisted"))?
            .into_iter()
            .map(|emote| emote.with_listed(false)),
    );
    collections.badges = load_badges(&root.join("badges"))?;
    collections.cheer_emotes = load_cheers(&root.join("cheers"))?;
    collections.emoji = load_emoji(&root.join("emoji"))?;
    collections.avatars = load_avatars(&root.join("avatars"), comments)?;

    info!(
        path = %root.display(),
        emotes = collections.emotes.len(),
        third_party = collections.third_party_emotes.len(),
        badges = collections.badges.len(),
        cheers = collections.cheer_emotes.len(),
        emoji = collections.emoji.len(),
        avatars = collections.avatars.len(),
        "loaded image pack"
    );
    Ok(collections)
}

/// Splits `name@2x` into `("name", 2.0)`.
pub fn split_density(stem: &str) -> (&str, f32) {
    for (suffix, scale) in [("@2x", 2.0), ("@3x", 3.0), ("@4x", 4.0)] {
        if let Some(base) = stem.strip_suffix(suffix) {
            return (base, scale);
        }
    }
    (stem, 1.0)
}

/// Emoji key from an image file stem. Code points are re-rendered without leading
/// zeros; unparsable parts are kept lowercased.
pub fn emoji_key_from_stem(stem: &str) -> String {
    stem.trim_start_matches("emoji_u")
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| match u32::from_str_radix(part, 16) {
            Ok(codepoint) => format!("{codepoint:x}"),
            Err(_) => part.to_ascii_lowercase(),
        })
        .filter(|part| part != "fe0f")
        .collect::<Vec<_>>()
        .join("-")
}

/// Default bits tier colors.
pub fn cheer_tier_color(min_bits: u32) -> Rgba8 {
    match min_bits {
        10_000.. => Rgba8::opaque(0xF4, 0x30, 0x21),
        5_000.. => Rgba8::opaque(0x00, 0x99, 0xFE),
        1_000.. => Rgba8::opaque(0x1D, 0xB2, 0xA5),
        100.. => Rgba8::opaque(0x9C, 0x3E, 0xE8),
        _ => Rgba8::opaque(0x97, 0x97, 0x97),
    }
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", dir.display()))?;
    files.retain(|path| {
        path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    });
    files.sort();
    Ok(files)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();
    Ok(dirs)
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default()
}

fn dir_name(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or_default()
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn decode_still(path: &Path) -> Result<Pixmap> {
    let image = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to sniff {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    pixmap_from_rgba(&image.to_rgba8())
}

/// Decodes an emote image; GIFs keep every frame.
pub fn decode_emote(path: &Path, id: &str, name: &str, image_scale: f32) -> Result<TwitchEmote> {
    if is_gif(path) {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let frames = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("failed to read gif {}", path.display()))?
            .into_frames()
            .collect_frames()
            .with_context(|| format!("failed to decode gif frames {}", path.display()))?;
        return TwitchEmote::from_image_frames(id, name, frames, image_scale);
    }
    Ok(TwitchEmote::new_static(id, name, decode_still(path)?, image_scale))
}

fn load_emotes(dir: &Path) -> Result<Vec<TwitchEmote>> {
    image_files(dir)?
        .par_iter()
        .map(|path| {
            let (name, scale) = split_density(file_stem(path));
            decode_emote(path, name, name, scale)
        })
        .collect()
}

fn load_badges(dir: &Path) -> Result<Vec<ChatBadge>> {
    let mut badges = Vec::new();
    for badge_dir in subdirectories(dir)? {
        let mut versions = HashMap::new();
        let mut image_scale = 1.0f32;
        for path in image_files(&badge_dir)? {
            let (version, scale) = split_density(file_stem(&path));
            image_scale = image_scale.max(scale);
            versions.insert(version.to_owned(), decode_still(&path)?);
        }
        if !versions.is_empty() {
            badges.push(ChatBadge::new(dir_name(&badge_dir), versions, image_scale));
        }
    }
    Ok(badges)
}

fn load_cheers(dir: &Path) -> Result<Vec<CheerEmote>> {
    let mut cheers = Vec::new();
    for prefix_dir in subdirectories(dir)? {
        let prefix = dir_name(&prefix_dir).to_owned();
        let mut tiers = Vec::new();
        for path in image_files(&prefix_dir)? {
            let (stem, scale) = split_density(file_stem(&path));
            let Ok(min_bits) = stem.parse::<u32>() else {
                debug!(path = %path.display(), "skipping cheer image without a bits amount");
                continue;
            };
            let name = format!("{prefix}{min_bits}");
            let emote = decode_emote(&path, &name, &name, scale)?;
            tiers.push(CheerTier {
                min_bits,
                emote: std::sync::Arc::new(emote),
                color: cheer_tier_color(min_bits),
            });
        }
        if !tiers.is_empty() {
            cheers.push(CheerEmote::new(&prefix, tiers));
        }
    }
    Ok(cheers)
}

fn load_emoji(dir: &Path) -> Result<HashMap<String, Pixmap>> {
    image_files(dir)?
        .par_iter()
        .map(|path| -> Result<(String, Pixmap)> {
            Ok((emoji_key_from_stem(file_stem(path)), decode_still(path)?))
        })
        .collect()
}

fn load_avatars(dir: &Path, comments: &[Comment]) -> Result<HashMap<String, Pixmap>> {
    let files = image_files(dir)?;
    if files.is_empty() {
        return Ok(HashMap::new());
    }
    let by_name: HashMap<&str, &PathBuf> = files
        .iter()
        .filter_map(|path| path.file_name().and_then(|name| name.to_str()).map(|name| (name, path)))
        .collect();

    let mut decoded: HashMap<&Path, Pixmap> = HashMap::new();
    let mut avatars = HashMap::new();
    for url in comments
        .iter()
        .filter_map(|comment| comment.commenter.as_ref()?.logo.as_deref())
    {
        if avatars.contains_key(url) {
            continue;
        }
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default();
        let Some(path) = by_name.get(file_name) else {
            continue;
        };
        if !decoded.contains_key(path.as_path()) {
            decoded.insert(path.as_path(), decode_still(path)?);
        }
        if let Some(image) = decoded.get(path.as_path()) {
            avatars.insert(url.to_owned(), image.clone());
        }
    }
    Ok(avatars)
}
