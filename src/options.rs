use std::fmt;

use anyhow::{bail, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer};

/// Straight (non-premultiplied) RGBA color parsed from `#RRGGBB` or `#AARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn parse_hex(raw: &str) -> Result<Self> {
        let hex = raw.trim().trim_start_matches('#');
        let byte = |range: std::ops::Range<usize>| -> Result<u8> {
            hex.get(range)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| anyhow::anyhow!("invalid color '{raw}'"))
        };
        match hex.len() {
            6 => Ok(Self::opaque(byte(0..2)?, byte(2..4)?, byte(4..6)?)),
            8 => Ok(Self {
                a: byte(0..2)?,
                r: byte(2..4)?,
                g: byte(4..6)?,
                b: byte(6..8)?,
            }),
            _ => bail!("invalid color '{raw}': expected #RRGGBB or #AARRGGBB"),
        }
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    /// Relative luminance in `0.0..=1.0` (sRGB weights, no linearization).
    pub fn luminance(self) -> f32 {
        (0.2126 * f32::from(self.r) + 0.7152 * f32::from(self.g) + 0.0722 * f32::from(self.b))
            / 255.0
    }
}

impl fmt::Display for Rgba8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02X}{:02X}{:02X}{:02X}",
            self.a, self.r, self.g, self.b
        )
    }
}

impl<'de> Deserialize<'de> for Rgba8 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Self::parse_hex(&source).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmojiVendor {
    Twemoji,
    #[default]
    Noto,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Offset from the start of the video, `M:SS` or `H:MM:SS`.
    #[default]
    Relative,
    /// Wall-clock creation time, `HH:MM`.
    Utc,
    /// Wall-clock creation time, `HH:MM:SS`.
    UtcFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba,
    Bgra,
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::native()
    }
}

impl PixelFormat {
    /// Byte order of a native 32-bit color: BGRA on little-endian targets.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Bgra
        } else {
            Self::Rgba
        }
    }

    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        }
    }
}

/// Argument templates for the external encoder. Placeholders: `{fps}`, `{width}`,
/// `{height}`, `{save_path}`, `{max_int}`, `{pix_fmt}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EncoderOptions {
    pub program: String,
    pub input_args: String,
    pub output_args: String,
    pub mask_output_args: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_owned(),
            input_args: "-hide_banner -loglevel error -y -framerate {fps} -f rawvideo -pix_fmt {pix_fmt} -video_size {width}x{height} -i -".to_owned(),
            output_args: "-c:v libx264 -preset veryfast -crf 18 -pix_fmt yuv420p -t {max_int} \"{save_path}\"".to_owned(),
            mask_output_args: "-c:v libx264 -preset veryfast -crf 18 -pix_fmt yuv420p -t {max_int} \"{save_path}\"".to_owned(),
        }
    }
}

/// Every option the layout and frame pipeline reads. Sizes are pixels at the final
/// output resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChatRenderOptions {
    pub chat_width: u32,
    pub chat_height: u32,
    pub framerate: u32,
    /// Layout refreshes per second. `<= 0` refreshes on every tick.
    pub update_rate: f64,

    pub font_family: String,
    pub font_size: f32,
    pub message_font_style: FontStyle,
    pub username_font_style: FontStyle,

    pub message_color: Rgba8,
    pub background_color: Rgba8,
    pub alternate_background_color: Rgba8,
    pub outline_color: Rgba8,
    pub outline_size: f32,
    pub highlight_background_color: Rgba8,

    pub emote_scale: f32,
    pub badge_scale: f32,
    pub emoji_scale: f32,
    pub avatar_scale: f32,

    pub word_spacing: f32,
    pub emote_spacing: f32,
    pub side_padding: f32,
    pub vertical_padding: f32,
    pub accent_stroke_width: f32,
    pub accent_indent_width: f32,

    pub timestamps: bool,
    pub timestamp_format: TimestampFormat,
    pub avatars: bool,
    pub badges: bool,
    pub outline: bool,
    pub sub_messages: bool,
    pub alternate_backgrounds: bool,
    pub adjust_username_visibility: bool,
    pub generate_mask: bool,
    pub allow_unlisted_emotes: bool,
    pub dispersion: bool,

    pub emoji_vendor: EmojiVendor,
    pub ignore_users: Vec<String>,
    pub banned_words: Vec<String>,

    /// Render window override in seconds; defaults to the first/last comment.
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,

    /// How many already-applicable comments a cold base frame replays.
    pub cold_start_lookback: usize,
    /// Bits badge versions longer than this many characters render as `<n>K`.
    pub bits_tier_threshold_len: usize,

    pub pixel_format: PixelFormat,
    pub encoder: EncoderOptions,
}

impl Default for ChatRenderOptions {
    fn default() -> Self {
        Self {
            chat_width: 350,
            chat_height: 600,
            framerate: 30,
            update_rate: 1.0,
            font_family: "sans-serif".to_owned(),
            font_size: 24.0,
            message_font_style: FontStyle::Regular,
            username_font_style: FontStyle::Bold,
            message_color: Rgba8::WHITE,
            background_color: Rgba8::opaque(0x11, 0x11, 0x11),
            alternate_background_color: Rgba8::opaque(0x19, 0x19, 0x19),
            outline_color: Rgba8::BLACK,
            outline_size: 4.0,
            highlight_background_color: Rgba8::opaque(0x75, 0x5E, 0xBC).with_alpha(0x3C),
            emote_scale: 1.0,
            badge_scale: 1.0,
            emoji_scale: 1.0,
            avatar_scale: 1.0,
            word_spacing: 6.0,
            emote_spacing: 3.0,
            side_padding: 8.0,
            vertical_padding: 4.0,
            accent_stroke_width: 3.0,
            accent_indent_width: 12.0,
            timestamps: false,
            timestamp_format: TimestampFormat::Relative,
            avatars: false,
            badges: true,
            outline: false,
            sub_messages: true,
            alternate_backgrounds: false,
            adjust_username_visibility: true,
            generate_mask: false,
            allow_unlisted_emotes: true,
            dispersion: false,
            emoji_vendor: EmojiVendor::Noto,
            ignore_users: Vec::new(),
            banned_words: Vec::new(),
            start_time: None,
            end_time: None,
            cold_start_lookback: 100,
            bits_tier_threshold_len: 3,
            pixel_format: PixelFormat::native(),
            encoder: EncoderOptions::default(),
        }
    }
}

impl ChatRenderOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chat_width == 0 || self.chat_height == 0 {
            bail!(
                "chat dimensions must be positive, got {}x{}",
                self.chat_width,
                self.chat_height
            );
        }
        if self.framerate == 0 {
            bail!("framerate must be > 0");
        }
        if !self.update_rate.is_finite() {
            bail!("update_rate must be finite");
        }
        for (label, value) in [
            ("font_size", self.font_size),
            ("emote_scale", self.emote_scale),
            ("badge_scale", self.badge_scale),
            ("emoji_scale", self.emoji_scale),
            ("avatar_scale", self.avatar_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("{label} must be a positive finite number, got {value}");
            }
        }
        for (label, value) in [
            ("word_spacing", self.word_spacing),
            ("emote_spacing", self.emote_spacing),
            ("side_padding", self.side_padding),
            ("vertical_padding", self.vertical_padding),
            ("accent_stroke_width", self.accent_stroke_width),
            ("accent_indent_width", self.accent_indent_width),
            ("outline_size", self.outline_size),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{label} must be a non-negative finite number, got {value}");
            }
        }
        if self.side_padding * 2.0 >= self.chat_width as f32 {
            bail!(
                "side_padding {} leaves no room inside a {}px wide chat",
                self.side_padding,
                self.chat_width
            );
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                bail!("end_time {end} is before start_time {start}");
            }
        }
        if self.font_family.trim().is_empty() {
            bail!("font_family must not be empty");
        }
        Ok(())
    }

    /// Height of one layout line.
    pub fn section_height(&self) -> u32 {
        (self.font_size * 1.7).ceil().max(1.0) as u32
    }

    /// Scale relative to the 24px reference size every image scale is expressed in.
    pub fn reference_scale(&self) -> f32 {
        self.font_size / 24.0
    }

    /// Right edge a line may not cross.
    pub fn max_line_x(&self) -> f32 {
        self.chat_width as f32 - self.side_padding
    }

    /// Ticks between layout refreshes.
    pub fn update_interval_ticks(&self) -> u64 {
        if self.update_rate <= 0.0 {
            return 1;
        }
        ((f64::from(self.framerate) / self.update_rate).round() as u64).max(1)
    }

    pub fn background_opacity(&self) -> f32 {
        f32::from(self.background_color.a) / 255.0
    }
}
