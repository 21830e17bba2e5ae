//! Emoji detection and longest-match sequence lookup.

use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

const VARIATION_SELECTOR_16: char = '\u{FE0F}';

/// Emoji image key for a code point sequence: lowercase hex code points joined by
/// `-`, with variation selector 16 removed (`"1f468-200d-1f469"`).
pub fn emoji_key(text: &str) -> String {
    text.chars()
        .filter(|ch| *ch != VARIATION_SELECTOR_16)
        .map(|ch| format!("{:x}", ch as u32))
        .collect::<Vec<_>>()
        .join("-")
}

/// True when `token` contains anything that looks like an emoji.
pub fn looks_like_emoji(token: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"[\p{Extended_Pictographic}\p{Regional_Indicator}\x{20E3}]").ok()
        })
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(token))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiSequence {
    pub key: String,
    codepoints: Vec<char>,
}

impl EmojiSequence {
    pub fn len(&self) -> usize {
        self.codepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codepoints.is_empty()
    }
}

/// Piece of a token after emoji splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmojiPiece {
    Text(String),
    /// Image key and the source text it replaces.
    Emoji { key: String, text: String },
}

/// Every emoji sequence an image exists for, longest first.
#[derive(Debug, Clone, Default)]
pub struct EmojiTable {
    sequences: Vec<EmojiSequence>,
}

impl EmojiTable {
    /// Builds the table from emoji image keys. Keys that are not valid hex code
    /// point sequences are skipped.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut sequences = keys
            .into_iter()
            .filter_map(|key| {
                let codepoints = key
                    .split('-')
                    .map(|part| u32::from_str_radix(part, 16).ok().and_then(char::from_u32))
                    .collect::<Option<Vec<_>>>()?;
                let codepoints = codepoints
                    .into_iter()
                    .filter(|ch| *ch != VARIATION_SELECTOR_16)
                    .collect::<Vec<_>>();
                if codepoints.is_empty() {
                    return None;
                }
                Some(EmojiSequence {
                    key: key.to_owned(),
                    codepoints,
                })
            })
            .collect::<Vec<_>>();
        sequences.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.key.cmp(&b.key)));
        sequences.dedup_by(|a, b| a.codepoints == b.codepoints);
        Self { sequences }
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Longest known sequence `text` starts with, ignoring variation selectors.
    /// Returns the sequence and how many chars of `text` it covers.
    pub fn longest_prefix_match(&self, text: &str) -> Option<(&EmojiSequence, usize)> {
        let chars = text.chars().collect::<Vec<_>>();
        let stripped = chars
            .iter()
            .copied()
            .filter(|ch| *ch != VARIATION_SELECTOR_16)
            .collect::<Vec<_>>();
        if stripped.is_empty() {
            return None;
        }

        let candidates = self
            .sequences
            .par_iter()
            .filter(|sequence| stripped.starts_with(&sequence.codepoints))
            .collect::<Vec<_>>();
        let best = candidates.into_iter().max_by_key(|sequence| sequence.len())?;

        let mut matched = 0;
        let mut consumed = 0;
        for ch in &chars {
            if matched == best.len() && *ch != VARIATION_SELECTOR_16 {
                break;
            }
            consumed += 1;
            if *ch != VARIATION_SELECTOR_16 {
                matched += 1;
            }
        }
        Some((best, consumed))
    }

    /// Splits `token` into emoji and text pieces by grapheme cluster. Adjacent text
    /// is merged into one piece.
    pub fn split(&self, token: &str) -> Vec<EmojiPiece> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        for grapheme in token.graphemes(true) {
            match self.longest_prefix_match(grapheme) {
                Some((sequence, consumed)) => {
                    if !text.is_empty() {
                        pieces.push(EmojiPiece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(EmojiPiece::Emoji {
                        key: sequence.key.clone(),
                        text: grapheme.chars().take(consumed).collect(),
                    });
                    let rest = grapheme
                        .chars()
                        .skip(consumed)
                        .filter(|ch| *ch != VARIATION_SELECTOR_16)
                        .collect::<String>();
                    text.push_str(&rest);
                }
                None => text.push_str(grapheme),
            }
        }
        if !text.is_empty() {
            pieces.push(EmojiPiece::Text(text));
        }
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::{emoji_key, looks_like_emoji, EmojiPiece, EmojiTable};

    fn table() -> EmojiTable {
        EmojiTable::from_keys(["1f600", "1f468", "1f469", "1f468-200d-1f469", "2764", "1f1fa-1f1f8"])
    }

    #[test]
    fn keys_drop_variation_selectors() {
        assert_eq!(emoji_key("\u{2764}\u{FE0F}"), "2764");
        assert_eq!(emoji_key("👨\u{200D}👩"), "1f468-200d-1f469");
    }

    #[test]
    fn table_orders_longest_first() {
        let table = table();
        assert_eq!(table.len(), 6);
        assert_eq!(table.sequences[0].key, "1f468-200d-1f469");
    }

    #[test]
    fn longest_match_wins_over_prefix() {
        let table = table();
        let (sequence, consumed) = table
            .longest_prefix_match("👨\u{200D}👩")
            .expect("family should match");
        assert_eq!(sequence.key, "1f468-200d-1f469");
        assert_eq!(consumed, 3);

        let (sequence, consumed) = table
            .longest_prefix_match("\u{2764}\u{FE0F}")
            .expect("heart should match");
        assert_eq!(sequence.key, "2764");
        assert_eq!(consumed, 2);
        assert!(table.longest_prefix_match("a").is_none());
    }

    #[test]
    fn split_separates_text_and_emoji() {
        let table = table();
        assert_eq!(
            table.split("hi😀there🇺🇸"),
            vec![
                EmojiPiece::Text("hi".to_owned()),
                EmojiPiece::Emoji {
                    key: "1f600".to_owned(),
                    text: "😀".to_owned(),
                },
                EmojiPiece::Text("there".to_owned()),
                EmojiPiece::Emoji {
                    key: "1f1fa-1f1f8".to_owned(),
                    text: "🇺🇸".to_owned(),
                },
            ]
        );
        assert_eq!(table.split("plain"), vec![EmojiPiece::Text("plain".to_owned())]);
    }

    #[test]
    fn detection_matches_pictographs_and_flags() {
        assert!(looks_like_emoji("ok😀"));
        assert!(looks_like_emoji("🇺🇸"));
        assert!(!looks_like_emoji("hello"));
    }
}
