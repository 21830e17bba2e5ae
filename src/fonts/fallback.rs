use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::{FontProvider, Typeface};

/// Code point → face able to draw it, filled lazily from a [`FontProvider`].
pub struct FontFallbackCache {
    provider: Box<dyn FontProvider>,
    by_char: HashMap<char, Arc<dyn Typeface>>,
    default_face: Arc<dyn Typeface>,
    warned_missing: bool,
}

impl FontFallbackCache {
    pub fn new(provider: Box<dyn FontProvider>, default_face: Arc<dyn Typeface>) -> Self {
        Self {
            provider,
            by_char: HashMap::new(),
            default_face,
            warned_missing: false,
        }
    }

    /// The cached face for `ch`. Characters no known font covers resolve to the
    /// default face; the first such character is logged once per run.
    pub fn face_for(&mut self, ch: char) -> Arc<dyn Typeface> {
        if let Some(face) = self.by_char.get(&ch) {
            return Arc::clone(face);
        }
        let face = match self.provider.face_for_char(ch) {
            Some(face) => face,
            None => {
                if !self.warned_missing {
                    self.warned_missing = true;
                    warn!(
                        codepoint = %format!("U+{:04X}", ch as u32),
                        "no installed font can render this character; further misses are not logged"
                    );
                }
                Arc::clone(&self.default_face)
            }
        };
        self.by_char.insert(ch, Arc::clone(&face));
        face
    }

    pub fn cached_len(&self) -> usize {
        self.by_char.len()
    }

    pub fn warned_missing(&self) -> bool {
        self.warned_missing
    }
}
