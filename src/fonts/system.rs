use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fontdb::{Database, Family, Query, Stretch, Style, Weight, ID};
use rustybuzz::ttf_parser;
use tracing::{debug, info};

use super::{BoxTypeface, FontProvider, FontdueTypeface, Typeface};
use crate::options::FontStyle;

/// Fonts installed on the machine (plus any extra directories), indexed with fontdb.
pub struct SystemFontProvider {
    db: Database,
    loaded: HashMap<ID, Arc<dyn Typeface>>,
    /// Regular-weight upright faces first, so fallback prefers plain styles.
    scan_order: Vec<ID>,
}

impl SystemFontProvider {
    pub fn new(extra_dirs: &[&Path]) -> Self {
        let mut db = Database::new();
        db.load_system_fonts();
        for dir in extra_dirs {
            db.load_fonts_dir(dir);
        }
        info!(faces = db.len(), "indexed system fonts");

        let mut scan_order = db
            .faces()
            .map(|face| {
                let plain = face.style == Style::Normal && face.weight == Weight::NORMAL;
                (if plain { 0 } else { 1 }, face.id)
            })
            .collect::<Vec<_>>();
        scan_order.sort_by_key(|(rank, _)| *rank);

        Self {
            db,
            loaded: HashMap::new(),
            scan_order: scan_order.into_iter().map(|(_, id)| id).collect(),
        }
    }

    fn load(&mut self, id: ID) -> Result<Arc<dyn Typeface>> {
        if let Some(face) = self.loaded.get(&id) {
            return Ok(Arc::clone(face));
        }
        let family = self
            .db
            .face(id)
            .and_then(|info| info.families.first())
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| "unknown".to_owned());
        let face = self
            .db
            .with_face_data(id, |data, index| {
                FontdueTypeface::from_bytes(&family, data.to_vec(), index)
            })
            .ok_or_else(|| anyhow!("font data for '{family}' is unavailable"))??;
        let face: Arc<dyn Typeface> = Arc::new(face);
        debug!(family = %family, "loaded font face");
        self.loaded.insert(id, Arc::clone(&face));
        Ok(face)
    }

    fn covers(&self, id: ID, ch: char) -> bool {
        self.db
            .with_face_data(id, |data, index| {
                ttf_parser::Face::parse(data, index)
                    .ok()
                    .and_then(|face| face.glyph_index(ch))
                    .is_some_and(|glyph| glyph.0 != 0)
            })
            .unwrap_or(false)
    }
}

impl FontProvider for SystemFontProvider {
    fn family(&mut self, family: &str, style: FontStyle) -> Result<Arc<dyn Typeface>> {
        let families = match family.trim().to_ascii_lowercase().as_str() {
            "sans-serif" | "sans" => vec![Family::SansSerif],
            "serif" => vec![Family::Serif],
            "monospace" => vec![Family::Monospace],
            _ => vec![Family::Name(family), Family::SansSerif],
        };
        let query = Query {
            families: &families,
            weight: if style.is_bold() {
                Weight::BOLD
            } else {
                Weight::NORMAL
            },
            stretch: Stretch::Normal,
            style: if style.is_italic() {
                Style::Italic
            } else {
                Style::Normal
            },
        };
        match self.db.query(&query) {
            Some(id) => self
                .load(id)
                .with_context(|| format!("failed to load font family '{family}'")),
            None => {
                tracing::warn!(
                    family = %family,
                    "no installed font matches; drawing placeholder boxes"
                );
                Ok(Arc::new(BoxTypeface::named(family)))
            }
        }
    }

    fn face_for_char(&mut self, ch: char) -> Option<Arc<dyn Typeface>> {
        let id = self
            .scan_order
            .iter()
            .copied()
            .find(|id| self.covers(*id, ch))?;
        self.load(id).ok()
    }
}

/// A provider over an explicit list of faces. The first face is returned for every
/// family request; fallback scans the list in order.
pub struct FixedFontProvider {
    faces: Vec<Arc<dyn Typeface>>,
}

impl FixedFontProvider {
    pub fn new(primary: Arc<dyn Typeface>) -> Self {
        Self {
            faces: vec![primary],
        }
    }

    pub fn with_fallback(mut self, face: Arc<dyn Typeface>) -> Self {
        self.faces.push(face);
        self
    }

    pub fn from_files(paths: &[&Path]) -> Result<Self> {
        let mut faces: Vec<Arc<dyn Typeface>> = Vec::with_capacity(paths.len());
        for path in paths {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read font file '{}'", path.display()))?;
            let family = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "font".to_owned());
            faces.push(Arc::new(FontdueTypeface::from_bytes(&family, data, 0)?));
        }
        if faces.is_empty() {
            return Err(anyhow!("at least one font file is required"));
        }
        Ok(Self { faces })
    }
}

impl FontProvider for FixedFontProvider {
    fn family(&mut self, _family: &str, _style: FontStyle) -> Result<Arc<dyn Typeface>> {
        self.faces
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("font provider has no faces"))
    }

    fn face_for_char(&mut self, ch: char) -> Option<Arc<dyn Typeface>> {
        self.faces.iter().find(|face| face.has_glyph(ch)).cloned()
    }
}
