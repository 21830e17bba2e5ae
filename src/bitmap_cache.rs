use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use tiny_skia::Pixmap;

/// Pool limits.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained pixmaps per (w,h) bucket.
    pub max_surfaces_per_bucket: usize,
}

impl Default for SurfacePoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 64 * 1024 * 1024,
            max_surfaces_per_bucket: 32,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SurfacePoolStats {
    pub retained_surfaces: usize,
    pub retained_bytes: usize,
    pub alloc_surfaces: u64,
    pub reused_surfaces: u64,
    pub dropped_on_release: u64,
}

/// Bounded pool of section-sized pixmaps, keyed by `(width, height)`.
///
/// Borrowed pixmaps are always cleared to transparent.
pub struct SurfacePool {
    opts: SurfacePoolOpts,
    stats: SurfacePoolStats,
    buckets: HashMap<(u32, u32), Vec<Pixmap>>,
}

impl SurfacePool {
    pub fn new(opts: SurfacePoolOpts) -> Self {
        Self {
            opts,
            stats: SurfacePoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    pub fn stats(&self) -> SurfacePoolStats {
        self.stats.clone()
    }

    pub fn borrow(&mut self, width: u32, height: u32) -> Result<Pixmap> {
        if let Some(mut pixmap) = self
            .buckets
            .get_mut(&(width, height))
            .and_then(Vec::pop)
        {
            self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
            self.stats.retained_bytes = self
                .stats
                .retained_bytes
                .saturating_sub(byte_len(width, height));
            self.stats.reused_surfaces = self.stats.reused_surfaces.saturating_add(1);
            pixmap.fill(tiny_skia::Color::TRANSPARENT);
            return Ok(pixmap);
        }

        self.stats.alloc_surfaces = self.stats.alloc_surfaces.saturating_add(1);
        Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("failed to allocate {width}x{height} section pixmap"))
    }

    pub fn release(&mut self, pixmap: Pixmap) {
        let key = (pixmap.width(), pixmap.height());
        let bytes = byte_len(key.0, key.1);
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        let bucket = self.buckets.entry(key).or_default();
        if bucket.len() >= self.opts.max_surfaces_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        bucket.push(pixmap);
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }

    pub fn release_all(&mut self, pixmaps: impl IntoIterator<Item = Pixmap>) {
        for pixmap in pixmaps {
            self.release(pixmap);
        }
    }
}

impl Default for SurfacePool {
    fn default() -> Self {
        Self::new(SurfacePoolOpts::default())
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4)
}

/// Rendered timestamp column bitmaps keyed by their text. Oldest entries are evicted
/// first once `capacity` is reached.
pub struct TimestampMemo {
    capacity: usize,
    order: VecDeque<String>,
    bitmaps: HashMap<String, Pixmap>,
}

impl TimestampMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            bitmaps: HashMap::new(),
        }
    }

    pub fn get(&self, text: &str) -> Option<&Pixmap> {
        self.bitmaps.get(text)
    }

    pub fn insert(&mut self, text: String, bitmap: Pixmap) {
        if self.bitmaps.contains_key(&text) {
            self.bitmaps.insert(text, bitmap);
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.bitmaps.remove(&oldest);
            }
        }
        self.order.push_back(text.clone());
        self.bitmaps.insert(text, bitmap);
    }

    pub fn len(&self) -> usize {
        self.bitmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }
}

/// Reusable section buffers plus memoized bitmaps that are expensive to redraw.
pub struct BitmapCache {
    pub pool: SurfacePool,
    pub timestamps: TimestampMemo,
}

impl BitmapCache {
    pub fn new() -> Self {
        Self {
            pool: SurfacePool::default(),
            timestamps: TimestampMemo::new(512),
        }
    }
}

impl Default for BitmapCache {
    fn default() -> Self {
        Self::new()
    }
}
