use super::SvdTextureFeatures;
use moka::sync::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of SVD cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub capacity: u64,
}

/// Bounded LRU of decompositions keyed by a full-content hash of the input matrix.
pub struct SvdCache {
    entries: Cache<blake3::Hash, Arc<SvdTextureFeatures>>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for SvdCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvdCache").field("stats", &self.stats()).finish()
    }
}

/// Everything that changes the decomposition goes into the key.
pub struct CacheKeyParts<'a> {
    pub matrix: &'a [f32],
    pub rows: usize,
    pub cols: usize,
    pub rank: usize,
    pub power_iterations: usize,
    pub seed: u64,
}

impl SvdCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(parts: &CacheKeyParts<'_>) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for header in [
            parts.rows as u64,
            parts.cols as u64,
            parts.rank as u64,
            parts.power_iterations as u64,
            parts.seed,
        ] {
            hasher.update(&header.to_le_bytes());
        }
        hasher.update(bytemuck::cast_slice::<f32, u8>(parts.matrix));
        hasher.finalize()
    }

    pub fn get(&self, key: &blake3::Hash) -> Option<Arc<SvdTextureFeatures>> {
        let found = self.entries.get(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: blake3::Hash, value: Arc<SvdTextureFeatures>) {
        self.entries.insert(key, value);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            entries: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }
}
