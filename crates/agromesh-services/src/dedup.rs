//! Fingerprint dedup cache: loop and duplicate suppression for the flood.
//!
//! A fixed-capacity FIFO set of recently seen fingerprints, stored as a ring
//! buffer (`head`, `count`). When full, an insert evicts the logically oldest
//! entry. Entries leave only under capacity pressure, never by age.
//!
//! Capacity is min(MAX_DEDUP_CAPACITY, known-node count), so it is small and
//! membership is a linear scan. Owned by the receive task; no internal lock.
//!
//! Every insert writes a snapshot through the injected `DedupStore` so a cold
//! start can reload what the node had already seen.

use std::path::PathBuf;

use agromesh_core::Fingerprint;
use serde::{Deserialize, Serialize};

/// Upper bound on cache capacity regardless of mesh size.
pub const MAX_DEDUP_CAPACITY: usize = 10;

/// Capacity for a mesh with `known_nodes` entries in the node list.
pub fn capacity_for(known_nodes: usize) -> usize {
    known_nodes.min(MAX_DEDUP_CAPACITY)
}

// ── Persistence hook ──────────────────────────────────────────────────────────

/// Saved cache state: capacity plus live entries, oldest first, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupSnapshot {
    pub capacity: usize,
    pub entries: Vec<String>,
}

impl DedupSnapshot {
    /// Decoded entries, oldest first. Malformed entries are skipped.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.entries
            .iter()
            .filter_map(|h| {
                let bytes = hex::decode(h).ok()?;
                let arr: [u8; 32] = bytes.try_into().ok()?;
                Some(Fingerprint(arr))
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("dedup store I/O on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("dedup snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Storage engine behind the cache. The engine itself is not the cache's concern.
pub trait DedupStore: Send {
    fn save(&mut self, snapshot: &DedupSnapshot) -> Result<(), StoreError>;
    fn load(&mut self) -> Result<Option<DedupSnapshot>, StoreError>;
}

/// Store that keeps nothing. Every cold start begins empty.
#[derive(Debug, Default)]
pub struct NullDedupStore;

impl DedupStore for NullDedupStore {
    fn save(&mut self, _snapshot: &DedupSnapshot) -> Result<(), StoreError> {
        Ok(())
    }

    fn load(&mut self) -> Result<Option<DedupSnapshot>, StoreError> {
        Ok(None)
    }
}

/// JSON snapshot on disk, replaced atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct FileDedupStore {
    path: PathBuf,
}

impl FileDedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl DedupStore for FileDedupStore {
    fn save(&mut self, snapshot: &DedupSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| StoreError::Io(tmp_path.clone(), e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Io(self.path.clone(), e))?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<DedupSnapshot>, StoreError> {
        let text = match std::fs::read(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(self.path.clone(), e)),
        };
        Ok(Some(serde_json::from_slice(&text)?))
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

pub struct DedupCache {
    /// Ring storage, always exactly `capacity` slots.
    slots: Vec<Fingerprint>,
    head: usize,
    count: usize,
    store: Box<dyn DedupStore>,
}

impl DedupCache {
    /// Empty cache with the given capacity.
    pub fn new(capacity: usize, store: Box<dyn DedupStore>) -> Self {
        let mut cache = Self {
            slots: Vec::new(),
            head: 0,
            count: 0,
            store,
        };
        cache.init(capacity);
        cache
    }

    /// Cache seeded from the store's last snapshot, if any.
    ///
    /// Keeps the newest entries that fit `capacity`. A failed load starts empty.
    pub fn restore(capacity: usize, mut store: Box<dyn DedupStore>) -> Self {
        let loaded = match store.load() {
            Ok(Some(snapshot)) => snapshot.fingerprints(),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load dedup snapshot, starting empty");
                Vec::new()
            }
        };
        let mut cache = Self::new(capacity, store);
        cache.refill(&loaded);
        if cache.count > 0 {
            tracing::info!(entries = cache.count, capacity, "restored dedup cache");
        }
        cache
    }

    /// Reset to an empty cache of `capacity` zeroed slots.
    pub fn init(&mut self, capacity: usize) {
        self.slots = vec![Fingerprint::default(); capacity];
        self.head = 0;
        self.count = 0;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Has this fingerprint been seen (and not yet evicted)?
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.live().any(|fp| fp == fingerprint)
    }

    /// Record a fingerprint, evicting the oldest entry if full.
    ///
    /// Returns false if it was already present (nothing changes) or the
    /// cache has zero capacity.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if self.capacity() == 0 || self.contains(&fingerprint) {
            return false;
        }
        self.push(fingerprint);
        self.persist();
        true
    }

    /// Change capacity after the known-node list is reloaded.
    ///
    /// The newest entries that fit are kept, so a shrink leaves the cache
    /// saturated at the new size.
    pub fn resize(&mut self, capacity: usize) {
        if capacity == self.capacity() {
            return;
        }
        let live: Vec<Fingerprint> = self.live().copied().collect();
        self.init(capacity);
        self.refill(&live);
        tracing::debug!(capacity, entries = self.count, "dedup cache resized");
        self.persist();
    }

    /// Live entries, oldest first.
    pub fn snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            capacity: self.capacity(),
            entries: self.live().map(|fp| hex::encode(fp.as_bytes())).collect(),
        }
    }

    fn live(&self) -> impl Iterator<Item = &Fingerprint> + '_ {
        let cap = self.capacity();
        (0..self.count).map(move |i| &self.slots[(self.head + i) % cap])
    }

    fn push(&mut self, fingerprint: Fingerprint) {
        let cap = self.capacity();
        if self.count < cap {
            self.slots[(self.head + self.count) % cap] = fingerprint;
            self.count += 1;
        } else {
            self.slots[self.head] = fingerprint;
            self.head = (self.head + 1) % cap;
        }
    }

    /// Push entries (oldest first) without persisting; only the newest that fit survive.
    fn refill(&mut self, entries: &[Fingerprint]) {
        let cap = self.capacity();
        if cap == 0 {
            return;
        }
        let skip = entries.len().saturating_sub(cap);
        for fp in &entries[skip..] {
            if !self.contains(fp) {
                self.push(*fp);
            }
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(error = %e, "failed to persist dedup cache");
        }
    }
}
