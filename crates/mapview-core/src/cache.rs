use std::collections::{HashMap, HashSet};

use crate::grid::{TileBounds, TileKey};
use crate::texture::TextureStore;

#[derive(Debug)]
pub struct CacheEntry<T> {
    /// Layer the texture was fetched at.
    pub layer: u32,
    pub bounds: TileBounds,
    pub width: u32,
    pub height: u32,
    pub texture: T,
    last_used: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(layer: u32, bounds: TileBounds, width: u32, height: u32, texture: T) -> Self {
        Self {
            layer,
            bounds,
            width,
            height,
            texture,
            last_used: 0,
        }
    }
}

/// GPU-resident tiles, one per key. Every handle that enters through `put`
/// leaves through exactly one of `put` (displaced), `evict` or `release_all`.
#[derive(Debug)]
pub struct TileCache<T> {
    entries: HashMap<TileKey, CacheEntry<T>>,
    clock: u64,
}

impl<T> Default for TileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TileCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &TileKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn put<S>(&mut self, key: TileKey, mut entry: CacheEntry<T>, store: &mut S)
    where
        S: TextureStore<Handle = T>,
    {
        self.clock += 1;
        entry.last_used = self.clock;
        if let Some(previous) = self.entries.remove(&key) {
            tracing::trace!(
                ?key,
                previous_layer = previous.layer,
                layer = entry.layer,
                "replacing cached tile"
            );
            store.release(previous.texture);
        }
        self.entries.insert(key, entry);
        metrics::gauge!("mapview_tile_cache_entries").set(self.entries.len() as f64);
    }

    /// Marks the given keys as used by the current frame.
    pub fn touch<'a>(&mut self, keys: impl IntoIterator<Item = &'a TileKey>) {
        self.clock += 1;
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.last_used = self.clock;
            }
        }
    }

    /// Releases least-recently-used entries outside `keep` until at most
    /// `capacity` remain. Entries in `keep` stay even if that overshoots.
    pub fn evict<S>(&mut self, capacity: usize, keep: &HashSet<TileKey>, store: &mut S) -> usize
    where
        S: TextureStore<Handle = T>,
    {
        if self.entries.len() <= capacity {
            return 0;
        }
        let mut candidates: Vec<(TileKey, u64)> = self
            .entries
            .iter()
            .filter(|(key, _)| !keep.contains(key))
            .map(|(key, entry)| (*key, entry.last_used))
            .collect();
        candidates.sort_by_key(|(_, last_used)| *last_used);

        let mut evicted = 0;
        for (key, _) in candidates {
            if self.entries.len() <= capacity {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                store.release(entry.texture);
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.entries.len(),
                capacity,
                "evicted cached tiles"
            );
            metrics::counter!("mapview_tile_cache_evictions_total").increment(evicted as u64);
            metrics::gauge!("mapview_tile_cache_entries").set(self.entries.len() as f64);
        }
        evicted
    }

    pub fn release_all<S>(&mut self, store: &mut S) -> usize
    where
        S: TextureStore<Handle = T>,
    {
        let released = self.entries.len();
        for (_, entry) in self.entries.drain() {
            store.release(entry.texture);
        }
        metrics::gauge!("mapview_tile_cache_entries").set(0.0);
        released
    }
}

#[derive(Debug)]
pub struct PreviewEntry<T> {
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    pub texture: T,
}

/// The single whole-world fallback texture.
#[derive(Debug)]
pub struct PreviewSlot<T> {
    entry: Option<PreviewEntry<T>>,
}

impl<T> Default for PreviewSlot<T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<T> PreviewSlot<T> {
    pub fn get(&self) -> Option<&PreviewEntry<T>> {
        self.entry.as_ref()
    }

    pub fn replace<S>(&mut self, entry: PreviewEntry<T>, store: &mut S)
    where
        S: TextureStore<Handle = T>,
    {
        if let Some(previous) = self.entry.replace(entry) {
            store.release(previous.texture);
        }
    }

    pub fn release<S>(&mut self, store: &mut S) -> bool
    where
        S: TextureStore<Handle = T>,
    {
        match self.entry.take() {
            Some(previous) => {
                store.release(previous.texture);
                true
            }
            None => false,
        }
    }
}
