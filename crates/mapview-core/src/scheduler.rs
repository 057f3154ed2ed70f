use std::collections::{HashMap, HashSet};

use image::RgbaImage;

use crate::cache::{CacheEntry, TileCache};
use crate::error::MapviewError;
use crate::grid::{ActiveTile, TileBounds, TileKey};
use crate::source::{CancelToken, TileQuery};
use crate::texture::TextureStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchTarget {
    Preview,
    Tile(TileKey),
}

#[derive(Debug, Clone)]
pub struct FetchJob {
    pub request_id: u64,
    pub target: FetchTarget,
    pub layer: u32,
    pub bounds: TileBounds,
    pub query: TileQuery,
    pub cancel: CancelToken,
}

impl FetchJob {
    pub fn complete(&self, outcome: FetchOutcome) -> FetchCompletion {
        FetchCompletion {
            request_id: self.request_id,
            target: self.target,
            layer: self.layer,
            bounds: self.bounds,
            outcome,
        }
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Loaded(RgbaImage),
    Cancelled,
    Failed(MapviewError),
}

#[derive(Debug)]
pub struct FetchCompletion {
    pub request_id: u64,
    pub target: FetchTarget,
    pub layer: u32,
    pub bounds: TileBounds,
    pub outcome: FetchOutcome,
}

/// Hands fetch jobs to whatever performs them. Returns `false` when the job
/// could not be queued.
pub trait Dispatch {
    fn dispatch(&mut self, job: FetchJob) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// The cache already holds this tile at the requested detail or better.
    Cached,
    /// An equal-or-better fetch is already running.
    InFlight,
    Issued { superseded: bool },
    Refused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub issued: usize,
    pub superseded: usize,
    pub cancelled: usize,
    pub cached: usize,
    pub in_flight: usize,
    pub refused: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEffect {
    Resolved,
    Cancelled,
    Failed,
    /// The completion belongs to a request that is no longer current for its key.
    Stale,
}

#[derive(Debug)]
struct InFlightRequest {
    layer: u32,
    request_id: u64,
    cancel: CancelToken,
}

/// Tracks at most one outstanding fetch per tile key.
#[derive(Debug, Default)]
pub struct FetchScheduler {
    in_flight: HashMap<TileKey, InFlightRequest>,
    next_request_id: u64,
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_layer(&self, key: &TileKey) -> Option<u32> {
        self.in_flight.get(key).map(|request| request.layer)
    }

    pub fn request<T, D>(
        &mut self,
        tile: &ActiveTile,
        requested_layer: u32,
        cache: &TileCache<T>,
        dispatcher: &mut D,
    ) -> RequestDecision
    where
        D: Dispatch + ?Sized,
    {
        if cache
            .get(&tile.key)
            .is_some_and(|entry| entry.layer >= requested_layer)
        {
            return RequestDecision::Cached;
        }
        if self
            .in_flight
            .get(&tile.key)
            .is_some_and(|request| request.layer >= requested_layer)
        {
            return RequestDecision::InFlight;
        }

        let superseded = self.cancel(&tile.key);
        let request_id = self.allocate_request_id();
        let cancel = CancelToken::new();
        let job = FetchJob {
            request_id,
            target: FetchTarget::Tile(tile.key),
            layer: requested_layer,
            bounds: tile.bounds,
            query: tile.bounds.query(requested_layer),
            cancel: cancel.clone(),
        };
        if !dispatcher.dispatch(job) {
            tracing::warn!(key = ?tile.key, request_id, "fetch dispatcher refused tile job");
            return RequestDecision::Refused;
        }
        tracing::trace!(
            key = ?tile.key,
            layer = requested_layer,
            request_id,
            superseded,
            "tile fetch issued"
        );
        metrics::counter!("mapview_tile_requests_total").increment(1);
        self.in_flight.insert(
            tile.key,
            InFlightRequest {
                layer: requested_layer,
                request_id,
                cancel,
            },
        );
        RequestDecision::Issued { superseded }
    }

    /// Brings in-flight work in line with a freshly computed active set:
    /// fetches for tiles that left the set are cancelled, then every active
    /// tile is requested at `requested_layer`.
    pub fn reconcile<T, D>(
        &mut self,
        active: &[ActiveTile],
        requested_layer: u32,
        cache: &TileCache<T>,
        dispatcher: &mut D,
    ) -> ReconcileSummary
    where
        D: Dispatch + ?Sized,
    {
        let keys: HashSet<TileKey> = active.iter().map(|tile| tile.key).collect();
        let mut summary = ReconcileSummary {
            cancelled: self.cancel_missing(&keys),
            ..ReconcileSummary::default()
        };
        for tile in active {
            match self.request(tile, requested_layer, cache, dispatcher) {
                RequestDecision::Cached => summary.cached += 1,
                RequestDecision::InFlight => summary.in_flight += 1,
                RequestDecision::Issued { superseded } => {
                    summary.issued += 1;
                    if superseded {
                        summary.superseded += 1;
                    }
                }
                RequestDecision::Refused => summary.refused += 1,
            }
        }
        metrics::gauge!("mapview_tiles_in_flight").set(self.in_flight.len() as f64);
        summary
    }

    pub fn cancel(&mut self, key: &TileKey) -> bool {
        match self.in_flight.remove(key) {
            Some(request) => {
                request.cancel.cancel();
                metrics::counter!("mapview_tile_cancellations_total").increment(1);
                true
            }
            None => false,
        }
    }

    pub fn cancel_missing(&mut self, active: &HashSet<TileKey>) -> usize {
        let stale: Vec<TileKey> = self
            .in_flight
            .keys()
            .filter(|key| !active.contains(key))
            .copied()
            .collect();
        for key in &stale {
            self.cancel(key);
        }
        if !stale.is_empty() {
            tracing::debug!(
                cancelled = stale.len(),
                "cancelled fetches for tiles that left the view"
            );
        }
        stale.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (_, request) in self.in_flight.drain() {
            request.cancel.cancel();
        }
        metrics::gauge!("mapview_tiles_in_flight").set(0.0);
        count
    }

    /// Applies a finished fetch. Only the completion of the key's current
    /// request may touch the cache; anything else is stale and dropped before
    /// its image is uploaded.
    pub fn complete<S>(
        &mut self,
        completion: FetchCompletion,
        cache: &mut TileCache<S::Handle>,
        store: &mut S,
    ) -> CompletionEffect
    where
        S: TextureStore,
    {
        let FetchTarget::Tile(key) = completion.target else {
            tracing::debug!(
                request_id = completion.request_id,
                "preview completion routed to tile scheduler"
            );
            return CompletionEffect::Stale;
        };
        let is_current = self
            .in_flight
            .get(&key)
            .is_some_and(|request| request.request_id == completion.request_id);
        if !is_current {
            tracing::trace!(
                ?key,
                request_id = completion.request_id,
                "discarding stale tile completion"
            );
            return CompletionEffect::Stale;
        }
        self.in_flight.remove(&key);
        metrics::gauge!("mapview_tiles_in_flight").set(self.in_flight.len() as f64);

        match completion.outcome {
            FetchOutcome::Loaded(image) => {
                let label = format!("tile {}/{}/{}", key.layer, key.col, key.row);
                match store.upload(&image, &label) {
                    Ok(texture) => {
                        let entry = CacheEntry::new(
                            completion.layer,
                            completion.bounds,
                            image.width(),
                            image.height(),
                            texture,
                        );
                        cache.put(key, entry, store);
                        record_outcome("loaded");
                        CompletionEffect::Resolved
                    }
                    Err(err) => {
                        tracing::warn!(?key, error = %err, "tile texture upload failed");
                        record_outcome("failed");
                        CompletionEffect::Failed
                    }
                }
            }
            FetchOutcome::Cancelled => {
                tracing::debug!(?key, "tile fetch cancelled");
                record_outcome("cancelled");
                CompletionEffect::Cancelled
            }
            FetchOutcome::Failed(err) => {
                tracing::warn!(?key, layer = completion.layer, error = %err, "tile fetch failed");
                record_outcome("failed");
                CompletionEffect::Failed
            }
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("mapview_tile_fetch_total", "outcome" => outcome).increment(1);
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingDispatcher;
    use super::*;
    use crate::cache::test_support::CountingStore;
    use crate::error::ErrorCode;

    fn tile(layer: u32, col: u32, row: u32) -> ActiveTile {
        ActiveTile {
            key: TileKey::new(layer, col, row),
            bounds: TileBounds {
                x0: f64::from(col) * 100.0,
                y0: f64::from(row) * 100.0,
                x1: f64::from(col + 1) * 100.0,
                y1: f64::from(row + 1) * 100.0,
            },
        }
    }

    fn loaded(job: &FetchJob) -> FetchCompletion {
        job.complete(FetchOutcome::Loaded(RgbaImage::new(2, 2)))
    }

    #[test]
    fn equal_or_higher_in_flight_request_is_left_alone() {
        let mut scheduler = FetchScheduler::new();
        let cache: TileCache<u32> = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(3, 0, 0);

        let first = scheduler.request(&target, 4, &cache, &mut dispatcher);
        assert_eq!(first, RequestDecision::Issued { superseded: false });
        let second = scheduler.request(&target, 3, &cache, &mut dispatcher);
        assert_eq!(second, RequestDecision::InFlight);
        let third = scheduler.request(&target, 4, &cache, &mut dispatcher);
        assert_eq!(third, RequestDecision::InFlight);

        assert_eq!(dispatcher.jobs.len(), 1);
        assert!(!dispatcher.jobs[0].cancel.is_cancelled());
        assert_eq!(scheduler.in_flight_layer(&target.key), Some(4));
    }

    #[test]
    fn higher_layer_request_supersedes_and_cancels() {
        let mut scheduler = FetchScheduler::new();
        let cache: TileCache<u32> = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(2, 1, 1);

        scheduler.request(&target, 2, &cache, &mut dispatcher);
        let decision = scheduler.request(&target, 3, &cache, &mut dispatcher);
        assert_eq!(decision, RequestDecision::Issued { superseded: true });
        assert!(dispatcher.jobs[0].cancel.is_cancelled());
        assert!(!dispatcher.jobs[1].cancel.is_cancelled());
        assert_eq!(scheduler.in_flight_len(), 1);
    }

    #[test]
    fn cached_tile_at_requested_detail_is_not_refetched() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore::default();
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(5, 2, 2);
        let handle = store.handle();
        let entry = CacheEntry::new(5, target.bounds, 2, 2, handle);
        cache.put(target.key, entry, &mut store);

        let same = scheduler.request(&target, 5, &cache, &mut dispatcher);
        assert_eq!(same, RequestDecision::Cached);
        let coarser = scheduler.request(&target, 4, &cache, &mut dispatcher);
        assert_eq!(coarser, RequestDecision::Cached);
        assert!(matches!(
            scheduler.request(&target, 6, &cache, &mut dispatcher),
            RequestDecision::Issued { .. }
        ));
    }

    #[test]
    fn reconcile_cancels_tiles_that_left_the_set() {
        let mut scheduler = FetchScheduler::new();
        let cache: TileCache<u32> = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();

        let before = [tile(6, 0, 0), tile(6, 1, 0)];
        let summary = scheduler.reconcile(&before, 6, &cache, &mut dispatcher);
        assert_eq!(summary.issued, 2);

        let after = [tile(6, 1, 0), tile(6, 2, 0)];
        let summary = scheduler.reconcile(&after, 6, &cache, &mut dispatcher);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.issued, 1);
        assert_eq!(summary.in_flight, 1);
        assert!(dispatcher.jobs[0].cancel.is_cancelled());
        assert!(!dispatcher.jobs[1].cancel.is_cancelled());
        assert_eq!(scheduler.in_flight_layer(&TileKey::new(6, 0, 0)), None);
    }

    #[test]
    fn success_populates_cache_and_clears_slot() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore::default();
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(4, 0, 1);

        scheduler.request(&target, 4, &cache, &mut dispatcher);
        let effect = scheduler.complete(loaded(&dispatcher.jobs[0]), &mut cache, &mut store);
        assert_eq!(effect, CompletionEffect::Resolved);
        assert_eq!(scheduler.in_flight_len(), 0);
        let entry = cache.get(&target.key).expect("cached");
        assert_eq!((entry.layer, entry.width, entry.height), (4, 2, 2));
    }

    #[test]
    fn cancelled_request_never_reaches_the_cache() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore::default();
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(2, 1, 1);

        scheduler.request(&target, 2, &cache, &mut dispatcher);
        scheduler.request(&target, 3, &cache, &mut dispatcher);

        // The superseded fetch finished anyway, after it was cancelled.
        let stale = scheduler.complete(loaded(&dispatcher.jobs[0]), &mut cache, &mut store);
        assert_eq!(stale, CompletionEffect::Stale);
        assert!(cache.is_empty());
        assert_eq!(store.next, 0, "stale image must not be uploaded");

        let fresh = scheduler.complete(loaded(&dispatcher.jobs[1]), &mut cache, &mut store);
        assert_eq!(fresh, CompletionEffect::Resolved);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&target.key).map(|entry| entry.layer), Some(3));
    }

    #[test]
    fn failure_leaves_cache_untouched_and_allows_reissue() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore::default();
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(6, 3, 3);

        scheduler.request(&target, 6, &cache, &mut dispatcher);
        let err = MapviewError::new(
            ErrorCode::Upstream,
            "x0/x1 and y0/y1 must define a positive area",
        );
        let failure = dispatcher.jobs[0].complete(FetchOutcome::Failed(err));
        let effect = scheduler.complete(failure, &mut cache, &mut store);
        assert_eq!(effect, CompletionEffect::Failed);
        assert!(cache.is_empty());
        assert_eq!(scheduler.in_flight_len(), 0);

        let retry = scheduler.request(&target, 6, &cache, &mut dispatcher);
        assert_eq!(retry, RequestDecision::Issued { superseded: false });
    }

    #[test]
    fn cancelled_outcome_clears_slot_without_cache_mutation() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore::default();
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(6, 0, 0);

        scheduler.request(&target, 6, &cache, &mut dispatcher);
        let completion = dispatcher.jobs[0].complete(FetchOutcome::Cancelled);
        let effect = scheduler.complete(completion, &mut cache, &mut store);
        assert_eq!(effect, CompletionEffect::Cancelled);
        assert!(cache.is_empty());
        assert_eq!(scheduler.in_flight_len(), 0);
    }

    #[test]
    fn upload_failure_is_reported_as_failure() {
        let mut scheduler = FetchScheduler::new();
        let mut store = CountingStore {
            fail_uploads: true,
            ..CountingStore::default()
        };
        let mut cache = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let target = tile(6, 0, 0);

        scheduler.request(&target, 6, &cache, &mut dispatcher);
        let effect = scheduler.complete(loaded(&dispatcher.jobs[0]), &mut cache, &mut store);
        assert_eq!(effect, CompletionEffect::Failed);
        assert!(cache.is_empty());
    }

    #[test]
    fn refused_dispatch_records_nothing() {
        let mut scheduler = FetchScheduler::new();
        let cache: TileCache<u32> = TileCache::new();
        let mut dispatcher = RecordingDispatcher {
            refuse: true,
            ..RecordingDispatcher::default()
        };
        let target = tile(6, 0, 0);
        let decision = scheduler.request(&target, 6, &cache, &mut dispatcher);
        assert_eq!(decision, RequestDecision::Refused);
        assert_eq!(scheduler.in_flight_len(), 0);
    }

    #[test]
    fn cancel_all_trips_every_token() {
        let mut scheduler = FetchScheduler::new();
        let cache: TileCache<u32> = TileCache::new();
        let mut dispatcher = RecordingDispatcher::default();
        let active = [tile(6, 0, 0), tile(6, 1, 0), tile(6, 2, 0)];
        scheduler.reconcile(&active, 6, &cache, &mut dispatcher);
        assert_eq!(scheduler.cancel_all(), 3);
        assert!(dispatcher.jobs.iter().all(|job| job.cancel.is_cancelled()));
        assert_eq!(scheduler.in_flight_len(), 0);
    }
}
