use std::collections::HashSet;
use std::fmt;

use mapview_config::EngineConfig;

use crate::cache::{PreviewEntry, PreviewSlot, TileCache};
use crate::compositor::{Compositor, DrawQuad};
use crate::error::MapviewResult;
use crate::grid::{ActiveTile, TileBounds, TileGrid, TileKey, TileSetDiff};
use crate::layer::select_layer;
use crate::scheduler::{
    CompletionEffect, Dispatch, FetchCompletion, FetchJob, FetchOutcome, FetchScheduler,
    FetchTarget, ReconcileSummary,
};
use crate::source::{CancelToken, TileQuery};
use crate::texture::TextureStore;
use crate::viewport::{Rect, ViewLimits, Viewport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Initializing,
    LoadingPreview,
    Ready,
    PreviewFailed(String),
    Failed(String),
}

impl EngineStatus {
    pub fn accepts_fetches(&self) -> bool {
        !matches!(self, EngineStatus::Initializing | EngineStatus::Failed(_))
    }

    pub fn message(&self) -> String {
        match self {
            EngineStatus::Initializing => "initializing".to_string(),
            EngineStatus::LoadingPreview => "loading preview".to_string(),
            EngineStatus::Ready => "ready".to_string(),
            EngineStatus::PreviewFailed(detail) => format!("preview failed: {detail}"),
            EngineStatus::Failed(detail) => format!("renderer unavailable: {detail}"),
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug)]
struct PreviewRequest {
    request_id: u64,
    cancel: CancelToken,
}

/// Owns the whole pipeline state for one world: viewport, derived layer and
/// grid, the active tile set, in-flight fetches, the tile cache and the
/// preview. Everything here runs on the thread that draws.
pub struct Engine<T> {
    config: EngineConfig,
    limits: ViewLimits,
    viewport: Viewport,
    layer: u32,
    grid: TileGrid,
    active: Vec<ActiveTile>,
    scheduler: FetchScheduler,
    cache: TileCache<T>,
    preview: PreviewSlot<T>,
    preview_request: Option<PreviewRequest>,
    compositor: Compositor,
    status: EngineStatus,
    dirty: bool,
}

impl<T> Engine<T> {
    pub fn new(config: EngineConfig) -> MapviewResult<Self> {
        config.validate()?;
        let limits = ViewLimits::from_config(&config);
        let viewport = Viewport::full(&limits);
        let layer = select_layer(
            &viewport,
            limits.base_width,
            limits.base_height,
            config.min_layer,
            config.max_layer,
        );
        let grid = grid_for(&config, &limits, layer);
        let active = grid.active_tiles(&viewport);
        tracing::debug!(
            base_width = config.base_width,
            base_height = config.base_height,
            layer,
            tiles = active.len(),
            "engine created"
        );
        Ok(Self {
            compositor: Compositor::new(limits.base_width, limits.base_height),
            config,
            limits,
            viewport,
            layer,
            grid,
            active,
            scheduler: FetchScheduler::new(),
            cache: TileCache::new(),
            preview: PreviewSlot::default(),
            preview_request: None,
            status: EngineStatus::Initializing,
            dirty: true,
        })
    }

    pub fn limits(&self) -> &ViewLimits {
        &self.limits
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn active_tiles(&self) -> &[ActiveTile] {
        &self.active
    }

    pub fn cache(&self) -> &TileCache<T> {
        &self.cache
    }

    pub fn preview(&self) -> Option<&PreviewEntry<T>> {
        self.preview.get()
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn in_flight_len(&self) -> usize {
        self.scheduler.in_flight_len()
    }

    pub fn in_flight_layer(&self, key: &TileKey) -> Option<u32> {
        self.scheduler.in_flight_layer(key)
    }

    /// Called once the graphics side is up: fetches the preview and the
    /// tiles for the current view.
    pub fn start<D>(&mut self, dispatcher: &mut D) -> ReconcileSummary
    where
        D: Dispatch + ?Sized,
    {
        if matches!(self.status, EngineStatus::Failed(_)) {
            return ReconcileSummary::default();
        }
        self.status = EngineStatus::LoadingPreview;
        self.request_preview(dispatcher);
        self.refresh(dispatcher)
    }

    /// Fetches the whole-world preview, superseding any preview fetch still running.
    pub fn request_preview<D>(&mut self, dispatcher: &mut D) -> bool
    where
        D: Dispatch + ?Sized,
    {
        if !self.status.accepts_fetches() {
            return false;
        }
        if let Some(previous) = self.preview_request.take() {
            previous.cancel.cancel();
        }
        let layer = self.config.preview_layer;
        let request_id = self.scheduler.allocate_request_id();
        let cancel = CancelToken::new();
        let job = FetchJob {
            request_id,
            target: FetchTarget::Preview,
            layer,
            bounds: TileBounds {
                x0: 0.0,
                y0: 0.0,
                x1: self.limits.base_width,
                y1: self.limits.base_height,
            },
            query: TileQuery::whole_world(self.config.base_width, self.config.base_height, layer),
            cancel: cancel.clone(),
        };
        if !dispatcher.dispatch(job) {
            tracing::warn!(request_id, "fetch dispatcher refused preview job");
            return false;
        }
        tracing::debug!(request_id, layer, "preview fetch issued");
        if self.preview.get().is_none() {
            self.status = EngineStatus::LoadingPreview;
        }
        self.preview_request = Some(PreviewRequest { request_id, cancel });
        true
    }

    /// Reconciles in-flight fetches with the current active set.
    pub fn refresh<D>(&mut self, dispatcher: &mut D) -> ReconcileSummary
    where
        D: Dispatch + ?Sized,
    {
        if !self.status.accepts_fetches() {
            return ReconcileSummary::default();
        }
        if self.preview_retry_due() {
            self.request_preview(dispatcher);
        }
        let summary = self
            .scheduler
            .reconcile(&self.active, self.layer, &self.cache, dispatcher);
        if summary.issued > 0 || summary.cancelled > 0 {
            tracing::debug!(
                layer = self.layer,
                issued = summary.issued,
                superseded = summary.superseded,
                cancelled = summary.cancelled,
                cached = summary.cached,
                "tile set reconciled"
            );
        }
        summary
    }

    fn preview_retry_due(&self) -> bool {
        matches!(self.status, EngineStatus::PreviewFailed(_)) && self.preview_request.is_none()
    }

    /// Clamps `candidate` into the world, recomputes layer and active set,
    /// and brings fetches in line with the new set.
    pub fn set_viewport<D>(&mut self, candidate: Rect, dispatcher: &mut D) -> TileSetDiff
    where
        D: Dispatch + ?Sized,
    {
        if !candidate.is_finite() || candidate.width < 0.0 || candidate.height < 0.0 {
            tracing::debug!(?candidate, "ignoring degenerate viewport candidate");
            return TileSetDiff::default();
        }
        let viewport = Viewport::clamp(candidate, &self.limits);
        if viewport == self.viewport {
            return TileSetDiff::default();
        }
        self.viewport = viewport;
        self.dirty = true;

        let layer = select_layer(
            &viewport,
            self.limits.base_width,
            self.limits.base_height,
            self.config.min_layer,
            self.config.max_layer,
        );
        if layer != self.layer {
            let grid = grid_for(&self.config, &self.limits, layer);
            tracing::debug!(
                from = self.layer,
                to = layer,
                grid_tiles = grid.tile_count(),
                "layer changed"
            );
            self.layer = layer;
            self.grid = grid;
        }
        let active = self.grid.active_tiles(&self.viewport);
        let diff = TileSetDiff::between(&self.active, &active);
        self.active = active;
        self.cache.touch(self.active.iter().map(|tile| &tile.key));
        self.refresh(dispatcher);
        diff
    }

    /// Surface size changed; the view itself is unaffected.
    pub fn resize(&mut self) {
        self.dirty = true;
    }

    /// Applies one finished fetch on the owning thread. Returns `true` when
    /// the frame needs redrawing.
    pub fn apply_completion<S>(&mut self, completion: FetchCompletion, store: &mut S) -> bool
    where
        S: TextureStore<Handle = T>,
    {
        if let FetchTarget::Preview = completion.target {
            return self.apply_preview(completion, store);
        }
        match self.scheduler.complete(completion, &mut self.cache, store) {
            // Superseded work changes nothing on screen.
            CompletionEffect::Stale => false,
            CompletionEffect::Resolved => {
                let keep: HashSet<TileKey> = self.active.iter().map(|tile| tile.key).collect();
                self.cache.evict(self.config.max_cached_tiles, &keep, store);
                self.dirty = true;
                true
            }
            CompletionEffect::Cancelled | CompletionEffect::Failed => {
                self.dirty = true;
                true
            }
        }
    }

    fn apply_preview<S>(&mut self, completion: FetchCompletion, store: &mut S) -> bool
    where
        S: TextureStore<Handle = T>,
    {
        let is_current = self
            .preview_request
            .as_ref()
            .is_some_and(|request| request.request_id == completion.request_id);
        if !is_current {
            tracing::trace!(
                request_id = completion.request_id,
                "discarding stale preview completion"
            );
            return false;
        }
        self.preview_request = None;
        self.dirty = true;

        match completion.outcome {
            FetchOutcome::Loaded(image) => {
                let label = format!("preview layer {}", completion.layer);
                match store.upload(&image, &label) {
                    Ok(texture) => {
                        tracing::info!(
                            layer = completion.layer,
                            width = image.width(),
                            height = image.height(),
                            "preview loaded"
                        );
                        self.preview.replace(
                            PreviewEntry {
                                layer: completion.layer,
                                width: image.width(),
                                height: image.height(),
                                texture,
                            },
                            store,
                        );
                        self.status = EngineStatus::Ready;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "preview upload failed");
                        self.status = EngineStatus::PreviewFailed(err.message);
                    }
                }
            }
            FetchOutcome::Failed(err) => {
                tracing::error!(error = %err, "preview fetch failed");
                self.status = EngineStatus::PreviewFailed(err.message);
            }
            FetchOutcome::Cancelled => {
                tracing::debug!("preview fetch cancelled");
            }
        }
        true
    }

    /// Returns whether a redraw is pending and clears the flag. Any number of
    /// triggers between two frames collapse into one redraw.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn compose(&self) -> Vec<DrawQuad<'_, T>> {
        let preview = self.preview.get();
        self.compositor
            .compose(&self.viewport, preview, &self.active, &self.cache)
    }

    /// Marks rendering as unavailable. Pending fetches are cancelled and no new
    /// ones are issued.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "engine failed");
        self.cancel_pending();
        self.status = EngineStatus::Failed(message);
        self.dirty = true;
    }

    /// Cancels all fetches and releases every texture the engine holds.
    pub fn shutdown<S>(&mut self, store: &mut S) -> usize
    where
        S: TextureStore<Handle = T>,
    {
        self.cancel_pending();
        let mut released = self.cache.release_all(store);
        if self.preview.release(store) {
            released += 1;
        }
        tracing::info!(released, "engine shut down");
        released
    }

    fn cancel_pending(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        if let Some(request) = self.preview_request.take() {
            request.cancel.cancel();
        }
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending tile fetches");
        }
    }
}

fn grid_for(config: &EngineConfig, limits: &ViewLimits, layer: u32) -> TileGrid {
    TileGrid::for_layer(
        layer,
        limits.base_width,
        limits.base_height,
        config.max_layer,
        config.target_tile_size,
    )
}
