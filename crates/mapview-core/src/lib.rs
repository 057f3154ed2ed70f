//! Tile-pyramid engine: turns a continuous viewport over a fixed-size world
//! raster into a level of detail, a covering set of tiles, deduplicated and
//! cancellable fetches, a GPU texture cache and a list of clip-space quads.

pub mod cache;
pub mod compositor;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod grid;
pub mod layer;
pub mod scheduler;
pub mod source;
pub mod texture;
pub mod viewport;

pub use cache::{CacheEntry, PreviewEntry, PreviewSlot, TileCache};
pub use compositor::{ClipRect, Compositor, DrawQuad, QUAD_INDICES, QuadCorner, QuadSource, UvRect};
pub use engine::{Engine, EngineStatus};
pub use error::{ErrorCode, MapviewError, MapviewResult};
pub use fetcher::TileFetcher;
pub use grid::{ActiveTile, TileBounds, TileGrid, TileKey, TileSetDiff};
pub use layer::select_layer;
pub use mapview_config::EngineConfig;
pub use scheduler::{
    CompletionEffect, Dispatch, FetchCompletion, FetchJob, FetchOutcome, FetchScheduler,
    FetchTarget, ReconcileSummary, RequestDecision,
};
pub use source::{CancelToken, TileQuery, TileSource};
pub use texture::TextureStore;
pub use viewport::{Rect, ViewLimits, Viewport};
