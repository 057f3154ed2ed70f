use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::MapviewResult;

/// Integer world-pixel bounds and layer addressed to the tile service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileQuery {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub layer: u32,
}

impl TileQuery {
    pub fn whole_world(base_width: u32, base_height: u32, layer: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: base_width,
            y1: base_height,
            layer,
        }
    }
}

/// Shared cancellation flag. Cloned into the job; the scheduler keeps the other half.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Provider of encoded raster bytes for a region of the world.
///
/// Implementations run on fetch worker threads. They should check `cancel`
/// whenever they can abort cheaply; a result returned after cancellation is
/// discarded either way.
pub trait TileSource: Send + Sync + 'static {
    fn fetch(&self, query: &TileQuery, cancel: &CancelToken) -> MapviewResult<Vec<u8>>;
}
