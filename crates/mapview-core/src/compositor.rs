use glam::Vec2;

use crate::cache::{PreviewEntry, TileCache};
use crate::grid::{ActiveTile, TileBounds, TileKey};
use crate::viewport::Viewport;

/// Two triangles over the corners returned by [`DrawQuad::corners`].
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Destination rectangle in clip space. `y0` is the top edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl ClipRect {
    /// The whole surface.
    pub const FULL: ClipRect = ClipRect::new(-1.0, 1.0, 1.0, -1.0);

    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    /// The whole texture.
    pub const FULL: UvRect = UvRect::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(u0: f32, v0: f32, u1: f32, v1: f32) -> Self {
        Self { u0, v0, u1, v1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadSource {
    Preview,
    Tile(TileKey),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadCorner {
    pub position: Vec2,
    pub uv: Vec2,
}

impl QuadCorner {
    fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            uv: Vec2::new(u, v),
        }
    }
}

/// One textured quad for a single render pass. The texture is borrowed from
/// the cache or preview slot and cannot outlive them.
#[derive(Debug)]
pub struct DrawQuad<'a, T> {
    pub texture: &'a T,
    pub source: QuadSource,
    pub clip: ClipRect,
    pub uv: UvRect,
}

impl<T> DrawQuad<'_, T> {
    /// Corners in top-left, top-right, bottom-right, bottom-left order.
    pub fn corners(&self) -> [QuadCorner; 4] {
        let ClipRect { x0, y0, x1, y1 } = self.clip;
        let UvRect { u0, v0, u1, v1 } = self.uv;
        [
            QuadCorner::new(x0, y0, u0, v0),
            QuadCorner::new(x1, y0, u1, v0),
            QuadCorner::new(x1, y1, u1, v1),
            QuadCorner::new(x0, y1, u0, v1),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compositor {
    base_width: f64,
    base_height: f64,
}

impl Compositor {
    pub fn new(base_width: f64, base_height: f64) -> Self {
        Self {
            base_width,
            base_height,
        }
    }

    /// Preview first, then every resolved active tile clipped to the view.
    pub fn compose<'a, T>(
        &self,
        viewport: &Viewport,
        preview: Option<&'a PreviewEntry<T>>,
        active: &[ActiveTile],
        cache: &'a TileCache<T>,
    ) -> Vec<DrawQuad<'a, T>> {
        let mut quads = Vec::with_capacity(active.len() + 1);
        if let Some(preview) = preview {
            quads.push(DrawQuad {
                texture: &preview.texture,
                source: QuadSource::Preview,
                clip: ClipRect::FULL,
                uv: UvRect {
                    u0: (viewport.x() / self.base_width) as f32,
                    v0: (viewport.y() / self.base_height) as f32,
                    u1: (viewport.right() / self.base_width) as f32,
                    v1: (viewport.bottom() / self.base_height) as f32,
                },
            });
        }

        let view = TileBounds::of_viewport(viewport);
        for tile in active {
            let Some(entry) = cache.get(&tile.key) else {
                continue;
            };
            let bounds = entry.bounds;
            if !bounds.intersects(&view) {
                continue;
            }
            let visible = TileBounds {
                x0: bounds.x0.max(view.x0),
                y0: bounds.y0.max(view.y0),
                x1: bounds.x1.min(view.x1),
                y1: bounds.y1.min(view.y1),
            };
            let top_left = to_clip(viewport, visible.x0, visible.y0);
            let bottom_right = to_clip(viewport, visible.x1, visible.y1);
            quads.push(DrawQuad {
                texture: &entry.texture,
                source: QuadSource::Tile(tile.key),
                clip: ClipRect::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y),
                uv: UvRect {
                    u0: ((visible.x0 - bounds.x0) / bounds.width()) as f32,
                    v0: ((visible.y0 - bounds.y0) / bounds.height()) as f32,
                    u1: ((visible.x1 - bounds.x0) / bounds.width()) as f32,
                    v1: ((visible.y1 - bounds.y0) / bounds.height()) as f32,
                },
            });
        }
        quads
    }
}

/// World point to clip space for the given viewport. Y points up in clip space.
pub fn to_clip(viewport: &Viewport, x: f64, y: f64) -> Vec2 {
    let cx = 2.0 * (x - viewport.x()) / viewport.width() - 1.0;
    let cy = 1.0 - 2.0 * (y - viewport.y()) / viewport.height();
    Vec2::new(cx as f32, cy as f32)
}
