use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::source::TileQuery;
use crate::viewport::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub layer: u32,
    pub col: u32,
    pub row: u32,
}

impl TileKey {
    pub fn new(layer: u32, col: u32, row: u32) -> Self {
        Self { layer, col, row }
    }
}

/// World-pixel extent of a tile. `x1`/`y1` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl TileBounds {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// The area a viewport covers, in the same terms as a tile.
    pub fn of_viewport(viewport: &Viewport) -> Self {
        Self {
            x0: viewport.x(),
            y0: viewport.y(),
            x1: viewport.right(),
            y1: viewport.bottom(),
        }
    }

    pub fn intersects(&self, other: &TileBounds) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Integer bounds for the tile service, rounded outwards.
    pub fn query(&self, layer: u32) -> TileQuery {
        TileQuery {
            x0: self.x0.floor().max(0.0) as u32,
            y0: self.y0.floor().max(0.0) as u32,
            x1: self.x1.ceil().max(0.0) as u32,
            y1: self.y1.ceil().max(0.0) as u32,
            layer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveTile {
    pub key: TileKey,
    pub bounds: TileBounds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    pub layer: u32,
    pub tile_width: f64,
    pub tile_height: f64,
    pub tiles_x: u32,
    pub tiles_y: u32,
    base_width: f64,
    base_height: f64,
}

impl TileGrid {
    /// Grid sizing for one layer. The stride grows by 4 per layer below the
    /// maximum, and the tile size is the exact share of the world so the last
    /// column and row never leave a remainder strip.
    pub fn for_layer(
        layer: u32,
        base_width: f64,
        base_height: f64,
        max_layer: u32,
        target_tile_size: u32,
    ) -> Self {
        let depth = max_layer.saturating_sub(layer);
        let stride = 4f64.powi(depth.min(i32::MAX as u32) as i32);
        let effective = f64::from(target_tile_size.max(1)) * stride;
        let tiles_x = tiles_along(base_width, effective);
        let tiles_y = tiles_along(base_height, effective);
        Self {
            layer,
            tile_width: base_width / f64::from(tiles_x),
            tile_height: base_height / f64::from(tiles_y),
            tiles_x,
            tiles_y,
            base_width,
            base_height,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    pub fn bounds(&self, col: u32, row: u32) -> TileBounds {
        let x1 = if col + 1 >= self.tiles_x {
            self.base_width
        } else {
            f64::from(col + 1) * self.tile_width
        };
        let y1 = if row + 1 >= self.tiles_y {
            self.base_height
        } else {
            f64::from(row + 1) * self.tile_height
        };
        TileBounds {
            x0: f64::from(col) * self.tile_width,
            y0: f64::from(row) * self.tile_height,
            x1,
            y1,
        }
    }

    /// Tiles covering the viewport plus a one-tile gutter, row-major.
    pub fn active_tiles(&self, viewport: &Viewport) -> Vec<ActiveTile> {
        let (start_col, end_col) = span(
            viewport.x(),
            viewport.right(),
            self.tile_width,
            self.tiles_x,
        );
        let (start_row, end_row) = span(
            viewport.y(),
            viewport.bottom(),
            self.tile_height,
            self.tiles_y,
        );
        let mut tiles = Vec::with_capacity(
            ((end_col - start_col + 1) * (end_row - start_row + 1)) as usize,
        );
        for row in start_row..=end_row {
            for col in start_col..=end_col {
                tiles.push(ActiveTile {
                    key: TileKey::new(self.layer, col, row),
                    bounds: self.bounds(col, row),
                });
            }
        }
        tiles
    }
}

fn tiles_along(extent: f64, effective: f64) -> u32 {
    let count = (extent / effective).ceil();
    if count.is_finite() && count >= 1.0 {
        count.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

fn span(start: f64, end: f64, tile: f64, tiles: u32) -> (u32, u32) {
    let last = i64::from(tiles) - 1;
    let first = ((start / tile).floor() as i64 - 1).clamp(0, last);
    let final_index = ((end / tile).floor() as i64 + 1).clamp(0, last);
    (first as u32, final_index.max(first) as u32)
}

/// Keys entering and leaving the active set between two recomputations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSetDiff {
    pub added: Vec<TileKey>,
    pub removed: Vec<TileKey>,
}

impl TileSetDiff {
    pub fn between(previous: &[ActiveTile], next: &[ActiveTile]) -> Self {
        let before: HashSet<TileKey> = previous.iter().map(|tile| tile.key).collect();
        let after: HashSet<TileKey> = next.iter().map(|tile| tile.key).collect();
        let added = next
            .iter()
            .map(|tile| tile.key)
            .filter(|key| !before.contains(key))
            .collect();
        let removed = previous
            .iter()
            .map(|tile| tile.key)
            .filter(|key| !after.contains(key))
            .collect();
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::{Rect, ViewLimits};

    const W: f64 = 21_600.0;
    const H: f64 = 10_800.0;

    fn limits() -> ViewLimits {
        ViewLimits {
            base_width: W,
            base_height: H,
            min_width: 80.0,
            min_height: 40.0,
        }
    }

    #[test]
    fn stride_scales_tile_count() {
        let finest = TileGrid::for_layer(6, W, H, 6, 1024);
        assert_eq!((finest.tiles_x, finest.tiles_y), (22, 11));
        assert_eq!(finest.tile_count(), 242);
        let coarser = TileGrid::for_layer(5, W, H, 6, 1024);
        assert_eq!((coarser.tiles_x, coarser.tiles_y), (6, 3));
        let coarsest = TileGrid::for_layer(1, W, H, 6, 1024);
        assert_eq!(coarsest.tile_count(), 1);
        assert_eq!(
            coarsest.bounds(0, 0),
            TileBounds {
                x0: 0.0,
                y0: 0.0,
                x1: W,
                y1: H,
            }
        );
    }

    #[test]
    fn every_layer_tiles_the_world_exactly() {
        for layer in 1..=6 {
            let grid = TileGrid::for_layer(layer, W, H, 6, 1024);
            for row in 0..grid.tiles_y {
                let mut expected_x0 = 0.0;
                for col in 0..grid.tiles_x {
                    let bounds = grid.bounds(col, row);
                    assert_eq!(
                        bounds.x0, expected_x0,
                        "gap or overlap at layer {layer} col {col}"
                    );
                    assert!(bounds.width() > 0.0);
                    expected_x0 = bounds.x1;
                }
                assert_eq!(expected_x0, W);
            }
            for col in 0..grid.tiles_x {
                let mut expected_y0 = 0.0;
                for row in 0..grid.tiles_y {
                    let bounds = grid.bounds(col, row);
                    assert_eq!(bounds.y0, expected_y0);
                    expected_y0 = bounds.y1;
                }
                assert_eq!(expected_y0, H);
            }
        }
    }

    #[test]
    fn odd_world_sizes_still_end_on_the_edge() {
        let grid = TileGrid::for_layer(3, 10_007.0, 3_331.0, 3, 700);
        let last = grid.bounds(grid.tiles_x - 1, grid.tiles_y - 1);
        assert_eq!(last.x1, 10_007.0);
        assert_eq!(last.y1, 3_331.0);
    }

    #[test]
    fn active_tiles_include_gutter() {
        let grid = TileGrid::for_layer(6, W, H, 6, 1024);
        let view = Viewport::clamp(
            Rect::new(grid.tile_width * 5.5, grid.tile_height * 4.5, 338.0, 169.0),
            &limits(),
        );
        let tiles = grid.active_tiles(&view);
        let cols: HashSet<u32> = tiles.iter().map(|tile| tile.key.col).collect();
        let rows: HashSet<u32> = tiles.iter().map(|tile| tile.key.row).collect();
        assert_eq!(cols, HashSet::from([4, 5, 6]));
        assert_eq!(rows, HashSet::from([3, 4, 5]));
        assert_eq!(tiles.len(), 9);
    }

    #[test]
    fn active_tiles_clamp_at_world_corner() {
        let grid = TileGrid::for_layer(6, W, H, 6, 1024);
        let view = Viewport::clamp(Rect::new(1e9, 1e9, 80.0, 40.0), &limits());
        let tiles = grid.active_tiles(&view);
        for tile in &tiles {
            assert!(tile.key.col < grid.tiles_x);
            assert!(tile.key.row < grid.tiles_y);
        }
        let corner = tiles
            .iter()
            .find(|tile| tile.key.col == grid.tiles_x - 1 && tile.key.row == grid.tiles_y - 1)
            .expect("corner tile present");
        assert_eq!(corner.bounds.x1, W);
        assert_eq!(corner.bounds.y1, H);
    }

    #[test]
    fn active_tiles_never_empty_and_touch_the_gutter() {
        let limits = limits();
        for layer in 1..=6 {
            let grid = TileGrid::for_layer(layer, W, H, 6, 1024);
            let mut x = 0.0;
            while x < W {
                let candidate = Rect::new(x, x / 3.0, 900.0 + x / 7.0, 400.0);
                let view = Viewport::clamp(candidate, &limits);
                let tiles = grid.active_tiles(&view);
                assert!(!tiles.is_empty());
                let gx0 = view.x() - grid.tile_width;
                let gy0 = view.y() - grid.tile_height;
                let gx1 = view.right() + grid.tile_width;
                let gy1 = view.bottom() + grid.tile_height;
                for tile in &tiles {
                    let b = tile.bounds;
                    assert!(
                        b.x0 <= gx1 && gx0 <= b.x1 && b.y0 <= gy1 && gy0 <= b.y1,
                        "{:?} outside gutter of {view:?}",
                        tile.key
                    );
                }
                x += 1_337.0;
            }
        }
    }

    #[test]
    fn query_rounds_outwards() {
        let bounds = TileBounds {
            x0: 981.8,
            y0: 0.0,
            x1: 1963.6,
            y1: 981.8,
        };
        let query = bounds.query(6);
        assert_eq!(
            (query.x0, query.y0, query.x1, query.y1, query.layer),
            (981, 0, 1964, 982, 6)
        );
    }

    #[test]
    fn diff_reports_entering_and_leaving_keys() {
        let grid = TileGrid::for_layer(6, W, H, 6, 1024);
        let limits = limits();
        let first_view = Viewport::clamp(Rect::new(0.0, 0.0, 500.0, 300.0), &limits);
        let second_view = Viewport::clamp(
            Rect::new(grid.tile_width * 3.0, 0.0, 500.0, 300.0),
            &limits,
        );
        let first = grid.active_tiles(&first_view);
        let second = grid.active_tiles(&second_view);
        let diff = TileSetDiff::between(&first, &second);
        assert!(diff.added.contains(&TileKey::new(6, 4, 0)));
        assert!(diff.removed.contains(&TileKey::new(6, 0, 0)));
        assert!(!diff.removed.contains(&TileKey::new(6, 2, 0)));
        assert!(TileSetDiff::between(&second, &second).is_empty());
    }
}
