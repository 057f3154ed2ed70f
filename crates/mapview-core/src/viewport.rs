use serde::{Deserialize, Serialize};

use mapview_config::EngineConfig;

/// An unchecked rectangle in world pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewLimits {
    pub base_width: f64,
    pub base_height: f64,
    pub min_width: f64,
    pub min_height: f64,
}

impl ViewLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base_width: f64::from(config.base_width),
            base_height: f64::from(config.base_height),
            min_width: f64::from(config.min_view_width),
            min_height: f64::from(config.min_view_height),
        }
    }
}

/// The visible world rectangle. Only [`Viewport::clamp`] and [`Viewport::full`]
/// construct one, so every value satisfies the world bounds and minimum size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    rect: Rect,
}

impl Viewport {
    pub fn full(limits: &ViewLimits) -> Self {
        Self {
            rect: Rect::new(0.0, 0.0, limits.base_width, limits.base_height),
        }
    }

    /// Size is clamped first and position second, so shrinking or growing
    /// never pushes the rectangle out of the world.
    ///
    /// The candidate must be finite; the input layer filters anything else.
    pub fn clamp(candidate: Rect, limits: &ViewLimits) -> Self {
        debug_assert!(candidate.is_finite(), "viewport candidate must be finite");
        let width = clamp(candidate.width, limits.min_width, limits.base_width);
        let height = clamp(candidate.height, limits.min_height, limits.base_height);
        let x_max = (limits.base_width - width).max(0.0);
        let y_max = (limits.base_height - height).max(0.0);
        Self {
            rect: Rect::new(
                clamp(candidate.x, 0.0, x_max),
                clamp(candidate.y, 0.0, y_max),
                width,
                height,
            ),
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn x(&self) -> f64 {
        self.rect.x
    }

    pub fn y(&self) -> f64 {
        self.rect.y
    }

    pub fn width(&self) -> f64 {
        self.rect.width
    }

    pub fn height(&self) -> f64 {
        self.rect.height
    }

    pub fn right(&self) -> f64 {
        self.rect.x + self.rect.width
    }

    pub fn bottom(&self) -> f64 {
        self.rect.y + self.rect.height
    }

    pub fn area(&self) -> f64 {
        self.rect.width * self.rect.height
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ViewLimits {
        ViewLimits {
            base_width: 21_600.0,
            base_height: 10_800.0,
            min_width: 80.0,
            min_height: 40.0,
        }
    }

    fn assert_within(view: &Viewport, limits: &ViewLimits) {
        assert!(
            view.x() >= 0.0 && view.y() >= 0.0,
            "{view:?} has negative origin"
        );
        assert!(view.right() <= limits.base_width, "{view:?} overruns width");
        assert!(
            view.bottom() <= limits.base_height,
            "{view:?} overruns height"
        );
        assert!(view.width() >= limits.min_width);
        assert!(view.width() <= limits.base_width);
        assert!(view.height() >= limits.min_height);
        assert!(view.height() <= limits.base_height);
    }

    #[test]
    fn clamps_size_before_position() {
        let limits = limits();
        let view = Viewport::clamp(Rect::new(21_000.0, 10_500.0, 5_000.0, 2_000.0), &limits);
        assert_eq!(view.width(), 5_000.0);
        assert_eq!(view.x(), 16_600.0);
        assert_eq!(view.y(), 8_800.0);
    }

    #[test]
    fn enforces_minimum_size() {
        let limits = limits();
        let view = Viewport::clamp(Rect::new(100.0, 100.0, 1.0, 0.5), &limits);
        assert_eq!(view.width(), 80.0);
        assert_eq!(view.height(), 40.0);
    }

    #[test]
    fn oversized_candidate_collapses_to_full_world() {
        let limits = limits();
        let view = Viewport::clamp(Rect::new(-500.0, -20.0, 90_000.0, 40_000.0), &limits);
        assert_eq!(view, Viewport::full(&limits));
    }

    #[test]
    fn clamp_is_idempotent_and_in_bounds() {
        let limits = limits();
        let candidates = [
            Rect::new(-1e6, 3.5, 12.0, 7.0),
            Rect::new(20_000.0, 10_000.0, 3_000.0, 3_000.0),
            Rect::new(1234.5, 678.9, 338.0, 169.0),
            Rect::new(1e7, 1e7, 1e7, 1e7),
            Rect::new(0.0, 0.0, 0.0, 0.0),
        ];
        for candidate in candidates {
            let once = Viewport::clamp(candidate, &limits);
            let twice = Viewport::clamp(once.rect(), &limits);
            assert_eq!(once, twice);
            assert_within(&once, &limits);
        }
    }
}
