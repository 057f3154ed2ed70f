use glam::DVec2;
use mapview_core::{Rect, ViewLimits};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

const ZOOM_OUT_FACTOR: f64 = 1.12;
const ZOOM_IN_FACTOR: f64 = 0.88;
const STRETCH_MIN: f64 = 0.25;
const STRETCH_MAX: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragMode {
    Pan,
    Stretch,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    mode: DragMode,
    start: DVec2,
    view: Rect,
}

/// Maps pointer gestures to viewport candidates: left drag pans, right drag
/// stretches around the view centre, the wheel zooms around the cursor.
/// Drags are measured from where they started, not frame to frame.
#[derive(Debug, Default)]
pub struct ViewportController {
    drag: Option<Drag>,
    cursor: Option<DVec2>,
}

impl ViewportController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new candidate rectangle when the event moves the view.
    pub fn process_event(
        &mut self,
        event: &WindowEvent,
        current: Rect,
        surface: DVec2,
        limits: &ViewLimits,
    ) -> Option<Rect> {
        let candidate = match event {
            WindowEvent::MouseInput { state, button, .. } => {
                let mode = match button {
                    MouseButton::Left => DragMode::Pan,
                    MouseButton::Right => DragMode::Stretch,
                    _ => return None,
                };
                match state {
                    ElementState::Pressed => {
                        self.drag = self.cursor.map(|start| Drag {
                            mode,
                            start,
                            view: current,
                        });
                    }
                    ElementState::Released => {
                        if self.drag.is_some_and(|drag| drag.mode == mode) {
                            self.drag = None;
                        }
                    }
                }
                None
            }
            WindowEvent::CursorMoved { position, .. } => {
                let cursor = DVec2::new(position.x, position.y);
                self.cursor = Some(cursor);
                self.drag.map(|drag| {
                    let delta = cursor - drag.start;
                    match drag.mode {
                        DragMode::Pan => pan(drag.view, delta, surface),
                        DragMode::Stretch => stretch(drag.view, delta, surface),
                    }
                })
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                self.drag = None;
                None
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => f64::from(*y),
                    MouseScrollDelta::PixelDelta(pos) => pos.y,
                };
                if scroll == 0.0 {
                    return None;
                }
                let anchor = self
                    .cursor
                    .map(|cursor| cursor / surface.max(DVec2::ONE))
                    .unwrap_or(DVec2::splat(0.5));
                Some(zoom(current, scroll > 0.0, anchor, limits))
            }
            _ => None,
        };
        candidate.filter(|rect| rect.is_finite() && rect.width > 0.0 && rect.height > 0.0)
    }
}

fn pan(start: Rect, delta: DVec2, surface: DVec2) -> Rect {
    let surface = surface.max(DVec2::ONE);
    Rect::new(
        start.x - delta.x * start.width / surface.x,
        start.y - delta.y * start.height / surface.y,
        start.width,
        start.height,
    )
}

fn stretch(start: Rect, delta: DVec2, surface: DVec2) -> Rect {
    let surface = surface.max(DVec2::ONE);
    let center = DVec2::new(start.x + start.width / 2.0, start.y + start.height / 2.0);
    let width = start.width * (1.0 - delta.x / surface.x).clamp(STRETCH_MIN, STRETCH_MAX);
    let height = start.height * (1.0 - delta.y / surface.y).clamp(STRETCH_MIN, STRETCH_MAX);
    let x = center.x - width / 2.0;
    let y = center.y - height / 2.0;
    Rect::new(x, y, width, height)
}

/// `anchor` is the cursor position as a fraction of the surface; the world
/// point under it stays put.
fn zoom(view: Rect, zoom_in: bool, anchor: DVec2, limits: &ViewLimits) -> Rect {
    let factor = if zoom_in {
        ZOOM_IN_FACTOR
    } else {
        ZOOM_OUT_FACTOR
    };
    let width = (view.width * factor).clamp(limits.min_width, limits.base_width);
    let height = (view.height * factor).clamp(limits.min_height, limits.base_height);
    let focus = DVec2::new(view.x, view.y) + DVec2::new(view.width, view.height) * anchor;
    let origin = focus - DVec2::new(width, height) * anchor;
    Rect::new(origin.x, origin.y, width, height)
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

    #[test]
    fn pan_moves_against_the_drag() {
        let view = Rect::new(1_000.0, 1_000.0, 2_000.0, 1_000.0);
        let next = pan(view, DVec2::new(100.0, -50.0), DVec2::new(1_000.0, 500.0));
        assert_eq!(next, Rect::new(800.0, 1_100.0, 2_000.0, 1_000.0));
    }

    #[test]
    fn stretch_keeps_centre_and_clamps_factor() {
        let view = Rect::new(1_000.0, 1_000.0, 2_000.0, 1_000.0);
        let next = stretch(view, DVec2::new(-500.0, 0.0), DVec2::new(1_000.0, 500.0));
        assert_eq!(next.width, 3_000.0);
        assert_eq!(next.height, 1_000.0);
        assert_eq!(next.x + next.width / 2.0, 2_000.0);

        let squashed = stretch(view, DVec2::new(5_000.0, 0.0), DVec2::new(1_000.0, 500.0));
        assert_eq!(squashed.width, 500.0);
    }

    #[test]
    fn zoom_keeps_point_under_cursor() {
        let view = Rect::new(0.0, 0.0, 10_000.0, 5_000.0);
        let anchor = DVec2::new(0.25, 0.5);
        let next = zoom(view, true, anchor, &limits());
        assert!((next.width - 8_800.0).abs() < 1e-9);
        let before = view.x + view.width * anchor.x;
        let after = next.x + next.width * anchor.x;
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn zoom_respects_minimum_size() {
        let view = Rect::new(0.0, 0.0, 85.0, 42.0);
        let next = zoom(view, true, DVec2::splat(0.5), &limits());
        assert_eq!((next.width, next.height), (80.0, 40.0));
    }
}
