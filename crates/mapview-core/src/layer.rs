use crate::viewport::Viewport;

/// Picks the level of detail for a viewport.
///
/// Each layer step quadruples pixel density, so the base-to-view area ratio in
/// log base 4 is the number of steps above the coarsest layer. Shrinking the
/// viewport never lowers the result.
pub fn select_layer(
    viewport: &Viewport,
    base_width: f64,
    base_height: f64,
    min_layer: u32,
    max_layer: u32,
) -> u32 {
    let view_area = viewport.area().max(1.0);
    let ratio = (base_width * base_height / view_area).max(1.0);
    let steps = (ratio.ln() / 4f64.ln()).floor();
    // ratio >= 1 keeps steps non-negative; saturate instead of wrapping on absurd worlds.
    let layer = 1u32.saturating_add(steps as u32);
    layer.max(min_layer).min(max_layer)
}
