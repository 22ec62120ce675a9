//! Plan the paints that reproduce a guidance overlay on the board.

use canvas::overlay::GuidanceOverlay;
use canvas::palette::{ColorIndex, Palette};
use canvas::store::PixelStore;

/// One planned paint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPaint {
    pub x: i64,
    pub y: i64,
    pub color: ColorIndex,
}

/// Every board cell under the overlay whose center samples an opaque pixel,
/// mapped to the nearest palette color. Cells already holding that color are
/// skipped. Row-major order.
#[allow(clippy::cast_possible_truncation)]
pub fn plan_trace(overlay: &mut GuidanceOverlay, store: &PixelStore, palette: &Palette) -> Vec<PlannedPaint> {
    let Some(bounds) = overlay.bounds() else {
        return Vec::new();
    };
    let x0 = (bounds.x.floor() as i64).max(0);
    let y0 = (bounds.y.floor() as i64).max(0);
    let x1 = ((bounds.x + bounds.width).ceil() as i64).min(i64::from(store.width()));
    let y1 = ((bounds.y + bounds.height).ceil() as i64).min(i64::from(store.height()));

    let mut plan = Vec::new();
    for y in y0..y1 {
        for x in x0..x1 {
            #[allow(clippy::cast_precision_loss)]
            let Some(sampled) = overlay.sample_color_at(x as f64 + 0.5, y as f64 + 0.5) else {
                continue;
            };
            let color = palette.nearest(sampled);
            if store.get(x, y).is_ok_and(|current| current == color) {
                continue;
            }
            plan.push(PlannedPaint { x, y, color });
        }
    }
    plan
}

#[cfg(test)]
#[path = "trace_test.rs"]
mod tests;
