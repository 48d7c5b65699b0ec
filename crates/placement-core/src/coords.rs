//! Coordinate transformation between pointer space and page space
//!
//! Pointer space is the browser client area (pixels, top-left origin). Page
//! space is the engine's page coordinate system (points, top-left origin).
//! The live projection belongs to the document engine; this module picks the
//! widget footprint, centers it on the drop point and validates the result.

use shared_types::{ClientRect, PageRect, PlacementType};

use crate::config::Footprints;
use crate::engine::{DocumentEngine, EngineHandle};
use crate::error::TransformError;

/// Pointer rectangle for a widget of `placement_type` dropped at `(x, y)`
pub fn pointer_rect_for(
    placement_type: PlacementType,
    x: f64,
    y: f64,
    footprints: &Footprints,
) -> ClientRect {
    let size = footprints.size_for(placement_type);
    ClientRect::centered_on(x, y, size.width, size.height)
}

/// Project a pointer rectangle onto a page through the engine.
///
/// `handle` must be the ready handle of the current document; `None` means
/// the engine is still loading or already torn down.
pub async fn to_page_rect(
    engine: &dyn DocumentEngine,
    handle: Option<EngineHandle>,
    pointer_rect: ClientRect,
    page_index: u32,
) -> Result<PageRect, TransformError> {
    let handle = handle.ok_or(TransformError::EngineNotReady)?;
    let raw = engine
        .transform_client_rect_to_page_rect(handle, pointer_rect, page_index)
        .await?;
    let rect = PageRect::new(raw.left, raw.top, raw.width, raw.height, page_index)?;
    Ok(rect)
}

/// Where a page is drawn in the client area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    /// Client position of the page's top-left corner
    pub origin_x: f64,
    pub origin_y: f64,
    /// Rendered size in client pixels
    pub rendered_width: f64,
    pub rendered_height: f64,
    /// Page size in points
    pub page_width: f64,
    pub page_height: f64,
}

impl PageViewport {
    /// US Letter page drawn at 100% zoom with its corner at the client origin
    pub fn letter() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            rendered_width: 612.0,
            rendered_height: 792.0,
            page_width: 612.0,
            page_height: 792.0,
        }
    }

    /// Same page drawn at a different zoom and offset
    pub fn zoomed(self, zoom: f64, origin_x: f64, origin_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            rendered_width: self.page_width * zoom,
            rendered_height: self.page_height * zoom,
            ..self
        }
    }
}

/// Convert client coordinates to page coordinates
pub fn client_to_page(client_x: f64, client_y: f64, viewport: &PageViewport) -> (f64, f64) {
    // Convert to percentage of the rendered page
    let x_pct = (client_x - viewport.origin_x) / viewport.rendered_width;
    let y_pct = (client_y - viewport.origin_y) / viewport.rendered_height;

    (x_pct * viewport.page_width, y_pct * viewport.page_height)
}

/// Convert page coordinates to client coordinates
pub fn page_to_client(page_x: f64, page_y: f64, viewport: &PageViewport) -> (f64, f64) {
    let x_pct = page_x / viewport.page_width;
    let y_pct = page_y / viewport.page_height;

    (
        viewport.origin_x + x_pct * viewport.rendered_width,
        viewport.origin_y + y_pct * viewport.rendered_height,
    )
}

/// Scale a client rectangle into page space
pub fn client_rect_to_page(rect: ClientRect, viewport: &PageViewport) -> (f64, f64, f64, f64) {
    let (left, top) = client_to_page(rect.left, rect.top, viewport);
    let (right, bottom) = client_to_page(rect.left + rect.width, rect.top + rect.height, viewport);
    (left, top, right - left, bottom - top)
}
