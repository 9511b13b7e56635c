//! Logical canvas coordinate space.
//!
//! All coordinates on the wire are in a fixed 1200×700 space. Clients scale
//! their pointer input into it before sending, and scale received
//! coordinates back to their own viewport when rendering.

/// Logical canvas width.
pub const CANVAS_WIDTH: f64 = 1200.0;
/// Logical canvas height.
pub const CANVAS_HEIGHT: f64 = 700.0;

/// A client's on-screen drawing area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: f64,
    height: f64,
}

impl Viewport {
    /// Returns `None` unless both sides are finite and positive.
    pub fn new(width: f64, height: f64) -> Option<Self> {
        let valid = |side: f64| side.is_finite() && side > 0.0;
        (valid(width) && valid(height)).then_some(Self { width, height })
    }

    /// Map a point in this viewport to canvas coordinates.
    pub fn to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (x * CANVAS_WIDTH / self.width, y * CANVAS_HEIGHT / self.height)
    }

    /// Map a point in canvas coordinates to this viewport.
    pub fn from_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.width / CANVAS_WIDTH, y * self.height / CANVAS_HEIGHT)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
        }
    }
}
