use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 1.0;
pub const MAX_SCALE: f64 = 3.0;
pub const WHEEL_SENSITIVITY: f64 = 0.005;
pub const PINCH_SENSITIVITY: f64 = 0.000_05;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Transform for the zoomed image: translate by `(translate_x, translate_y)`
/// in unscaled units, then scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomTransform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

/// Scale and pan state for one image in the zoom overlay.
///
/// Lives exactly as long as the overlay. Nothing carries over between opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoomViewer {
    image_url: String,
    scale: f64,
    offset: Point,
    drag_anchor: Option<Point>,
}

impl ZoomViewer {
    pub fn open(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            scale: MIN_SCALE,
            offset: Point::default(),
            drag_anchor: None,
        }
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> Point {
        self.offset
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn on_wheel(&mut self, delta_y: f64) {
        if !delta_y.is_finite() {
            return;
        }
        self.set_scale(self.scale - delta_y * WHEEL_SENSITIVITY);
    }

    /// Two-finger pinch. The scale grows with the absolute distance between the
    /// touches on every move, so holding a pinch keeps zooming in.
    pub fn on_pinch(&mut self, first: Point, second: Point) {
        let distance = first.distance_to(second);
        if !distance.is_finite() {
            return;
        }
        self.set_scale(self.scale + distance * PINCH_SENSITIVITY);
    }

    /// Touch move with the current touch points; only two-finger input zooms.
    pub fn on_touch_move(&mut self, touches: &[Point]) {
        if let [first, second] = touches {
            self.on_pinch(*first, *second);
        }
    }

    pub fn pointer_down(&mut self, at: Point) {
        if !at.is_finite() {
            return;
        }
        self.drag_anchor = Some(Point::new(at.x - self.offset.x, at.y - self.offset.y));
    }

    pub fn pointer_move(&mut self, at: Point) {
        let Some(anchor) = self.drag_anchor else {
            return;
        };
        if !at.is_finite() {
            return;
        }
        self.offset = Point::new(at.x - anchor.x, at.y - anchor.y);
    }

    /// Pointer released or left the overlay.
    pub fn pointer_up(&mut self) {
        self.drag_anchor = None;
    }

    pub fn transform(&self) -> ZoomTransform {
        ZoomTransform {
            scale: self.scale,
            translate_x: self.offset.x / self.scale,
            translate_y: self.offset.y / self.scale,
        }
    }

    fn set_scale(&mut self, scale: f64) {
        if scale.is_finite() {
            self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        }
    }
}
