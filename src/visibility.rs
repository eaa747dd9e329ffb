use crate::config::VisibilitySettings;
use tracing::debug;

/// Axis-aligned rectangle in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
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

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection with another rectangle, or an empty rect
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        Rect::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    /// Grow the rectangle on every side by a fraction of its own dimensions
    pub fn expand(&self, fraction: f64) -> Rect {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        Rect::new(
            self.x - dx,
            self.y - dy,
            self.width + 2.0 * dx,
            self.height + 2.0 * dy,
        )
    }
}

/// Derives the boolean visibility signal from element/viewport geometry.
///
/// An element enters visibility once the visible fraction of its area meets
/// `threshold`, measured against a viewport expanded by `margin` so playback
/// can pre-warm before full entry. It exits once the fraction drops below
/// `threshold - hysteresis`; the gap suppresses flip-flapping when the
/// element sits right at the boundary. The thresholds are tunables, not
/// correctness invariants.
#[derive(Debug)]
pub struct VisibilityTracker {
    settings: VisibilitySettings,
    visible: bool,
}

impl VisibilityTracker {
    pub fn new(settings: VisibilitySettings) -> Self {
        Self {
            settings,
            visible: false,
        }
    }

    /// Current signal value
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Visible fraction of the element within the (margin-expanded) viewport
    pub fn visible_fraction(&self, element: &Rect, viewport: &Rect) -> f64 {
        let element_area = element.area();
        if element_area == 0.0 {
            return 0.0;
        }

        let detection = viewport.expand(self.settings.margin);
        element.intersect(&detection).area() / element_area
    }

    /// Feed a new geometry sample. Returns `Some(signal)` when the signal
    /// flipped, `None` when it is unchanged.
    pub fn observe(&mut self, element: &Rect, viewport: &Rect) -> Option<bool> {
        let fraction = self.visible_fraction(element, viewport);

        let next = if self.visible {
            fraction >= (self.settings.threshold - self.settings.hysteresis).max(0.0)
        } else {
            fraction >= self.settings.threshold
        };

        if next != self.visible {
            self.visible = next;
            debug!(
                "Visibility flipped to {} (visible fraction {:.3})",
                next, fraction
            );
            Some(next)
        } else {
            None
        }
    }
}
