use crate::app::transform::Vec2;

/// Shorter screen dimension maps to this many logical units; the longer
/// dimension extends proportionally.
pub const LOGICAL_SHORT_DIMENSION: f32 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Down,
    Move,
    Up,
}

/// A pointer sample already converted into logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub phase: TouchPhase,
    pub pointer_id: u32,
    pub position: Vec2,
}

/// Uniform scale and logical extent for a physical surface size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalViewport {
    pub screen_width: u32,
    pub screen_height: u32,
    pub logical_width: f32,
    pub logical_height: f32,
    /// Physical pixels per logical unit.
    pub scale: f32,
}

impl LogicalViewport {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        let width = screen_width.max(1) as f32;
        let height = screen_height.max(1) as f32;
        let scale = width.min(height) / LOGICAL_SHORT_DIMENSION;
        Self {
            screen_width: screen_width.max(1),
            screen_height: screen_height.max(1),
            logical_width: width / scale,
            logical_height: height / scale,
            scale,
        }
    }

    pub fn screen_to_logical(&self, x: f32, y: f32) -> Vec2 {
        Vec2 {
            x: x / self.scale,
            y: y / self.scale,
        }
    }

    pub fn logical_to_screen(&self, point: Vec2) -> (f32, f32) {
        (point.x * self.scale, point.y * self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portrait_surface_maps_width_to_600_units() {
        let viewport = LogicalViewport::new(1080, 1920);
        assert!((viewport.logical_width - 600.0).abs() < 0.0001);
        assert!((viewport.logical_height - 1066.6667).abs() < 0.001);
    }

    #[test]
    fn landscape_surface_maps_height_to_600_units() {
        let viewport = LogicalViewport::new(1920, 1080);
        assert!((viewport.logical_height - 600.0).abs() < 0.0001);
        assert!((viewport.logical_width - 1066.6667).abs() < 0.001);
    }

    #[test]
    fn screen_to_logical_round_trips() {
        let viewport = LogicalViewport::new(1280, 720);
        let logical = viewport.screen_to_logical(640.0, 360.0);
        let (x, y) = viewport.logical_to_screen(logical);
        assert!((x - 640.0).abs() < 0.0001);
        assert!((y - 360.0).abs() < 0.0001);
    }

    #[test]
    fn zero_surface_does_not_divide_by_zero() {
        let viewport = LogicalViewport::new(0, 0);
        assert!(viewport.scale > 0.0);
        assert!(viewport.logical_width.is_finite());
    }
}
