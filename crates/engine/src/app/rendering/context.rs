use thiserror::Error;

use crate::app::rendering::target::RenderTarget;
use crate::app::texture::Texture;
use crate::app::transform::{MatrixStack, Vec2};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("node {node_id} failed to render: {message}")]
    Node { node_id: u64, message: String },
}

/// Multiplicative RGBA tint applied to every drawn pixel. Identity is all 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorFilter {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for ColorFilter {
    fn default() -> Self {
        Self {
            r: 1.0,
            g: 1.0,
            b: 1.0,
            a: 1.0,
        }
    }
}

impl ColorFilter {
    pub fn is_identity(&self) -> bool {
        self.r == 1.0 && self.g == 1.0 && self.b == 1.0 && self.a == 1.0
    }
}

/// Per-frame drawing state handed down the node tree: the destination
/// buffer, the transform stack, the accumulated alpha, and the draw mode
/// overrides used by shadow and picking passes.
pub struct DrawContext<'a> {
    surface: &'a mut RenderTarget,
    pub stack: MatrixStack,
    pub filter: ColorFilter,
    alpha: f32,
    /// When set, textures draw as a silhouette of this color.
    flat_color: Option<[u8; 4]>,
    /// When true, alpha is thresholded at 50% and never blended.
    hard_alpha: bool,
}

impl<'a> DrawContext<'a> {
    pub fn new(surface: &'a mut RenderTarget) -> Self {
        Self {
            surface,
            stack: MatrixStack::default(),
            filter: ColorFilter::default(),
            alpha: 1.0,
            flat_color: None,
            hard_alpha: false,
        }
    }

    pub fn surface(&mut self) -> &mut RenderTarget {
        &mut *self.surface
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn flat_color(&self) -> Option<[u8; 4]> {
        self.flat_color
    }

    pub fn set_flat_color(&mut self, color: Option<[u8; 4]>) {
        self.flat_color = color;
    }

    pub fn set_hard_alpha(&mut self, hard: bool) {
        self.hard_alpha = hard;
    }

    /// Fills the local-space rect (0,0)..(width,height) with `color`, mapped
    /// through the current transform. A flat-color override replaces the
    /// rect's own color, keeping the more transparent alpha.
    pub fn fill_quad(&mut self, width: f32, height: f32, color: [u8; 4]) {
        let color = match self.flat_color {
            Some(flat) => [flat[0], flat[1], flat[2], color[3].min(flat[3])],
            None => color,
        };
        self.rasterize_quad(width, height, QuadSource::Flat(color));
    }

    /// Draws `texture` stretched over the local-space rect
    /// (0,0)..(width,height) with nearest-neighbor sampling.
    pub fn draw_texture(&mut self, texture: &Texture, width: f32, height: f32) {
        if let Some(color) = self.flat_color {
            self.rasterize_quad(width, height, QuadSource::Silhouette(texture, color));
        } else {
            self.rasterize_quad(width, height, QuadSource::Textured(texture));
        }
    }

    fn rasterize_quad(&mut self, width: f32, height: f32, source: QuadSource<'_>) {
        if width <= 0.0 || height <= 0.0 || self.alpha <= 0.0 {
            return;
        }
        let matrix = *self.stack.current();
        let inverse = match matrix.invert() {
            Some(inverse) => inverse,
            None => return,
        };

        let corners = [
            matrix.apply(Vec2::ZERO),
            matrix.apply(Vec2 { x: width, y: 0.0 }),
            matrix.apply(Vec2 { x: 0.0, y: height }),
            matrix.apply(Vec2 { x: width, y: height }),
        ];
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for corner in corners {
            min_x = min_x.min(corner.x);
            min_y = min_y.min(corner.y);
            max_x = max_x.max(corner.x);
            max_y = max_y.max(corner.y);
        }
        if !min_x.is_finite() || !min_y.is_finite() || !max_x.is_finite() || !max_y.is_finite() {
            return;
        }

        let x_start = min_x.floor().max(0.0) as u32;
        let y_start = min_y.floor().max(0.0) as u32;
        let x_end = (max_x.ceil().max(0.0) as u32).min(self.surface.width());
        let y_end = (max_y.ceil().max(0.0) as u32).min(self.surface.height());

        for py in y_start..y_end {
            for px in x_start..x_end {
                let local = inverse.apply(Vec2 {
                    x: px as f32 + 0.5,
                    y: py as f32 + 0.5,
                });
                if local.x < 0.0 || local.y < 0.0 || local.x >= width || local.y >= height {
                    continue;
                }
                let texel = match &source {
                    QuadSource::Flat(color) => *color,
                    QuadSource::Silhouette(texture, color) => {
                        let sampled = sample_local(texture, local, width, height);
                        [color[0], color[1], color[2], sampled[3].min(color[3])]
                    }
                    QuadSource::Textured(texture) => sample_local(texture, local, width, height),
                };
                let shaded = self.shade(texel);
                if self.hard_alpha {
                    if shaded[3] >= 128 {
                        self.surface.put(px, py, [shaded[0], shaded[1], shaded[2], 255]);
                    }
                } else {
                    self.surface.blend(px, py, shaded);
                }
            }
        }
    }

    fn shade(&self, texel: [u8; 4]) -> [u8; 4] {
        let alpha = texel[3] as f32 / 255.0 * self.alpha * self.filter.a;
        [
            scale_channel(texel[0], self.filter.r),
            scale_channel(texel[1], self.filter.g),
            scale_channel(texel[2], self.filter.b),
            (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
        ]
    }
}

enum QuadSource<'t> {
    Flat([u8; 4]),
    Textured(&'t Texture),
    Silhouette(&'t Texture, [u8; 4]),
}

fn scale_channel(value: u8, factor: f32) -> u8 {
    (value as f32 * factor.clamp(0.0, 1.0)).round().min(255.0) as u8
}

fn sample_local(texture: &Texture, local: Vec2, width: f32, height: f32) -> [u8; 4] {
    let u = (local.x / width * texture.width() as f32) as u32;
    let v = (local.y / height * texture.height() as f32) as u32;
    texture.sample(u.min(texture.width() - 1), v.min(texture.height() - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::transform::Transform2D;

    fn checker_texture() -> Texture {
        // 2x2: white, red / green, blue.
        let rgba = vec![
            255, 255, 255, 255, 255, 0, 0, 255, //
            0, 255, 0, 255, 0, 0, 255, 255,
        ];
        Texture::from_rgba(2, 2, rgba).unwrap()
    }

    #[test]
    fn fill_quad_covers_transformed_rect() {
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        ctx.stack.translate(2.0, 2.0);
        ctx.fill_quad(4.0, 4.0, [255, 0, 0, 255]);

        assert_eq!(target.sample(3, 3), [255, 0, 0, 255]);
        assert_eq!(target.sample(1, 1), [0, 0, 0, 0]);
        assert_eq!(target.sample(6, 6), [0, 0, 0, 0]);
    }

    #[test]
    fn draw_texture_samples_nearest() {
        let texture = checker_texture();
        let mut target = RenderTarget::new(4, 4);
        let mut ctx = DrawContext::new(&mut target);
        ctx.draw_texture(&texture, 4.0, 4.0);

        assert_eq!(target.sample(0, 0), [255, 255, 255, 255]);
        assert_eq!(target.sample(3, 0), [255, 0, 0, 255]);
        assert_eq!(target.sample(0, 3), [0, 255, 0, 255]);
        assert_eq!(target.sample(3, 3), [0, 0, 255, 255]);
    }

    #[test]
    fn flat_color_draws_silhouette() {
        let texture = checker_texture();
        let mut target = RenderTarget::new(2, 2);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_flat_color(Some([0, 0, 0, 255]));
        ctx.draw_texture(&texture, 2.0, 2.0);

        assert_eq!(target.sample(0, 0), [0, 0, 0, 255]);
        assert_eq!(target.sample(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn flat_color_overrides_fill_quad_color() {
        let mut target = RenderTarget::new(2, 2);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_flat_color(Some([0, 0, 0, 255]));
        ctx.fill_quad(2.0, 2.0, [255, 0, 0, 255]);

        assert_eq!(target.sample(0, 0), [0, 0, 0, 255]);
        assert_eq!(target.sample(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn flat_color_keeps_the_more_transparent_alpha() {
        let mut target = RenderTarget::new(1, 1);
        target.clear([0, 0, 0, 255]);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_flat_color(Some([0, 0, 0, 128]));
        ctx.fill_quad(1.0, 1.0, [255, 255, 255, 255]);

        let [r, _, _, _] = target.sample(0, 0);
        assert!(r < 10, "r={r}");
    }

    #[test]
    fn alpha_attenuates_fill() {
        let mut target = RenderTarget::new(1, 1);
        target.clear([0, 0, 0, 255]);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_alpha(0.5);
        ctx.fill_quad(1.0, 1.0, [255, 255, 255, 255]);

        let [r, _, _, _] = target.sample(0, 0);
        assert!(r > 110 && r < 145, "r={r}");
    }

    #[test]
    fn zero_alpha_draws_nothing() {
        let mut target = RenderTarget::new(1, 1);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_alpha(0.0);
        ctx.fill_quad(1.0, 1.0, [255, 255, 255, 255]);
        assert_eq!(target.sample(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn degenerate_scale_draws_nothing() {
        let mut target = RenderTarget::new(4, 4);
        let mut ctx = DrawContext::new(&mut target);
        ctx.stack.scale(0.0, 1.0);
        ctx.fill_quad(4.0, 4.0, [255, 255, 255, 255]);
        assert_eq!(target.sample(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn hard_alpha_thresholds_instead_of_blending() {
        let mut target = RenderTarget::new(2, 1);
        let mut ctx = DrawContext::new(&mut target);
        ctx.set_hard_alpha(true);
        ctx.set_alpha(0.4);
        ctx.fill_quad(2.0, 1.0, [200, 0, 0, 255]);
        // 0.4 alpha falls under the threshold, so nothing lands.
        assert_eq!(target.sample(0, 0), [0, 0, 0, 0]);

        let mut ctx = DrawContext::new(&mut target);
        ctx.set_hard_alpha(true);
        ctx.fill_quad(2.0, 1.0, [200, 0, 0, 255]);
        assert_eq!(target.sample(0, 0), [200, 0, 0, 255]);
    }

    #[test]
    fn rotated_quad_lands_in_expected_pixels() {
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        let transform = Transform2D {
            position: Vec2 { x: 4.0, y: 0.0 },
            rotation_degrees: 90.0,
            scale: Vec2 { x: 1.0, y: 1.0 },
        };
        ctx.stack.apply_transform(&transform);
        // Local 2x4 rect rotated 90 degrees occupies x in [0,4), y in [0,2).
        ctx.fill_quad(2.0, 4.0, [0, 255, 0, 255]);

        assert_eq!(target.sample(1, 0), [0, 255, 0, 255]);
        assert_eq!(target.sample(1, 4), [0, 0, 0, 0]);
    }
}
