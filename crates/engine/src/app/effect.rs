use crate::app::entity::{Node, RenderFlags};
use crate::app::rendering::context::{DrawContext, RenderError};
use crate::app::transform::Vec2;

/// Render decorator attached to a group. An effect draws extra passes around
/// the node it decorates and then draws the node itself; chains nest by
/// wrapping a base effect.
pub trait Effect: Send {
    fn render(&self, ctx: &mut DrawContext<'_>, target: &dyn Node) -> Result<(), RenderError>;

    fn base(&self) -> Option<&dyn Effect> {
        None
    }
}

const SHADOW_COLOR: [u8; 3] = [0, 0, 0];

/// Drop shadow: first a dark silhouette of the subtree at an offset, then the
/// subtree rendered normally. The target renders twice per frame by design of
/// the pass, and the silhouette pass carries the suppression flags so nested
/// effects stay out of it.
pub struct ShadowEffect {
    offset: Vec2,
    opacity: f32,
    base: Option<Box<dyn Effect>>,
}

impl ShadowEffect {
    pub fn new(offset: Vec2, opacity: f32) -> Self {
        Self {
            offset,
            opacity: opacity.clamp(0.0, 1.0),
            base: None,
        }
    }

    /// Chains this shadow over an existing effect. The base runs the normal
    /// render pass in place of the plain one.
    pub fn over(offset: Vec2, opacity: f32, base: Box<dyn Effect>) -> Self {
        let mut effect = Self::new(offset, opacity);
        effect.base = Some(base);
        effect
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }
}

impl Effect for ShadowEffect {
    fn render(&self, ctx: &mut DrawContext<'_>, target: &dyn Node) -> Result<(), RenderError> {
        let shadow_alpha = (self.opacity * 255.0).round() as u8;
        if shadow_alpha > 0 {
            ctx.stack.push();
            ctx.stack.translate(self.offset.x, self.offset.y);
            let previous = ctx.flat_color();
            ctx.set_flat_color(Some([
                SHADOW_COLOR[0],
                SHADOW_COLOR[1],
                SHADOW_COLOR[2],
                shadow_alpha,
            ]));
            let silhouette = target.render(
                ctx,
                RenderFlags::SUPPRESS_EFFECTS | RenderFlags::SUPPRESS_COLOR_FILTER,
            );
            ctx.set_flat_color(previous);
            ctx.stack.pop();
            silhouette?;
        }

        match &self.base {
            Some(base) => base.render(ctx, target),
            None => target.render(ctx, RenderFlags::SUPPRESS_EFFECTS),
        }
    }

    fn base(&self) -> Option<&dyn Effect> {
        self.base.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::entity::{FlatRect, Group};
    use crate::app::rendering::target::RenderTarget;
    use crate::app::transform::Transform2D;

    fn shadowed_rect(offset: Vec2, opacity: f32) -> Group {
        let mut rect = FlatRect::new(Vec2::new(2.0, 2.0), [255, 0, 0, 255]);
        *rect.transform_mut() = Transform2D::at(1.0, 1.0);
        let mut group = Group::new();
        group.add_child(Box::new(rect));
        group.set_effect(Some(Box::new(ShadowEffect::new(offset, opacity))));
        group
    }

    #[test]
    fn shadow_draws_silhouette_then_body() {
        let group = shadowed_rect(Vec2::new(3.0, 3.0), 1.0);
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        group.render(&mut ctx, RenderFlags::NONE).unwrap();

        // Body occupies [1,3)x[1,3); shadow occupies [4,6)x[4,6).
        assert_eq!(target.sample(1, 1), [255, 0, 0, 255]);
        assert_eq!(target.sample(4, 4), [0, 0, 0, 255]);
        // Where nothing was drawn, the target is untouched.
        assert_eq!(target.sample(7, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn body_overdraws_overlapping_shadow() {
        let group = shadowed_rect(Vec2::new(1.0, 1.0), 1.0);
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        group.render(&mut ctx, RenderFlags::NONE).unwrap();

        // The overlap at (2,2) is shadow first, body second.
        assert_eq!(target.sample(2, 2), [255, 0, 0, 255]);
        assert_eq!(target.sample(3, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn zero_opacity_skips_the_shadow_pass() {
        let group = shadowed_rect(Vec2::new(3.0, 3.0), 0.0);
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        group.render(&mut ctx, RenderFlags::NONE).unwrap();

        assert_eq!(target.sample(1, 1), [255, 0, 0, 255]);
        assert_eq!(target.sample(4, 4), [0, 0, 0, 0]);
    }

    #[test]
    fn suppress_effects_renders_body_only() {
        let group = shadowed_rect(Vec2::new(3.0, 3.0), 1.0);
        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        group
            .render(&mut ctx, RenderFlags::SUPPRESS_EFFECTS)
            .unwrap();

        assert_eq!(target.sample(1, 1), [255, 0, 0, 255]);
        assert_eq!(target.sample(4, 4), [0, 0, 0, 0]);
    }

    #[test]
    fn chained_shadows_draw_both_silhouettes() {
        let mut rect = FlatRect::new(Vec2::new(1.0, 1.0), [255, 0, 0, 255]);
        *rect.transform_mut() = Transform2D::at(1.0, 1.0);
        let mut group = Group::new();
        group.add_child(Box::new(rect));
        let inner = Box::new(ShadowEffect::new(Vec2::new(2.0, 0.0), 1.0));
        group.set_effect(Some(Box::new(ShadowEffect::over(
            Vec2::new(0.0, 2.0),
            1.0,
            inner,
        ))));

        let chain = group.effect().unwrap();
        assert!(chain.base().is_some());

        let mut target = RenderTarget::new(8, 8);
        let mut ctx = DrawContext::new(&mut target);
        group.render(&mut ctx, RenderFlags::NONE).unwrap();

        assert_eq!(target.sample(1, 3), [0, 0, 0, 255]);
        assert_eq!(target.sample(3, 1), [0, 0, 0, 255]);
        assert_eq!(target.sample(1, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn half_opacity_shadow_blends() {
        let group = shadowed_rect(Vec2::new(3.0, 3.0), 0.5);
        let mut target = RenderTarget::new(8, 8);
        target.clear([255, 255, 255, 255]);
        let mut ctx = DrawContext::new(&mut target);
        group.render(&mut ctx, RenderFlags::NONE).unwrap();

        let [r, _, _, _] = target.sample(4, 4);
        assert!(r > 110 && r < 145, "r={r}");
    }
}
