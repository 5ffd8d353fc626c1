use thiserror::Error;
use tracing::info;

use crate::app::input::LogicalViewport;
use crate::app::picking::{TouchMap, TouchSender, PICK_BUFFER_SCALE};
use crate::app::rendering::context::{DrawContext, RenderError};
use crate::app::rendering::filter::{Filter, FrameSetup};
use crate::app::rendering::target::RenderTarget;
use crate::app::scene::{Scene, SceneServices};
use crate::app::texture::TextureQueue;
use crate::app::transform::Vec2;

/// Full fade-to-black on a scene switch, seconds per direction.
pub const SCENE_TRANSITION_SECONDS: f32 = 0.25;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("no scene assigned to the stage")]
    NoSceneAssigned,
    #[error("scene render failed")]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transition {
    Idle,
    FadingOut { elapsed: f32 },
    FadingIn { elapsed: f32 },
}

/// Owns the current scene, the switch transition, the post-processing chain,
/// and the picking machinery. Advanced from the update thread and rendered
/// from the render thread, under one lock.
pub struct Stage {
    viewport: LogicalViewport,
    current: Option<Box<Scene>>,
    pending: Option<Box<Scene>>,
    transition: Transition,
    filters: Vec<Box<dyn Filter>>,
    targets: [RenderTarget; 2],
    read_index: usize,
    pick_buffer: RenderTarget,
    touch_map: TouchMap,
    textures: TextureQueue,
    loading_clock: f32,
    pick_debug: bool,
}

impl Stage {
    pub fn new(screen_width: u32, screen_height: u32, textures: TextureQueue) -> Self {
        let viewport = LogicalViewport::new(screen_width, screen_height);
        Self {
            viewport,
            current: None,
            pending: None,
            transition: Transition::Idle,
            filters: Vec::new(),
            targets: [
                RenderTarget::new(screen_width, screen_height),
                RenderTarget::new(screen_width, screen_height),
            ],
            read_index: 0,
            pick_buffer: pick_buffer_for(&viewport),
            touch_map: TouchMap::new(),
            textures,
            loading_clock: 0.0,
            pick_debug: false,
        }
    }

    pub fn viewport(&self) -> LogicalViewport {
        self.viewport
    }

    pub fn logical_size(&self) -> Vec2 {
        Vec2::new(self.viewport.logical_width, self.viewport.logical_height)
    }

    pub fn touch_sender(&self) -> TouchSender {
        self.touch_map.sender()
    }

    pub fn set_filters(&mut self, filters: Vec<Box<dyn Filter>>) {
        self.filters = filters;
    }

    pub fn set_pick_debug(&mut self, enabled: bool) {
        self.pick_debug = enabled;
    }

    pub fn textures_mut(&mut self) -> &mut TextureQueue {
        &mut self.textures
    }

    pub fn has_scene(&self) -> bool {
        self.current.is_some()
    }

    /// True while texture loads are outstanding; the stage renders the
    /// loading indicator instead of the scene until the queue drains.
    pub fn is_loading(&self) -> bool {
        !self.textures.is_idle()
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.current.as_deref()
    }

    pub fn current_scene_mut(&mut self) -> Option<&mut Scene> {
        self.current.as_deref_mut()
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition != Transition::Idle
    }

    /// Black overlay strength for the current transition moment, 0..=1.
    pub fn transition_alpha(&self) -> f32 {
        match self.transition {
            Transition::Idle => 0.0,
            Transition::FadingOut { elapsed } => (elapsed / SCENE_TRANSITION_SECONDS).min(1.0),
            Transition::FadingIn { elapsed } => {
                1.0 - (elapsed / SCENE_TRANSITION_SECONDS).min(1.0)
            }
        }
    }

    /// Makes `scene` current. The first scene loads immediately; later
    /// switches fade the old scene to black first. A switch requested during
    /// a transition replaces the outstanding pending scene.
    pub fn switch_scene(&mut self, mut scene: Box<Scene>) {
        if self.current.is_none() {
            let mut services = SceneServices {
                textures: &mut self.textures,
            };
            scene.load(&mut services);
            info!(scene = scene.tag().raw(), "scene_switched");
            self.current = Some(scene);
            return;
        }
        self.pending = Some(scene);
        if !matches!(self.transition, Transition::FadingOut { .. }) {
            self.transition = Transition::FadingOut { elapsed: 0.0 };
        }
    }

    pub fn resize(&mut self, screen_width: u32, screen_height: u32) {
        self.viewport = LogicalViewport::new(screen_width, screen_height);
        self.targets = [
            RenderTarget::new(screen_width, screen_height),
            RenderTarget::new(screen_width, screen_height),
        ];
        self.read_index = 0;
        self.pick_buffer = pick_buffer_for(&self.viewport);
    }

    /// One update tick: texture completions, the transition machine, and the
    /// current scene.
    pub fn advance(&mut self, dt: f32) {
        self.textures.poll();
        if self.is_loading() {
            self.loading_clock += dt;
        }
        self.advance_transition(dt);

        let switch = match self.current.as_mut() {
            Some(scene) => {
                let mut services = SceneServices {
                    textures: &mut self.textures,
                };
                scene.advance(dt, &mut services)
            }
            None => None,
        };
        if let Some(next) = switch {
            self.switch_scene(next);
        }
    }

    fn advance_transition(&mut self, dt: f32) {
        match self.transition {
            Transition::Idle => {}
            Transition::FadingOut { elapsed } => {
                let elapsed = elapsed + dt;
                if elapsed >= SCENE_TRANSITION_SECONDS {
                    self.swap_scenes();
                    self.transition = Transition::FadingIn { elapsed: 0.0 };
                } else {
                    self.transition = Transition::FadingOut { elapsed };
                }
            }
            Transition::FadingIn { elapsed } => {
                let elapsed = elapsed + dt;
                self.transition = if elapsed >= SCENE_TRANSITION_SECONDS {
                    Transition::Idle
                } else {
                    Transition::FadingIn { elapsed }
                };
            }
        }
    }

    fn swap_scenes(&mut self) {
        let next = match self.pending.take() {
            Some(next) => next,
            None => return,
        };
        if let Some(mut old) = self.current.take() {
            old.unload();
        }
        let mut services = SceneServices {
            textures: &mut self.textures,
        };
        let mut next = next;
        next.load(&mut services);
        info!(scene = next.tag().raw(), "scene_switched");
        self.current = Some(next);
    }

    /// Renders the scene, the transition overlay, and the filter chain.
    /// Returns the target holding the finished frame.
    pub fn render_frame(&mut self) -> Result<&RenderTarget, StageError> {
        let scene = self.current.as_ref().ok_or(StageError::NoSceneAssigned)?;
        if self.is_loading() {
            self.read_index = 0;
            draw_loading_indicator(&mut self.targets[0], self.loading_clock);
            return Ok(&self.targets[0]);
        }
        let logical = Vec2::new(self.viewport.logical_width, self.viewport.logical_height);
        let scale = self.viewport.scale;
        let overlay_alpha = self.transition_alpha();

        self.read_index = 0;
        let target = &mut self.targets[0];
        target.clear(scene.background());
        let mut ctx = DrawContext::new(target);
        ctx.stack.scale(scale, scale);
        scene.render(&mut ctx, logical)?;

        if overlay_alpha > 0.0 {
            let alpha = (overlay_alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
            ctx.fill_quad(logical.x, logical.y, [0, 0, 0, alpha]);
        }

        // One setup threads through the whole chain; a pass may shrink it
        // and later passes operate on the reduced extent.
        let mut setup = FrameSetup {
            width: self.targets[0].width(),
            height: self.targets[0].height(),
        };
        for filter in &self.filters {
            for pass in 0..filter.pass_count() {
                let (left, right) = self.targets.split_at_mut(1);
                let (src, dst) = if self.read_index == 0 {
                    (&left[0], &mut right[0])
                } else {
                    (&right[0], &mut left[0])
                };
                filter.apply_pass(pass, src, dst, &mut setup);
                self.read_index ^= 1;
            }
        }

        if self.pick_debug {
            blit_corner(&self.pick_buffer, &mut self.targets[self.read_index]);
        }
        Ok(&self.targets[self.read_index])
    }

    /// Picking pass plus dispatch of queued pointer events. Runs on the
    /// render thread right after compositing.
    pub fn run_picking(&mut self) {
        let loading = self.is_loading();
        let scene = match self.current.as_mut() {
            Some(scene) => scene,
            None => return,
        };
        let logical = Vec2::new(self.viewport.logical_width, self.viewport.logical_height);

        self.touch_map.begin_pass(&mut self.pick_buffer);
        if !loading {
            let mut ctx = DrawContext::new(&mut self.pick_buffer);
            ctx.set_hard_alpha(true);
            ctx.stack.scale(PICK_BUFFER_SCALE, PICK_BUFFER_SCALE);
            scene.render_pick(&mut ctx, &mut self.touch_map, logical);
        }

        // While loading the buffer stays at the background id, so queued
        // touches drain without hitting any node.
        scene.dispatch_touches(&mut self.touch_map, &self.pick_buffer);
    }
}

/// Built-in frame shown while texture loads are outstanding: a dim bar with
/// a bright segment sweeping left to right.
fn draw_loading_indicator(out: &mut RenderTarget, clock: f32) {
    out.clear([12, 12, 16, 255]);
    let bar_width = (out.width() / 3).max(8).min(out.width());
    let bar_height = 6.min(out.height());
    let x0 = (out.width() - bar_width) / 2;
    let y0 = (out.height() - bar_height) / 2;
    let sweep = (clock * 1.5).fract();
    let lit_start = (bar_width as f32 * sweep) as u32;
    let lit_end = lit_start + (bar_width / 4).max(1);
    for y in 0..bar_height {
        for x in 0..bar_width {
            let shade = if x >= lit_start && x < lit_end { 220 } else { 70 };
            out.put(x0 + x, y0 + y, [shade, shade, shade, 255]);
        }
    }
}

fn pick_buffer_for(viewport: &LogicalViewport) -> RenderTarget {
    RenderTarget::new(
        (viewport.logical_width * PICK_BUFFER_SCALE).ceil() as u32,
        (viewport.logical_height * PICK_BUFFER_SCALE).ceil() as u32,
    )
}

/// Copies the picking buffer into the top-left corner, ids amplified into
/// the green channel so low slot numbers are visible.
fn blit_corner(pick: &RenderTarget, out: &mut RenderTarget) {
    let width = pick.width().min(out.width());
    let height = pick.height().min(out.height());
    for y in 0..height {
        for x in 0..width {
            let slot = pick.sample(x, y)[0];
            out.put(x, y, [slot, slot.saturating_mul(64), 0, 255]);
        }
    }
}
