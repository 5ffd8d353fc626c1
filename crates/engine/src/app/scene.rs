use tracing::{debug, warn};

use crate::app::entity::{Group, Node, SceneTag};
use crate::app::physics::{CollisionRecord, PhysicsWorld};
use crate::app::picking::TouchMap;
use crate::app::rendering::context::{DrawContext, RenderError};
use crate::app::rendering::target::RenderTarget;
use crate::app::texture::TextureQueue;
use crate::app::transform::Vec2;

/// Dialog shade fade speed, alpha per second.
pub const DIALOG_SHADE_RATE: f32 = 2.0;
/// Dialog shade ceiling.
pub const DIALOG_SHADE_MAX: f32 = 0.25;

const SHADE_COLOR: [u8; 3] = [0, 0, 0];

/// What a scene owns: its node tree, clear color, and an optional physics
/// world created on first use.
pub struct SceneContent {
    pub root: Group,
    pub background: [u8; 4],
    physics: Option<PhysicsWorld>,
}

impl Default for SceneContent {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneContent {
    pub fn new() -> Self {
        Self {
            root: Group::new(),
            background: [0, 0, 0, 255],
            physics: None,
        }
    }

    /// The scene's physics world, created on first call.
    pub fn physics_world(&mut self) -> &mut PhysicsWorld {
        self.physics.get_or_insert_with(PhysicsWorld::default)
    }

    pub fn physics(&self) -> Option<&PhysicsWorld> {
        self.physics.as_ref()
    }

    pub fn has_physics(&self) -> bool {
        self.physics.is_some()
    }
}

/// What the engine lends a scene while it runs.
pub struct SceneServices<'a> {
    pub textures: &'a mut TextureQueue,
}

/// Deferred scene-level requests collected during a behavior callback and
/// applied after it returns.
pub enum SceneCommand {
    Halt,
    Unhalt,
    PresentDialog(Dialog),
    SwitchScene(Box<Scene>),
}

#[derive(Default)]
pub struct SceneCommands {
    queued: Vec<SceneCommand>,
}

impl SceneCommands {
    pub fn halt(&mut self) {
        self.queued.push(SceneCommand::Halt);
    }

    pub fn unhalt(&mut self) {
        self.queued.push(SceneCommand::Unhalt);
    }

    pub fn present_dialog(&mut self, dialog: Dialog) {
        self.queued.push(SceneCommand::PresentDialog(dialog));
    }

    pub fn switch_scene(&mut self, scene: Box<Scene>) {
        self.queued.push(SceneCommand::SwitchScene(scene));
    }
}

/// Game-side logic of a scene. Every hook is optional.
pub trait SceneBehavior: Send {
    /// One-time setup, before the first presentation.
    fn on_loaded(&mut self, _content: &mut SceneContent, _services: &mut SceneServices<'_>) {}

    /// Per-presentation setup; runs every time the scene becomes current.
    fn on_local_load(&mut self, _content: &mut SceneContent, _services: &mut SceneServices<'_>) {}

    fn advance_scene(
        &mut self,
        _dt: f32,
        _content: &mut SceneContent,
        _services: &mut SceneServices<'_>,
        _commands: &mut SceneCommands,
    ) {
    }

    /// The scene resumed after `halted_seconds` of scene time spent halted.
    fn on_unhalted(&mut self, _halted_seconds: f32, _content: &mut SceneContent) {}

    fn on_dialog_dismissed(
        &mut self,
        _result: DialogResult,
        _content: &mut SceneContent,
        _commands: &mut SceneCommands,
    ) {
    }

    fn on_collision(
        &mut self,
        _record: &CollisionRecord,
        _content: &mut SceneContent,
        _commands: &mut SceneCommands,
    ) {
    }

    fn on_unload(&mut self, _content: &mut SceneContent) {}
}

/// A presentable screen: content plus behavior plus the halt/dialog state
/// machine. Time is scene-local and advances only through `advance`, so
/// halt durations are deterministic.
pub struct Scene {
    tag: SceneTag,
    content: SceneContent,
    behavior: Box<dyn SceneBehavior>,
    clock: f64,
    halted: bool,
    halt_started_at: Option<f64>,
    loaded: bool,
    dialog: Option<Dialog>,
}

impl Scene {
    pub fn new(behavior: Box<dyn SceneBehavior>) -> Self {
        Self {
            tag: SceneTag::next(),
            content: SceneContent::new(),
            behavior,
            clock: 0.0,
            halted: false,
            halt_started_at: None,
            loaded: false,
            dialog: None,
        }
    }

    pub fn tag(&self) -> SceneTag {
        self.tag
    }

    pub fn content(&self) -> &SceneContent {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut SceneContent {
        &mut self.content
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn has_dialog(&self) -> bool {
        self.dialog.is_some()
    }

    pub fn dialog_mut(&mut self) -> Option<&mut Dialog> {
        self.dialog.as_mut()
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Runs load hooks and attaches the tree. `on_loaded` fires once per
    /// scene lifetime, `on_local_load` on every presentation.
    pub fn load(&mut self, services: &mut SceneServices<'_>) {
        if !self.loaded {
            self.behavior.on_loaded(&mut self.content, services);
            self.loaded = true;
        }
        self.behavior.on_local_load(&mut self.content, services);
        self.content.root.attach(self.tag);
        debug!(scene = self.tag.raw(), "scene_loaded");
    }

    pub fn unload(&mut self) {
        self.behavior.on_unload(&mut self.content);
        self.content.root.detach();
        debug!(scene = self.tag.raw(), "scene_unloaded");
    }

    /// Freezes behavior, animation, and physics. Halting while halted is a
    /// no-op and keeps the original halt timestamp.
    pub fn halt(&mut self) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.halt_started_at = Some(self.clock);
    }

    pub fn unhalt(&mut self) {
        if !self.halted {
            return;
        }
        self.halted = false;
        let halted_seconds = self
            .halt_started_at
            .take()
            .map(|started| (self.clock - started) as f32)
            .unwrap_or(0.0);
        self.behavior.on_unhalted(halted_seconds, &mut self.content);
    }

    /// Presents `dialog` over this scene and halts it. A dialog on top of an
    /// existing dialog is refused.
    pub fn present_dialog(&mut self, mut dialog: Dialog, services: &mut SceneServices<'_>) {
        if self.dialog.is_some() {
            warn!(scene = self.tag.raw(), "dialog_already_presented");
            return;
        }
        self.halt();
        dialog.present(services);
        self.dialog = Some(dialog);
    }

    /// Routes the platform back action: an open dialog decides first.
    pub fn back(&mut self) -> bool {
        if let Some(dialog) = &mut self.dialog {
            return dialog.back();
        }
        false
    }

    /// Advances scene time, the dialog machine, and, while not halted, the
    /// behavior, the node tree, and physics. Returns a requested scene
    /// switch, if any.
    pub fn advance(
        &mut self,
        dt: f32,
        services: &mut SceneServices<'_>,
    ) -> Option<Box<Scene>> {
        self.clock += dt as f64;

        let mut commands = SceneCommands::default();
        let was_halted = self.halted;

        let dialog_done = match &mut self.dialog {
            Some(dialog) => {
                dialog.advance(dt);
                dialog.phase() == DialogPhase::Dismissed
            }
            None => false,
        };
        if dialog_done {
            if let Some(dialog) = self.dialog.take() {
                self.unhalt();
                self.behavior
                    .on_dialog_dismissed(dialog.result(), &mut self.content, &mut commands);
            }
        }

        // Resuming after a dismissal takes effect on the next tick.
        if !self.halted && !was_halted {
            self.behavior
                .advance_scene(dt, &mut self.content, services, &mut commands);
            self.content.root.advance(dt);
            if let Some(physics) = self.content.physics.as_mut() {
                physics.step(dt);
            }
            if let Some(physics) = &self.content.physics {
                physics.sync_to_graph(&mut self.content.root);
            }
            let collisions = match self.content.physics.as_mut() {
                Some(physics) => physics.take_collisions(),
                None => Vec::new(),
            };
            for record in &collisions {
                self.behavior
                    .on_collision(record, &mut self.content, &mut commands);
            }
        }

        self.apply_commands(commands, services)
    }

    fn apply_commands(
        &mut self,
        commands: SceneCommands,
        services: &mut SceneServices<'_>,
    ) -> Option<Box<Scene>> {
        let mut switch = None;
        for command in commands.queued {
            match command {
                SceneCommand::Halt => self.halt(),
                SceneCommand::Unhalt => self.unhalt(),
                SceneCommand::PresentDialog(dialog) => self.present_dialog(dialog, services),
                SceneCommand::SwitchScene(scene) => switch = Some(scene),
            }
        }
        switch
    }

    /// Draws the scene and any dialog on top. A full-screen dialog in its
    /// active phase replaces the parent entirely.
    pub fn render(
        &self,
        ctx: &mut DrawContext<'_>,
        logical_size: Vec2,
    ) -> Result<(), RenderError> {
        let dialog_covers = self
            .dialog
            .as_ref()
            .map(|dialog| dialog.covers_parent())
            .unwrap_or(false);
        if !dialog_covers {
            self.content
                .root
                .render(&mut *ctx, crate::app::entity::RenderFlags::NONE)?;
        }
        if let Some(dialog) = &self.dialog {
            dialog.render(ctx, logical_size)?;
        }
        Ok(())
    }

    /// Picking traversal. An open dialog swallows every touch outside its
    /// own nodes, so the halted parent never hears from the pointer.
    pub fn render_pick(&self, ctx: &mut DrawContext<'_>, map: &mut TouchMap, logical_size: Vec2) {
        self.content.root.render_pick(ctx, map);
        if let Some(dialog) = &self.dialog {
            dialog.render_pick(ctx, map, logical_size);
        }
    }

    pub fn dispatch_touches(&mut self, map: &mut TouchMap, buffer: &RenderTarget) {
        match &mut self.dialog {
            Some(dialog) => map.dispatch(&mut dialog.content.root, buffer),
            None => map.dispatch(&mut self.content.root, buffer),
        }
    }

    pub fn background(&self) -> [u8; 4] {
        self.content.background
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    Appearing,
    Active,
    Dismissing,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogResult {
    None,
    Yes,
    No,
    Ok,
    Cancel,
}

/// What the back action does while a dialog is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogBack {
    Cancel,
    Ignore,
}

/// Game-side logic of a dialog.
pub trait DialogBehavior: Send {
    fn on_presented(&mut self, _content: &mut SceneContent, _services: &mut SceneServices<'_>) {}

    /// Custom appear animation; return true when finished. `elapsed` is time
    /// since presentation.
    fn fade_in(&mut self, _elapsed: f32, _content: &mut SceneContent) -> bool {
        true
    }

    /// Custom dismiss animation; return true when finished.
    fn fade_out(&mut self, _elapsed: f32, _content: &mut SceneContent) -> bool {
        true
    }

    /// Per-tick update while active. Returning a result dismisses.
    fn advance_dialog(&mut self, _dt: f32, _content: &mut SceneContent) -> Option<DialogResult> {
        None
    }

    /// Full-screen dialogs replace the parent scene while active.
    fn is_full(&self) -> bool {
        false
    }

    fn on_back(&mut self) -> DialogBack {
        DialogBack::Cancel
    }
}

/// Modal overlay scene: appears over a halted parent behind a darkening
/// shade, runs until it has a result, then fades away.
pub struct Dialog {
    tag: SceneTag,
    content: SceneContent,
    behavior: Box<dyn DialogBehavior>,
    phase: DialogPhase,
    shade_alpha: f32,
    result: DialogResult,
    phase_elapsed: f32,
}

impl Dialog {
    pub fn new(behavior: Box<dyn DialogBehavior>) -> Self {
        Self {
            tag: SceneTag::next(),
            content: SceneContent::new(),
            behavior,
            phase: DialogPhase::Appearing,
            shade_alpha: 0.0,
            result: DialogResult::None,
            phase_elapsed: 0.0,
        }
    }

    pub fn phase(&self) -> DialogPhase {
        self.phase
    }

    pub fn result(&self) -> DialogResult {
        self.result
    }

    pub fn shade_alpha(&self) -> f32 {
        self.shade_alpha
    }

    pub fn content_mut(&mut self) -> &mut SceneContent {
        &mut self.content
    }

    fn present(&mut self, services: &mut SceneServices<'_>) {
        self.behavior.on_presented(&mut self.content, services);
        self.content.root.attach(self.tag);
    }

    /// Requests dismissal with `result`. Ignored once dismissing.
    pub fn dismiss(&mut self, result: DialogResult) {
        if matches!(self.phase, DialogPhase::Appearing | DialogPhase::Active) {
            self.result = result;
        }
    }

    pub fn back(&mut self) -> bool {
        match self.behavior.on_back() {
            DialogBack::Cancel => {
                self.dismiss(DialogResult::Cancel);
                true
            }
            DialogBack::Ignore => true,
        }
    }

    fn covers_parent(&self) -> bool {
        self.behavior.is_full() && self.phase == DialogPhase::Active
    }

    pub fn advance(&mut self, dt: f32) {
        let shade_rising = matches!(self.phase, DialogPhase::Appearing | DialogPhase::Active);
        if shade_rising {
            self.shade_alpha = (self.shade_alpha + DIALOG_SHADE_RATE * dt).min(DIALOG_SHADE_MAX);
        } else {
            self.shade_alpha = (self.shade_alpha - DIALOG_SHADE_RATE * dt).max(0.0);
        }

        match self.phase {
            DialogPhase::Appearing => {
                self.phase_elapsed += dt;
                let fade_done = self
                    .behavior
                    .fade_in(self.phase_elapsed, &mut self.content);
                self.content.root.advance(dt);
                if self.result != DialogResult::None {
                    self.enter_phase(DialogPhase::Dismissing);
                } else if fade_done && self.shade_alpha >= DIALOG_SHADE_MAX {
                    self.enter_phase(DialogPhase::Active);
                }
            }
            DialogPhase::Active => {
                if let Some(result) = self.behavior.advance_dialog(dt, &mut self.content) {
                    self.dismiss(result);
                }
                self.content.root.advance(dt);
                if let Some(physics) = self.content.physics.as_mut() {
                    physics.step(dt);
                }
                if let Some(physics) = &self.content.physics {
                    physics.sync_to_graph(&mut self.content.root);
                }
                if self.result != DialogResult::None {
                    self.enter_phase(DialogPhase::Dismissing);
                }
            }
            DialogPhase::Dismissing => {
                self.phase_elapsed += dt;
                let fade_done = self
                    .behavior
                    .fade_out(self.phase_elapsed, &mut self.content);
                self.content.root.advance(dt);
                if fade_done && self.shade_alpha <= 0.0 {
                    self.content.root.detach();
                    self.enter_phase(DialogPhase::Dismissed);
                }
            }
            DialogPhase::Dismissed => {}
        }
    }

    fn enter_phase(&mut self, phase: DialogPhase) {
        debug!(dialog = self.tag.raw(), ?phase, "dialog_phase");
        self.phase = phase;
        self.phase_elapsed = 0.0;
    }

    fn render(&self, ctx: &mut DrawContext<'_>, logical_size: Vec2) -> Result<(), RenderError> {
        if self.shade_alpha > 0.0 {
            let alpha = (self.shade_alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
            ctx.fill_quad(
                logical_size.x,
                logical_size.y,
                [SHADE_COLOR[0], SHADE_COLOR[1], SHADE_COLOR[2], alpha],
            );
        }
        self.content
            .root
            .render(ctx, crate::app::entity::RenderFlags::NONE)
    }

    fn render_pick(&self, ctx: &mut DrawContext<'_>, map: &mut TouchMap, logical_size: Vec2) {
        // Swallow all touches under the shade before drawing dialog nodes.
        ctx.fill_quad(logical_size.x, logical_size.y, [0, 0, 0, 255]);
        self.content.root.render_pick(ctx, map);
    }
}
