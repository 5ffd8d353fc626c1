use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::app::effect::Effect;
use crate::app::input::TouchEvent;
use crate::app::picking::TouchMap;
use crate::app::rendering::context::{DrawContext, RenderError};
use crate::app::texture::Texture;
use crate::app::transform::{Transform2D, Vec2};

/// Process-unique node identity. Never reused, never tied to tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> NodeId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identity of a live scene, handed to nodes on attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneTag(u32);

impl SceneTag {
    pub fn next() -> SceneTag {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        SceneTag(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Capability bits a node declares once. Traversals consult these instead of
/// downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caps(u8);

impl Caps {
    pub const NONE: Caps = Caps(0);
    pub const RENDERABLE: Caps = Caps(1 << 0);
    pub const ANIMATABLE: Caps = Caps(1 << 1);
    pub const TOUCHABLE: Caps = Caps(1 << 2);
    pub const TRANSFORMABLE: Caps = Caps(1 << 3);

    pub const fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Caps) -> Caps {
        Caps(self.0 | other.0)
    }
}

impl std::ops::BitOr for Caps {
    type Output = Caps;
    fn bitor(self, rhs: Caps) -> Caps {
        self.union(rhs)
    }
}

/// Per-call render overrides, passed down explicitly instead of hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderFlags(u8);

impl RenderFlags {
    pub const NONE: RenderFlags = RenderFlags(0);
    /// Skip the receiving node's own effect chain.
    pub const SUPPRESS_EFFECTS: RenderFlags = RenderFlags(1 << 0);
    /// Silhouette pass: descendants skip effects and color filtering too.
    pub const SUPPRESS_COLOR_FILTER: RenderFlags = RenderFlags(1 << 1);

    pub const fn contains(self, other: RenderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: RenderFlags) -> RenderFlags {
        RenderFlags(self.0 & !other.0)
    }
}

impl std::ops::BitOr for RenderFlags {
    type Output = RenderFlags;
    fn bitor(self, rhs: RenderFlags) -> RenderFlags {
        RenderFlags(self.0 | rhs.0)
    }
}

/// A drawable/animatable/touchable element of the scene tree. Groups hold
/// owned children; everything else is a leaf.
pub trait Node: Send {
    fn id(&self) -> NodeId;
    fn caps(&self) -> Caps;
    fn transform(&self) -> &Transform2D;
    fn transform_mut(&mut self) -> &mut Transform2D;

    fn alpha(&self) -> f32 {
        1.0
    }
    fn set_alpha(&mut self, _alpha: f32) {}

    fn render(&self, ctx: &mut DrawContext<'_>, flags: RenderFlags) -> Result<(), RenderError>;

    /// Draws this node's hit area in its picking color, if it has one.
    fn render_pick(&self, _ctx: &mut DrawContext<'_>, _map: &mut TouchMap) {}

    fn advance(&mut self, _dt: f32) {}

    /// Returns true when the event was consumed.
    fn handle_touch(&mut self, _event: &TouchEvent) -> bool {
        false
    }

    /// The pointer ended its gesture over some other node.
    fn pointer_left(&mut self, _pointer_id: u32) {}

    fn on_attached(&mut self, _scene: SceneTag) {}
    fn on_detached(&mut self) {}

    fn as_group(&self) -> Option<&Group> {
        None
    }
    fn as_group_mut(&mut self) -> Option<&mut Group> {
        None
    }
    fn as_sprite_mut(&mut self) -> Option<&mut Sprite> {
        None
    }
}

/// Drives a group's transform over time. Returned state controls retention.
pub trait Animator: Send {
    fn advance(&mut self, dt: f32, transform: &mut Transform2D, alpha: &mut f32) -> AnimatorState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatorState {
    Running,
    Finished,
}

/// Interior node: owns an ordered child list, an optional effect chain, and
/// an optional animator. Transform and alpha compose multiplicatively down
/// the subtree.
pub struct Group {
    id: NodeId,
    transform: Transform2D,
    alpha: f32,
    children: Vec<Box<dyn Node>>,
    effect: Option<Box<dyn Effect>>,
    animator: Option<Box<dyn Animator>>,
    scene: Option<SceneTag>,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    pub fn new() -> Self {
        Self {
            id: NodeId::next(),
            transform: Transform2D::default(),
            alpha: 1.0,
            children: Vec::new(),
            effect: None,
            animator: None,
            scene: None,
        }
    }

    pub fn scene(&self) -> Option<SceneTag> {
        self.scene
    }

    pub fn set_effect(&mut self, effect: Option<Box<dyn Effect>>) {
        self.effect = effect;
    }

    pub fn effect(&self) -> Option<&dyn Effect> {
        self.effect.as_deref()
    }

    pub fn set_animator(&mut self, animator: Option<Box<dyn Animator>>) {
        self.animator = animator;
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Appends a child at the end of draw order (topmost). If this group is
    /// attached, the child subtree is notified immediately.
    pub fn add_child(&mut self, mut child: Box<dyn Node>) -> NodeId {
        let id = child.id();
        if let Some(scene) = self.scene {
            notify_attached(child.as_mut(), scene);
        }
        self.children.push(child);
        id
    }

    /// Removes the node with `id`, searching this group's children first and
    /// then descending depth-first. The detached subtree is notified.
    pub fn remove_child(&mut self, id: NodeId) -> Option<Box<dyn Node>> {
        if let Some(index) = self.children.iter().position(|child| child.id() == id) {
            let mut removed = self.children.remove(index);
            notify_detached(removed.as_mut());
            return Some(removed);
        }
        for child in &mut self.children {
            if let Some(group) = child.as_group_mut() {
                if let Some(removed) = group.remove_child(id) {
                    return Some(removed);
                }
            }
        }
        None
    }

    pub fn bring_to_front(&mut self, id: NodeId) {
        if let Some(index) = self.children.iter().position(|child| child.id() == id) {
            let child = self.children.remove(index);
            self.children.push(child);
        }
    }

    pub fn send_to_back(&mut self, id: NodeId) {
        if let Some(index) = self.children.iter().position(|child| child.id() == id) {
            let child = self.children.remove(index);
            self.children.insert(0, child);
        }
    }

    /// Marks this subtree as belonging to `scene`. Re-attaching to the same
    /// scene is a no-op; attaching to a different scene while attached is a
    /// caller bug and logged.
    pub fn attach(&mut self, scene: SceneTag) {
        match self.scene {
            Some(current) if current == scene => return,
            Some(current) => {
                warn!(
                    current_scene = current.raw(),
                    new_scene = scene.raw(),
                    "group_reattached_without_detach"
                );
            }
            None => {}
        }
        notify_attached_group(self, scene);
    }

    pub fn detach(&mut self) {
        if self.scene.is_none() {
            return;
        }
        notify_detached_group(self);
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Node> {
        self.children.iter().map(|child| child.as_ref())
    }

    /// Depth-first traversal of the whole subtree, parents before children.
    pub fn iter_deep(&self) -> DeepIter<'_> {
        DeepIter {
            stack: vec![self.children.iter()],
        }
    }

    pub fn find_node_mut(&mut self, id: NodeId) -> Option<&mut dyn Node> {
        for child in &mut self.children {
            if child.id() == id {
                return Some(child.as_mut());
            }
            if let Some(group) = child.as_group_mut() {
                if let Some(found) = group.find_node_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Delivers `event` directly to the node with `id`, wherever it sits.
    pub fn dispatch_to(&mut self, id: NodeId, event: &TouchEvent) -> bool {
        match self.find_node_mut(id) {
            Some(node) => node.handle_touch(event),
            None => false,
        }
    }

    /// Tells every touchable node except `except` that the pointer finished
    /// its gesture elsewhere.
    pub fn broadcast_pointer_left(&mut self, except: Option<NodeId>, pointer_id: u32) {
        for child in &mut self.children {
            if Some(child.id()) != except && child.caps().contains(Caps::TOUCHABLE) {
                child.pointer_left(pointer_id);
            }
            if let Some(group) = child.as_group_mut() {
                group.broadcast_pointer_left(except, pointer_id);
            }
        }
    }

    fn render_children(
        &self,
        ctx: &mut DrawContext<'_>,
        flags: RenderFlags,
    ) -> Result<(), RenderError> {
        ctx.stack.push();
        ctx.stack.apply_transform(&self.transform);
        let saved_alpha = ctx.alpha();
        ctx.set_alpha(saved_alpha * self.alpha);

        // Effects apply to the node they decorate only, so the suppress bit
        // is consumed here and not handed to children.
        let child_flags = flags.without(RenderFlags::SUPPRESS_EFFECTS);
        for child in &self.children {
            if !child.caps().contains(Caps::RENDERABLE) {
                continue;
            }
            if let Err(error) = child.render(ctx, child_flags) {
                warn!(node = child.id().raw(), error = %error, "node_render_failed");
            }
        }

        ctx.set_alpha(saved_alpha);
        ctx.stack.pop();
        Ok(())
    }
}

impl Node for Group {
    fn id(&self) -> NodeId {
        self.id
    }

    fn caps(&self) -> Caps {
        Caps::RENDERABLE | Caps::ANIMATABLE | Caps::TOUCHABLE | Caps::TRANSFORMABLE
    }

    fn transform(&self) -> &Transform2D {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut Transform2D {
        &mut self.transform
    }

    fn alpha(&self) -> f32 {
        self.alpha
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn render(&self, ctx: &mut DrawContext<'_>, flags: RenderFlags) -> Result<(), RenderError> {
        let silhouette = flags.contains(RenderFlags::SUPPRESS_COLOR_FILTER);
        if !silhouette && !flags.contains(RenderFlags::SUPPRESS_EFFECTS) {
            if let Some(effect) = &self.effect {
                return effect.render(ctx, self);
            }
        }
        self.render_children(ctx, flags)
    }

    fn render_pick(&self, ctx: &mut DrawContext<'_>, map: &mut TouchMap) {
        ctx.stack.push();
        ctx.stack.apply_transform(&self.transform);
        for child in &self.children {
            child.render_pick(ctx, map);
        }
        ctx.stack.pop();
    }

    fn advance(&mut self, dt: f32) {
        if let Some(mut animator) = self.animator.take() {
            let state = animator.advance(dt, &mut self.transform, &mut self.alpha);
            if state == AnimatorState::Running && self.animator.is_none() {
                self.animator = Some(animator);
            }
        }
        for child in &mut self.children {
            if child.caps().contains(Caps::ANIMATABLE) {
                child.advance(dt);
            }
        }
    }

    fn handle_touch(&mut self, event: &TouchEvent) -> bool {
        for child in &mut self.children {
            if child.caps().contains(Caps::TOUCHABLE) && child.handle_touch(event) {
                return true;
            }
        }
        false
    }

    fn pointer_left(&mut self, pointer_id: u32) {
        for child in &mut self.children {
            if child.caps().contains(Caps::TOUCHABLE) {
                child.pointer_left(pointer_id);
            }
        }
    }

    fn on_attached(&mut self, scene: SceneTag) {
        notify_attached_group(self, scene);
    }

    fn on_detached(&mut self) {
        notify_detached_group(self);
    }

    fn as_group(&self) -> Option<&Group> {
        Some(self)
    }

    fn as_group_mut(&mut self) -> Option<&mut Group> {
        Some(self)
    }
}

fn notify_attached(node: &mut dyn Node, scene: SceneTag) {
    node.on_attached(scene);
}

fn notify_detached(node: &mut dyn Node) {
    node.on_detached();
}

fn notify_attached_group(group: &mut Group, scene: SceneTag) {
    group.scene = Some(scene);
    for child in &mut group.children {
        child.on_attached(scene);
    }
}

fn notify_detached_group(group: &mut Group) {
    group.scene = None;
    for child in &mut group.children {
        child.on_detached();
    }
}

/// Depth-first iterator over a subtree. The stack always resumes with the
/// first iterator from the top that still has elements, so siblings after a
/// deep branch are not lost.
pub struct DeepIter<'a> {
    stack: Vec<std::slice::Iter<'a, Box<dyn Node>>>,
}

impl<'a> Iterator for DeepIter<'a> {
    type Item = &'a dyn Node;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(child) => {
                    if let Some(group) = child.as_group() {
                        self.stack.push(group.children.iter());
                    }
                    return Some(child.as_ref());
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

const PLACEHOLDER_COLOR: [u8; 4] = [255, 0, 255, 255];

/// Textured quad leaf. Until its texture resolves it draws a placeholder so
/// layout mistakes stay visible.
pub struct Sprite {
    id: NodeId,
    transform: Transform2D,
    alpha: f32,
    size: Vec2,
    texture: Option<Arc<Texture>>,
}

impl Sprite {
    pub fn new(size: Vec2) -> Self {
        Self {
            id: NodeId::next(),
            transform: Transform2D::default(),
            alpha: 1.0,
            size,
            texture: None,
        }
    }

    pub fn with_texture(size: Vec2, texture: Arc<Texture>) -> Self {
        let mut sprite = Self::new(size);
        sprite.texture = Some(texture);
        sprite
    }

    pub fn set_texture(&mut self, texture: Option<Arc<Texture>>) {
        self.texture = texture;
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }
}

impl Node for Sprite {
    fn id(&self) -> NodeId {
        self.id
    }

    fn caps(&self) -> Caps {
        Caps::RENDERABLE | Caps::TRANSFORMABLE
    }

    fn transform(&self) -> &Transform2D {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut Transform2D {
        &mut self.transform
    }

    fn alpha(&self) -> f32 {
        self.alpha
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn render(&self, ctx: &mut DrawContext<'_>, _flags: RenderFlags) -> Result<(), RenderError> {
        ctx.stack.push();
        ctx.stack.apply_transform(&self.transform);
        let saved_alpha = ctx.alpha();
        ctx.set_alpha(saved_alpha * self.alpha);
        match &self.texture {
            Some(texture) => ctx.draw_texture(texture, self.size.x, self.size.y),
            None => ctx.fill_quad(self.size.x, self.size.y, PLACEHOLDER_COLOR),
        }
        ctx.set_alpha(saved_alpha);
        ctx.stack.pop();
        Ok(())
    }

    fn as_sprite_mut(&mut self) -> Option<&mut Sprite> {
        Some(self)
    }
}

/// Solid-color quad leaf; dialog shades and debug fills.
pub struct FlatRect {
    id: NodeId,
    transform: Transform2D,
    alpha: f32,
    size: Vec2,
    color: [u8; 4],
}

impl FlatRect {
    pub fn new(size: Vec2, color: [u8; 4]) -> Self {
        Self {
            id: NodeId::next(),
            transform: Transform2D::default(),
            alpha: 1.0,
            size,
            color,
        }
    }
}

impl Node for FlatRect {
    fn id(&self) -> NodeId {
        self.id
    }

    fn caps(&self) -> Caps {
        Caps::RENDERABLE | Caps::TRANSFORMABLE
    }

    fn transform(&self) -> &Transform2D {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut Transform2D {
        &mut self.transform
    }

    fn alpha(&self) -> f32 {
        self.alpha
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn render(&self, ctx: &mut DrawContext<'_>, _flags: RenderFlags) -> Result<(), RenderError> {
        ctx.stack.push();
        ctx.stack.apply_transform(&self.transform);
        let saved_alpha = ctx.alpha();
        ctx.set_alpha(saved_alpha * self.alpha);
        ctx.fill_quad(self.size.x, self.size.y, self.color);
        ctx.set_alpha(saved_alpha);
        ctx.stack.pop();
        Ok(())
    }
}

/// Makes an arbitrary node touchable by wrapping it. Every trait method is
/// forwarded explicitly; the wrapper adds only the hit area and the handler.
pub struct TouchNode {
    id: NodeId,
    inner: Box<dyn Node>,
    hit_size: Vec2,
    handler: Box<dyn FnMut(&TouchEvent) -> bool + Send>,
    pressed_by: Option<u32>,
}

impl TouchNode {
    pub fn new(
        inner: Box<dyn Node>,
        hit_size: Vec2,
        handler: impl FnMut(&TouchEvent) -> bool + Send + 'static,
    ) -> Self {
        Self {
            id: NodeId::next(),
            inner,
            hit_size,
            handler: Box::new(handler),
            pressed_by: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_by.is_some()
    }
}

impl Node for TouchNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn caps(&self) -> Caps {
        self.inner.caps() | Caps::TOUCHABLE
    }

    fn transform(&self) -> &Transform2D {
        self.inner.transform()
    }

    fn transform_mut(&mut self) -> &mut Transform2D {
        self.inner.transform_mut()
    }

    fn alpha(&self) -> f32 {
        self.inner.alpha()
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.inner.set_alpha(alpha);
    }

    fn render(&self, ctx: &mut DrawContext<'_>, flags: RenderFlags) -> Result<(), RenderError> {
        self.inner.render(ctx, flags)
    }

    fn render_pick(&self, ctx: &mut DrawContext<'_>, map: &mut TouchMap) {
        let color = map.color_for(self.id);
        ctx.stack.push();
        ctx.stack.apply_transform(self.inner.transform());
        ctx.fill_quad(self.hit_size.x, self.hit_size.y, color);
        ctx.stack.pop();
    }

    fn advance(&mut self, dt: f32) {
        self.inner.advance(dt);
    }

    fn handle_touch(&mut self, event: &TouchEvent) -> bool {
        use crate::app::input::TouchPhase;
        match event.phase {
            TouchPhase::Down => self.pressed_by = Some(event.pointer_id),
            TouchPhase::Up => self.pressed_by = None,
            TouchPhase::Move => {}
        }
        (self.handler)(event)
    }

    fn pointer_left(&mut self, pointer_id: u32) {
        if self.pressed_by == Some(pointer_id) {
            self.pressed_by = None;
        }
    }

    fn on_attached(&mut self, scene: SceneTag) {
        self.inner.on_attached(scene);
    }

    fn on_detached(&mut self) {
        self.inner.on_detached();
    }
}
