pub mod config;
pub mod effect;
pub mod entity;
pub mod input;
pub mod loop_runner;
pub mod metrics;
pub mod physics;
pub mod picking;
pub mod rendering;
pub mod scene;
pub mod texture;
pub mod transform;

pub use config::{ConfigError, StageConfig};
pub use effect::{Effect, ShadowEffect};
pub use entity::{
    Animator, AnimatorState, Caps, FlatRect, Group, Node, NodeId, RenderFlags, SceneTag, Sprite,
    TouchNode,
};
pub use input::{LogicalViewport, TouchEvent, TouchPhase, LOGICAL_SHORT_DIMENSION};
pub use loop_runner::{run_app, AppError};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use physics::{
    BodyDescriptor, BodyKey, BodyType, CollisionRecord, Connections, PhysicsError, PhysicsWorld,
    ShapeDef, DEFAULT_GRAVITY, PIXELS_PER_METER,
};
pub use picking::{TouchMap, TouchSender};
pub use rendering::{Stage, StageError};
pub use scene::{
    Dialog, DialogBack, DialogBehavior, DialogPhase, DialogResult, Scene, SceneBehavior,
    SceneCommand, SceneCommands, SceneContent, SceneServices, DIALOG_SHADE_MAX, DIALOG_SHADE_RATE,
};
pub use texture::{
    FileTextureProvider, Texture, TextureError, TextureProvider, TextureQueue,
    MAX_CONCURRENT_LOADS,
};
pub use transform::{Mat2D, MatrixStack, Transform2D, Vec2};
