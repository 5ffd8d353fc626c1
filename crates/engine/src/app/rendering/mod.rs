pub mod context;
pub mod filter;
pub mod stage;
pub mod target;

pub use context::{ColorFilter, DrawContext, RenderError};
pub use filter::{BoxBlurFilter, Filter, FrameSetup, GrayscaleFilter};
pub use stage::{Stage, StageError, SCENE_TRANSITION_SECONDS};
pub use target::RenderTarget;
