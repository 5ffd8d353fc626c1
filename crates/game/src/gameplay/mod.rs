mod menu;
mod play;

pub use menu::MenuBehavior;
pub use play::PlayBehavior;
