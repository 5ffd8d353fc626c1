use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::info;

use engine::app::{
    Dialog, DialogBehavior, DialogResult, FlatRect, Group, Node, NodeId, Scene, SceneBehavior,
    SceneCommands, SceneContent, SceneServices, ShadowEffect, Sprite, TouchNode, TouchPhase,
    Transform2D, Vec2,
};

use crate::gameplay::PlayBehavior;

const PLAY_BUTTON_TEXTURE: &str = "ui/play.png";
const MENU_BACKGROUND: [u8; 4] = [24, 24, 40, 255];

/// Title screen: a shadowed title card and a play button that asks for
/// confirmation before entering the play scene.
pub struct MenuBehavior {
    play_requested: Arc<AtomicBool>,
    button_sprite: Option<NodeId>,
    texture_applied: bool,
}

impl MenuBehavior {
    pub fn new() -> Self {
        Self {
            play_requested: Arc::new(AtomicBool::new(false)),
            button_sprite: None,
            texture_applied: false,
        }
    }

    #[cfg(test)]
    pub fn play_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.play_requested)
    }
}

impl SceneBehavior for MenuBehavior {
    fn on_loaded(&mut self, content: &mut SceneContent, services: &mut SceneServices<'_>) {
        content.background = MENU_BACKGROUND;
        services.textures.enqueue(PLAY_BUTTON_TEXTURE);

        let mut title = Group::new();
        title.transform_mut().position = Vec2::new(150.0, 80.0);
        title.set_effect(Some(Box::new(ShadowEffect::new(Vec2::new(6.0, 6.0), 0.5))));
        title.add_child(Box::new(FlatRect::new(
            Vec2::new(300.0, 90.0),
            [250, 240, 210, 255],
        )));
        content.root.add_child(Box::new(title));

        let mut sprite = Box::new(Sprite::new(Vec2::new(200.0, 70.0)));
        *sprite.transform_mut() = Transform2D::at(200.0, 330.0);
        self.button_sprite = Some(sprite.id());
        let requested = Arc::clone(&self.play_requested);
        let button = TouchNode::new(sprite, Vec2::new(200.0, 70.0), move |event| {
            if event.phase == TouchPhase::Up {
                requested.store(true, Ordering::SeqCst);
            }
            true
        });
        content.root.add_child(Box::new(button));
    }

    fn advance_scene(
        &mut self,
        _dt: f32,
        content: &mut SceneContent,
        services: &mut SceneServices<'_>,
        commands: &mut SceneCommands,
    ) {
        if !self.texture_applied {
            if let Some(texture) = services.textures.get(PLAY_BUTTON_TEXTURE) {
                if let Some(node) = self
                    .button_sprite
                    .and_then(|id| content.root.find_node_mut(id))
                {
                    if let Some(sprite) = node.as_sprite_mut() {
                        sprite.set_texture(Some(texture));
                    }
                }
                self.texture_applied = true;
            } else if services.textures.is_failed(PLAY_BUTTON_TEXTURE) {
                self.texture_applied = true;
            }
        }

        if self.play_requested.swap(false, Ordering::SeqCst) {
            commands.present_dialog(Dialog::new(Box::new(ConfirmStartDialog::new())));
        }
    }

    fn on_dialog_dismissed(
        &mut self,
        result: DialogResult,
        _content: &mut SceneContent,
        commands: &mut SceneCommands,
    ) {
        info!(?result, "menu_confirm_closed");
        if result == DialogResult::Yes {
            commands.switch_scene(Box::new(Scene::new(Box::new(PlayBehavior::new()))));
        }
    }
}

const CHOICE_NONE: u8 = 0;
const CHOICE_YES: u8 = 1;
const CHOICE_NO: u8 = 2;
const CONFIRM_FADE_SECONDS: f32 = 0.15;

/// Yes/no confirmation panel. The panel fades in with the shade and the two
/// buttons write their choice for the next dialog tick.
struct ConfirmStartDialog {
    choice: Arc<AtomicU8>,
}

impl ConfirmStartDialog {
    fn new() -> Self {
        Self {
            choice: Arc::new(AtomicU8::new(CHOICE_NONE)),
        }
    }

    fn choice_button(&self, x: f32, choice: u8, color: [u8; 4]) -> TouchNode {
        let mut rect = Box::new(FlatRect::new(Vec2::new(90.0, 50.0), color));
        *rect.transform_mut() = Transform2D::at(x, 90.0);
        let target = Arc::clone(&self.choice);
        TouchNode::new(rect, Vec2::new(90.0, 50.0), move |event| {
            if event.phase == TouchPhase::Up {
                target.store(choice, Ordering::SeqCst);
            }
            true
        })
    }
}

impl DialogBehavior for ConfirmStartDialog {
    fn on_presented(&mut self, content: &mut SceneContent, _services: &mut SceneServices<'_>) {
        let mut panel = Group::new();
        panel.transform_mut().position = Vec2::new(150.0, 220.0);
        panel.add_child(Box::new(FlatRect::new(
            Vec2::new(300.0, 160.0),
            [235, 235, 235, 255],
        )));
        panel.add_child(Box::new(self.choice_button(40.0, CHOICE_YES, [90, 180, 90, 255])));
        panel.add_child(Box::new(self.choice_button(170.0, CHOICE_NO, [180, 90, 90, 255])));
        content.root.add_child(Box::new(panel));
    }

    fn fade_in(&mut self, elapsed: f32, content: &mut SceneContent) -> bool {
        let progress = (elapsed / CONFIRM_FADE_SECONDS).min(1.0);
        content.root.set_alpha(progress);
        progress >= 1.0
    }

    fn fade_out(&mut self, elapsed: f32, content: &mut SceneContent) -> bool {
        let progress = (elapsed / CONFIRM_FADE_SECONDS).min(1.0);
        content.root.set_alpha(1.0 - progress);
        progress >= 1.0
    }

    fn advance_dialog(&mut self, _dt: f32, _content: &mut SceneContent) -> Option<DialogResult> {
        match self.choice.swap(CHOICE_NONE, Ordering::SeqCst) {
            CHOICE_YES => Some(DialogResult::Yes),
            CHOICE_NO => Some(DialogResult::No),
            _ => None,
        }
    }
}
