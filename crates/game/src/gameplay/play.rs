use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use engine::app::{
    BodyDescriptor, BodyKey, BodyType, CollisionRecord, Connections, FlatRect, Node, NodeId,
    Scene, SceneBehavior, SceneCommands, SceneContent, SceneServices, ShapeDef, Sprite,
    TouchNode, TouchPhase, Transform2D, Vec2,
};

const PLAY_BACKGROUND: [u8; 4] = [18, 32, 18, 255];
const BALL_RADIUS: f32 = 20.0;
const BALL_START: Vec2 = Vec2 { x: 300.0, y: 80.0 };
const GROUND_Y: f32 = 560.0;
/// Screen space grows downward, so downward gravity is positive y.
const SCREEN_GRAVITY: (f32, f32) = (0.0, 9.8);

/// Physics playground: a ball drops onto a static floor; each floor contact
/// kicks the ball back up. A corner button returns to the menu.
pub struct PlayBehavior {
    ball: Option<BodyKey>,
    floor: Option<BodyKey>,
    ball_node: Option<NodeId>,
    menu_requested: Arc<AtomicBool>,
    bounces: u32,
    halt_log: Arc<Mutex<Vec<f32>>>,
}

impl PlayBehavior {
    pub fn new() -> Self {
        Self {
            ball: None,
            floor: None,
            ball_node: None,
            menu_requested: Arc::new(AtomicBool::new(false)),
            bounces: 0,
            halt_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[cfg(test)]
    pub fn ball_node_of(scene: &Scene) -> Option<NodeId> {
        scene
            .content()
            .root
            .iter_deep()
            .find(|node| node.transform().position == BALL_START)
            .map(|node| node.id())
    }

    #[cfg(test)]
    pub fn halt_log(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.halt_log)
    }
}

impl SceneBehavior for PlayBehavior {
    fn on_loaded(&mut self, content: &mut SceneContent, _services: &mut SceneServices<'_>) {
        content.background = PLAY_BACKGROUND;

        let mut floor_rect = Box::new(FlatRect::new(Vec2::new(600.0, 40.0), [80, 70, 50, 255]));
        *floor_rect.transform_mut() = Transform2D::at(0.0, GROUND_Y - 20.0);
        content.root.add_child(floor_rect);

        let mut ball_sprite = Box::new(Sprite::new(Vec2::new(
            BALL_RADIUS * 2.0,
            BALL_RADIUS * 2.0,
        )));
        *ball_sprite.transform_mut() = Transform2D::at(BALL_START.x, BALL_START.y);
        let ball_node = content.root.add_child(ball_sprite);
        self.ball_node = Some(ball_node);

        let requested = Arc::clone(&self.menu_requested);
        let mut back_rect = Box::new(FlatRect::new(Vec2::new(80.0, 40.0), [60, 60, 120, 255]));
        *back_rect.transform_mut() = Transform2D::at(10.0, 10.0);
        let back_button = TouchNode::new(back_rect, Vec2::new(80.0, 40.0), move |event| {
            if event.phase == TouchPhase::Up {
                requested.store(true, Ordering::SeqCst);
            }
            true
        });
        content.root.add_child(Box::new(back_button));

        let physics = content.physics_world();
        physics.set_gravity(SCREEN_GRAVITY);
        let ball = physics.insert_body(
            BodyDescriptor {
                position: BALL_START,
                shape: ShapeDef::Circle {
                    radius: BALL_RADIUS,
                },
                restitution: 0.6,
                ..BodyDescriptor::default()
            },
            Some(ball_node),
            Connections::POSITION | Connections::ROTATION,
        );
        let floor = physics.insert_body(
            BodyDescriptor {
                body_type: BodyType::Static,
                position: Vec2::new(300.0, GROUND_Y),
                shape: ShapeDef::Rect {
                    half_width: 300.0,
                    half_height: 20.0,
                },
                ..BodyDescriptor::default()
            },
            None,
            Connections::NONE,
        );
        self.ball = Some(ball);
        self.floor = Some(floor);
    }

    fn on_local_load(&mut self, content: &mut SceneContent, _services: &mut SceneServices<'_>) {
        let physics = content.physics_world();
        if let Some(ball) = self.ball {
            if let Err(attach_error) = physics.attach(ball) {
                debug!(error = %attach_error, "ball_attach_failed");
            }
        }
        if let Some(floor) = self.floor {
            if let Err(attach_error) = physics.attach(floor) {
                debug!(error = %attach_error, "floor_attach_failed");
            }
        }
    }

    fn advance_scene(
        &mut self,
        _dt: f32,
        _content: &mut SceneContent,
        _services: &mut SceneServices<'_>,
        commands: &mut SceneCommands,
    ) {
        if self.menu_requested.swap(false, Ordering::SeqCst) {
            commands.switch_scene(Box::new(Scene::new(Box::new(
                crate::gameplay::MenuBehavior::new(),
            ))));
        }
    }

    fn on_collision(
        &mut self,
        record: &CollisionRecord,
        _content: &mut SceneContent,
        _commands: &mut SceneCommands,
    ) {
        self.bounces += 1;
        debug!(
            bounce = self.bounces,
            impulse = record.max_impulse,
            "ball_bounced"
        );
    }

    fn on_unhalted(&mut self, halted_seconds: f32, _content: &mut SceneContent) {
        info!(halted_seconds, "play_resumed");
        match self.halt_log.lock() {
            Ok(mut log) => log.push(halted_seconds),
            Err(poisoned) => poisoned.into_inner().push(halted_seconds),
        }
    }
}
