use std::collections::HashMap;
use std::num::NonZeroUsize;

use rapier2d::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::app::entity::{Group, NodeId};
use crate::app::transform::Vec2;

/// Logical units per simulation meter.
pub const PIXELS_PER_METER: f32 = 30.0;
pub const DEFAULT_GRAVITY: (f32, f32) = (0.0, -9.8);
const VELOCITY_ITERATIONS: usize = 8;
const POSITION_ITERATIONS: usize = 3;

#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("polygon shape needs at least 3 points and a valid convex hull")]
    InvalidPolygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Dynamic,
    Static,
    Kinematic,
}

/// Collision geometry, in logical units.
#[derive(Debug, Clone)]
pub enum ShapeDef {
    Circle { radius: f32 },
    Rect { half_width: f32, half_height: f32 },
    Polygon { points: Vec<Vec2> },
}

/// Everything needed to build a body later. Inserting a descriptor is cheap
/// and allowed from scene setup; the simulation body exists only after
/// `attach`.
#[derive(Debug, Clone)]
pub struct BodyDescriptor {
    pub body_type: BodyType,
    pub position: Vec2,
    pub rotation_degrees: f32,
    pub shape: ShapeDef,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub fixed_rotation: bool,
    pub ccd: bool,
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
}

impl Default for BodyDescriptor {
    fn default() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position: Vec2::ZERO,
            rotation_degrees: 0.0,
            shape: ShapeDef::Circle { radius: 10.0 },
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            fixed_rotation: false,
            ccd: false,
            density: 1.0,
            friction: 0.5,
            restitution: 0.2,
        }
    }
}

/// Which parts of the node transform the simulation drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connections(u8);

impl Connections {
    pub const NONE: Connections = Connections(0);
    pub const POSITION: Connections = Connections(1 << 0);
    pub const ROTATION: Connections = Connections(1 << 1);
    pub const ALL: Connections = Connections(0b11);

    pub const fn contains(self, other: Connections) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Connections {
    type Output = Connections;
    fn bitor(self, rhs: Connections) -> Connections {
        Connections(self.0 | rhs.0)
    }
}

/// Stable handle into the world's body table. Valid across attach/detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyKey(usize);

enum BodyState {
    Pending(BodyDescriptor),
    Live(RigidBodyHandle),
    /// Detached bodies never come back, but the last synced pose stays
    /// readable so nodes do not snap to the origin.
    Retired,
}

struct BodyEntry {
    target: Option<NodeId>,
    connections: Connections,
    state: BodyState,
    last_position: Vec2,
    last_rotation_degrees: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionRecord {
    pub a: BodyKey,
    pub b: BodyKey,
    pub max_impulse: f32,
}

struct PendingJoint {
    a: BodyKey,
    b: BodyKey,
    anchor_a: Vec2,
    anchor_b: Vec2,
}

/// Wrapper over the 2D simulation: descriptor-first body lifecycle, buffered
/// collision reports, and one-way pose sync into the node tree.
pub struct PhysicsWorld {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    entries: Vec<BodyEntry>,
    handle_to_key: HashMap<RigidBodyHandle, BodyKey>,
    pending_joints: Vec<PendingJoint>,
    collisions: Vec<CollisionRecord>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(DEFAULT_GRAVITY)
    }
}

impl PhysicsWorld {
    pub fn new(gravity: (f32, f32)) -> Self {
        let mut params = IntegrationParameters::default();
        if let Some(iterations) = NonZeroUsize::new(VELOCITY_ITERATIONS) {
            params.num_solver_iterations = iterations;
        }
        params.num_internal_pgs_iterations = POSITION_ITERATIONS;
        Self {
            gravity: vector![gravity.0, gravity.1],
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            entries: Vec::new(),
            handle_to_key: HashMap::new(),
            pending_joints: Vec::new(),
            collisions: Vec::new(),
        }
    }

    pub fn set_gravity(&mut self, gravity: (f32, f32)) {
        self.gravity = vector![gravity.0, gravity.1];
    }

    /// Registers a body descriptor. The body joins the simulation on
    /// `attach`; until then it only occupies a key.
    pub fn insert_body(
        &mut self,
        descriptor: BodyDescriptor,
        target: Option<NodeId>,
        connections: Connections,
    ) -> BodyKey {
        let key = BodyKey(self.entries.len());
        let last_position = descriptor.position;
        let last_rotation_degrees = descriptor.rotation_degrees;
        self.entries.push(BodyEntry {
            target,
            connections,
            state: BodyState::Pending(descriptor),
            last_position,
            last_rotation_degrees,
        });
        key
    }

    /// Builds the simulation body for `key`. Attaching twice is a no-op;
    /// attaching a retired key is refused.
    pub fn attach(&mut self, key: BodyKey) -> Result<(), PhysicsError> {
        let entry = match self.entries.get_mut(key.0) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let descriptor = match &entry.state {
            BodyState::Pending(descriptor) => descriptor.clone(),
            BodyState::Live(_) => return Ok(()),
            BodyState::Retired => {
                warn!(key = key.0, "physics_attach_on_retired_body");
                return Ok(());
            }
        };

        let collider = build_collider(&descriptor)?;
        let body = build_body(&descriptor);
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        self.entries[key.0].state = BodyState::Live(handle);
        self.handle_to_key.insert(handle, key);
        debug!(key = key.0, "physics_body_attached");

        self.realize_pending_joints();
        Ok(())
    }

    /// Removes `key` from the simulation along with its attached joints.
    /// The entry's last synced pose stays readable.
    pub fn detach(&mut self, key: BodyKey) {
        let entry = match self.entries.get_mut(key.0) {
            Some(entry) => entry,
            None => return,
        };
        match std::mem::replace(&mut entry.state, BodyState::Retired) {
            BodyState::Live(handle) => {
                self.handle_to_key.remove(&handle);
                self.bodies.remove(
                    handle,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
                debug!(key = key.0, "physics_body_detached");
            }
            BodyState::Pending(_) | BodyState::Retired => {}
        }
        self.pending_joints
            .retain(|joint| joint.a != key && joint.b != key);
    }

    pub fn is_live(&self, key: BodyKey) -> bool {
        matches!(
            self.entries.get(key.0).map(|entry| &entry.state),
            Some(BodyState::Live(_))
        )
    }

    /// Instant velocity change, in logical units. Ignored unless the body
    /// is live.
    pub fn apply_impulse(&mut self, key: BodyKey, impulse: Vec2) {
        if let Some(body) = self.live_body_mut(key) {
            body.apply_impulse(
                vector![impulse.x / PIXELS_PER_METER, impulse.y / PIXELS_PER_METER],
                true,
            );
        }
    }

    /// Persistent force for the next step, in logical units. Ignored unless
    /// the body is live.
    pub fn add_force(&mut self, key: BodyKey, force: Vec2) {
        if let Some(body) = self.live_body_mut(key) {
            body.add_force(
                vector![force.x / PIXELS_PER_METER, force.y / PIXELS_PER_METER],
                true,
            );
        }
    }

    pub fn set_linear_velocity(&mut self, key: BodyKey, velocity: Vec2) {
        if let Some(body) = self.live_body_mut(key) {
            body.set_linvel(
                vector![velocity.x / PIXELS_PER_METER, velocity.y / PIXELS_PER_METER],
                true,
            );
        }
    }

    /// Current velocity in logical units per second.
    pub fn linear_velocity(&self, key: BodyKey) -> Option<Vec2> {
        let handle = self.live_handle(key)?;
        let body = self.bodies.get(handle)?;
        let velocity = body.linvel();
        Some(Vec2::new(
            velocity.x * PIXELS_PER_METER,
            velocity.y * PIXELS_PER_METER,
        ))
    }

    /// Pins two bodies together at the given local anchors (logical units).
    /// The joint materializes once both bodies are live.
    pub fn add_pin_joint(&mut self, a: BodyKey, b: BodyKey, anchor_a: Vec2, anchor_b: Vec2) {
        self.pending_joints.push(PendingJoint {
            a,
            b,
            anchor_a,
            anchor_b,
        });
        self.realize_pending_joints();
    }

    fn realize_pending_joints(&mut self) {
        let mut remaining = Vec::new();
        let pending = std::mem::take(&mut self.pending_joints);
        for joint in pending {
            let handles = match (self.live_handle_of(joint.a), self.live_handle_of(joint.b)) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            };
            match handles {
                Some((handle_a, handle_b)) => {
                    let built = RevoluteJointBuilder::new()
                        .local_anchor1(point![
                            joint.anchor_a.x / PIXELS_PER_METER,
                            joint.anchor_a.y / PIXELS_PER_METER
                        ])
                        .local_anchor2(point![
                            joint.anchor_b.x / PIXELS_PER_METER,
                            joint.anchor_b.y / PIXELS_PER_METER
                        ]);
                    self.impulse_joints.insert(handle_a, handle_b, built, true);
                }
                None => remaining.push(joint),
            }
        }
        self.pending_joints = remaining;
    }

    /// Advances the simulation by `dt` seconds, records contacts, and caches
    /// the pose of every live body.
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );

        self.record_collisions();
        self.cache_poses();
    }

    fn record_collisions(&mut self) {
        for pair in self.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            let key_a = self.key_of_collider(pair.collider1);
            let key_b = self.key_of_collider(pair.collider2);
            if let (Some(a), Some(b)) = (key_a, key_b) {
                let max_impulse = pair
                    .manifolds
                    .iter()
                    .flat_map(|manifold| manifold.points.iter())
                    .map(|point| point.data.impulse)
                    .fold(0.0_f32, f32::max);
                self.collisions.push(CollisionRecord { a, b, max_impulse });
            }
        }
    }

    fn cache_poses(&mut self) {
        for entry in &mut self.entries {
            if let BodyState::Live(handle) = entry.state {
                if let Some(body) = self.bodies.get(handle) {
                    let translation = body.translation();
                    entry.last_position = Vec2::new(
                        translation.x * PIXELS_PER_METER,
                        translation.y * PIXELS_PER_METER,
                    );
                    entry.last_rotation_degrees = body.rotation().angle().to_degrees();
                }
            }
        }
    }

    /// Hands out collisions recorded since the last call. Buffered so the
    /// scene consumes them outside the step.
    pub fn take_collisions(&mut self) -> Vec<CollisionRecord> {
        std::mem::take(&mut self.collisions)
    }

    /// Last synced pose for `key`, live or retired.
    pub fn pose(&self, key: BodyKey) -> Option<(Vec2, f32)> {
        let entry = self.entries.get(key.0)?;
        Some((entry.last_position, entry.last_rotation_degrees))
    }

    /// Writes cached poses into the node tree, honoring each entry's
    /// connection mask.
    pub fn sync_to_graph(&self, root: &mut Group) {
        for entry in &self.entries {
            let target = match entry.target {
                Some(target) => target,
                None => continue,
            };
            if entry.connections == Connections::NONE {
                continue;
            }
            if let Some(node) = root.find_node_mut(target) {
                let transform = node.transform_mut();
                if entry.connections.contains(Connections::POSITION) {
                    transform.position = entry.last_position;
                }
                if entry.connections.contains(Connections::ROTATION) {
                    transform.rotation_degrees = entry.last_rotation_degrees;
                }
            }
        }
    }

    fn live_handle(&self, key: BodyKey) -> Option<RigidBodyHandle> {
        self.live_handle_of(key)
    }

    fn live_handle_of(&self, key: BodyKey) -> Option<RigidBodyHandle> {
        match self.entries.get(key.0).map(|entry| &entry.state) {
            Some(BodyState::Live(handle)) => Some(*handle),
            _ => None,
        }
    }

    fn live_body_mut(&mut self, key: BodyKey) -> Option<&mut RigidBody> {
        let handle = self.live_handle_of(key)?;
        self.bodies.get_mut(handle)
    }

    fn key_of_collider(&self, collider: ColliderHandle) -> Option<BodyKey> {
        let parent = self.colliders.get(collider)?.parent()?;
        self.handle_to_key.get(&parent).copied()
    }
}

fn build_body(descriptor: &BodyDescriptor) -> RigidBody {
    let mut builder = match descriptor.body_type {
        BodyType::Dynamic => RigidBodyBuilder::dynamic(),
        BodyType::Static => RigidBodyBuilder::fixed(),
        BodyType::Kinematic => RigidBodyBuilder::kinematic_velocity_based(),
    }
    .translation(vector![
        descriptor.position.x / PIXELS_PER_METER,
        descriptor.position.y / PIXELS_PER_METER
    ])
    .rotation(descriptor.rotation_degrees.to_radians())
    .linvel(vector![
        descriptor.linear_velocity.x / PIXELS_PER_METER,
        descriptor.linear_velocity.y / PIXELS_PER_METER
    ])
    .angvel(descriptor.angular_velocity)
    .linear_damping(descriptor.linear_damping)
    .angular_damping(descriptor.angular_damping)
    .ccd_enabled(descriptor.ccd);
    if descriptor.fixed_rotation {
        builder = builder.lock_rotations();
    }
    builder.build()
}

fn build_collider(descriptor: &BodyDescriptor) -> Result<Collider, PhysicsError> {
    let builder = match &descriptor.shape {
        ShapeDef::Circle { radius } => ColliderBuilder::ball(radius / PIXELS_PER_METER),
        ShapeDef::Rect {
            half_width,
            half_height,
        } => ColliderBuilder::cuboid(half_width / PIXELS_PER_METER, half_height / PIXELS_PER_METER),
        ShapeDef::Polygon { points } => {
            if points.len() < 3 {
                return Err(PhysicsError::InvalidPolygon);
            }
            let points: Vec<Point<Real>> = points
                .iter()
                .map(|p| point![p.x / PIXELS_PER_METER, p.y / PIXELS_PER_METER])
                .collect();
            ColliderBuilder::convex_hull(&points).ok_or(PhysicsError::InvalidPolygon)?
        }
    };
    Ok(builder
        .density(descriptor.density)
        .friction(descriptor.friction)
        .restitution(descriptor.restitution)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::entity::{FlatRect, Node};
    use crate::app::transform::Transform2D;

    fn dynamic_ball_at(x: f32, y: f32) -> BodyDescriptor {
        BodyDescriptor {
            position: Vec2::new(x, y),
            shape: ShapeDef::Circle { radius: 5.0 },
            ..BodyDescriptor::default()
        }
    }

    fn step_seconds(world: &mut PhysicsWorld, seconds: f32) {
        let dt = 1.0 / 50.0;
        let steps = (seconds / dt).round() as usize;
        for _ in 0..steps {
            world.step(dt);
        }
    }

    #[test]
    fn pending_body_is_not_simulated() {
        let mut world = PhysicsWorld::default();
        let key = world.insert_body(dynamic_ball_at(0.0, 300.0), None, Connections::ALL);
        assert!(!world.is_live(key));

        step_seconds(&mut world, 0.5);
        let (position, _) = world.pose(key).unwrap();
        assert_eq!(position.y, 300.0);
    }

    #[test]
    fn attached_dynamic_body_falls_straight_down() {
        let mut world = PhysicsWorld::default();
        let key = world.insert_body(dynamic_ball_at(12.0, 300.0), None, Connections::ALL);
        world.attach(key).unwrap();
        assert!(world.is_live(key));

        step_seconds(&mut world, 1.0);
        let (position, _) = world.pose(key).unwrap();
        assert!(position.y < 300.0, "y={}", position.y);
        assert!((position.x - 12.0).abs() < 0.001, "x={}", position.x);
    }

    #[test]
    fn attach_is_idempotent() {
        let mut world = PhysicsWorld::default();
        let key = world.insert_body(dynamic_ball_at(0.0, 0.0), None, Connections::ALL);
        world.attach(key).unwrap();
        world.attach(key).unwrap();
        assert_eq!(world.bodies.len(), 1);
    }

    #[test]
    fn impulse_on_pending_body_is_ignored() {
        let mut world = PhysicsWorld::new((0.0, 0.0));
        let key = world.insert_body(dynamic_ball_at(0.0, 0.0), None, Connections::ALL);
        world.apply_impulse(key, Vec2::new(100.0, 0.0));
        world.attach(key).unwrap();

        step_seconds(&mut world, 0.2);
        let (position, _) = world.pose(key).unwrap();
        assert!(position.x.abs() < 0.001, "x={}", position.x);
    }

    #[test]
    fn impulse_on_live_body_moves_it() {
        let mut world = PhysicsWorld::new((0.0, 0.0));
        let key = world.insert_body(dynamic_ball_at(0.0, 0.0), None, Connections::ALL);
        world.attach(key).unwrap();
        world.apply_impulse(key, Vec2::new(5.0, 0.0));

        step_seconds(&mut world, 0.5);
        let (position, _) = world.pose(key).unwrap();
        assert!(position.x > 1.0, "x={}", position.x);
    }

    #[test]
    fn detached_body_keeps_last_pose_and_stays_retired() {
        let mut world = PhysicsWorld::default();
        let key = world.insert_body(dynamic_ball_at(0.0, 300.0), None, Connections::ALL);
        world.attach(key).unwrap();
        step_seconds(&mut world, 0.5);
        let (pose_before, _) = world.pose(key).unwrap();
        assert!(pose_before.y < 300.0);

        world.detach(key);
        assert!(!world.is_live(key));
        step_seconds(&mut world, 0.5);
        let (pose_after, _) = world.pose(key).unwrap();
        assert_eq!(pose_before, pose_after);

        // Retired keys never re-enter the simulation.
        world.attach(key).unwrap();
        assert!(!world.is_live(key));
    }

    #[test]
    fn sync_writes_position_only_when_rotation_not_connected() {
        let mut world = PhysicsWorld::default();
        let mut node = FlatRect::new(Vec2::new(1.0, 1.0), [255, 255, 255, 255]);
        *node.transform_mut() = Transform2D {
            rotation_degrees: 45.0,
            ..Transform2D::at(0.0, 0.0)
        };
        let node_id = node.id();
        let mut root = Group::new();
        root.add_child(Box::new(node));

        let mut descriptor = dynamic_ball_at(0.0, 120.0);
        descriptor.angular_velocity = 3.0;
        let key = world.insert_body(descriptor, Some(node_id), Connections::POSITION);
        world.attach(key).unwrap();
        step_seconds(&mut world, 0.3);
        world.sync_to_graph(&mut root);

        let node = root.find_node_mut(node_id).unwrap();
        assert!(node.transform().position.y < 120.0);
        assert_eq!(node.transform().rotation_degrees, 45.0);
    }

    #[test]
    fn falling_body_collides_with_static_ground() {
        let mut world = PhysicsWorld::default();
        let ball = world.insert_body(dynamic_ball_at(0.0, 60.0), None, Connections::ALL);
        let ground = world.insert_body(
            BodyDescriptor {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, 0.0),
                shape: ShapeDef::Rect {
                    half_width: 300.0,
                    half_height: 10.0,
                },
                ..BodyDescriptor::default()
            },
            None,
            Connections::NONE,
        );
        world.attach(ball).unwrap();
        world.attach(ground).unwrap();

        let mut contact = None;
        for _ in 0..200 {
            world.step(1.0 / 50.0);
            let collisions = world.take_collisions();
            if let Some(record) = collisions.first() {
                contact = Some(*record);
                break;
            }
        }
        let record = contact.expect("ball should hit the ground");
        assert!(
            (record.a == ball && record.b == ground) || (record.a == ground && record.b == ball),
            "unexpected pair {record:?}"
        );
        assert!(world.take_collisions().is_empty());
    }

    #[test]
    fn pin_joint_waits_for_both_bodies() {
        let mut world = PhysicsWorld::new((0.0, -9.8));
        let anchor = world.insert_body(
            BodyDescriptor {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, 300.0),
                ..BodyDescriptor::default()
            },
            None,
            Connections::NONE,
        );
        let bob = world.insert_body(dynamic_ball_at(60.0, 300.0), None, Connections::ALL);
        world.add_pin_joint(anchor, bob, Vec2::ZERO, Vec2::new(-60.0, 0.0));
        assert_eq!(world.impulse_joints.len(), 0);

        world.attach(anchor).unwrap();
        world.attach(bob).unwrap();
        assert_eq!(world.impulse_joints.len(), 1);

        // A pinned bob swings instead of free-falling.
        step_seconds(&mut world, 1.0);
        let (position, _) = world.pose(bob).unwrap();
        let distance = ((position.x - 0.0).powi(2) + (position.y - 300.0).powi(2)).sqrt();
        assert!(distance < 90.0, "distance={distance}");
    }

    #[test]
    fn invalid_polygon_is_rejected() {
        let mut world = PhysicsWorld::default();
        let key = world.insert_body(
            BodyDescriptor {
                shape: ShapeDef::Polygon {
                    points: vec![Vec2::ZERO, Vec2::new(1.0, 0.0)],
                },
                ..BodyDescriptor::default()
            },
            None,
            Connections::ALL,
        );
        assert!(matches!(world.attach(key), Err(PhysicsError::InvalidPolygon)));
    }
}
