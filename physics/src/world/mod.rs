/*!
The simulation world.

[`PhysicsWorld`] owns the native rapier sets, the shape registry and the arenas of
controllers, constraints and vehicles. Everything outside refers to those through ids;
a stale id is a logged no-op, never a panic.

Split by concern:
- `mod.rs`: construction, tuning setters, controller lifecycle, compound children.
- `step.rs`: `proceed_delta_time` and everything that runs inside a frame.
- `query.rs`: ray tests, contact snapshots and `check_collision`.
- `constraints.rs`: joints, soft-body anchors and vehicles.
- `export.rs`: the binary world snapshot.
- `visibility.rs`: visual proxies and culling.

Registration
- A controller's native body and collider exist from creation to destruction. Registering
  enables them, unregistering disables them; both are idempotent.
- Unregistering tears down, in order: the controller's constraints (newest first), the
  vehicles it carries, soft-body anchors touching it, then disables the native body.
*/

mod constraints;
mod export;
mod query;
mod step;
mod visibility;

pub use export::{ObjectRecord, ShapeRecord, WorldSnapshot};

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rapier3d::prelude::{
    BroadPhaseBvh, CCDSolver, ColliderSet, ImpulseJointSet, IntegrationParameters,
    IslandManager, MultibodyJointSet, NarrowPhase, PhysicsPipeline, RigidBody, RigidBodyBuilder,
    RigidBodyHandle, RigidBodySet, SharedShape,
};

use crate::body::{BodyFlag, BodyKind, BodyState};
use crate::character::CharacterState;
use crate::config::{SolverKind, WorldConfig};
use crate::constraint::Constraint;
use crate::contact::CollisionData;
use crate::controller::{
    Controller, ControllerMut, DefaultMotionState, EntityInfo, MotionState, PendingForces,
    build_native, scaled_mass_properties,
};
use crate::culling::CullingTree;
use crate::error::Result;
use crate::filter::{BroadphaseFilter, PairFilter};
use crate::handle::{ConstraintId, ControllerId, IdAllocator};
use crate::math::{EPSILON, Point3, Transform, Vec3};
use crate::occlusion::OcclusionBuffer;
use crate::shape::{ChildShape, ShapeGeometry, ShapeId, ShapeRegistry};
use crate::soft::SoftBody;
use crate::vehicle::Vehicle;

/// `(ctrl_a, ctrl_b, contacts, a_is_first) -> bool`, called once per touching manifold and
/// step when either side registered for collision callbacks.
///
/// The return value belongs to the scene-logic interface and is not used by the world.
pub type CollisionCallback =
    Box<dyn FnMut(ControllerId, ControllerId, &CollisionData, bool) -> bool + Send>;

/// Hooks into game logic, all optional.
#[derive(Default)]
pub struct WorldCallbacks {
    pub object_collision: Option<CollisionCallback>,
    /// Lets sensor logic veto a broad-phase pair before contacts are computed.
    pub broadphase: Option<BroadphaseFilter>,
}

/// Counters for debug overlays.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugStats {
    pub controllers: usize,
    pub registered_controllers: usize,
    pub constraints: usize,
    pub active_constraints: usize,
    pub vehicles: usize,
    /// Sub-steps run by the last `proceed_delta_time`.
    pub last_sub_steps: u32,
}

pub struct PhysicsWorld {
    config: WorldConfig,
    gravity: Vec3,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    hooks: PairFilter,
    /// Fixed body standing in for "the world" in single-body constraints.
    ground: RigidBodyHandle,

    shapes: ShapeRegistry,
    controllers: BTreeMap<ControllerId, Controller>,
    controller_ids: IdAllocator,
    constraints: BTreeMap<ConstraintId, Constraint>,
    vehicles: BTreeMap<ConstraintId, Vehicle>,
    constraint_ids: IdAllocator,

    collision_callback: Option<CollisionCallback>,
    accumulator: f32,
    last_sub_steps: u32,

    culling: CullingTree,
    occlusion: OcclusionBuffer,

    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("config", &self.config)
            .field("stats", &self.debug_stats())
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    /// Build an empty world. Fails only on an invalid configuration (or, with the
    /// `parallel` feature, when the solver pool cannot be started).
    pub fn new(config: WorldConfig, callbacks: WorldCallbacks) -> Result<Self> {
        config.validate()?;

        let mut bodies = RigidBodySet::new();
        let ground = bodies.insert(RigidBodyBuilder::fixed().build());

        let mut world = Self {
            gravity: Vec3::from(config.gravity),
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            hooks: PairFilter::new(callbacks.broadphase),
            ground,
            shapes: ShapeRegistry::new(),
            controllers: BTreeMap::new(),
            controller_ids: IdAllocator::default(),
            constraints: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            constraint_ids: IdAllocator::default(),
            collision_callback: callbacks.object_collision,
            accumulator: 0.0,
            last_sub_steps: 0,
            culling: CullingTree::new(),
            occlusion: OcclusionBuffer::new(),
            #[cfg(feature = "parallel")]
            pool: build_pool(config.solver_workers)?,
            config,
        };
        world.apply_solver_settings();

        info!(
            "physics world created: gravity {:?}, {} sub-step(s), {} solver iterations",
            world.config.gravity, world.config.num_sub_steps, world.config.num_iterations
        );
        Ok(world)
    }

    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[inline]
    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    #[inline]
    pub fn shapes_mut(&mut self) -> &mut ShapeRegistry {
        &mut self.shapes
    }

    pub fn debug_stats(&self) -> DebugStats {
        DebugStats {
            controllers: self.controllers.len(),
            registered_controllers: self.controllers.values().filter(|c| c.registered).count(),
            constraints: self.constraints.len(),
            active_constraints: self.constraints.values().filter(|c| c.is_active()).count(),
            vehicles: self.vehicles.len(),
            last_sub_steps: self.last_sub_steps,
        }
    }

    // ----- callbacks -----

    pub fn set_collision_callback(&mut self, callback: Option<CollisionCallback>) {
        self.collision_callback = callback;
    }

    pub fn set_broadphase_filter(&mut self, filter: Option<BroadphaseFilter>) {
        self.hooks.broadphase = filter;
    }

    /// Count one more interest in collision callbacks for `id`.
    pub fn add_collision_callback(&mut self, id: ControllerId) -> bool {
        match self.controllers.get_mut(&id) {
            Some(ctrl) => {
                ctrl.callback_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn remove_collision_callback(&mut self, id: ControllerId) -> bool {
        match self.controllers.get_mut(&id) {
            Some(ctrl) if ctrl.callback_count > 0 => {
                ctrl.callback_count -= 1;
                true
            }
            _ => false,
        }
    }

    // ----- tuning -----

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        if !gravity.iter().all(|g| g.is_finite()) {
            warn!("ignoring non-finite gravity {:?}", gravity);
            return;
        }
        self.gravity = gravity;
        self.config.gravity = [gravity.x, gravity.y, gravity.z];
    }

    pub fn set_num_sub_steps(&mut self, sub_steps: u32) {
        let sub_steps = sub_steps.max(1);
        self.config.num_sub_steps = sub_steps;
        self.config.max_sub_steps = self.config.max_sub_steps.max(sub_steps);
        self.accumulator = 0.0;
    }

    pub fn set_max_sub_steps(&mut self, max_sub_steps: u32) {
        self.config.max_sub_steps = max_sub_steps.max(self.config.num_sub_steps);
    }

    pub fn set_num_iterations(&mut self, iterations: u32) {
        self.config.num_iterations = iterations.max(1);
        self.apply_solver_settings();
    }

    pub fn set_solver_kind(&mut self, solver: SolverKind) {
        self.config.solver = solver;
        self.apply_solver_settings();
    }

    /// Applies to every body, existing and future.
    pub fn set_deactivation_time(&mut self, seconds: f32) {
        self.config.deactivation_time = seconds.max(0.0);
        self.refresh_activation();
    }

    pub fn set_deactivation_thresholds(&mut self, linear: f32, angular: f32) {
        self.config.linear_deactivation_threshold = linear.max(0.0);
        self.config.angular_deactivation_threshold = angular.max(0.0);
        self.refresh_activation();
    }

    pub fn set_contact_breaking_threshold(&mut self, threshold: f32) {
        self.config.contact_breaking_threshold = threshold.max(0.0);
    }

    pub fn set_erp(&mut self, non_contact: f32, contact: f32) {
        self.config.erp_non_contact = non_contact.clamp(0.0, 1.0);
        self.config.erp_contact = contact.clamp(0.0, 1.0);
    }

    pub fn set_cfm(&mut self, cfm: f32) {
        self.config.cfm = cfm.max(0.0);
    }

    pub fn set_fh_ray_length(&mut self, length: f32) {
        if length > 0.0 {
            self.config.fh_ray_length = length;
        }
    }

    pub fn set_tic_rate(&mut self, tic_rate: f32) {
        if tic_rate > 0.0 {
            self.config.tic_rate = tic_rate;
        }
    }

    /// Resize the solver pool. 0 means one worker per hardware thread.
    pub fn set_solver_workers(&mut self, workers: usize) {
        self.config.solver_workers = workers;
        #[cfg(feature = "parallel")]
        match build_pool(workers) {
            Ok(pool) => self.pool = pool,
            Err(err) => warn!("keeping the current solver pool: {err}"),
        }
        #[cfg(not(feature = "parallel"))]
        debug!("solver workers set to {workers}; the solver runs inline without `parallel`");
    }

    fn apply_solver_settings(&mut self) {
        let iterations = self.config.num_iterations.max(1) as usize;
        if let Ok(n) = iterations.try_into() {
            self.params.num_solver_iterations = n;
        }
        self.params.num_internal_stabilization_iterations = match self.config.solver {
            SolverKind::Sequential => 1,
            SolverKind::Nncg => 4,
        };
    }

    fn refresh_activation(&mut self) {
        let handles: Vec<RigidBodyHandle> =
            self.controllers.values().map(|c| c.body).collect();
        for handle in handles {
            if let Some(body) = self.bodies.get_mut(handle) {
                apply_activation(body, &self.config);
            }
        }
    }

    // ----- controller lifecycle -----

    /// Create a controller from a body description and a shape reference.
    ///
    /// The controller takes over one reference of `shape` (as handed out by the registry)
    /// and releases it when destroyed. An unknown shape falls back to a sphere of the
    /// body's radius. The controller starts unregistered.
    pub fn create_controller(
        &mut self,
        state: BodyState,
        shape: ShapeId,
        transform: Transform,
        info: EntityInfo,
        motion_state: Option<Box<dyn MotionState>>,
    ) -> Result<ControllerId> {
        state.validate()?;

        let shape = if self.shapes.get(shape).is_some() {
            shape
        } else {
            warn!(
                "controller for {:?}: unknown shape {:?}, using a sphere of radius {}",
                info.name, shape, state.radius
            );
            self.shapes.create(
                ShapeGeometry::Sphere {
                    radius: state.radius,
                },
                state.radius,
            )
        };

        let id = ControllerId(self.controller_ids.next_id());
        let scale = transform.scale;
        let iso = transform.iso();

        let soft = (state.kind == BodyKind::Soft).then(|| {
            self.shapes
                .set_welding_threshold(shape, state.soft.welding_threshold);
            let mesh = self
                .shapes
                .soft_body_mesh(shape, &scale)
                .unwrap_or_default();
            SoftBody::new(mesh, state.mass, state.soft.margin, &iso)
        });

        // The bulk of a soft body collides as the hull of its nodes.
        let native_shape = match soft.as_ref() {
            Some(soft) if soft.nodes().len() >= 4 => {
                let points: Vec<Point3> = soft.nodes().iter().map(|n| n.local).collect();
                SharedShape::convex_hull(&points)
                    .unwrap_or_else(|| self.shapes.build(shape, scale))
            }
            _ => self.shapes.build(shape, scale),
        };

        let (mut body, collider) = build_native(id, &state, native_shape, &transform);
        apply_activation(&mut body, &self.config);
        let body = self.bodies.insert(body);
        let collider = self
            .colliders
            .insert_with_parent(collider, body, &mut self.bodies);

        let character = (state.kind == BodyKind::Character)
            .then(|| CharacterState::new(state.character, state.gravity));
        let motion_state =
            motion_state.unwrap_or_else(|| Box::new(DefaultMotionState::new(transform)));

        debug!("controller {:?} created for {:?} ({:?})", id, info.name, state.kind);
        self.controllers.insert(
            id,
            Controller {
                id,
                info,
                state,
                shape,
                scale,
                body,
                collider,
                registered: false,
                parent_root: None,
                constraints: Vec::new(),
                motion_state,
                callback_count: 0,
                pending: PendingForces::default(),
                suspended: None,
                character,
                soft,
            },
        );
        Ok(id)
    }

    pub fn controller(&self, id: ControllerId) -> Option<&Controller> {
        self.controllers.get(&id)
    }

    pub fn controller_mut(&mut self, id: ControllerId) -> Option<ControllerMut<'_>> {
        let gravity = self.gravity;
        let ctrl = self.controllers.get_mut(&id)?;
        Some(ControllerMut {
            ctrl,
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            shapes: &mut self.shapes,
            world_gravity: gravity,
        })
    }

    pub fn controller_ids(&self) -> impl Iterator<Item = ControllerId> + '_ {
        self.controllers.keys().copied()
    }

    /// Add a controller to the simulation. Returns false when it is unknown or already in.
    ///
    /// Constraints and vehicles that were parked by an earlier unregistration come back
    /// if their other side is registered too.
    pub fn register_controller(&mut self, id: ControllerId) -> bool {
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            return false;
        };
        if ctrl.registered || ctrl.parent_root.is_some() {
            return false;
        }
        ctrl.registered = true;
        let (body, collider) = (ctrl.body, ctrl.collider);
        let linked = ctrl.constraints.clone();
        let transform = ctrl.motion_state.world_transform();

        if let Some(body) = self.bodies.get_mut(body) {
            body.set_position(transform.iso(), true);
            body.set_enabled(true);
            body.wake_up(true);
        }
        if let Some(collider) = self.colliders.get_mut(collider) {
            collider.set_enabled(true);
        }

        for cid in linked {
            self.restore_constraint(cid);
        }
        for vehicle in self.vehicles.values_mut() {
            if vehicle.chassis == id {
                vehicle.active = true;
            }
        }
        debug!("controller {:?} registered", id);
        true
    }

    /// Take a controller out of the simulation. Returns false when it was not registered.
    ///
    /// With `free_constraints` its constraints and vehicles are destroyed, otherwise they
    /// are only deactivated and come back on the next registration.
    pub fn unregister_controller(&mut self, id: ControllerId, free_constraints: bool) -> bool {
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            return false;
        };
        if !ctrl.registered {
            return false;
        }
        ctrl.registered = false;
        let linked = ctrl.constraints.clone();

        for cid in linked.into_iter().rev() {
            self.remove_constraint(cid, free_constraints);
        }
        let carried: Vec<ConstraintId> = self
            .vehicles
            .values()
            .filter(|v| v.chassis == id)
            .map(|v| v.id)
            .collect();
        for vid in carried {
            self.remove_constraint(vid, free_constraints);
        }
        self.detach_soft_anchors(id);

        if let Some(ctrl) = self.controllers.get(&id) {
            let (body, collider) = (ctrl.body, ctrl.collider);
            if let Some(collider) = self.colliders.get_mut(collider) {
                collider.set_enabled(false);
            }
            if let Some(body) = self.bodies.get_mut(body) {
                body.set_enabled(false);
            }
        }
        debug!("controller {:?} unregistered", id);
        true
    }

    /// Unregister (freeing constraints) and remove the native objects for good.
    pub fn destroy_controller(&mut self, id: ControllerId) -> bool {
        if !self.controllers.contains_key(&id) {
            return false;
        }
        if let Some(parent) = self.controllers.get(&id).and_then(|c| c.parent_root) {
            self.remove_compound_child(parent, id);
        }
        // Children folded into this controller become standalone bodies again.
        let children: Vec<ControllerId> = self
            .controllers
            .values()
            .filter(|c| c.parent_root == Some(id))
            .map(|c| c.id)
            .collect();
        for child in children {
            if !self.remove_compound_child(id, child) {
                if let Some(c) = self.controllers.get_mut(&child) {
                    c.parent_root = None;
                }
                self.register_controller(child);
            }
        }
        self.unregister_controller(id, true);

        // Parked constraints and vehicles of an unregistered controller.
        let linked = self
            .controllers
            .get(&id)
            .map(|c| c.constraints.clone())
            .unwrap_or_default();
        for cid in linked {
            self.remove_constraint(cid, true);
        }
        let carried: Vec<ConstraintId> = self
            .vehicles
            .values()
            .filter(|v| v.chassis == id)
            .map(|v| v.id)
            .collect();
        for vid in carried {
            self.remove_constraint(vid, true);
        }

        let Some(ctrl) = self.controllers.remove(&id) else {
            return false;
        };
        self.bodies.remove(
            ctrl.body,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.shapes.release(ctrl.shape);
        debug!("controller {:?} destroyed", id);
        true
    }

    /// Unregister while keeping constraints parked for [`Self::restore_physics`].
    pub fn suspend_physics(&mut self, id: ControllerId, free_constraints: bool) -> bool {
        self.unregister_controller(id, free_constraints)
    }

    pub fn restore_physics(&mut self, id: ControllerId) -> bool {
        self.register_controller(id)
    }

    // ----- compound children -----

    /// Fold `child`'s shape into `parent`'s compound at their current relative pose.
    ///
    /// The parent needs the `Compound` flag and a compound shape. The child is unregistered
    /// and simulated as part of the parent until [`Self::remove_compound_child`].
    pub fn add_compound_child(&mut self, parent: ControllerId, child: ControllerId) -> bool {
        if parent == child {
            return false;
        }
        let (Some(p), Some(c)) = (self.controllers.get(&parent), self.controllers.get(&child))
        else {
            return false;
        };
        if !p.state.flags.has(BodyFlag::Compound) || c.parent_root.is_some() {
            warn!("{:?} cannot receive {:?} as a compound child", parent, child);
            return false;
        }

        let parent_t = p.motion_state.world_transform();
        let child_t = c.motion_state.world_transform();
        let mut relative = parent_t.iso().inverse() * child_t.iso();
        relative.translation.vector =
            safe_div(&relative.translation.vector, &parent_t.scale);
        let entry = ChildShape {
            shape: c.shape,
            transform: relative,
            scale: safe_div(&child_t.scale, &parent_t.scale),
            owner: Some(child),
        };
        let parent_shape = p.shape;
        if !self.shapes.add_child(parent_shape, entry) {
            warn!("{:?}: shape {:?} is not a compound", parent, parent_shape);
            return false;
        }

        self.rebuild_compound(parent);
        self.unregister_controller(child, false);
        if let Some(c) = self.controllers.get_mut(&child) {
            c.parent_root = Some(parent);
        }
        true
    }

    /// Split `child` out of `parent`'s compound and register it again.
    pub fn remove_compound_child(&mut self, parent: ControllerId, child: ControllerId) -> bool {
        let Some(p) = self.controllers.get(&parent) else {
            return false;
        };
        let Some(index) = self.shapes.find_child(p.shape, child) else {
            return false;
        };
        let parent_shape = p.shape;
        let parent_pose = self
            .bodies
            .get(p.body)
            .map(|b| *b.position())
            .unwrap_or_else(|| p.motion_state.world_transform().iso());
        let parent_scale = p.scale;
        let relative = match self.shapes.get(parent_shape).map(|d| &d.geometry) {
            Some(ShapeGeometry::Compound(children)) => children.get(index).map(|c| c.transform),
            _ => None,
        };

        self.shapes.remove_child(parent_shape, index);
        self.rebuild_compound(parent);
        if let Some(c) = self.controllers.get_mut(&child) {
            c.parent_root = None;
            // The child rode along with the parent; put it back where it ended up.
            if let Some(relative) = relative {
                let mut local = relative;
                local.translation.vector = relative.translation.vector.component_mul(&parent_scale);
                let pose = parent_pose * local;
                let mut transform = c.motion_state.world_transform();
                transform.translation = pose.translation.vector;
                transform.rotation = pose.rotation;
                c.motion_state.set_world_transform(&transform);
            }
        }
        self.register_controller(child);
        true
    }

    fn rebuild_compound(&mut self, parent: ControllerId) {
        let Some(p) = self.controllers.get(&parent) else {
            return;
        };
        let shape = self.shapes.build(p.shape, p.scale);
        let mass = (p.state.is_dynamic() && p.suspended.is_none())
            .then(|| scaled_mass_properties(&shape, p.state.mass, p.state.inertia_factor));
        if let Some(collider) = self.colliders.get_mut(p.collider) {
            collider.set_shape(shape);
            if let Some(mp) = mass {
                collider.set_mass_properties(mp);
            }
        }
    }

    fn detach_soft_anchors(&mut self, id: ControllerId) {
        let mut joints = Vec::new();
        for ctrl in self.controllers.values_mut() {
            let Some(soft) = ctrl.soft.as_mut() else {
                continue;
            };
            if ctrl.id == id {
                joints.extend(soft.detach_all());
            } else {
                joints.extend(soft.detach_from(id));
            }
        }
        for joint in joints {
            self.impulse_joints.remove(joint, true);
        }
    }
}

fn apply_activation(body: &mut RigidBody, config: &WorldConfig) {
    let activation = body.activation_mut();
    activation.normalized_linear_threshold = config.linear_deactivation_threshold;
    activation.angular_threshold = config.angular_deactivation_threshold;
    activation.time_until_sleep = config.deactivation_time;
}

fn safe_div(v: &Vec3, by: &Vec3) -> Vec3 {
    Vec3::new(
        if by.x.abs() > EPSILON { v.x / by.x } else { v.x },
        if by.y.abs() > EPSILON { v.y / by.y } else { v.y },
        if by.z.abs() > EPSILON { v.z / by.z } else { v.z },
    )
}

#[cfg(feature = "parallel")]
fn build_pool(workers: usize) -> Result<rayon::ThreadPool> {
    let threads = if workers == 0 { num_cpus::get() } else { workers };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("physics-solver-{i}"))
        .build()
        .map_err(|e| crate::error::PhysicsError::InvalidConfig(format!("solver pool: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PhysicsError;

    pub(crate) fn world() -> PhysicsWorld {
        let config = WorldConfig {
            gravity: [0.0, 0.0, 0.0],
            ..WorldConfig::default()
        };
        PhysicsWorld::new(config, WorldCallbacks::default()).unwrap()
    }

    pub(crate) fn sphere(world: &mut PhysicsWorld, kind: BodyKind, at: Vec3) -> ControllerId {
        let shape = world
            .shapes_mut()
            .create(ShapeGeometry::Sphere { radius: 0.5 }, 0.5);
        world
            .create_controller(
                BodyState::new(kind).with_radius(0.5),
                shape,
                Transform::from_translation(at),
                EntityInfo::new(at.x.to_bits() as u64, "sphere"),
                None,
            )
            .unwrap()
    }

    pub(crate) fn floor(world: &mut PhysicsWorld) -> ControllerId {
        let shape = world.shapes_mut().create(
            ShapeGeometry::Box {
                half_extents: Vec3::new(10.0, 10.0, 0.5),
            },
            1.0,
        );
        let id = world
            .create_controller(
                BodyState::new(BodyKind::Static),
                shape,
                Transform::from_translation(Vec3::new(0.0, 0.0, -0.5)),
                EntityInfo::new(0, "floor"),
                None,
            )
            .unwrap();
        world.register_controller(id);
        id
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = WorldConfig {
            num_sub_steps: 0,
            ..WorldConfig::default()
        };
        assert!(matches!(
            PhysicsWorld::new(config, WorldCallbacks::default()),
            Err(PhysicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn invalid_body_states_are_rejected() {
        let mut w = world();
        let shape = w.shapes_mut().create(ShapeGeometry::Sphere { radius: 1.0 }, 1.0);
        let state = BodyState::new(BodyKind::Rigid).with_flag(BodyFlag::Sensor);
        let created = w.create_controller(
            state,
            shape,
            Transform::identity(),
            EntityInfo::default(),
            None,
        );
        assert!(matches!(created, Err(PhysicsError::InvalidBodyState(_))));
    }

    #[test]
    fn registration_is_idempotent() {
        let mut w = world();
        let id = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        assert!(!w.controller(id).unwrap().is_registered());

        assert!(w.register_controller(id));
        assert!(!w.register_controller(id));
        assert_eq!(w.debug_stats().registered_controllers, 1);

        assert!(w.unregister_controller(id, false));
        assert!(!w.unregister_controller(id, false));
        assert_eq!(w.debug_stats().registered_controllers, 0);
        assert_eq!(w.debug_stats().controllers, 1);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut w = world();
        assert!(!w.register_controller(ControllerId(42)));
        assert!(!w.unregister_controller(ControllerId(42), true));
        assert!(!w.destroy_controller(ControllerId(42)));
        assert!(w.controller_mut(ControllerId(42)).is_none());
        assert!(!w.add_collision_callback(ControllerId(42)));
    }

    #[test]
    fn unknown_shapes_fall_back_to_a_sphere() {
        let mut w = world();
        let id = w
            .create_controller(
                BodyState::new(BodyKind::Rigid).with_radius(2.0),
                ShapeId(999),
                Transform::identity(),
                EntityInfo::default(),
                None,
            )
            .unwrap();
        let shape = w.controller(id).unwrap().shape();
        assert!(matches!(
            w.shapes().get(shape).unwrap().geometry,
            ShapeGeometry::Sphere { radius } if radius == 2.0
        ));
    }

    #[test]
    fn destroying_releases_the_shape() {
        let mut w = world();
        let id = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        w.register_controller(id);
        let shape = w.controller(id).unwrap().shape();

        assert!(w.destroy_controller(id));
        assert!(w.controller(id).is_none());
        assert!(w.shapes().get(shape).is_none());
    }

    #[test]
    fn collision_callbacks_are_counted() {
        let mut w = world();
        let id = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        assert!(w.add_collision_callback(id));
        assert!(w.add_collision_callback(id));
        assert!(w.remove_collision_callback(id));
        assert!(w.controller(id).unwrap().wants_collision_callbacks());
        assert!(w.remove_collision_callback(id));
        assert!(!w.controller(id).unwrap().wants_collision_callbacks());
        assert!(!w.remove_collision_callback(id));
    }

    fn compound_parent(w: &mut PhysicsWorld) -> ControllerId {
        let compound = w
            .shapes_mut()
            .create(ShapeGeometry::Compound(Vec::new()), 1.0);
        w.create_controller(
            BodyState::new(BodyKind::Rigid).with_flag(BodyFlag::Compound),
            compound,
            Transform::identity(),
            EntityInfo::new(1, "parent"),
            None,
        )
        .unwrap()
    }

    #[test]
    fn destroying_a_compound_parent_frees_its_children() {
        let mut w = world();
        let parent = compound_parent(&mut w);
        let child = sphere(&mut w, BodyKind::Rigid, Vec3::new(2.0, 0.0, 0.0));
        w.register_controller(parent);
        w.register_controller(child);
        assert!(w.add_compound_child(parent, child));

        w.controller_mut(parent)
            .unwrap()
            .set_position(Vec3::new(0.0, 0.0, 3.0));
        assert!(w.destroy_controller(parent));

        let c = w.controller(child).unwrap();
        assert_eq!(c.parent_root(), None);
        assert!(c.is_registered());
        let at = c.transform().translation;
        assert!((at - Vec3::new(2.0, 0.0, 3.0)).norm() < 1e-4, "child left at {at:?}");

        assert!(w.unregister_controller(child, false));
        assert!(w.register_controller(child));
    }

    #[test]
    fn compound_children_fold_into_the_parent() {
        let mut w = world();
        let parent = compound_parent(&mut w);
        let child = sphere(&mut w, BodyKind::Rigid, Vec3::new(2.0, 0.0, 0.0));
        w.register_controller(parent);
        w.register_controller(child);

        assert!(w.add_compound_child(parent, child));
        assert!(!w.controller(child).unwrap().is_registered());
        assert_eq!(w.controller(child).unwrap().parent_root(), Some(parent));
        assert!(!w.add_compound_child(parent, child));
        assert!(!w.register_controller(child));

        assert!(w.remove_compound_child(parent, child));
        assert!(w.controller(child).unwrap().is_registered());
        assert_eq!(w.controller(child).unwrap().parent_root(), None);
    }

    #[test]
    fn setters_update_the_config() {
        let mut w = world();
        w.set_num_sub_steps(0);
        assert_eq!(w.config().num_sub_steps, 1);
        w.set_num_sub_steps(40);
        assert_eq!(w.config().max_sub_steps, 40);
        w.set_gravity(Vec3::new(0.0, 0.0, f32::NAN));
        assert_eq!(w.gravity(), Vec3::zeros());
        w.set_deactivation_time(-1.0);
        assert_eq!(w.config().deactivation_time, 0.0);
    }
}
