/*!
Controllers: one per simulated scene entity.

A [`Controller`] owns exactly one native rigid body and its collider, the per-entity
tunables in [`BodyState`], a counted reference to its shape and the bridge to the external
transform ([`MotionState`]). Controllers live in the world's arena and are addressed by
[`ControllerId`]; nothing outside the world holds a reference to one.

Notes
- The native body always exists. "Registered" means it is enabled in the native sets; an
  unregistered controller keeps its body disabled so its velocities, mass and filter
  survive a later re-registration.
- Everything pair filtering needs is mirrored into the collider's `user_data` as a
  [`BodyTag`]; [`Controller::body_tag`] is the single place that builds it.
*/

use rapier3d::prelude::{
    ActiveCollisionTypes, ActiveHooks, CoefficientCombineRule, Collider, ColliderBuilder,
    ColliderHandle, ColliderSet, MassProperties, RigidBody, RigidBodyBuilder, RigidBodyHandle,
    RigidBodySet, RigidBodyType, SharedShape,
};

use crate::body::{BodyFlag, BodyKind, BodyState};
use crate::character::CharacterState;
use crate::handle::{BodyTag, ConstraintId, ControllerId, TagFields, pack_tag};
use crate::math::{EPSILON, Point3, Quat, Transform, Vec3};
use crate::shape::{ShapeId, ShapeRegistry};
use crate::soft::SoftBody;

/// Identity of the scene entity that owns a controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntityInfo {
    pub id: u64,
    pub name: String,
}

impl EntityInfo {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Bridge between a controller and the externally owned transform of its entity.
///
/// `synchronize_before_step` reads `world_transform` for bodies driven from the outside,
/// `synchronize_after_step` writes simulated poses back with `set_world_transform`.
pub trait MotionState: Send {
    fn world_transform(&self) -> Transform;
    fn set_world_transform(&mut self, transform: &Transform);
}

/// Plain stored transform. Used when the caller does not bring its own motion state.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMotionState {
    pub transform: Transform,
}

impl DefaultMotionState {
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }
}

impl MotionState for DefaultMotionState {
    fn world_transform(&self) -> Transform {
        self.transform
    }

    fn set_world_transform(&mut self, transform: &Transform) {
        self.transform = *transform;
    }
}

/// What `suspend_dynamics` saved so `restore_dynamics` can undo it.
#[derive(Clone, Debug)]
pub(crate) struct SavedDynamics {
    pub mass: f32,
    pub friction: f32,
    pub flags: crate::body::BodyFlags,
    pub collision_group: u16,
    pub collision_mask: u16,
}

/// User forces accumulated between two frames, applied on every sub-step of the next
/// `proceed_delta_time` and then cleared.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PendingForces {
    pub force: Vec3,
    pub torque: Vec3,
}

impl PendingForces {
    pub fn is_zero(&self) -> bool {
        self.force.norm_squared() <= EPSILON * EPSILON
            && self.torque.norm_squared() <= EPSILON * EPSILON
    }
}

pub struct Controller {
    pub(crate) id: ControllerId,
    pub(crate) info: EntityInfo,
    pub(crate) state: BodyState,
    pub(crate) shape: ShapeId,
    pub(crate) scale: Vec3,
    pub(crate) body: RigidBodyHandle,
    pub(crate) collider: ColliderHandle,
    pub(crate) registered: bool,
    pub(crate) parent_root: Option<ControllerId>,
    pub(crate) constraints: Vec<ConstraintId>,
    pub(crate) motion_state: Box<dyn MotionState>,
    pub(crate) callback_count: u32,
    pub(crate) pending: PendingForces,
    pub(crate) suspended: Option<SavedDynamics>,
    pub(crate) character: Option<CharacterState>,
    pub(crate) soft: Option<SoftBody>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("kind", &self.state.kind)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[inline]
    pub fn id(&self) -> ControllerId {
        self.id
    }

    #[inline]
    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    #[inline]
    pub fn state(&self) -> &BodyState {
        &self.state
    }

    #[inline]
    pub fn shape(&self) -> ShapeId {
        self.shape
    }

    #[inline]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Compound parent this controller's shape was folded into.
    #[inline]
    pub fn parent_root(&self) -> Option<ControllerId> {
        self.parent_root
    }

    /// Constraints this controller takes part in (active or deactivated).
    #[inline]
    pub fn constraints(&self) -> &[ConstraintId] {
        &self.constraints
    }

    /// Transform as last published to the external scene.
    pub fn transform(&self) -> Transform {
        self.motion_state.world_transform()
    }

    #[inline]
    pub fn wants_collision_callbacks(&self) -> bool {
        self.callback_count > 0
    }

    #[inline]
    pub fn is_dynamics_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn character(&self) -> Option<&CharacterState> {
        self.character.as_ref()
    }

    pub fn soft_body(&self) -> Option<&SoftBody> {
        self.soft.as_ref()
    }

    /// Collider tag for the current state.
    pub fn body_tag(&self) -> BodyTag {
        tag_for(self.id, &self.state)
    }

    pub(crate) fn link_constraint(&mut self, id: ConstraintId) {
        if !self.constraints.contains(&id) {
            self.constraints.push(id);
        }
    }

    pub(crate) fn unlink_constraint(&mut self, id: ConstraintId) {
        self.constraints.retain(|c| *c != id);
    }

    /// Push the externally owned transform into the native body.
    ///
    /// Only bodies that are not simulated follow their motion state: kinematic statics,
    /// sensors, plain statics and suspended dynamics. Characters are moved by their own
    /// movement pass.
    pub(crate) fn synchronize_before_step(&mut self, bodies: &mut RigidBodySet) {
        if self.state.kind == BodyKind::Character {
            return;
        }
        let follows_motion_state =
            !self.state.is_dynamic() || self.suspended.is_some();
        if !follows_motion_state {
            return;
        }
        let Some(body) = bodies.get_mut(self.body) else {
            return;
        };
        let target = self.motion_state.world_transform().iso();
        if body.is_kinematic() {
            body.set_next_kinematic_position(target);
        } else if *body.position() != target {
            body.set_position(target, false);
        }
    }

    /// Pull the simulated pose back out to the external scene.
    pub(crate) fn synchronize_after_step(&mut self, bodies: &RigidBodySet) {
        let simulated = (self.state.is_dynamic() && self.suspended.is_none())
            || self.state.kind == BodyKind::Character;
        if !simulated {
            return;
        }
        let Some(body) = bodies.get(self.body) else {
            return;
        };
        let pose = *body.position();
        self.motion_state
            .set_world_transform(&Transform::from_iso(&pose, self.scale));
        if let Some(soft) = self.soft.as_mut() {
            soft.follow(&pose);
        }
    }

    /// Apply the velocity clamps of [`BodyState`] to the native body.
    pub(crate) fn clamp_velocities(&self, bodies: &mut RigidBodySet) {
        let s = &self.state;
        let clamps_linear = s.linear_velocity_min > 0.0 || s.linear_velocity_max > 0.0;
        let clamps_angular = s.angular_velocity_min > 0.0 || s.angular_velocity_max > 0.0;
        if !clamps_linear && !clamps_angular {
            return;
        }
        let Some(body) = bodies.get_mut(self.body) else {
            return;
        };
        if clamps_linear {
            let v = clamp_speed(*body.linvel(), s.linear_velocity_min, s.linear_velocity_max);
            body.set_linvel(v, false);
        }
        if clamps_angular {
            let w = clamp_speed(*body.angvel(), s.angular_velocity_min, s.angular_velocity_max);
            body.set_angvel(w, false);
        }
    }
}

/// Clamp the length of `v` into `[min, max]`. A zero bound disables that side; a zero
/// vector stays zero.
pub fn clamp_speed(v: Vec3, min: f32, max: f32) -> Vec3 {
    let speed = v.norm();
    if max > 0.0 && speed > max {
        v * (max / speed)
    } else if min > 0.0 && speed > EPSILON && speed < min {
        v * (min / speed)
    } else {
        v
    }
}

pub(crate) fn tag_for(id: ControllerId, state: &BodyState) -> BodyTag {
    let class = state.filter_class();
    pack_tag(TagFields {
        controller: id,
        group: state.collision_group,
        mask: state.collision_mask,
        class_group: class as u8,
        class_mask: class.default_mask(),
        no_contact_response: !state.has_contact_response(),
    })
}

pub(crate) fn native_body_type(state: &BodyState) -> RigidBodyType {
    if state.is_dynamic() {
        RigidBodyType::Dynamic
    } else if state.is_kinematic() {
        RigidBodyType::KinematicPositionBased
    } else {
        RigidBodyType::Fixed
    }
}

/// Mass properties of `shape` rescaled to `mass`, with the inertia scaled by `inertia_factor`.
pub(crate) fn scaled_mass_properties(
    shape: &SharedShape,
    mass: f32,
    inertia_factor: f32,
) -> MassProperties {
    let unit = shape.mass_properties(1.0);
    let unit_mass = unit.mass();
    if unit_mass <= EPSILON || mass <= 0.0 {
        return MassProperties::new(unit.local_com, mass.max(0.0), Vec3::zeros());
    }
    let mp = shape.mass_properties(mass / unit_mass);
    MassProperties::with_principal_inertia_frame(
        mp.local_com,
        mass,
        mp.principal_inertia() * inertia_factor.max(0.0),
        mp.principal_inertia_local_frame,
    )
}

/// Build the native body and collider for a new controller. Both start disabled.
pub(crate) fn build_native(
    id: ControllerId,
    state: &BodyState,
    shape: SharedShape,
    transform: &Transform,
) -> (RigidBody, Collider) {
    let mut body = RigidBodyBuilder::new(native_body_type(state))
        .pose(transform.iso())
        .linear_damping(state.linear_damping)
        .angular_damping(state.angular_damping)
        .enabled(false)
        .build();
    if state.kind == BodyKind::Dynamic {
        body.lock_rotations(true, false);
    }
    apply_axis_factors(&mut body, state);
    if state.gravity.is_some() {
        body.set_gravity_scale(0.0, false);
    }

    let mut collider = ColliderBuilder::new(shape.clone())
        .friction(state.friction)
        .restitution(state.restitution)
        .friction_combine_rule(CoefficientCombineRule::Multiply)
        .restitution_combine_rule(CoefficientCombineRule::Multiply)
        .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
        .active_collision_types(ActiveCollisionTypes::all())
        .user_data(tag_for(id, state))
        .enabled(false)
        .build();
    if state.is_dynamic() {
        collider.set_mass_properties(scaled_mass_properties(
            &shape,
            state.mass,
            state.inertia_factor,
        ));
    }
    (body, collider)
}

pub(crate) fn apply_axis_factors(body: &mut RigidBody, state: &BodyState) {
    let lf = state.linear_factor;
    body.set_enabled_translations(lf.x != 0.0, lf.y != 0.0, lf.z != 0.0, false);
    if state.kind != BodyKind::Dynamic {
        let af = state.angular_factor;
        body.set_enabled_rotations(af.x != 0.0, af.y != 0.0, af.z != 0.0, false);
    }
}

/// Mutable view of one controller together with the native sets it needs.
///
/// Handed out by [`crate::PhysicsWorld::controller_mut`]. Every setter is a no-op when the
/// native object is gone.
pub struct ControllerMut<'w> {
    pub(crate) ctrl: &'w mut Controller,
    pub(crate) bodies: &'w mut RigidBodySet,
    pub(crate) colliders: &'w mut ColliderSet,
    pub(crate) shapes: &'w mut ShapeRegistry,
    pub(crate) world_gravity: Vec3,
}

impl<'w> ControllerMut<'w> {
    pub fn controller(&self) -> &Controller {
        self.ctrl
    }

    fn body(&self) -> Option<&RigidBody> {
        self.bodies.get(self.ctrl.body)
    }

    fn body_mut(&mut self) -> Option<&mut RigidBody> {
        self.bodies.get_mut(self.ctrl.body)
    }

    fn collider_mut(&mut self) -> Option<&mut Collider> {
        self.colliders.get_mut(self.ctrl.collider)
    }

    fn rotation(&self) -> Quat {
        self.body()
            .map(|b| *b.rotation())
            .unwrap_or_else(Quat::identity)
    }

    fn to_world(&self, v: Vec3, local: bool) -> Vec3 {
        if local { self.rotation() * v } else { v }
    }

    fn refresh_tag(&mut self) {
        let tag = self.ctrl.body_tag();
        if let Some(collider) = self.collider_mut() {
            collider.user_data = tag;
        }
    }

    fn refresh_mass(&mut self) {
        let (mass, factor) = (self.ctrl.state.mass, self.ctrl.state.inertia_factor);
        let dynamic = self.ctrl.state.is_dynamic() && self.ctrl.suspended.is_none();
        if let Some(collider) = self.collider_mut() {
            let mp = if dynamic {
                scaled_mass_properties(collider.shared_shape(), mass, factor)
            } else {
                MassProperties::new(Point3::origin(), 0.0, Vec3::zeros())
            };
            collider.set_mass_properties(mp);
        }
    }

    // ----- mass and material -----

    pub fn mass(&self) -> f32 {
        self.ctrl.state.mass
    }

    pub fn set_mass(&mut self, mass: f32) {
        if !mass.is_finite() || mass < 0.0 {
            return;
        }
        self.ctrl.state.mass = mass;
        if self.ctrl.suspended.is_none() {
            self.refresh_mass();
        }
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.ctrl.state.friction = friction;
        if let Some(collider) = self.collider_mut() {
            collider.set_friction(friction);
        }
    }

    pub fn set_rolling_friction(&mut self, friction: f32) {
        self.ctrl.state.rolling_friction = friction.max(0.0);
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.ctrl.state.restitution = restitution;
        if let Some(collider) = self.collider_mut() {
            collider.set_restitution(restitution);
        }
    }

    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.ctrl.state.linear_damping = linear.max(0.0);
        self.ctrl.state.angular_damping = angular.max(0.0);
        if let Some(body) = self.body_mut() {
            body.set_linear_damping(linear.max(0.0));
            body.set_angular_damping(angular.max(0.0));
        }
    }

    pub fn set_fh_params(&mut self, fh: crate::body::FhParams) {
        self.ctrl.state.fh = fh;
    }

    pub fn set_flag(&mut self, flag: BodyFlag, on: bool) {
        self.ctrl.state.flags.set(flag, on);
        self.refresh_tag();
    }

    // ----- velocities -----

    pub fn linear_velocity(&self) -> Vec3 {
        self.body().map(|b| *b.linvel()).unwrap_or_else(Vec3::zeros)
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.body().map(|b| *b.angvel()).unwrap_or_else(Vec3::zeros)
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3, local: bool) {
        let v = self.to_world(velocity, local);
        if let Some(body) = self.body_mut() {
            body.set_linvel(v, true);
        }
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3, local: bool) {
        let w = self.to_world(velocity, local);
        if let Some(body) = self.body_mut() {
            body.set_angvel(w, true);
        }
    }

    /// World velocity of the material point at `point` (world space).
    pub fn velocity_at_point(&self, point: Vec3) -> Vec3 {
        self.body()
            .map(|b| b.velocity_at_point(&Point3::from(point)))
            .unwrap_or_else(Vec3::zeros)
    }

    pub fn set_velocity_clamps(&mut self, linear: (f32, f32), angular: (f32, f32)) {
        let s = &mut self.ctrl.state;
        s.linear_velocity_min = linear.0.max(0.0);
        s.linear_velocity_max = linear.1.max(0.0);
        s.angular_velocity_min = angular.0.max(0.0);
        s.angular_velocity_max = angular.1.max(0.0);
    }

    // ----- forces -----

    /// Accumulate a force applied during the next `proceed_delta_time`.
    pub fn apply_force(&mut self, force: Vec3, local: bool) {
        let f = self.to_world(force, local);
        self.ctrl.pending.force += f;
        if let Some(body) = self.body_mut() {
            body.wake_up(true);
        }
    }

    pub fn apply_torque(&mut self, torque: Vec3, local: bool) {
        let t = self.to_world(torque, local);
        self.ctrl.pending.torque += t;
        if let Some(body) = self.body_mut() {
            body.wake_up(true);
        }
    }

    /// Apply an impulse at `point`. With `local`, both are in the body frame.
    pub fn apply_impulse(&mut self, point: Vec3, impulse: Vec3, local: bool) {
        if !self.ctrl.state.is_dynamic() || self.ctrl.suspended.is_some() {
            return;
        }
        let Some(body) = self.body_mut() else {
            return;
        };
        let (p, j) = if local {
            let pose = *body.position();
            (pose * Point3::from(point), pose.rotation * impulse)
        } else {
            (Point3::from(point), impulse)
        };
        body.apply_impulse_at_point(j, p, true);
    }

    // ----- pose -----

    pub fn set_position(&mut self, position: Vec3) {
        let mut t = self.ctrl.motion_state.world_transform();
        t.translation = position;
        self.teleport(t);
    }

    pub fn set_orientation(&mut self, rotation: Quat) {
        let mut t = self.ctrl.motion_state.world_transform();
        t.rotation = rotation;
        self.teleport(t);
    }

    /// Move by `delta`, in the body frame when `local`.
    pub fn translate(&mut self, delta: Vec3, local: bool) {
        let mut t = self.ctrl.motion_state.world_transform();
        t.translation += if local { t.rotation * delta } else { delta };
        self.teleport(t);
    }

    /// Compose `rotation` onto the current orientation, in the body frame when `local`.
    pub fn rotate(&mut self, rotation: Quat, local: bool) {
        let mut t = self.ctrl.motion_state.world_transform();
        t.rotation = if local {
            t.rotation * rotation
        } else {
            rotation * t.rotation
        };
        self.teleport(t);
    }

    fn teleport(&mut self, transform: Transform) {
        self.ctrl.motion_state.set_world_transform(&transform);
        let iso = transform.iso();
        if let Some(body) = self.body_mut() {
            body.set_position(iso, true);
        }
        if let Some(soft) = self.ctrl.soft.as_mut() {
            soft.follow(&iso);
        }
    }

    /// Rebuild the native shape at a new scale.
    pub fn set_scaling(&mut self, scale: Vec3) {
        if (scale - self.ctrl.scale).norm_squared() <= EPSILON * EPSILON {
            return;
        }
        self.ctrl.scale = scale;
        let shape = self.shapes.build(self.ctrl.shape, scale);
        if let Some(collider) = self.collider_mut() {
            collider.set_shape(shape);
        }
        self.refresh_mass();
        let mut t = self.ctrl.motion_state.world_transform();
        t.scale = scale;
        self.ctrl.motion_state.set_world_transform(&t);
    }

    // ----- gravity, filtering and activation -----

    /// Per-body gravity. `None` returns to world gravity.
    pub fn set_gravity(&mut self, gravity: Option<Vec3>) {
        self.ctrl.state.gravity = gravity;
        let scale = if gravity.is_some() { 0.0 } else { 1.0 };
        if let Some(body) = self.body_mut() {
            body.set_gravity_scale(scale, true);
        }
        if let Some(character) = self.ctrl.character.as_mut() {
            character.gravity = gravity;
        }
    }

    /// Gravity acting on this body.
    pub fn gravity(&self) -> Vec3 {
        self.ctrl.state.gravity.unwrap_or(self.world_gravity)
    }

    /// Change the user collision group/mask. Live pairs are re-filtered on the next step.
    pub fn set_collision_filter(&mut self, group: u16, mask: u16) {
        self.ctrl.state.collision_group = group;
        self.ctrl.state.collision_mask = mask;
        self.refresh_tag();
        if let Some(body) = self.body_mut() {
            body.wake_up(true);
        }
    }

    pub fn set_active(&mut self, active: bool) {
        if let Some(body) = self.body_mut() {
            if active {
                body.wake_up(true);
            } else {
                body.sleep();
            }
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.body().map(|b| b.is_sleeping()).unwrap_or(false)
    }

    pub fn set_linear_factor(&mut self, factor: Vec3) {
        self.ctrl.state.linear_factor = factor;
        let state = self.ctrl.state.clone();
        if let Some(body) = self.body_mut() {
            apply_axis_factors(body, &state);
        }
    }

    pub fn set_angular_factor(&mut self, factor: Vec3) {
        self.ctrl.state.angular_factor = factor;
        let state = self.ctrl.state.clone();
        if let Some(body) = self.body_mut() {
            apply_axis_factors(body, &state);
        }
    }

    // ----- suspend / restore dynamics -----

    /// Turn a dynamic body into a massless static one until [`Self::restore_dynamics`].
    ///
    /// With `ghost` the body also stops responding to contacts. Repeated calls keep the
    /// state saved by the first one.
    pub fn suspend_dynamics(&mut self, ghost: bool) {
        if !self.ctrl.state.is_dynamic() || self.ctrl.suspended.is_some() {
            return;
        }
        let s = &self.ctrl.state;
        self.ctrl.suspended = Some(SavedDynamics {
            mass: s.mass,
            friction: s.friction,
            flags: s.flags,
            collision_group: s.collision_group,
            collision_mask: s.collision_mask,
        });
        if ghost {
            self.ctrl.state.flags.add(BodyFlag::Ghost);
        }
        self.refresh_tag();
        self.refresh_mass();
        if let Some(body) = self.body_mut() {
            body.set_linvel(Vec3::zeros(), false);
            body.set_angvel(Vec3::zeros(), false);
            body.set_body_type(RigidBodyType::Fixed, true);
        }
    }

    pub fn restore_dynamics(&mut self) {
        let Some(saved) = self.ctrl.suspended.take() else {
            return;
        };
        let s = &mut self.ctrl.state;
        s.mass = saved.mass;
        s.friction = saved.friction;
        s.flags = saved.flags;
        s.collision_group = saved.collision_group;
        s.collision_mask = saved.collision_mask;
        let friction = saved.friction;
        self.refresh_tag();
        self.refresh_mass();
        if let Some(collider) = self.collider_mut() {
            collider.set_friction(friction);
        }
        if let Some(body) = self.body_mut() {
            body.set_body_type(RigidBodyType::Dynamic, true);
        }
    }

    // ----- characters -----

    fn character_mut(&mut self) -> Option<&mut CharacterState> {
        self.ctrl.character.as_mut()
    }

    /// Jump if allowed. Returns whether the jump happened.
    pub fn jump(&mut self) -> bool {
        self.character_mut().map(|c| c.jump()).unwrap_or(false)
    }

    pub fn set_walk_direction(&mut self, direction: Vec3, local: bool) {
        let d = self.to_world(direction, local);
        if let Some(c) = self.character_mut() {
            c.set_walk_direction(d);
        }
    }

    /// Move with `velocity` for `time` seconds of simulation.
    pub fn set_velocity_for_time_interval(&mut self, velocity: Vec3, time: f32, local: bool) {
        let v = self.to_world(velocity, local);
        if let Some(c) = self.character_mut() {
            c.set_velocity_for_time_interval(v, time);
        }
    }

    pub fn set_jump_speed(&mut self, speed: f32) {
        self.ctrl.state.character.jump_speed = speed;
        if let Some(c) = self.character_mut() {
            c.params.jump_speed = speed;
        }
    }

    pub fn set_fall_speed(&mut self, speed: f32) {
        let speed = speed.max(0.0);
        self.ctrl.state.character.fall_speed = speed;
        if let Some(c) = self.character_mut() {
            c.params.fall_speed = speed;
        }
    }

    pub fn set_max_slope(&mut self, radians: f32) {
        let slope = radians.clamp(0.0, std::f32::consts::FRAC_PI_2);
        self.ctrl.state.character.max_slope = slope;
        if let Some(c) = self.character_mut() {
            c.params.max_slope = slope;
        }
    }

    pub fn set_max_jumps(&mut self, jumps: u8) {
        self.ctrl.state.character.max_jumps = jumps;
        if let Some(c) = self.character_mut() {
            c.params.max_jumps = jumps;
        }
    }

    pub fn set_step_height(&mut self, height: f32) {
        let height = height.max(0.0);
        self.ctrl.state.character.step_height = height;
        if let Some(c) = self.character_mut() {
            c.params.step_height = height;
        }
    }

    /// Drop walk direction, timed velocity, vertical speed and jump count.
    pub fn reset_character(&mut self) {
        if let Some(c) = self.character_mut() {
            c.reset();
        }
    }
}
