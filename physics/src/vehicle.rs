/*!
Raycast vehicles.

A [`Vehicle`] is a chassis controller plus a list of [`Wheel`]s. Each sub-step every wheel
casts a ray from its hard point along its suspension direction; a hit compresses the
spring, and the resulting suspension, drive, brake and side-friction impulses are applied
to the chassis. There is no wheel body: wheels are pure state, and [`Vehicle::sync_wheels`]
publishes their transforms to the scene after the step.

Conventions
- Wheel attachment data is given in the chassis frame.
- The axle is stored negated, to match the winding the wheel basis and spin expect.
  Callers pass the axle the way the scene describes it.
- [`Vehicle::update`] is pure: the world supplies a ray caster and applies the returned
  impulses.
*/

use crate::controller::MotionState;
use crate::handle::{ConstraintId, ControllerId};
use crate::math::{EPSILON, Iso, Point3, Quat, Transform, Vec3, normalize_or, rotation_from_basis};
use crate::settings;

/// Per-wheel suspension and friction tuning.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VehicleTuning {
    pub suspension_stiffness: f32,
    pub suspension_compression: f32,
    pub suspension_damping: f32,
    pub max_suspension_travel_cm: f32,
    /// Caps the combined drive, brake and side impulse at `friction_slip * suspension_force * dt`.
    pub friction_slip: f32,
    pub max_suspension_force: f32,
    pub roll_influence: f32,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            suspension_stiffness: settings::SUSPENSION_STIFFNESS,
            suspension_compression: settings::SUSPENSION_COMPRESSION,
            suspension_damping: settings::SUSPENSION_DAMPING,
            max_suspension_travel_cm: settings::MAX_SUSPENSION_TRAVEL_CM,
            friction_slip: settings::FRICTION_SLIP,
            max_suspension_force: settings::MAX_SUSPENSION_FORCE,
            roll_influence: settings::ROLL_INFLUENCE,
        }
    }
}

/// Wheel attachment, as passed to `add_wheel`.
#[derive(Copy, Clone, Debug)]
pub struct WheelDesc {
    pub connection_point: Vec3,
    pub down: Vec3,
    pub axle: Vec3,
    pub rest_length: f32,
    pub radius: f32,
    pub has_steering: bool,
}

/// Ground contact of one wheel ray.
#[derive(Copy, Clone, Debug)]
pub struct WheelHit {
    /// Distance from the hard point along the suspension direction.
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Chassis state read before a vehicle update.
#[derive(Copy, Clone, Debug)]
pub struct ChassisState {
    pub pose: Iso,
    /// World center of mass.
    pub center_of_mass: Point3,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub mass: f32,
}

impl ChassisState {
    fn velocity_at(&self, point: &Vec3) -> Vec3 {
        self.linvel + self.angvel.cross(&(point - self.center_of_mass.coords))
    }
}

/// Impulse to apply to the chassis at a world point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChassisImpulse {
    pub impulse: Vec3,
    pub point: Vec3,
}

pub struct Wheel {
    desc: WheelDesc,
    pub(crate) tuning: VehicleTuning,
    motion_state: Box<dyn MotionState>,
    steering: f32,
    engine_force: f32,
    brake: f32,
    rotation: f32,
    delta_rotation: f32,
    suspension_length: f32,
    suspension_force: f32,
    contact: Option<WheelHit>,
    world: Transform,
}

impl std::fmt::Debug for Wheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wheel")
            .field("desc", &self.desc)
            .field("suspension_length", &self.suspension_length)
            .field("in_contact", &self.contact.is_some())
            .finish_non_exhaustive()
    }
}

impl Wheel {
    fn new(desc: WheelDesc, tuning: VehicleTuning, motion_state: Box<dyn MotionState>) -> Self {
        let desc = WheelDesc {
            down: normalize_or(&desc.down, -Vec3::z()),
            axle: -normalize_or(&desc.axle, Vec3::x()),
            rest_length: desc.rest_length.max(0.0),
            radius: desc.radius.max(0.0),
            ..desc
        };
        Self {
            desc,
            tuning,
            motion_state,
            steering: 0.0,
            engine_force: 0.0,
            brake: 0.0,
            rotation: 0.0,
            delta_rotation: 0.0,
            suspension_length: desc.rest_length,
            suspension_force: 0.0,
            contact: None,
            world: Transform::identity(),
        }
    }

    pub fn desc(&self) -> &WheelDesc {
        &self.desc
    }

    pub fn tuning(&self) -> &VehicleTuning {
        &self.tuning
    }

    pub fn steering(&self) -> f32 {
        self.steering
    }

    /// Spin angle (radians).
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn suspension_length(&self) -> f32 {
        self.suspension_length
    }

    /// Suspension force of the last update (N).
    pub fn suspension_force(&self) -> f32 {
        self.suspension_force
    }

    pub fn is_in_contact(&self) -> bool {
        self.contact.is_some()
    }

    /// World transform as of the last update.
    pub fn world_transform(&self) -> &Transform {
        &self.world
    }

    fn max_travel(&self) -> f32 {
        self.tuning.max_suspension_travel_cm * 0.01
    }

    /// Recompute the world transform from the chassis pose and current suspension state.
    fn update_transform(&mut self, chassis: &Iso) {
        let hard_point = chassis * Point3::from(self.desc.connection_point);
        let down = chassis.rotation * self.desc.down;
        let right = chassis.rotation * self.desc.axle;
        let up = -down;
        let forward = normalize_or(&up.cross(&right), Vec3::y());

        let steer = Quat::from_axis_angle(&nalgebra::Unit::new_normalize(up), self.steering);
        let spin = Quat::from_axis_angle(&nalgebra::Unit::new_normalize(right), -self.rotation);
        let basis = rotation_from_basis(&right, &forward, &up);

        self.world = Transform::new(
            hard_point.coords + down * self.suspension_length,
            steer * spin * basis,
        );
    }
}

pub struct Vehicle {
    pub(crate) id: ConstraintId,
    pub(crate) chassis: ControllerId,
    pub(crate) wheels: Vec<Wheel>,
    pub(crate) tuning: VehicleTuning,
    /// User collision groups the wheel rays can hit.
    pub(crate) ray_mask: u16,
    pub(crate) active: bool,
}

impl std::fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vehicle")
            .field("id", &self.id)
            .field("chassis", &self.chassis)
            .field("wheels", &self.wheels.len())
            .field("active", &self.active)
            .finish()
    }
}

impl Vehicle {
    pub(crate) fn new(id: ConstraintId, chassis: ControllerId) -> Self {
        Self {
            id,
            chassis,
            wheels: Vec::new(),
            tuning: VehicleTuning::default(),
            ray_mask: settings::ALL_GROUPS,
            active: true,
        }
    }

    #[inline]
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    #[inline]
    pub fn chassis(&self) -> ControllerId {
        self.chassis
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn num_wheels(&self) -> usize {
        self.wheels.len()
    }

    pub fn wheel(&self, index: usize) -> Option<&Wheel> {
        self.wheels.get(index)
    }

    pub fn ray_mask(&self) -> u16 {
        self.ray_mask
    }

    pub fn set_ray_mask(&mut self, mask: u16) {
        self.ray_mask = mask;
    }

    /// Tuning used by wheels added from now on.
    pub fn set_tuning(&mut self, tuning: VehicleTuning) {
        self.tuning = tuning;
    }

    /// Add a wheel and place it at rest under its hard point.
    pub fn add_wheel(
        &mut self,
        desc: WheelDesc,
        motion_state: Box<dyn MotionState>,
        chassis: &Iso,
    ) -> usize {
        let mut wheel = Wheel::new(desc, self.tuning, motion_state);
        wheel.update_transform(chassis);
        self.wheels.push(wheel);
        self.wheels.len() - 1
    }

    fn wheel_mut(&mut self, index: usize) -> Option<&mut Wheel> {
        self.wheels.get_mut(index)
    }

    pub fn apply_engine_force(&mut self, force: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.engine_force = force;
        }
    }

    pub fn apply_braking(&mut self, brake: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.brake = brake.max(0.0);
        }
    }

    /// Steering angle (radians). Ignored on wheels without steering.
    pub fn set_steering(&mut self, angle: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            if w.desc.has_steering {
                w.steering = angle;
            }
        }
    }

    pub fn set_suspension_stiffness(&mut self, value: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.tuning.suspension_stiffness = value;
        }
    }

    pub fn set_suspension_damping(&mut self, value: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.tuning.suspension_damping = value;
        }
    }

    pub fn set_suspension_compression(&mut self, value: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.tuning.suspension_compression = value;
        }
    }

    pub fn set_friction_slip(&mut self, value: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.tuning.friction_slip = value;
        }
    }

    pub fn set_roll_influence(&mut self, value: f32, wheel: usize) {
        if let Some(w) = self.wheel_mut(wheel) {
            w.tuning.roll_influence = value;
        }
    }

    pub fn wheel_position(&self, wheel: usize) -> Option<Vec3> {
        self.wheels.get(wheel).map(|w| w.world.translation)
    }

    pub fn wheel_orientation(&self, wheel: usize) -> Option<Quat> {
        self.wheels.get(wheel).map(|w| w.world.rotation)
    }

    pub fn wheel_rotation(&self, wheel: usize) -> Option<f32> {
        self.wheels.get(wheel).map(|w| w.rotation)
    }

    /// Advance the wheels by `dt` and return the impulses to apply to the chassis.
    ///
    /// `cast(from, dir, length)` returns the closest acceptable ground hit.
    ///
    /// Tire friction is a simple impulse model, not a slip solver: each wheel cancels its
    /// share of the sideways contact velocity, adds drive and brake along the rolling
    /// direction, and clamps the sum to the friction circle given by `friction_slip`.
    pub fn update(
        &mut self,
        dt: f32,
        chassis: &ChassisState,
        mut cast: impl FnMut(Vec3, Vec3, f32) -> Option<WheelHit>,
    ) -> Vec<ChassisImpulse> {
        let mut impulses = Vec::new();
        if dt <= 0.0 {
            return impulses;
        }
        let wheel_count = self.wheels.len().max(1) as f32;

        for wheel in &mut self.wheels {
            let hard_point = (chassis.pose * Point3::from(wheel.desc.connection_point)).coords;
            let down = chassis.pose.rotation * wheel.desc.down;
            let ray_length = wheel.desc.rest_length + wheel.desc.radius;

            wheel.contact = cast(hard_point, down, ray_length);
            wheel.suspension_force = 0.0;

            let Some(hit) = wheel.contact else {
                wheel.suspension_length = wheel.desc.rest_length;
                wheel.delta_rotation *= settings::WHEEL_AIR_SPIN_DAMPING;
                wheel.rotation += wheel.delta_rotation;
                continue;
            };

            let min_len = (wheel.desc.rest_length - wheel.max_travel()).max(0.0);
            let max_len = wheel.desc.rest_length + wheel.max_travel();
            wheel.suspension_length = (hit.distance - wheel.desc.radius).clamp(min_len, max_len);

            // Relative velocity along the suspension.
            let normal = normalize_or(&hit.normal, -down);
            let denominator = normal.dot(&down);
            let point_vel = chassis.velocity_at(&hit.point);
            let (clipped_inv_contact_dot, suspension_rel_vel) = if denominator >= -0.1 {
                (10.0, 0.0)
            } else {
                let inv = -1.0 / denominator;
                (inv, normal.dot(&point_vel) * inv)
            };

            let t = &wheel.tuning;
            let spring = t.suspension_stiffness
                * (wheel.desc.rest_length - wheel.suspension_length)
                * clipped_inv_contact_dot;
            let damping = if suspension_rel_vel < 0.0 {
                t.suspension_compression
            } else {
                t.suspension_damping
            };
            let force = ((spring - damping * suspension_rel_vel) * chassis.mass)
                .clamp(0.0, t.max_suspension_force);
            wheel.suspension_force = force;
            if force > 0.0 {
                impulses.push(ChassisImpulse {
                    impulse: normal * (force * dt),
                    point: hit.point,
                });
            }

            // Drive, brake and side friction in the contact plane.
            let axle = chassis.pose.rotation * wheel.desc.axle;
            let axle_world = if wheel.steering != 0.0 {
                Quat::from_axis_angle(&nalgebra::Unit::new_normalize(-down), wheel.steering) * axle
            } else {
                axle
            };
            let side = normalize_or(&(axle_world - normal * axle_world.dot(&normal)), axle_world);
            let forward = normalize_or(&normal.cross(&side), Vec3::y());

            let max_impulse = t.friction_slip * force * dt;
            let forward_speed = forward.dot(&point_vel);

            let mut forward_impulse = wheel.engine_force * dt;
            if wheel.brake > 0.0 {
                let stop = -forward_speed * chassis.mass;
                forward_impulse += stop.clamp(-wheel.brake * dt, wheel.brake * dt);
            }
            let side_speed = side.dot(&point_vel);
            let side_impulse = -side_speed * chassis.mass / wheel_count;

            let mut friction = forward * forward_impulse + side * side_impulse;
            let len = friction.norm();
            if len > max_impulse && len > EPSILON {
                friction *= max_impulse / len;
            }
            if friction.norm_squared() > EPSILON * EPSILON {
                // Side forces act closer to the center of mass to limit rolling.
                let rel = hit.point - chassis.center_of_mass.coords;
                let up = -down;
                let lowered = rel - up * (rel.dot(&up) * (1.0 - t.roll_influence));
                impulses.push(ChassisImpulse {
                    impulse: friction,
                    point: chassis.center_of_mass.coords + lowered,
                });
            }

            wheel.delta_rotation = forward_speed * dt / wheel.desc.radius.max(EPSILON);
            wheel.rotation += wheel.delta_rotation;
        }
        impulses
    }

    /// Refresh every wheel's world transform from the chassis pose.
    pub(crate) fn update_wheel_transforms(&mut self, chassis: &Iso) {
        for wheel in &mut self.wheels {
            wheel.update_transform(chassis);
        }
    }

    /// Publish wheel transforms to their motion states.
    pub fn sync_wheels(&mut self) {
        for wheel in &mut self.wheels {
            let world = wheel.world;
            wheel.motion_state.set_world_transform(&world);
        }
    }
}
