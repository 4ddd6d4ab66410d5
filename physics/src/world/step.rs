//! Frame stepping.
//!
//! `proceed_delta_time` runs, in order:
//! 1. pre-sync of externally driven bodies,
//! 2. zero or more fixed sub-steps (velocity clamps, forces, characters, vehicles, native
//!    step, constraint breaking),
//! 3. FH springs once per frame, scaled by the simulated time actually run,
//! 4. post-sync of simulated bodies and vehicle wheels,
//! 5. collision callbacks.

use log::{debug, info, trace};
use rapier3d::prelude::{Collider, ColliderHandle, QueryFilter, Ray, RigidBodyHandle};

use super::PhysicsWorld;
use super::query::{collider_owner, manifold_data, query_pipeline};
use crate::body::{BodyFlag, BodyKind};
use crate::contact::CollisionData;
use crate::controller::PendingForces;
use crate::fh_spring::{FhProbe, FhResponse, fh_response, ray_direction};
use crate::handle::{ConstraintId, ControllerId, try_unpack_tag};
use crate::math::{Point3, Vec3};
use crate::vehicle::{ChassisImpulse, ChassisState, WheelHit};

/// Slack on the accumulator so that `n * dt` intervals are not lost to rounding.
const ACCUMULATOR_SLACK: f32 = 1e-6;

impl PhysicsWorld {
    /// Advance the world by `interval` seconds in fixed sub-steps of
    /// `timestep / num_sub_steps`.
    ///
    /// Leftover time carries over to the next call; at most `max_sub_steps` sub-steps run
    /// per call and the excess is dropped. Returns true when at least one sub-step ran.
    pub fn proceed_delta_time(&mut self, current_time: f64, timestep: f32, interval: f32) -> bool {
        if timestep <= 0.0 || interval < 0.0 {
            debug!("ignoring step with timestep {timestep} and interval {interval}");
            return false;
        }

        for ctrl in self.controllers.values_mut().filter(|c| c.registered) {
            ctrl.synchronize_before_step(&mut self.bodies);
        }

        let fixed_dt = timestep / self.config.num_sub_steps.max(1) as f32;
        self.accumulator += interval;
        let mut sub_steps = ((self.accumulator + ACCUMULATOR_SLACK) / fixed_dt).floor() as u32;
        self.accumulator = (self.accumulator - sub_steps as f32 * fixed_dt).max(0.0);
        if sub_steps > self.config.max_sub_steps {
            debug!(
                "dropping {} sub-step(s) at t={current_time:.3}",
                sub_steps - self.config.max_sub_steps
            );
            sub_steps = self.config.max_sub_steps;
        }
        trace!("t={current_time:.3}: {sub_steps} sub-step(s) of {fixed_dt}s");

        for _ in 0..sub_steps {
            self.sub_step(fixed_dt);
        }
        self.last_sub_steps = sub_steps;

        if sub_steps > 0 {
            for ctrl in self.controllers.values_mut() {
                ctrl.pending = PendingForces::default();
            }
            self.apply_fh_springs(sub_steps as f32 * fixed_dt * self.config.tic_rate);
        }

        for ctrl in self.controllers.values_mut().filter(|c| c.registered) {
            ctrl.synchronize_after_step(&self.bodies);
        }
        self.sync_vehicles();

        if sub_steps > 0 {
            self.dispatch_collisions();
        }
        sub_steps > 0
    }

    fn sub_step(&mut self, dt: f32) {
        for ctrl in self.controllers.values().filter(|c| c.registered) {
            ctrl.clamp_velocities(&mut self.bodies);
        }
        self.apply_forces();
        self.move_characters(dt);
        self.update_vehicles(dt);
        self.native_step(dt);
        self.break_constraints();
    }

    fn apply_forces(&mut self) {
        for ctrl in self.controllers.values() {
            if !ctrl.registered || !ctrl.state.is_dynamic() || ctrl.suspended.is_some() {
                continue;
            }
            let Some(body) = self.bodies.get_mut(ctrl.body) else {
                continue;
            };
            body.reset_forces(false);
            body.reset_torques(false);

            let mut force = ctrl.pending.force;
            if let Some(gravity) = ctrl.state.gravity {
                force += gravity * body.mass();
            }
            if force != Vec3::zeros() {
                body.add_force(force, true);
            }
            if ctrl.pending.torque != Vec3::zeros() {
                body.add_torque(ctrl.pending.torque, true);
            }
        }
    }

    fn move_characters(&mut self, dt: f32) {
        let mut moves: Vec<(RigidBodyHandle, Vec3)> = Vec::new();
        let solid = |_: ColliderHandle, c: &Collider| {
            try_unpack_tag(c.user_data).is_some_and(|t| !t.no_contact_response)
        };

        for ctrl in self.controllers.values_mut() {
            if !ctrl.registered || ctrl.state.kind != BodyKind::Character {
                continue;
            }
            let (Some(character), Some(collider)) =
                (ctrl.character.as_mut(), self.colliders.get(ctrl.collider))
            else {
                continue;
            };
            let gravity = character.gravity.unwrap_or(self.gravity);
            let desired = character.desired_translation(dt, gravity);
            let kcc = character.native_controller();

            let query = query_pipeline(
                &self.broad_phase,
                &self.narrow_phase,
                &self.bodies,
                &self.colliders,
                QueryFilter::default()
                    .exclude_rigid_body(ctrl.body)
                    .predicate(&solid),
            );
            let movement = kcc.move_shape(
                dt,
                &query,
                collider.shape(),
                collider.position(),
                desired,
                |_| {},
            );
            character.land(movement.grounded);
            moves.push((
                ctrl.body,
                collider.position().translation.vector + movement.translation,
            ));
        }

        for (handle, target) in moves {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.set_next_kinematic_translation(target);
            }
        }
    }

    fn update_vehicles(&mut self, dt: f32) {
        let mut impulses: Vec<(RigidBodyHandle, Vec<ChassisImpulse>)> = Vec::new();

        for vehicle in self.vehicles.values_mut() {
            if !vehicle.active {
                continue;
            }
            let Some(chassis) = self.controllers.get(&vehicle.chassis) else {
                continue;
            };
            let Some(body) = self.bodies.get(chassis.body).filter(|_| chassis.registered) else {
                continue;
            };
            let state = ChassisState {
                pose: *body.position(),
                center_of_mass: *body.center_of_mass(),
                linvel: *body.linvel(),
                angvel: *body.angvel(),
                mass: body.mass(),
            };

            let mask = vehicle.ray_mask;
            let ground = |_: ColliderHandle, c: &Collider| {
                try_unpack_tag(c.user_data)
                    .is_some_and(|t| !t.no_contact_response && t.group & mask != 0)
            };
            let query = query_pipeline(
                &self.broad_phase,
                &self.narrow_phase,
                &self.bodies,
                &self.colliders,
                QueryFilter::default()
                    .exclude_rigid_body(chassis.body)
                    .predicate(&ground),
            );
            let out = vehicle.update(dt, &state, |from, dir, length| {
                let ray = Ray::new(Point3::from(from), dir);
                let (_, hit) = query.cast_ray_and_get_normal(&ray, length, true)?;
                Some(WheelHit {
                    distance: hit.time_of_impact * dir.norm(),
                    point: from + dir * hit.time_of_impact,
                    normal: hit.normal,
                })
            });
            if !out.is_empty() {
                impulses.push((chassis.body, out));
            }
        }

        for (handle, list) in impulses {
            let Some(body) = self.bodies.get_mut(handle) else {
                continue;
            };
            for ChassisImpulse { impulse, point } in list {
                body.apply_impulse_at_point(impulse, Point3::from(point), true);
            }
        }
    }

    fn native_step(&mut self, dt: f32) {
        self.params.dt = dt;
        let gravity = self.gravity;
        let Self {
            pipeline,
            params,
            islands,
            broad_phase,
            narrow_phase,
            bodies,
            colliders,
            impulse_joints,
            multibody_joints,
            ccd_solver,
            hooks,
            #[cfg(feature = "parallel")]
            pool,
            ..
        } = self;

        let run = || {
            pipeline.step(
                &gravity,
                params,
                islands,
                broad_phase,
                narrow_phase,
                bodies,
                colliders,
                impulse_joints,
                multibody_joints,
                ccd_solver,
                &*hooks,
                &(),
            )
        };
        #[cfg(feature = "parallel")]
        pool.install(run);
        #[cfg(not(feature = "parallel"))]
        {
            let mut run = run;
            run();
        }
    }

    /// Deactivate constraints whose joint impulse went past their breaking threshold.
    fn break_constraints(&mut self) {
        let mut broken: Vec<ConstraintId> = Vec::new();
        for constraint in self.constraints.values_mut() {
            let Some(handle) = constraint.joint else {
                continue;
            };
            let impulse = self
                .impulse_joints
                .get(handle)
                .map(|j| j.impulses.norm())
                .unwrap_or(0.0);
            constraint.applied_impulse = impulse;
            if constraint.breaking_threshold.is_some_and(|t| impulse > t) {
                broken.push(constraint.id);
            }
        }

        for id in broken {
            let Some(constraint) = self.constraints.get_mut(&id) else {
                continue;
            };
            if let Some(handle) = constraint.joint.take() {
                self.impulse_joints.remove(handle, true);
            }
            constraint.enabled = false;
            info!(
                "constraint {:?} broke at impulse {:.3}",
                id, constraint.applied_impulse
            );
        }
    }

    fn apply_fh_springs(&mut self, step: f32) {
        let ray_length = self.config.fh_ray_length;
        let mut responses: Vec<(RigidBodyHandle, FhResponse)> = Vec::new();

        for ctrl in self.controllers.values() {
            let state = &ctrl.state;
            let do_fh = state.flags.has(BodyFlag::DoFh);
            let do_rot_fh = state.flags.has(BodyFlag::DoRotFh);
            if !ctrl.registered || !state.is_dynamic() || ctrl.suspended.is_some() {
                continue;
            }
            if !do_fh && !do_rot_fh {
                continue;
            }
            let Some(body) = self.bodies.get(ctrl.body) else {
                continue;
            };

            let origin = *body.center_of_mass();
            let query = query_pipeline(
                &self.broad_phase,
                &self.narrow_phase,
                &self.bodies,
                &self.colliders,
                QueryFilter::default().exclude_rigid_body(ctrl.body),
            );
            let ray = Ray::new(origin, ray_direction());
            let Some((handle, hit)) = query.cast_ray_and_get_normal(&ray, ray_length, true) else {
                continue;
            };
            let Some(hit_ctrl) = self
                .colliders
                .get(handle)
                .and_then(collider_owner)
                .and_then(|id| self.controllers.get(&id))
            else {
                continue;
            };

            let hit_point = ray.point_at(hit.time_of_impact);
            let hit_velocity = self
                .bodies
                .get(hit_ctrl.body)
                .map(|b| b.velocity_at_point(&hit_point))
                .unwrap_or_else(Vec3::zeros);
            let mass = body.mass();
            let rotation = body.rotation();

            let probe = FhProbe {
                hit_distance: hit.time_of_impact,
                hit_normal: hit.normal,
                radius: state.radius,
                linvel: *body.linvel(),
                angvel: *body.angvel(),
                inv_mass: if mass > 0.0 { 1.0 / mass } else { 0.0 },
                up: rotation * Vec3::z(),
                basis: rotation.to_rotation_matrix().into_inner(),
                anisotropic: state
                    .flags
                    .has(BodyFlag::Anisotropic)
                    .then_some(state.anisotropic_friction),
                hit_velocity,
                hit_params: hit_ctrl.state.fh,
                hit_friction: hit_ctrl.state.friction,
                hit_fh_normal: hit_ctrl.state.flags.has(BodyFlag::FhNormal),
                do_fh,
                do_rot_fh,
            };
            if let Some(response) = fh_response(&probe, step) {
                responses.push((ctrl.body, response));
            }
        }

        for (handle, response) in responses {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.set_linvel(response.linvel, true);
                body.set_angvel(response.angvel, true);
                if response.friction_impulse != Vec3::zeros() {
                    body.apply_impulse(response.friction_impulse, true);
                }
            }
        }
    }

    fn sync_vehicles(&mut self) {
        for vehicle in self.vehicles.values_mut().filter(|v| v.active) {
            let pose = self
                .controllers
                .get(&vehicle.chassis)
                .and_then(|c| self.bodies.get(c.body))
                .map(|b| *b.position());
            if let Some(pose) = pose {
                vehicle.update_wheel_transforms(&pose);
                vehicle.sync_wheels();
            }
        }
    }

    /// Report every touching manifold involving a controller that asked for callbacks.
    ///
    /// Only points within the contact breaking threshold count. Events are gathered first
    /// and delivered afterwards, in pair order.
    fn dispatch_collisions(&mut self) {
        if self.collision_callback.is_none()
            || !self.controllers.values().any(|c| c.callback_count > 0)
        {
            return;
        }

        let threshold = self.config.contact_breaking_threshold;
        let mut events: Vec<(ControllerId, ControllerId, CollisionData, bool)> = Vec::new();
        for pair in self.narrow_phase.contact_pairs() {
            let (Some(c1), Some(c2)) = (
                self.colliders.get(pair.collider1),
                self.colliders.get(pair.collider2),
            ) else {
                continue;
            };
            let (Some(id1), Some(id2)) = (collider_owner(c1), collider_owner(c2)) else {
                continue;
            };
            let (Some(a), Some(b)) = (self.controllers.get(&id1), self.controllers.get(&id2))
            else {
                continue;
            };
            if !a.registered || !b.registered {
                continue;
            }
            let first = if a.callback_count > 0 {
                true
            } else if b.callback_count > 0 {
                false
            } else {
                continue;
            };

            for manifold in &pair.manifolds {
                let data = manifold_data(manifold, c2, &a.state, &b.state, Some(threshold));
                if !data.is_empty() {
                    events.push((id1, id2, data, first));
                }
            }
        }

        if let Some(callback) = self.collision_callback.as_mut() {
            for (a, b, data, first) in &events {
                callback(*a, *b, data, *first);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::tests::{floor, sphere, world};
    use super::super::{PhysicsWorld, WorldCallbacks};
    use crate::body::{BodyFlag, BodyKind, BodyState, FhParams};
    use crate::config::WorldConfig;
    use crate::contact::CollisionData;
    use crate::controller::EntityInfo;
    use crate::handle::ControllerId;
    use crate::math::{Transform, Vec3, approx_eq};
    use crate::shape::ShapeGeometry;

    const DT: f32 = 1.0 / 60.0;

    fn world_with_gravity(callbacks: WorldCallbacks) -> PhysicsWorld {
        PhysicsWorld::new(WorldConfig::default(), callbacks).unwrap()
    }

    #[test]
    fn sub_steps_follow_the_accumulator() {
        let mut w = world();
        w.set_num_sub_steps(2);
        assert!(w.proceed_delta_time(0.0, DT, DT));
        assert_eq!(w.debug_stats().last_sub_steps, 2);

        // Half a sub-step carries over.
        assert!(!w.proceed_delta_time(0.0, DT, DT / 4.0));
        assert_eq!(w.debug_stats().last_sub_steps, 0);
        assert!(w.proceed_delta_time(0.0, DT, DT / 4.0));
        assert_eq!(w.debug_stats().last_sub_steps, 1);

        assert!(w.proceed_delta_time(0.0, DT, 10.0));
        assert_eq!(w.debug_stats().last_sub_steps, w.config().max_sub_steps);
        assert!(!w.proceed_delta_time(0.0, 0.0, DT));
    }

    #[test]
    fn bodies_rest_without_gravity() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::new(0.0, 0.0, 0.0));
        let b = sphere(&mut w, BodyKind::Rigid, Vec3::new(5.0, 0.0, 0.0));
        w.register_controller(a);
        w.register_controller(b);
        for i in 0..30 {
            w.proceed_delta_time(i as f64 * DT as f64, DT, DT);
        }
        let pa = w.controller(a).unwrap().transform().translation;
        let pb = w.controller(b).unwrap().transform().translation;
        assert!(pa.norm() < 1e-4);
        assert!((pb - Vec3::new(5.0, 0.0, 0.0)).norm() < 1e-4);
        assert!(w.check_collision(a, b).is_none());
    }

    #[test]
    fn dropped_spheres_fall() {
        let mut w = world_with_gravity(WorldCallbacks::default());
        let ball = sphere(&mut w, BodyKind::Rigid, Vec3::new(0.0, 0.0, 10.0));
        w.register_controller(ball);
        for _ in 0..30 {
            w.proceed_delta_time(0.0, DT, DT);
        }
        assert!(w.controller(ball).unwrap().transform().translation.z < 9.0);
    }

    #[test]
    fn resting_contact_fires_once_per_step() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut w = world_with_gravity(WorldCallbacks {
            object_collision: Some(Box::new(move |_, _, data: &CollisionData, _| {
                assert!(!data.is_empty());
                counter.fetch_add(1, Ordering::Relaxed);
                true
            })),
            broadphase: None,
        });
        let floor = floor(&mut w);
        let ball = sphere(&mut w, BodyKind::Rigid, Vec3::new(0.0, 0.0, 0.5));
        w.register_controller(ball);
        w.add_collision_callback(ball);

        let steps = 30;
        for _ in 0..steps {
            w.proceed_delta_time(0.0, DT, DT);
        }
        assert_eq!(hits.load(Ordering::Relaxed), steps);
        assert!(approx_eq(
            w.controller(ball).unwrap().transform().translation.z,
            0.5,
            0.05
        ));

        let (ball_first, data) = w.check_collision(ball, floor).unwrap();
        let normal = data.normal(0, ball_first).unwrap();
        assert!(normal.z < -0.9, "normal away from the ball: {normal:?}");
    }

    #[test]
    fn unregistered_controllers_get_no_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut w = world_with_gravity(WorldCallbacks {
            object_collision: Some(Box::new(move |_, _, _: &CollisionData, _| {
                counter.fetch_add(1, Ordering::Relaxed);
                true
            })),
            broadphase: None,
        });
        floor(&mut w);
        let ball = sphere(&mut w, BodyKind::Rigid, Vec3::new(0.0, 0.0, 0.5));
        w.register_controller(ball);
        w.add_collision_callback(ball);
        w.proceed_delta_time(0.0, DT, DT);
        w.unregister_controller(ball, false);
        let before = hits.load(Ordering::Relaxed);
        for _ in 0..5 {
            w.proceed_delta_time(0.0, DT, DT);
        }
        assert_eq!(hits.load(Ordering::Relaxed), before);
    }

    /// A static floor whose top is at z = 0 and carries FH parameters, plus a body of
    /// radius 0.25 opted into the FH pass at `z`.
    fn fh_scene(w: &mut PhysicsWorld, z: f32) -> ControllerId {
        let floor_shape = w.shapes_mut().create(
            ShapeGeometry::Box {
                half_extents: Vec3::new(10.0, 10.0, 0.5),
            },
            1.0,
        );
        let mut floor_state = BodyState::new(BodyKind::Static);
        floor_state.fh = FhParams {
            spring: 2.0,
            damping: 0.5,
            distance: 2.0,
        };
        let floor = w
            .create_controller(
                floor_state,
                floor_shape,
                Transform::from_translation(Vec3::new(0.0, 0.0, -0.5)),
                EntityInfo::new(0, "floor"),
                None,
            )
            .unwrap();
        w.register_controller(floor);

        let shape = w
            .shapes_mut()
            .create(ShapeGeometry::Sphere { radius: 0.25 }, 0.25);
        let hover = w
            .create_controller(
                BodyState::new(BodyKind::Rigid)
                    .with_radius(0.25)
                    .with_flag(BodyFlag::DoFh),
                shape,
                Transform::from_translation(Vec3::new(0.0, 0.0, z)),
                EntityInfo::new(1, "hover"),
                None,
            )
            .unwrap();
        w.register_controller(hover);
        hover
    }

    #[test]
    fn fh_springs_hold_bodies_above_the_ground() {
        let mut w = world_with_gravity(WorldCallbacks::default());
        let hover = fh_scene(&mut w, 1.5);
        for _ in 0..240 {
            w.proceed_delta_time(0.0, DT, DT);
        }
        let z = w.controller(hover).unwrap().transform().translation.z;
        assert!(z > 0.3, "hovering body fell to {z}");
    }

    #[test]
    fn fh_push_follows_simulated_time_after_a_hitch() {
        let mut w = world();
        // Gap of 1.0 against a spring distance of 2.0: half extent, unit spring impulse.
        let hover = fh_scene(&mut w, 1.25);

        assert!(w.proceed_delta_time(0.0, DT, 10.0));
        let max_sub_steps = w.config().max_sub_steps;
        assert_eq!(w.debug_stats().last_sub_steps, max_sub_steps);

        let expected = max_sub_steps as f32 * DT * w.config().tic_rate;
        let vz = w.controller_mut(hover).unwrap().linear_velocity().z;
        assert!(
            approx_eq(vz, expected, 0.05 * expected),
            "FH push {vz} after a clamped frame, expected {expected}"
        );
    }
}
