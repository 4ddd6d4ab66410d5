//! Constraint, soft-anchor and vehicle management.
//!
//! Constraints and vehicles share one id space. A constraint is linked into both of its
//! controllers; a vehicle is found through its chassis.

use log::{debug, error, warn};
use rapier3d::prelude::{RigidBodyHandle, SphericalJointBuilder};

use super::PhysicsWorld;
use crate::constraint::{Constraint, ConstraintDesc, ConstraintKind, DofLimit, DofMotor, matching_frame};
use crate::controller::MotionState;
use crate::handle::{ConstraintId, ControllerId};
use crate::math::{Iso, Point3};
use crate::soft::SoftAnchor;
use crate::vehicle::{Vehicle, WheelDesc};

impl PhysicsWorld {
    /// Create a constraint between `a` and `b` (or the world when `b` is `None`).
    ///
    /// - `ConstraintKind::Vehicle` creates a vehicle on `a` instead.
    /// - When either side is a soft body, the closest node is anchored to the other side
    ///   and [`ConstraintId::NONE`] is returned: anchors have no id of their own.
    /// - At least one side must be simulated; otherwise nothing is created.
    ///
    /// The constraint is active right away when both sides are registered.
    pub fn create_constraint(
        &mut self,
        a: ControllerId,
        b: Option<ControllerId>,
        desc: &ConstraintDesc,
    ) -> ConstraintId {
        if desc.kind == ConstraintKind::Vehicle {
            return self.create_vehicle(a);
        }
        let Some(ctrl_a) = self.controllers.get(&a) else {
            warn!("constraint on unknown controller {:?}", a);
            return ConstraintId::NONE;
        };
        let ctrl_b = match b {
            Some(b) => match self.controllers.get(&b) {
                Some(ctrl) => Some(ctrl),
                None => {
                    warn!("constraint on unknown controller {:?}", b);
                    return ConstraintId::NONE;
                }
            },
            None => None,
        };
        if Some(a) == b {
            warn!("constraint of {:?} with itself", a);
            return ConstraintId::NONE;
        }

        let pose_a = self.pose(ctrl_a.body);
        if ctrl_a.soft.is_some() {
            let world_pivot = pose_a * Point3::from(desc.pivot);
            self.anchor_soft_body(a, b, world_pivot);
            return ConstraintId::NONE;
        }
        if let Some(b_ctrl) = ctrl_b.filter(|c| c.soft.is_some()) {
            let world_pivot = pose_a * Point3::from(desc.pivot);
            let soft = b_ctrl.id;
            self.anchor_soft_body(soft, Some(a), world_pivot);
            return ConstraintId::NONE;
        }

        let a_simulated = ctrl_a.state.is_dynamic();
        let b_simulated = ctrl_b.is_some_and(|c| c.state.is_dynamic());
        if !a_simulated && !b_simulated {
            warn!(
                "constraint between {:?} and {:?}: neither side is simulated",
                a, b
            );
            return ConstraintId::NONE;
        }

        let pose_b = ctrl_b.map(|c| self.pose(c.body));
        let frame_b = matching_frame(&pose_a, &desc.frame(), pose_b.as_ref());
        let id = ConstraintId(self.constraint_ids.next_id());
        let constraint = Constraint::new(id, a, b, desc, frame_b);

        if let Some(ctrl) = self.controllers.get_mut(&a) {
            ctrl.link_constraint(id);
        }
        if let Some(ctrl) = b.and_then(|b| self.controllers.get_mut(&b)) {
            ctrl.link_constraint(id);
        }
        self.constraints.insert(id, constraint);
        self.activate_constraint(id);
        debug!("constraint {:?} ({:?}) between {:?} and {:?}", id, desc.kind, a, b);
        id
    }

    /// Deactivate a constraint or vehicle; with `free` it is also destroyed.
    ///
    /// Returns false for unknown ids.
    pub fn remove_constraint(&mut self, id: ConstraintId, free: bool) -> bool {
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            vehicle.active = false;
            if free {
                self.vehicles.remove(&id);
            }
            return true;
        }

        let Some(constraint) = self.constraints.get_mut(&id) else {
            return false;
        };
        if let Some(handle) = constraint.joint.take() {
            self.impulse_joints.remove(handle, true);
        }
        if free {
            let (a, b) = (constraint.body_a, constraint.body_b);
            for ctrl in [Some(a), b].into_iter().flatten() {
                match self.controllers.get_mut(&ctrl) {
                    Some(c) => c.unlink_constraint(id),
                    None => {
                        error!("constraint {:?} references missing controller {:?}", id, ctrl);
                        debug_assert!(false, "dangling constraint back-reference");
                    }
                }
            }
            self.constraints.remove(&id);
        }
        true
    }

    /// Re-add a deactivated constraint or vehicle when all its controllers are registered.
    pub fn restore_constraint(&mut self, id: ConstraintId) -> bool {
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            let chassis_in = self
                .controllers
                .get(&vehicle.chassis)
                .is_some_and(|c| c.registered);
            vehicle.active = chassis_in;
            return chassis_in;
        }
        match self.constraints.get(&id) {
            Some(c) if c.enabled && !c.is_active() => self.activate_constraint(id),
            _ => false,
        }
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(&id)
    }

    /// Constraint ids linked to a controller, oldest first.
    pub fn constraints_of(&self, ctrl: ControllerId) -> Vec<ConstraintId> {
        self.controllers
            .get(&ctrl)
            .map(|c| c.constraints.clone())
            .unwrap_or_default()
    }

    /// Set a DOF's range. `low > high` frees it, `low == high` pins it at that value.
    pub fn set_constraint_limit(&mut self, id: ConstraintId, dof: usize, low: f32, high: f32) -> bool {
        let changed = self
            .constraints
            .get_mut(&id)
            .is_some_and(|c| c.set_limit(dof, low, high));
        if changed {
            self.refresh_joint(id);
        }
        changed
    }

    pub fn constraint_limit(&self, id: ConstraintId, dof: usize) -> Option<DofLimit> {
        self.constraints.get(&id)?.limit(dof)
    }

    pub fn set_constraint_motor(
        &mut self,
        id: ConstraintId,
        dof: usize,
        target_velocity: f32,
        max_force: f32,
    ) -> bool {
        let motor = DofMotor {
            target_velocity,
            max_force: max_force.max(0.0),
        };
        let changed = self
            .constraints
            .get_mut(&id)
            .is_some_and(|c| c.set_motor(dof, motor));
        if changed {
            self.refresh_joint(id);
        }
        changed
    }

    /// `None` makes the constraint unbreakable.
    pub fn set_breaking_threshold(&mut self, id: ConstraintId, threshold: Option<f32>) -> bool {
        match self.constraints.get_mut(&id) {
            Some(c) => {
                c.breaking_threshold = threshold.filter(|t| t.is_finite() && *t >= 0.0);
                true
            }
            None => false,
        }
    }

    /// A disabled constraint stays deactivated until enabled again, also across
    /// registrations. Broken constraints end up disabled.
    pub fn set_constraint_enabled(&mut self, id: ConstraintId, enabled: bool) -> bool {
        let Some(constraint) = self.constraints.get_mut(&id) else {
            return false;
        };
        constraint.enabled = enabled;
        if enabled {
            self.restore_constraint(id);
        } else if let Some(handle) = constraint.joint.take() {
            self.impulse_joints.remove(handle, true);
        }
        true
    }

    // ----- vehicles -----

    /// Create a raycast vehicle on a simulated chassis. Returns [`ConstraintId::NONE`]
    /// when the chassis is unknown or not simulated.
    pub fn create_vehicle(&mut self, chassis: ControllerId) -> ConstraintId {
        let Some(ctrl) = self.controllers.get(&chassis) else {
            warn!("vehicle on unknown controller {:?}", chassis);
            return ConstraintId::NONE;
        };
        if !ctrl.state.is_dynamic() {
            warn!("vehicle chassis {:?} is not simulated", chassis);
            return ConstraintId::NONE;
        }
        let registered = ctrl.registered;
        let id = ConstraintId(self.constraint_ids.next_id());
        let mut vehicle = Vehicle::new(id, chassis);
        vehicle.active = registered;
        self.vehicles.insert(id, vehicle);
        debug!("vehicle {:?} on {:?}", id, chassis);
        id
    }

    pub fn vehicle(&self, id: ConstraintId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_mut(&mut self, id: ConstraintId) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(&id)
    }

    /// Add a wheel, placed at rest under its hard point. Returns the wheel index.
    pub fn add_wheel(
        &mut self,
        vehicle: ConstraintId,
        desc: WheelDesc,
        motion_state: Box<dyn MotionState>,
    ) -> Option<usize> {
        let chassis = self.vehicles.get(&vehicle)?.chassis;
        let body = self.controllers.get(&chassis)?.body;
        let pose = self.pose(body);
        Some(self.vehicles.get_mut(&vehicle)?.add_wheel(desc, motion_state, &pose))
    }

    // ----- internals -----

    fn pose(&self, body: RigidBodyHandle) -> Iso {
        self.bodies
            .get(body)
            .map(|b| *b.position())
            .unwrap_or_else(Iso::identity)
    }

    /// Insert the native joint if every side is registered.
    fn activate_constraint(&mut self, id: ConstraintId) -> bool {
        let Some(constraint) = self.constraints.get(&id) else {
            return false;
        };
        if constraint.is_active() || !constraint.enabled {
            return false;
        }
        let Some(a) = self.controllers.get(&constraint.body_a).filter(|c| c.registered) else {
            return false;
        };
        let body_b = match constraint.body_b {
            Some(b) => match self.controllers.get(&b).filter(|c| c.registered) {
                Some(ctrl) => ctrl.body,
                None => return false,
            },
            None => self.ground,
        };

        let handle = self
            .impulse_joints
            .insert(a.body, body_b, constraint.native_joint(), true);
        if let Some(constraint) = self.constraints.get_mut(&id) {
            constraint.joint = Some(handle);
        }
        true
    }

    /// Replace an active joint after its description changed.
    fn refresh_joint(&mut self, id: ConstraintId) {
        let Some(constraint) = self.constraints.get_mut(&id) else {
            return;
        };
        if let Some(handle) = constraint.joint.take() {
            self.impulse_joints.remove(handle, true);
            self.activate_constraint(id);
        }
    }

    /// Attach the node of `soft` closest to `world_point` to `other`, or pin it in place.
    fn anchor_soft_body(&mut self, soft: ControllerId, other: Option<ControllerId>, world_point: Point3) {
        let Some(ctrl) = self.controllers.get(&soft) else {
            return;
        };
        let soft_body_handle = ctrl.body;
        let soft_pose = self.pose(soft_body_handle);
        let Some(node) = ctrl
            .soft
            .as_ref()
            .and_then(|s| s.closest_node(&world_point.coords))
        else {
            warn!("soft body {:?} has no node to anchor", soft);
            return;
        };

        let joint = match other.and_then(|o| self.controllers.get(&o)) {
            Some(other_ctrl) => {
                let other_pose = self.pose(other_ctrl.body);
                let joint = SphericalJointBuilder::new()
                    .local_anchor1(soft_pose.inverse_transform_point(&world_point))
                    .local_anchor2(other_pose.inverse_transform_point(&world_point))
                    .build();
                let both_in = ctrl.registered && other_ctrl.registered;
                both_in.then(|| {
                    self.impulse_joints
                        .insert(soft_body_handle, other_ctrl.body, joint, true)
                })
            }
            None => None,
        };

        if let Some(soft_body) = self
            .controllers
            .get_mut(&soft)
            .and_then(|c| c.soft.as_mut())
        {
            soft_body.add_anchor(SoftAnchor { node, other, joint });
            debug!("soft body {:?}: node {} anchored to {:?}", soft, node, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{sphere, world};
    use crate::body::BodyKind;
    use crate::constraint::{ConstraintDesc, ConstraintKind, DofLimit};
    use crate::controller::DefaultMotionState;
    use crate::handle::ConstraintId;
    use crate::math::{Transform, Vec3};
    use crate::vehicle::WheelDesc;

    fn hinge() -> ConstraintDesc {
        ConstraintDesc::new(ConstraintKind::Hinge, Vec3::new(1.0, 0.0, 0.0), Vec3::z())
    }

    #[test]
    fn hinges_deactivate_and_restore() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        let b = sphere(&mut w, BodyKind::Rigid, Vec3::new(2.0, 0.0, 0.0));
        w.register_controller(a);
        w.register_controller(b);

        let id = w.create_constraint(a, Some(b), &hinge());
        assert!(!id.is_none());
        assert!(w.constraint(id).unwrap().is_active());
        assert_eq!(w.constraints_of(a), vec![id]);
        assert_eq!(w.constraints_of(b), vec![id]);

        assert!(w.remove_constraint(id, false));
        assert!(!w.constraint(id).unwrap().is_active());
        assert!(w.restore_constraint(id));
        assert!(w.constraint(id).unwrap().is_active());

        // Removing again and freeing still works on an inactive constraint.
        assert!(w.remove_constraint(id, false));
        assert!(w.remove_constraint(id, true));
        assert!(w.constraint(id).is_none());
        assert!(w.constraints_of(a).is_empty());
        assert!(!w.remove_constraint(id, true));
    }

    #[test]
    fn limits_can_be_freed() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        w.register_controller(a);
        let id = w.create_constraint(a, None, &hinge());

        assert!(w.set_constraint_limit(id, 3, -0.5, 0.5));
        assert_eq!(w.constraint_limit(id, 3), Some(DofLimit::Limited(-0.5, 0.5)));
        assert!(w.set_constraint_limit(id, 3, 1.0, -1.0));
        assert_eq!(w.constraint_limit(id, 3), Some(DofLimit::Free));
        assert!(!w.set_constraint_limit(id, 6, 0.0, 1.0));
        assert!(w.constraint(id).unwrap().is_active());
    }

    #[test]
    fn restore_waits_for_both_controllers() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        let b = sphere(&mut w, BodyKind::Rigid, Vec3::new(2.0, 0.0, 0.0));
        w.register_controller(a);
        w.register_controller(b);
        let id = w.create_constraint(a, Some(b), &hinge());
        assert_eq!(w.impulse_joints.len(), 1);

        assert!(w.remove_constraint(id, false));
        w.unregister_controller(b, false);
        assert!(!w.restore_constraint(id));
        assert!(!w.constraint(id).unwrap().is_active());
        assert_eq!(w.impulse_joints.len(), 0);

        w.register_controller(b);
        assert!(w.constraint(id).unwrap().is_active());
        assert_eq!(w.impulse_joints.len(), 1);
    }

    /// Push a body along a 6-DOF joint whose X translation is `low..high` and return the
    /// largest X it reached.
    fn slide_against_limit(low: f32, high: f32) -> f32 {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        w.register_controller(a);
        let desc = ConstraintDesc::new(ConstraintKind::Generic6Dof, Vec3::zeros(), Vec3::x());
        let id = w.create_constraint(a, None, &desc);
        assert!(w.set_constraint_limit(id, 0, low, high));
        w.controller_mut(a)
            .unwrap()
            .set_linear_velocity(Vec3::new(3.0, 0.0, 0.0), false);

        let mut furthest = 0.0_f32;
        for _ in 0..60 {
            w.proceed_delta_time(0.0, 1.0 / 60.0, 1.0 / 60.0);
            furthest = furthest.max(w.controller(a).unwrap().transform().translation.x);
        }
        furthest
    }

    #[test]
    fn limits_clamp_motion_under_simulation() {
        let limited = slide_against_limit(-0.5, 0.5);
        assert!(limited > 0.3, "body never reached the limit: {limited}");
        assert!(limited < 0.65, "limit did not hold: {limited}");

        let free = slide_against_limit(1.0, -1.0);
        assert!(free > 2.0, "free DOF held the body at {free}");
    }

    #[test]
    fn unregistering_parks_or_frees_constraints() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        let b = sphere(&mut w, BodyKind::Rigid, Vec3::new(2.0, 0.0, 0.0));
        w.register_controller(a);
        w.register_controller(b);
        let id = w.create_constraint(a, Some(b), &hinge());

        w.unregister_controller(b, false);
        assert!(!w.constraint(id).unwrap().is_active());
        w.register_controller(b);
        assert!(w.constraint(id).unwrap().is_active());

        w.unregister_controller(a, true);
        assert!(w.constraint(id).is_none());
        assert!(w.constraints_of(b).is_empty());
    }

    #[test]
    fn constraints_wait_for_registration() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        let id = w.create_constraint(a, None, &hinge());
        assert!(!w.constraint(id).unwrap().is_active());
        w.register_controller(a);
        assert!(w.constraint(id).unwrap().is_active());
    }

    #[test]
    fn static_pairs_are_refused() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Static, Vec3::zeros());
        let b = sphere(&mut w, BodyKind::Static, Vec3::new(2.0, 0.0, 0.0));
        assert!(w.create_constraint(a, Some(b), &hinge()).is_none());
        assert!(w.create_constraint(a, None, &hinge()).is_none());
    }

    #[test]
    fn disabled_constraints_stay_off() {
        let mut w = world();
        let a = sphere(&mut w, BodyKind::Rigid, Vec3::zeros());
        w.register_controller(a);
        let id = w.create_constraint(a, None, &hinge());

        assert!(w.set_constraint_enabled(id, false));
        assert!(!w.restore_constraint(id));
        w.unregister_controller(a, false);
        w.register_controller(a);
        assert!(!w.constraint(id).unwrap().is_active());
        assert!(w.set_constraint_enabled(id, true));
        assert!(w.constraint(id).unwrap().is_active());
    }

    #[test]
    fn vehicles_share_the_constraint_entry_point() {
        let mut w = world();
        let chassis = sphere(&mut w, BodyKind::Rigid, Vec3::new(0.0, 0.0, 1.0));
        w.register_controller(chassis);
        let desc = ConstraintDesc::new(ConstraintKind::Vehicle, Vec3::zeros(), Vec3::x());
        let id = w.create_constraint(chassis, None, &desc);
        assert!(w.vehicle(id).unwrap().is_active());

        let wheel = WheelDesc {
            connection_point: Vec3::new(1.0, 1.0, 0.0),
            down: -Vec3::z(),
            axle: Vec3::y(),
            rest_length: 0.5,
            radius: 0.3,
            has_steering: true,
        };
        let index = w
            .add_wheel(id, wheel, Box::new(DefaultMotionState::new(Transform::identity())))
            .unwrap();
        let position = w.vehicle(id).unwrap().wheel_position(index).unwrap();
        assert!((position - Vec3::new(1.0, 1.0, 0.5)).norm() < 1e-4);

        w.unregister_controller(chassis, false);
        assert!(!w.vehicle(id).unwrap().is_active());
        w.register_controller(chassis);
        assert!(w.vehicle(id).unwrap().is_active());

        assert!(w.remove_constraint(id, true));
        assert!(w.vehicle(id).is_none());
    }

    #[test]
    fn soft_bodies_take_anchors() {
        use crate::body::BodyState;
        use crate::controller::EntityInfo;
        use crate::math::Point3;
        use crate::shape::{MeshData, ShapeGeometry};

        let mut w = world();
        let mesh = MeshData {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            triangles: vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
            ..MeshData::default()
        };
        let shape = w.shapes_mut().create(ShapeGeometry::ConcaveMesh(mesh), 1.0);
        let soft = w
            .create_controller(
                BodyState::new(BodyKind::Soft),
                shape,
                Transform::identity(),
                EntityInfo::new(9, "cloth"),
                None,
            )
            .unwrap();
        let post = sphere(&mut w, BodyKind::Rigid, Vec3::new(1.0, 0.0, 0.0));
        w.register_controller(soft);
        w.register_controller(post);

        let desc = ConstraintDesc::new(ConstraintKind::PointToPoint, Vec3::new(0.9, 0.0, 0.0), Vec3::x());
        assert_eq!(w.create_constraint(soft, Some(post), &desc), ConstraintId::NONE);
        let body = w.controller(soft).unwrap().soft_body().unwrap();
        assert_eq!(body.anchors().len(), 1);
        assert_eq!(body.anchors()[0].node, 1);

        w.unregister_controller(post, false);
        assert!(w.controller(soft).unwrap().soft_body().unwrap().anchors().is_empty());
    }
}
