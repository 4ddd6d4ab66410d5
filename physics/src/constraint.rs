/*!
Joints between two controllers, or between one controller and the world.

A [`Constraint`] keeps its own description of every degree of freedom (indices 0..=2 are
linear X/Y/Z, 3..=5 angular X/Y/Z, all in the joint frame) and rebuilds the native joint
from it whenever a limit or motor changes. The native joint only exists while the
constraint is active; a deactivated constraint keeps its id, frames, limits and motors.

Joint frames
- The frame on body A is built from the pivot and one axis. The two other axes come from
  [`plane_space`] unless the caller supplies them.
- The frame on body B is derived at creation time so that both frames coincide in world
  space: `frame_b = inv(pose_b) * pose_a * frame_a`. Without a body B the world is the
  other side and `frame_b` is the world-space frame.
*/

use rapier3d::prelude::{
    GenericJoint, GenericJointBuilder, ImpulseJointHandle, JointAxesMask, JointAxis,
};

use crate::handle::{ConstraintId, ControllerId};
use crate::math::{Iso, Vec3, normalize_or, plane_space, rotation_from_basis};

/// Number of degrees of freedom of a joint.
pub const DOF_COUNT: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ConstraintKind {
    /// Ball socket: linear DOFs locked, rotation free.
    PointToPoint,
    /// Rotation about the frame X axis only.
    Hinge,
    /// Hinge that does not constrain translation.
    Angular,
    /// Ball socket whose swing and twist can be limited.
    ConeTwist,
    /// Every DOF configurable, all locked by default.
    Generic6Dof,
    /// Raycast vehicle. Created through the same entry point, stored as a vehicle.
    Vehicle,
}

/// State of one degree of freedom.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DofLimit {
    Free,
    Locked,
    /// Clamped to `[low, high]` (meters or radians).
    Limited(f32, f32),
}

impl DofLimit {
    /// `low > high` means the DOF is free.
    pub fn from_range(low: f32, high: f32) -> Self {
        if low > high {
            DofLimit::Free
        } else {
            DofLimit::Limited(low, high)
        }
    }
}

/// Velocity motor on one DOF. A zero `max_force` disables it.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DofMotor {
    pub target_velocity: f32,
    pub max_force: f32,
}

/// Creation parameters of a constraint.
#[derive(Clone, Debug)]
pub struct ConstraintDesc {
    pub kind: ConstraintKind,
    /// Pivot in body A's frame.
    pub pivot: Vec3,
    /// Main joint axis in body A's frame.
    pub axis: Vec3,
    /// The two other frame axes. Derived from `axis` when `None`.
    pub secondary_axes: Option<(Vec3, Vec3)>,
    /// Suppress contacts between the two bodies.
    pub disable_collision: bool,
}

impl ConstraintDesc {
    pub fn new(kind: ConstraintKind, pivot: Vec3, axis: Vec3) -> Self {
        Self {
            kind,
            pivot,
            axis,
            secondary_axes: None,
            disable_collision: false,
        }
    }

    /// Joint frame on body A.
    pub fn frame(&self) -> Iso {
        let axis = normalize_or(&self.axis, Vec3::x());
        let (p, q) = match self.secondary_axes {
            Some((p, q)) => (normalize_or(&p, Vec3::y()), normalize_or(&q, Vec3::z())),
            None => plane_space(&axis),
        };
        Iso::from_parts(self.pivot.into(), rotation_from_basis(&axis, &p, &q))
    }
}

#[derive(Clone, Debug)]
pub struct Constraint {
    pub(crate) id: ConstraintId,
    pub(crate) kind: ConstraintKind,
    pub(crate) body_a: ControllerId,
    pub(crate) body_b: Option<ControllerId>,
    pub(crate) frame_a: Iso,
    pub(crate) frame_b: Iso,
    pub(crate) dofs: [DofLimit; DOF_COUNT],
    pub(crate) motors: [DofMotor; DOF_COUNT],
    pub(crate) disable_collision: bool,
    /// Applied impulse above which the constraint deactivates itself. `None` = unbreakable.
    pub(crate) breaking_threshold: Option<f32>,
    pub(crate) enabled: bool,
    pub(crate) joint: Option<ImpulseJointHandle>,
    pub(crate) applied_impulse: f32,
}

impl Constraint {
    pub(crate) fn new(
        id: ConstraintId,
        body_a: ControllerId,
        body_b: Option<ControllerId>,
        desc: &ConstraintDesc,
        frame_b: Iso,
    ) -> Self {
        Self {
            id,
            kind: desc.kind,
            body_a,
            body_b,
            frame_a: desc.frame(),
            frame_b,
            dofs: default_dofs(desc.kind),
            motors: [DofMotor::default(); DOF_COUNT],
            disable_collision: desc.disable_collision,
            breaking_threshold: None,
            enabled: true,
            joint: None,
            applied_impulse: 0.0,
        }
    }

    #[inline]
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    #[inline]
    pub fn body_a(&self) -> ControllerId {
        self.body_a
    }

    #[inline]
    pub fn body_b(&self) -> Option<ControllerId> {
        self.body_b
    }

    /// Present in the native world.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.joint.is_some()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pivot in body A's frame.
    pub fn pivot(&self) -> Vec3 {
        self.frame_a.translation.vector
    }

    /// Main axis in body A's frame.
    pub fn axis(&self) -> Vec3 {
        self.frame_a.rotation * Vec3::x()
    }

    pub fn frames(&self) -> (Iso, Iso) {
        (self.frame_a, self.frame_b)
    }

    pub fn limit(&self, dof: usize) -> Option<DofLimit> {
        self.dofs.get(dof).copied()
    }

    pub fn motor(&self, dof: usize) -> Option<DofMotor> {
        self.motors.get(dof).copied()
    }

    pub fn breaking_threshold(&self) -> Option<f32> {
        self.breaking_threshold
    }

    /// Impulse the solver applied during the last step.
    pub fn applied_impulse(&self) -> f32 {
        self.applied_impulse
    }

    pub fn involves(&self, ctrl: ControllerId) -> bool {
        self.body_a == ctrl || self.body_b == Some(ctrl)
    }

    pub fn other(&self, ctrl: ControllerId) -> Option<ControllerId> {
        if self.body_a == ctrl {
            self.body_b
        } else if self.body_b == Some(ctrl) {
            Some(self.body_a)
        } else {
            None
        }
    }

    pub(crate) fn set_limit(&mut self, dof: usize, low: f32, high: f32) -> bool {
        match self.dofs.get_mut(dof) {
            Some(slot) => {
                *slot = DofLimit::from_range(low, high);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_motor(&mut self, dof: usize, motor: DofMotor) -> bool {
        match self.motors.get_mut(dof) {
            Some(slot) => {
                *slot = motor;
                true
            }
            None => false,
        }
    }

    /// Native joint for the current description.
    pub(crate) fn native_joint(&self) -> GenericJoint {
        let locked = self
            .dofs
            .iter()
            .enumerate()
            .filter(|(_, d)| matches!(d, DofLimit::Locked))
            .fold(JointAxesMask::empty(), |mask, (i, _)| mask | axis_mask(i));

        let mut joint = GenericJointBuilder::new(locked)
            .local_frame1(self.frame_a)
            .local_frame2(self.frame_b)
            .contacts_enabled(!self.disable_collision)
            .build();

        for (i, dof) in self.dofs.iter().enumerate() {
            if let DofLimit::Limited(low, high) = *dof {
                joint.set_limits(joint_axis(i), [low, high]);
            }
        }
        for (i, motor) in self.motors.iter().enumerate() {
            if motor.max_force > 0.0 && !matches!(self.dofs[i], DofLimit::Locked) {
                joint.set_motor_velocity(joint_axis(i), motor.target_velocity, 1.0);
                joint.set_motor_max_force(joint_axis(i), motor.max_force);
            }
        }
        joint
    }
}

/// Default DOF states of each kind.
pub fn default_dofs(kind: ConstraintKind) -> [DofLimit; DOF_COUNT] {
    use DofLimit::{Free, Locked};
    match kind {
        ConstraintKind::PointToPoint | ConstraintKind::ConeTwist => {
            [Locked, Locked, Locked, Free, Free, Free]
        }
        ConstraintKind::Hinge => [Locked, Locked, Locked, Free, Locked, Locked],
        ConstraintKind::Angular => [Free, Free, Free, Free, Locked, Locked],
        ConstraintKind::Generic6Dof => [Locked; DOF_COUNT],
        ConstraintKind::Vehicle => [Free; DOF_COUNT],
    }
}

/// Body B's joint frame that coincides in world space with `frame_a` on body A.
///
/// `pose_b` is `None` when the other side is the world.
pub fn matching_frame(pose_a: &Iso, frame_a: &Iso, pose_b: Option<&Iso>) -> Iso {
    let world = pose_a * frame_a;
    match pose_b {
        Some(pose_b) => pose_b.inverse() * world,
        None => world,
    }
}

fn joint_axis(dof: usize) -> JointAxis {
    match dof {
        0 => JointAxis::LinX,
        1 => JointAxis::LinY,
        2 => JointAxis::LinZ,
        3 => JointAxis::AngX,
        4 => JointAxis::AngY,
        _ => JointAxis::AngZ,
    }
}

fn axis_mask(dof: usize) -> JointAxesMask {
    match dof {
        0 => JointAxesMask::LIN_X,
        1 => JointAxesMask::LIN_Y,
        2 => JointAxesMask::LIN_Z,
        3 => JointAxesMask::ANG_X,
        4 => JointAxesMask::ANG_Y,
        _ => JointAxesMask::ANG_Z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Quat, approx_vec};

    fn hinge() -> Constraint {
        let desc = ConstraintDesc::new(ConstraintKind::Hinge, Vec3::new(1.0, 0.0, 0.0), Vec3::z());
        Constraint::new(
            ConstraintId(3),
            ControllerId(1),
            Some(ControllerId(2)),
            &desc,
            Iso::identity(),
        )
    }

    #[test]
    fn low_above_high_means_free() {
        let mut c = hinge();
        assert!(c.set_limit(3, 1.0, -1.0));
        assert_eq!(c.limit(3), Some(DofLimit::Free));

        assert!(c.set_limit(3, -0.5, 0.5));
        assert_eq!(c.limit(3), Some(DofLimit::Limited(-0.5, 0.5)));

        assert!(!c.set_limit(6, 0.0, 1.0));
        assert_eq!(c.limit(6), None);
    }

    #[test]
    fn hinge_frame_x_is_the_requested_axis() {
        let c = hinge();
        assert!(approx_vec(&c.axis(), &Vec3::z(), 1e-5));
        assert_eq!(c.pivot(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(c.limit(3), Some(DofLimit::Free));
        assert_eq!(c.limit(4), Some(DofLimit::Locked));
    }

    #[test]
    fn matching_frames_coincide_in_world_space() {
        let pose_a = Iso::translation(0.0, 0.0, 2.0);
        let pose_b = Iso::from_parts(
            Vec3::new(3.0, 0.0, 0.0).into(),
            Quat::from_axis_angle(&Vec3::z_axis(), 0.7),
        );
        let frame_a = Iso::translation(1.0, 0.0, 0.0);

        let frame_b = matching_frame(&pose_a, &frame_a, Some(&pose_b));
        let world_a = pose_a * frame_a;
        let world_b = pose_b * frame_b;
        assert!(approx_vec(
            &world_a.translation.vector,
            &world_b.translation.vector,
            1e-5
        ));

        let grounded = matching_frame(&pose_a, &frame_a, None);
        assert!(approx_vec(
            &grounded.translation.vector,
            &Vec3::new(1.0, 0.0, 2.0),
            1e-6
        ));
    }

    #[test]
    fn other_side_is_found_from_either_body() {
        let c = hinge();
        assert_eq!(c.other(ControllerId(1)), Some(ControllerId(2)));
        assert_eq!(c.other(ControllerId(2)), Some(ControllerId(1)));
        assert_eq!(c.other(ControllerId(9)), None);
        assert!(c.involves(ControllerId(2)));
    }

    #[test]
    fn generic_6dof_starts_fully_locked() {
        assert_eq!(
            default_dofs(ConstraintKind::Generic6Dof),
            [DofLimit::Locked; DOF_COUNT]
        );
        assert_eq!(default_dofs(ConstraintKind::Angular)[0], DofLimit::Free);
    }
}
