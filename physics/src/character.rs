//! Character movement state.
//!
//! Characters are kinematic bodies moved by the native character controller (sweep and
//! slide, autostep, ground snapping). This module holds the per-character state that the
//! controller does not track: vertical speed under gravity, jump bookkeeping, the walk
//! direction and the timed velocity set by game logic.
//!
//! Each sub-step the world asks [`CharacterState::desired_translation`] for the intended
//! motion, lets the native controller resolve it against the scene, then reports the result
//! back with [`CharacterState::land`].

use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::prelude::Vector;

use crate::body::CharacterParams;
use crate::math::{EPSILON, Vec3};
use crate::settings::{CHARACTER_SKIN, CHARACTER_SNAP_DISTANCE};

#[derive(Clone, Debug)]
pub struct CharacterState {
    pub(crate) params: CharacterParams,
    /// Per-character gravity. `None` follows the world.
    pub(crate) gravity: Option<Vec3>,
    walk_direction: Vec3,
    timed_velocity: Vec3,
    velocity_time_left: f32,
    vertical_speed: f32,
    jumps: u8,
    on_ground: bool,
}

impl CharacterState {
    pub fn new(params: CharacterParams, gravity: Option<Vec3>) -> Self {
        Self {
            params,
            gravity,
            walk_direction: Vec3::zeros(),
            timed_velocity: Vec3::zeros(),
            velocity_time_left: 0.0,
            vertical_speed: 0.0,
            jumps: 0,
            on_ground: false,
        }
    }

    #[inline]
    pub fn params(&self) -> &CharacterParams {
        &self.params
    }

    #[inline]
    pub fn on_ground(&self) -> bool {
        self.on_ground
    }

    /// Jumps taken since the character last stood on the ground.
    #[inline]
    pub fn jump_count(&self) -> u8 {
        self.jumps
    }

    /// Speed along +Z (m/s). Negative while falling.
    #[inline]
    pub fn vertical_speed(&self) -> f32 {
        self.vertical_speed
    }

    /// Translation applied every sub-step.
    #[inline]
    pub fn walk_direction(&self) -> Vec3 {
        self.walk_direction
    }

    pub fn can_jump(&self) -> bool {
        (self.on_ground && self.params.max_jumps > 0) || self.jumps < self.params.max_jumps
    }

    pub fn jump(&mut self) -> bool {
        if !self.can_jump() {
            return false;
        }
        // A jump from the ground starts a new sequence.
        if self.on_ground {
            self.jumps = 0;
        }
        self.jumps = self.jumps.saturating_add(1);
        self.vertical_speed = self.params.jump_speed;
        self.on_ground = false;
        true
    }

    pub fn set_walk_direction(&mut self, direction: Vec3) {
        self.walk_direction = direction;
        self.velocity_time_left = 0.0;
        self.timed_velocity = Vec3::zeros();
    }

    pub fn set_velocity_for_time_interval(&mut self, velocity: Vec3, time: f32) {
        self.timed_velocity = velocity;
        self.velocity_time_left = time.max(0.0);
        self.walk_direction = Vec3::zeros();
    }

    pub fn reset(&mut self) {
        self.walk_direction = Vec3::zeros();
        self.timed_velocity = Vec3::zeros();
        self.velocity_time_left = 0.0;
        self.vertical_speed = 0.0;
        self.jumps = 0;
    }

    /// Intended motion over `dt` seconds under `gravity`, before collision resolution.
    ///
    /// Integrates the vertical speed (capped at the fall speed) and consumes the timed
    /// velocity budget.
    pub fn desired_translation(&mut self, dt: f32, gravity: Vec3) -> Vec3 {
        if dt <= 0.0 {
            return Vec3::zeros();
        }

        let mut horizontal = self.walk_direction;
        if self.velocity_time_left > 0.0 {
            let t = dt.min(self.velocity_time_left);
            horizontal += self.timed_velocity * t;
            self.velocity_time_left -= t;
        }

        if !self.on_ground || self.vertical_speed > 0.0 {
            self.vertical_speed += gravity.z * dt;
        }
        self.vertical_speed = self.vertical_speed.max(-self.params.fall_speed);

        horizontal + Vec3::z() * (self.vertical_speed * dt)
    }

    /// Record the outcome of a move.
    pub fn land(&mut self, grounded: bool) {
        self.on_ground = grounded;
        if grounded && self.vertical_speed <= 0.0 {
            self.vertical_speed = 0.0;
            self.jumps = 0;
        }
    }

    /// True while rising from a jump; ground snapping is off during that time.
    pub fn is_rising(&self) -> bool {
        self.vertical_speed > EPSILON
    }

    /// Native controller configured from the current parameters.
    pub(crate) fn native_controller(&self) -> KinematicCharacterController {
        let autostep = (self.params.step_height > 0.0).then(|| CharacterAutostep {
            max_height: CharacterLength::Absolute(self.params.step_height),
            include_dynamic_bodies: false,
            ..CharacterAutostep::default()
        });
        let snap = (!self.is_rising())
            .then_some(CharacterLength::Absolute(CHARACTER_SNAP_DISTANCE));

        KinematicCharacterController {
            up: Vector::z_axis(),
            offset: CharacterLength::Absolute(CHARACTER_SKIN),
            autostep,
            max_slope_climb_angle: self.params.max_slope,
            min_slope_slide_angle: self.params.max_slope,
            snap_to_ground: snap,
            ..KinematicCharacterController::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq, approx_vec};

    fn gravity() -> Vec3 {
        Vec3::new(0.0, 0.0, -9.81)
    }

    fn grounded() -> CharacterState {
        let mut c = CharacterState::new(CharacterParams::default(), None);
        c.land(true);
        c
    }

    #[test]
    fn jump_needs_ground_or_remaining_jumps() {
        let mut c = grounded();
        assert!(c.can_jump());
        assert!(c.jump());
        assert_eq!(c.jump_count(), 1);
        assert!(approx_eq(c.vertical_speed(), 10.0, 1e-6));

        // One jump allowed, already used while airborne.
        assert!(!c.jump());
    }

    #[test]
    fn double_jump_with_two_allowed_jumps() {
        let params = CharacterParams {
            max_jumps: 2,
            ..CharacterParams::default()
        };
        let mut c = CharacterState::new(params, None);
        c.land(true);

        assert!(c.jump());
        c.land(false);
        assert!(c.jump());
        assert!(!c.jump());
        assert_eq!(c.jump_count(), 2);
    }

    #[test]
    fn landing_resets_the_jump_count() {
        let mut c = grounded();
        c.jump();
        c.land(false);
        // Rising: landing is ignored until the character falls again.
        c.land(true);
        assert_eq!(c.jump_count(), 1);

        c.vertical_speed = -1.0;
        c.land(true);
        assert_eq!(c.jump_count(), 0);
        assert_eq!(c.vertical_speed(), 0.0);
    }

    #[test]
    fn zero_max_jumps_never_jumps() {
        let params = CharacterParams {
            max_jumps: 0,
            ..CharacterParams::default()
        };
        let mut c = CharacterState::new(params, None);
        c.land(true);
        assert!(!c.jump());
    }

    #[test]
    fn falling_is_capped_at_the_fall_speed() {
        let params = CharacterParams {
            fall_speed: 2.0,
            ..CharacterParams::default()
        };
        let mut c = CharacterState::new(params, None);
        for _ in 0..100 {
            c.desired_translation(1.0 / 60.0, gravity());
        }
        assert!(approx_eq(c.vertical_speed(), -2.0, 1e-6));
    }

    #[test]
    fn grounded_characters_do_not_accumulate_gravity() {
        let mut c = grounded();
        c.set_walk_direction(Vec3::new(0.1, 0.0, 0.0));
        let step = c.desired_translation(1.0 / 60.0, gravity());
        assert!(approx_vec(&step, &Vec3::new(0.1, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn timed_velocity_runs_out() {
        let mut c = grounded();
        c.set_velocity_for_time_interval(Vec3::new(6.0, 0.0, 0.0), 0.25);

        let first = c.desired_translation(0.2, gravity());
        let second = c.desired_translation(0.2, gravity());
        let third = c.desired_translation(0.2, gravity());

        assert!(approx_eq(first.x, 1.2, 1e-5));
        assert!(approx_eq(second.x, 0.3, 1e-5));
        assert!(approx_eq(third.x, 0.0, 1e-6));
    }

    #[test]
    fn native_controller_uses_z_up_and_disables_snap_while_rising() {
        let mut c = grounded();
        let kcc = c.native_controller();
        assert_eq!(kcc.up, Vector::z_axis());
        assert!(kcc.snap_to_ground.is_some());

        c.jump();
        assert!(c.native_controller().snap_to_ground.is_none());
    }
}
