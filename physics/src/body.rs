//! Per-entity body description handed over by scene conversion.

use crate::bitmask_flags::BitmaskFlags;
use crate::define_bitmask_flags;
use crate::error::{PhysicsError, Result};
use crate::handle::FilterClass;
use crate::math::Vec3;
use crate::settings;

/// Exclusive body classification. A body is exactly one of these.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BodyKind {
    /// Never moves under simulation. May still be driven kinematically.
    Static,
    /// Simulated, translation only (rotation locked).
    Dynamic,
    /// Simulated with full rotation.
    Rigid,
    Soft,
    Character,
}

define_bitmask_flags!(
    /// Options layered on top of [`BodyKind`].
    BodyFlag, u16, {
    /// Detects overlaps without contact response. Only valid on `Static`/`Dynamic` kinds.
    Sensor,
    /// Static body moved by external logic every frame.
    Kinematic,
    /// Takes part in the FH-spring pass (linear spring).
    DoFh,
    /// Takes part in the FH-spring pass (righting torque).
    DoRotFh,
    /// When hit by an FH ray, redirect the spring along this body's surface normal.
    FhNormal,
    /// The shape is a compound that may receive compound children.
    Compound,
    /// Contacts are computed but never resolved.
    Ghost,
    /// Apply anisotropic friction scaling.
    Anisotropic,
});

pub type BodyFlags = BitmaskFlags<u16>;

/// FH-spring parameters of the surface being probed (taken from the *hit* body).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FhParams {
    pub spring: f32,
    pub damping: f32,
    /// Probe range. `<= 0` disables the effect for rays hitting this body.
    pub distance: f32,
}

impl Default for FhParams {
    fn default() -> Self {
        Self {
            spring: 0.0,
            damping: 0.0,
            distance: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CharacterParams {
    pub step_height: f32,
    pub jump_speed: f32,
    pub fall_speed: f32,
    pub max_slope: f32,
    pub max_jumps: u8,
}

impl Default for CharacterParams {
    fn default() -> Self {
        Self {
            step_height: settings::CHARACTER_STEP_HEIGHT,
            jump_speed: settings::CHARACTER_JUMP_SPEED,
            fall_speed: settings::CHARACTER_FALL_SPEED,
            max_slope: settings::CHARACTER_MAX_SLOPE,
            max_jumps: settings::CHARACTER_MAX_JUMPS,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SoftParams {
    /// Vertex welding distance applied to the source mesh. 0 = none.
    pub welding_threshold: f32,
    /// Collision margin of the nodes.
    pub margin: f32,
}

impl Default for SoftParams {
    fn default() -> Self {
        Self {
            welding_threshold: 0.0,
            margin: 0.1,
        }
    }
}

/// Construction info of one controller.
///
/// Fields are public and meant to be filled by scene conversion; [`BodyState::validate`]
/// runs when the controller is created.
#[derive(Clone, Debug)]
pub struct BodyState {
    pub kind: BodyKind,
    pub flags: BodyFlags,
    pub mass: f32,
    /// Scales the shape-derived inertia tensor.
    pub inertia_factor: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub rolling_friction: f32,
    pub restitution: f32,
    pub anisotropic_friction: Vec3,
    /// Speed clamps applied before each sub-step. 0 disables a clamp.
    pub linear_velocity_min: f32,
    pub linear_velocity_max: f32,
    pub angular_velocity_min: f32,
    pub angular_velocity_max: f32,
    /// User collision group and mask.
    pub collision_group: u16,
    pub collision_mask: u16,
    pub margin: f32,
    /// Per-axis factors, 0 locks the axis.
    pub linear_factor: Vec3,
    pub angular_factor: Vec3,
    /// Distance from the center of mass to the bottom of the body, used by FH springs
    /// and as the fallback sphere radius.
    pub radius: f32,
    pub fh: FhParams,
    pub character: CharacterParams,
    pub soft: SoftParams,
    /// Overrides world gravity for this body.
    pub gravity: Option<Vec3>,
}

impl BodyState {
    pub fn new(kind: BodyKind) -> Self {
        Self {
            kind,
            flags: BodyFlags::default(),
            mass: if kind == BodyKind::Static { 0.0 } else { 1.0 },
            inertia_factor: 1.0,
            linear_damping: 0.04,
            angular_damping: 0.1,
            friction: 0.5,
            rolling_friction: 0.0,
            restitution: 0.0,
            anisotropic_friction: Vec3::new(1.0, 1.0, 1.0),
            linear_velocity_min: 0.0,
            linear_velocity_max: 0.0,
            angular_velocity_min: 0.0,
            angular_velocity_max: 0.0,
            collision_group: settings::ALL_GROUPS,
            collision_mask: settings::ALL_GROUPS,
            margin: settings::DEFAULT_MARGIN,
            linear_factor: Vec3::new(1.0, 1.0, 1.0),
            angular_factor: Vec3::new(1.0, 1.0, 1.0),
            radius: 1.0,
            fh: FhParams::default(),
            character: CharacterParams::default(),
            soft: SoftParams::default(),
            gravity: None,
        }
    }

    pub fn with_flag(mut self, flag: BodyFlag) -> Self {
        self.flags.add(flag);
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        self.flags.has(BodyFlag::Sensor)
    }

    /// Simulated by the solver (as opposed to static, kinematic, sensor or character).
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, BodyKind::Dynamic | BodyKind::Rigid | BodyKind::Soft)
            && !self.is_sensor()
    }

    /// Positions are pushed from the outside instead of being simulated.
    pub fn is_kinematic(&self) -> bool {
        self.is_sensor()
            || self.kind == BodyKind::Character
            || (self.kind == BodyKind::Static && self.flags.has(BodyFlag::Kinematic))
    }

    pub fn has_contact_response(&self) -> bool {
        !self.is_sensor() && !self.flags.has(BodyFlag::Ghost)
    }

    pub fn filter_class(&self) -> FilterClass {
        if self.is_sensor() {
            return FilterClass::Sensor;
        }
        match self.kind {
            BodyKind::Static if self.flags.has(BodyFlag::Kinematic) => FilterClass::Kinematic,
            BodyKind::Static => FilterClass::Static,
            BodyKind::Character => FilterClass::Character,
            BodyKind::Dynamic | BodyKind::Rigid | BodyKind::Soft => FilterClass::Dynamic,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_sensor() && !matches!(self.kind, BodyKind::Static | BodyKind::Dynamic) {
            return Err(PhysicsError::InvalidBodyState(format!(
                "{:?} bodies cannot be sensors",
                self.kind
            )));
        }
        if !self.mass.is_finite() || self.mass < 0.0 {
            return Err(PhysicsError::InvalidBodyState(format!(
                "mass must be finite and non-negative, got {}",
                self.mass
            )));
        }
        if matches!(self.kind, BodyKind::Dynamic | BodyKind::Rigid | BodyKind::Soft)
            && !self.is_sensor()
            && self.mass <= 0.0
        {
            return Err(PhysicsError::InvalidBodyState(
                "simulated bodies need a positive mass".into(),
            ));
        }
        if self.character.max_slope < 0.0 || self.character.fall_speed < 0.0 {
            return Err(PhysicsError::InvalidBodyState(
                "character slope and fall speed must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensors_are_kinematic_without_contact_response() {
        let state = BodyState::new(BodyKind::Dynamic).with_flag(BodyFlag::Sensor);
        assert!(state.validate().is_ok());
        assert!(!state.is_dynamic());
        assert!(state.is_kinematic());
        assert!(!state.has_contact_response());
        assert_eq!(state.filter_class(), FilterClass::Sensor);
    }

    #[test]
    fn soft_and_character_bodies_cannot_be_sensors() {
        for kind in [BodyKind::Soft, BodyKind::Character, BodyKind::Rigid] {
            let state = BodyState::new(kind).with_flag(BodyFlag::Sensor);
            assert!(matches!(state.validate(), Err(PhysicsError::InvalidBodyState(_))));
        }
    }

    #[test]
    fn simulated_bodies_need_positive_mass() {
        let state = BodyState::new(BodyKind::Rigid).with_mass(0.0);
        assert!(state.validate().is_err());
        assert!(BodyState::new(BodyKind::Static).validate().is_ok());
    }

    #[test]
    fn kinematic_statics_use_their_own_filter_class() {
        let state = BodyState::new(BodyKind::Static).with_flag(BodyFlag::Kinematic);
        assert_eq!(state.filter_class(), FilterClass::Kinematic);
        assert!(state.is_kinematic());
        assert_eq!(BodyState::new(BodyKind::Static).filter_class(), FilterClass::Static);
    }
}
