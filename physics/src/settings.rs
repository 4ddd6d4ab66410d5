/*!
Default tunables for bodies, characters and vehicles.

These constants centralize the defaults handed out by `BodyState::new`,
`CharacterParams::default` and `VehicleTuning::default`. Keeping them together makes
tuning easier and keeps scene conversion and tests in agreement.

Notes
- Distances are in meters, time in seconds, angles in radians.
- Per-entity values always override these; they are only starting points.
*/

/// Gravity magnitude in meters per second squared (positive value).
pub const GRAVITY_MPS2: f32 = 9.81;

/// Hard cap on sub-steps run in one frame when the caller falls behind.
pub const MAX_SUB_STEPS: u32 = 25;

/// Default logic tic rate (Hz). FH-spring impulses are scaled by `interval * tic_rate`.
pub const DEFAULT_TIC_RATE: f32 = 60.0;

/// Length of the downward probe ray used by the FH-spring pass (meters).
pub const FH_RAY_LENGTH: f32 = 10.0;

/// Collision margin kept around convex shapes (meters).
pub const DEFAULT_MARGIN: f32 = 0.04;

/// Combined contact friction is clamped to this value.
pub const MAX_COMBINED_FRICTION: f32 = 10.0;

/// Default collision group and mask: every user group.
pub const ALL_GROUPS: u16 = 0xffff;

/// Character step-up height (meters).
pub const CHARACTER_STEP_HEIGHT: f32 = 0.3;

/// Character jump take-off speed (m/s).
pub const CHARACTER_JUMP_SPEED: f32 = 10.0;

/// Character terminal fall speed (m/s, positive magnitude).
pub const CHARACTER_FALL_SPEED: f32 = 55.0;

/// Steepest walkable slope (radians). 45 degrees.
pub const CHARACTER_MAX_SLOPE: f32 = std::f32::consts::FRAC_PI_4;

/// Consecutive jumps allowed before landing.
pub const CHARACTER_MAX_JUMPS: u8 = 1;

/// Gap kept between a character and the surfaces it slides along (meters).
pub const CHARACTER_SKIN: f32 = 0.02;

/// Max downward snap distance to keep a walking character on the ground (meters).
pub const CHARACTER_SNAP_DISTANCE: f32 = 0.2;

/// Vehicle suspension defaults, matching the classic raycast-vehicle tuning.
pub const SUSPENSION_STIFFNESS: f32 = 5.88;
pub const SUSPENSION_COMPRESSION: f32 = 0.83;
pub const SUSPENSION_DAMPING: f32 = 0.88;
pub const MAX_SUSPENSION_TRAVEL_CM: f32 = 500.0;
pub const MAX_SUSPENSION_FORCE: f32 = 6000.0;
pub const FRICTION_SLIP: f32 = 10.5;
pub const ROLL_INFLUENCE: f32 = 0.1;

/// Wheel spin damping applied while a wheel is in the air.
pub const WHEEL_AIR_SPIN_DAMPING: f32 = 0.99;
