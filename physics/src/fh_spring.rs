/*!
FH springs: ray-cast pseudo suspension.

A body opted into the FH pass casts a ray straight down from its center of mass every frame.
When the ray hits a body whose [`FhParams::distance`] is positive and the gap is below that
distance, the probing body receives:

- a spring term `(1 - gap / distance) * spring` plus a damping term along the ray,
  optionally redirected along the hit surface normal,
- lateral friction capped by `friction * max(0, spring_term)`,
- with `DoRotFh`, an angular term righting the body's local +Z onto the hit normal.

The spring, damping, distance and friction all come from the *hit* body. Everything is
scaled by `simulated_time * tic_rate`, where `simulated_time` is the sum of the sub-steps
run this frame, so the effect stays tied to logic tics rather than to the
number of physics sub-steps.

Notes
- The probe always points down world -Z, whatever the body's orientation.
- This module is pure math over [`FhProbe`]; the world gathers inputs and applies the result.
*/

use crate::body::FhParams;
use crate::math::{EPSILON, Mat3, Vec3};

/// Everything the FH response needs about one probe and its hit.
#[derive(Clone, Copy, Debug)]
pub struct FhProbe {
    /// Distance from the ray origin to the hit (m).
    pub hit_distance: f32,
    /// Surface normal at the hit (world, normalized or not).
    pub hit_normal: Vec3,
    /// Probing body's radius, subtracted from the hit distance.
    pub radius: f32,
    pub linvel: Vec3,
    pub angvel: Vec3,
    /// Probing body's inverse mass.
    pub inv_mass: f32,
    /// Probing body's local +Z in world space.
    pub up: Vec3,
    /// Probing body's rotation, used for anisotropic friction.
    pub basis: Mat3,
    /// Anisotropic friction scaling of the probing body, if enabled.
    pub anisotropic: Option<Vec3>,
    /// Velocity of the hit body at the hit point.
    pub hit_velocity: Vec3,
    /// FH parameters of the hit body.
    pub hit_params: FhParams,
    pub hit_friction: f32,
    /// Redirect the spring along the hit normal.
    pub hit_fh_normal: bool,
    pub do_fh: bool,
    pub do_rot_fh: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FhResponse {
    pub linvel: Vec3,
    pub angvel: Vec3,
    /// Central impulse from lateral friction.
    pub friction_impulse: Vec3,
}

/// Direction of every FH probe.
pub fn ray_direction() -> Vec3 {
    -Vec3::z()
}

/// New velocities for a probing body, or `None` when the hit does not act on it.
///
/// `step` is the simulated time of the frame times the tic rate.
pub fn fh_response(probe: &FhProbe, step: f32) -> Option<FhResponse> {
    let params = probe.hit_params;
    if params.distance < EPSILON {
        return None;
    }
    let gap = probe.hit_distance - probe.radius;
    if gap >= params.distance {
        return None;
    }

    let ray_dir = ray_direction();
    let normal = probe.hit_normal.try_normalize(EPSILON).unwrap_or_else(Vec3::z);
    let mut linvel = probe.linvel;
    let mut angvel = probe.angvel;
    let mut friction_impulse = Vec3::zeros();

    if probe.do_fh {
        let rel_vel = probe.linvel - probe.hit_velocity;
        let rel_vel_ray = ray_dir.dot(&rel_vel);
        let spring_extent = 1.0 - gap / params.distance;

        let i_spring = spring_extent * params.spring;
        let i_damp = rel_vel_ray * params.damping;

        linvel += -(i_spring + i_damp) * ray_dir * step;
        if probe.hit_fh_normal {
            linvel += (i_spring + i_damp) * (normal - normal.dot(&ray_dir) * ray_dir) * step;
        }

        let mut lateral = rel_vel - rel_vel_ray * ray_dir;
        if let Some(scaling) = probe.anisotropic {
            let local = probe.basis.transpose() * lateral;
            lateral = probe.basis * local.component_mul(&scaling);
        }

        let rel_vel_lateral = lateral.norm();
        if rel_vel_lateral > EPSILON && probe.inv_mass > 0.0 {
            let max_friction = probe.hit_friction * i_spring.max(0.0);
            let rel_mom_lateral = rel_vel_lateral / probe.inv_mass;
            let friction = if rel_mom_lateral > max_friction {
                -lateral * (max_friction / rel_vel_lateral)
            } else {
                -lateral
            };
            friction_impulse = friction * step;
        }
    }

    if probe.do_rot_fh {
        let t_spring = probe.up.cross(&normal) * params.spring;
        // Only tilting rotations are damped.
        let tilt = probe.angvel - probe.angvel.dot(&normal) * normal;
        let t_damp = tilt * params.damping;
        angvel += (t_spring - t_damp) * step;
    }

    Some(FhResponse {
        linvel,
        angvel,
        friction_impulse,
    })
}
