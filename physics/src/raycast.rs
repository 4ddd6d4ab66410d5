//! Ray-test filtering and hit resolution.
//!
//! [`crate::PhysicsWorld::ray_test`] returns the closest hit accepted by a [`RayFilter`].
//! On triangle meshes the hit is mapped back to the source polygon so callers get the
//! polygon index, interpolated UVs and a face normal that does not depend on which side of
//! the triangle the ray came from.

use crate::handle::ControllerId;
use crate::math::{Vec3, normalize_or};

/// Caller-side filtering of ray candidates.
pub trait RayFilter {
    /// Consulted per broad-phase candidate, before any narrow-phase work.
    fn needs_broadphase_test(&self, ctrl: ControllerId) -> bool;

    /// A controller the ray starts inside of and must not hit (usually the caster).
    fn ignored_controller(&self) -> Option<ControllerId> {
        None
    }

    /// Resolve the triangle's face normal instead of the raw collision normal.
    fn wants_face_normal(&self) -> bool {
        false
    }

    /// Interpolate the hit polygon's UVs.
    fn wants_uv(&self) -> bool {
        false
    }
}

impl<F> RayFilter for F
where
    F: Fn(ControllerId) -> bool,
{
    fn needs_broadphase_test(&self, ctrl: ControllerId) -> bool {
        self(ctrl)
    }
}

/// Accepts every candidate except one controller, with optional face resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreController {
    pub ignore: Option<ControllerId>,
    pub face_normal: bool,
    pub uv: bool,
}

impl RayFilter for IgnoreController {
    fn needs_broadphase_test(&self, ctrl: ControllerId) -> bool {
        Some(ctrl) != self.ignore
    }

    fn ignored_controller(&self) -> Option<ControllerId> {
        self.ignore
    }

    fn wants_face_normal(&self) -> bool {
        self.face_normal
    }

    fn wants_uv(&self) -> bool {
        self.uv
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RayHit {
    pub controller: ControllerId,
    pub point: Vec3,
    pub normal: Vec3,
    /// Hit position along the segment, 0 at `from` and 1 at `to`.
    pub fraction: f32,
    /// Source polygon, for triangle-mesh hits.
    pub polygon: Option<u32>,
    pub uv: Option<[f32; 2]>,
}

/// Map a native triangle feature id to a triangle index. Back-face hits are reported past
/// the end of the triangle list.
pub fn triangle_from_feature(feature: u32, triangle_count: usize) -> Option<usize> {
    let feature = feature as usize;
    if triangle_count == 0 {
        None
    } else if feature < triangle_count {
        Some(feature)
    } else if feature < 2 * triangle_count {
        Some(feature - triangle_count)
    } else {
        None
    }
}

/// Unnormalized face normal of a triangle following its winding.
pub fn face_normal(tri: &[Vec3; 3]) -> Vec3 {
    (tri[1] - tri[0]).cross(&(tri[2] - tri[0]))
}

/// Face normal rotated by `rotate`, normalized, +X when degenerate.
pub fn world_face_normal(tri: &[Vec3; 3], rotate: impl Fn(Vec3) -> Vec3) -> Vec3 {
    normalize_or(&rotate(face_normal(tri)), Vec3::x())
}

fn triangle_area(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
    (b - a).cross(&(c - a)).norm() * 0.5
}

/// Interpolate corner UVs at `point` (in the triangle's space) with area weights.
pub fn interpolate_uv(point: &Vec3, tri: &[Vec3; 3], uvs: &[[f32; 2]; 3]) -> Option<[f32; 2]> {
    let area = triangle_area(&tri[0], &tri[1], &tri[2]);
    if area <= f32::EPSILON {
        return None;
    }
    let w1 = triangle_area(point, &tri[1], &tri[2]) / area;
    let w2 = triangle_area(point, &tri[0], &tri[2]) / area;
    let w3 = 1.0 - w1 - w2;
    Some([
        uvs[0][0] * w1 + uvs[1][0] * w2 + uvs[2][0] * w3,
        uvs[0][1] * w1 + uvs[1][1] * w2 + uvs[2][1] * w3,
    ])
}
