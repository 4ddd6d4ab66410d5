/*!
Math aliases and small geometric helpers shared by every module.

Conventions
- Right-handed, +Z up. Units are meters and seconds.
- `Iso` is a rigid transform; scaling travels separately in [`Transform`] because the
  native solver only understands isometries.
*/

use nalgebra as na;

/// Common math aliases for clarity and consistency.
pub type Vec3 = na::Vector3<f32>;
pub type Point3 = na::Point3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;
pub type Mat3 = na::Matrix3<f32>;
pub type Mat4 = na::Matrix4<f32>;
pub type Vec4 = na::Vector4<f32>;

/// Practical small value for length and ratio comparisons.
pub const EPSILON: f32 = 1.0e-6;

/// A world transform as seen by external scene objects: pose plus non-uniform scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[inline]
    pub fn identity() -> Self {
        Self::new(Vec3::zeros(), Quat::identity())
    }

    #[inline]
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }

    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quat::identity())
    }

    #[inline]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Rigid part of the transform, as the native solver wants it.
    #[inline]
    pub fn iso(&self) -> Iso {
        Iso::from_parts(na::Translation3::from(self.translation), self.rotation)
    }

    #[inline]
    pub fn from_iso(iso: &Iso, scale: Vec3) -> Self {
        Self {
            translation: iso.translation.vector,
            rotation: iso.rotation,
            scale,
        }
    }

    /// Full model-to-world matrix including scale.
    pub fn to_matrix(&self) -> Mat4 {
        self.iso().to_homogeneous() * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Two unit vectors orthogonal to `n` and to each other (Bullet's `btPlaneSpace1`).
///
/// The result only depends on `n`, so joint frames built from the same axis are stable
/// across runs.
pub fn plane_space(n: &Vec3) -> (Vec3, Vec3) {
    const SQRT1_2: f32 = std::f32::consts::FRAC_1_SQRT_2;
    if n.z.abs() > SQRT1_2 {
        // choose p in y-z plane
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(0.0, -n.z * k, n.y * k);
        let q = Vec3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        // choose p in x-y plane
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(-n.y * k, n.x * k, 0.0);
        let q = Vec3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}

/// Rotation whose basis columns are `(x, y, z)`. The columns must be orthonormal.
pub fn rotation_from_basis(x: &Vec3, y: &Vec3, z: &Vec3) -> Quat {
    let m = Mat3::from_columns(&[*x, *y, *z]);
    Quat::from_rotation_matrix(&na::Rotation3::from_matrix_unchecked(m))
}

/// Normalize `v`, or return `fallback` when it is too short to have a direction.
#[inline]
pub fn normalize_or(v: &Vec3, fallback: Vec3) -> Vec3 {
    let len_sq = v.norm_squared();
    if len_sq > EPSILON * EPSILON {
        v / len_sq.sqrt()
    } else {
        fallback
    }
}

#[inline]
pub fn to_array(v: &Vec3) -> [f32; 3] {
    [v.x, v.y, v.z]
}

#[cfg(test)]
pub(crate) fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

#[cfg(test)]
pub(crate) fn approx_vec(a: &Vec3, b: &Vec3, tol: f32) -> bool {
    (a - b).norm() <= tol
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_space_is_orthonormal_for_each_axis_and_a_diagonal() {
        let normals = [
            Vec3::x(),
            Vec3::y(),
            Vec3::z(),
            -Vec3::z(),
            Vec3::new(1.0, 2.0, 3.0).normalize(),
        ];

        for n in normals {
            let (p, q) = plane_space(&n);
            assert!(approx_eq(p.norm(), 1.0, 1e-5));
            assert!(approx_eq(q.norm(), 1.0, 1e-5));
            assert!(approx_eq(p.dot(&n), 0.0, 1e-5));
            assert!(approx_eq(q.dot(&n), 0.0, 1e-5));
            assert!(approx_eq(p.dot(&q), 0.0, 1e-5));
        }
    }

    #[test]
    fn rotation_from_basis_maps_x_to_first_column() {
        let axis = Vec3::new(0.0, 0.0, 1.0);
        let (p, q) = plane_space(&axis);
        let rot = rotation_from_basis(&axis, &p, &q);

        assert!(approx_vec(&(rot * Vec3::x()), &axis, 1e-5));
        assert!(approx_vec(&(rot * Vec3::y()), &p, 1e-5));
    }

    #[test]
    fn transform_matrix_applies_scale_before_rotation() {
        let t = Transform::new(
            Vec3::new(1.0, 0.0, 0.0),
            Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_2),
        )
        .with_scale(Vec3::new(2.0, 1.0, 1.0));

        let p = t.to_matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx_vec(&p.xyz(), &Vec3::new(1.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn normalize_or_falls_back_for_zero_vectors() {
        assert_eq!(normalize_or(&Vec3::zeros(), Vec3::x()), Vec3::x());
        assert!(approx_vec(
            &normalize_or(&Vec3::new(0.0, 3.0, 0.0), Vec3::x()),
            &Vec3::y(),
            1e-6
        ));
    }
}
