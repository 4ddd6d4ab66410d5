//! Contact data handed to collision callbacks.
//!
//! A [`CollisionData`] is a snapshot of one persistent manifold, copied out of the native
//! narrow phase so callbacks can run while the world is mutably borrowed. Points are stored
//! in manifold order; every accessor takes `first`, telling it whether the caller's object
//! is the manifold's first body, and swaps sides accordingly.

use crate::math::Vec3;
use crate::settings::MAX_COMBINED_FRICTION;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactPoint {
    /// Contact point in the first body's frame.
    pub local_point_a: Vec3,
    /// Contact point in the second body's frame.
    pub local_point_b: Vec3,
    /// World position of the point on the second body.
    pub world_point: Vec3,
    /// World normal on the second body, pointing towards the first.
    pub normal_on_b: Vec3,
    /// Signed separation. Negative means penetration.
    pub distance: f32,
    pub combined_friction: f32,
    pub combined_rolling_friction: f32,
    pub combined_restitution: f32,
    pub applied_impulse: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionData {
    points: Vec<ContactPoint>,
}

impl CollisionData {
    pub fn new(points: Vec<ContactPoint>) -> Self {
        Self { points }
    }

    #[inline]
    pub fn num_contacts(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn points(&self) -> &[ContactPoint] {
        &self.points
    }

    pub fn local_point_a(&self, index: usize, first: bool) -> Option<Vec3> {
        let p = self.points.get(index)?;
        Some(if first { p.local_point_a } else { p.local_point_b })
    }

    pub fn local_point_b(&self, index: usize, first: bool) -> Option<Vec3> {
        let p = self.points.get(index)?;
        Some(if first { p.local_point_b } else { p.local_point_a })
    }

    pub fn world_point(&self, index: usize) -> Option<Vec3> {
        self.points.get(index).map(|p| p.world_point)
    }

    /// Contact normal pointing away from the caller's object.
    pub fn normal(&self, index: usize, first: bool) -> Option<Vec3> {
        let p = self.points.get(index)?;
        Some(if first { -p.normal_on_b } else { p.normal_on_b })
    }

    pub fn combined_friction(&self, index: usize) -> Option<f32> {
        self.points.get(index).map(|p| p.combined_friction)
    }

    pub fn combined_rolling_friction(&self, index: usize) -> Option<f32> {
        self.points.get(index).map(|p| p.combined_rolling_friction)
    }

    pub fn combined_restitution(&self, index: usize) -> Option<f32> {
        self.points.get(index).map(|p| p.combined_restitution)
    }

    pub fn applied_impulse(&self, index: usize) -> Option<f32> {
        self.points.get(index).map(|p| p.applied_impulse)
    }
}

/// Friction of a contact between two materials, clamped to [`MAX_COMBINED_FRICTION`].
pub fn combined_friction(a: f32, b: f32) -> f32 {
    (a * b).clamp(-MAX_COMBINED_FRICTION, MAX_COMBINED_FRICTION)
}

pub fn combined_rolling_friction(friction_a: f32, rolling_a: f32, friction_b: f32, rolling_b: f32) -> f32 {
    (rolling_a * friction_b + rolling_b * friction_a)
        .clamp(-MAX_COMBINED_FRICTION, MAX_COMBINED_FRICTION)
}

pub fn combined_restitution(a: f32, b: f32) -> f32 {
    a * b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> ContactPoint {
        ContactPoint {
            local_point_a: Vec3::new(0.0, 0.0, -0.5),
            local_point_b: Vec3::new(0.0, 0.0, 0.5),
            world_point: Vec3::new(0.0, 0.0, 0.0),
            normal_on_b: Vec3::new(0.0, 0.0, 1.0),
            distance: -0.01,
            combined_friction: 0.25,
            combined_rolling_friction: 0.0,
            combined_restitution: 0.0,
            applied_impulse: 1.5,
        }
    }

    #[test]
    fn accessors_swap_sides_for_the_second_object() {
        let data = CollisionData::new(vec![point()]);

        assert_eq!(data.num_contacts(), 1);
        assert_eq!(data.local_point_a(0, true), Some(Vec3::new(0.0, 0.0, -0.5)));
        assert_eq!(data.local_point_a(0, false), Some(Vec3::new(0.0, 0.0, 0.5)));
        assert_eq!(data.normal(0, true), Some(Vec3::new(0.0, 0.0, -1.0)));
        assert_eq!(data.normal(0, false), Some(Vec3::new(0.0, 0.0, 1.0)));
        assert_eq!(data.applied_impulse(0), Some(1.5));
    }

    #[test]
    fn out_of_range_indices_are_none() {
        let data = CollisionData::default();
        assert!(data.is_empty());
        assert_eq!(data.world_point(0), None);
        assert_eq!(data.normal(3, true), None);
    }

    #[test]
    fn friction_is_multiplied_and_clamped() {
        assert_eq!(combined_friction(0.5, 0.5), 0.25);
        assert_eq!(combined_friction(100.0, 1.0), MAX_COMBINED_FRICTION);
        assert_eq!(combined_restitution(0.5, 0.2), 0.1);
        assert_eq!(combined_rolling_friction(0.5, 0.1, 1.0, 0.0), 0.1);
    }
}
