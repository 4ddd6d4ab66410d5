//! Ray tests and contact snapshots.

use rapier3d::parry::shape::FeatureId;
use rapier3d::prelude::{
    BroadPhaseBvh, Collider, ColliderHandle, ColliderSet, ContactManifold, NarrowPhase,
    QueryFilter, QueryPipeline, Ray, RigidBodySet,
};

use super::PhysicsWorld;
use crate::body::BodyState;
use crate::contact::{
    CollisionData, ContactPoint, combined_friction, combined_restitution,
    combined_rolling_friction,
};
use crate::handle::{ControllerId, try_unpack_tag};
use crate::math::{EPSILON, Point3, Vec3};
use crate::raycast::{RayFilter, RayHit, interpolate_uv, triangle_from_feature, world_face_normal};

/// Borrowed query view over the world's current broad phase.
pub(super) fn query_pipeline<'a>(
    broad_phase: &'a BroadPhaseBvh,
    narrow_phase: &'a NarrowPhase,
    bodies: &'a RigidBodySet,
    colliders: &'a ColliderSet,
    filter: QueryFilter<'a>,
) -> QueryPipeline<'a> {
    broad_phase.as_query_pipeline(narrow_phase.query_dispatcher(), bodies, colliders, filter)
}

/// Controller owning a native collider.
#[inline]
pub(super) fn collider_owner(collider: &Collider) -> Option<ControllerId> {
    try_unpack_tag(collider.user_data).map(|t| t.controller)
}

/// Copy one manifold out of the narrow phase. With `threshold`, only points closer than it
/// are kept.
pub(super) fn manifold_data(
    manifold: &ContactManifold,
    collider_b: &Collider,
    state_a: &BodyState,
    state_b: &BodyState,
    threshold: Option<f32>,
) -> CollisionData {
    let normal_on_b = -manifold.data.normal;
    let friction = combined_friction(state_a.friction, state_b.friction);
    let rolling = combined_rolling_friction(
        state_a.friction,
        state_a.rolling_friction,
        state_b.friction,
        state_b.rolling_friction,
    );
    let restitution = combined_restitution(state_a.restitution, state_b.restitution);

    let points = manifold
        .points
        .iter()
        .filter(|p| threshold.is_none_or(|t| p.dist <= t))
        .map(|p| ContactPoint {
            local_point_a: p.local_p1.coords,
            local_point_b: p.local_p2.coords,
            world_point: (collider_b.position() * p.local_p2).coords,
            normal_on_b,
            distance: p.dist,
            combined_friction: friction,
            combined_rolling_friction: rolling,
            combined_restitution: restitution,
            applied_impulse: p.data.impulse,
        })
        .collect();
    CollisionData::new(points)
}

impl PhysicsWorld {
    /// Closest hit on the segment `from -> to`.
    ///
    /// Candidates go through `filter` first; disabled (unregistered) objects are never hit.
    /// Triangle-mesh and soft-body hits report the source polygon and, on request, its face
    /// normal and interpolated UV.
    pub fn ray_test(&self, from: Vec3, to: Vec3, filter: &impl RayFilter) -> Option<RayHit> {
        let dir = to - from;
        if dir.norm_squared() <= EPSILON * EPSILON {
            return None;
        }

        let ignored = filter.ignored_controller();
        let predicate = |_: ColliderHandle, c: &Collider| match collider_owner(c) {
            Some(id) => Some(id) != ignored && filter.needs_broadphase_test(id),
            None => false,
        };
        let query = query_pipeline(
            &self.broad_phase,
            &self.narrow_phase,
            &self.bodies,
            &self.colliders,
            QueryFilter::default().predicate(&predicate),
        );

        // A unit `max_toi` over an unnormalized direction makes the toi the fraction.
        let ray = Ray::new(Point3::from(from), dir);
        let (handle, hit) = query.cast_ray_and_get_normal(&ray, 1.0, true)?;
        let collider = self.colliders.get(handle)?;
        let controller = collider_owner(collider)?;
        let point = from + dir * hit.time_of_impact;

        let mut result = RayHit {
            controller,
            point,
            normal: hit.normal,
            fraction: hit.time_of_impact,
            polygon: None,
            uv: None,
        };

        let Some(ctrl) = self.controllers.get(&controller) else {
            return Some(result);
        };
        let Some(mesh) = self
            .shapes
            .resolve(ctrl.shape)
            .and_then(|d| d.geometry.mesh())
        else {
            return Some(result);
        };
        let local = collider
            .position()
            .inverse_transform_point(&Point3::from(point));

        // Corners are taken in the scaled body frame, where `local` lives too.
        let (triangle, tri) = if let Some(soft) = ctrl.soft.as_ref() {
            // Soft bodies collide as the hull of their nodes: map the hit onto the closest
            // welded face, then back to the mesh triangle it was welded from.
            let Some(face) = soft.closest_face(&local) else {
                return Some(result);
            };
            let (Some(triangle), Some(tri)) = (soft.source_triangle(face), soft.face_corners(face))
            else {
                return Some(result);
            };
            (triangle, tri)
        } else {
            let Some(trimesh) = collider.shape().as_trimesh() else {
                return Some(result);
            };
            let FeatureId::Face(feature) = hit.feature else {
                return Some(result);
            };
            let Some(triangle) = triangle_from_feature(feature, trimesh.indices().len()) else {
                return Some(result);
            };
            let Some(indices) = mesh.triangles.get(triangle) else {
                return Some(result);
            };
            let corner = |i: u32| {
                mesh.vertices
                    .get(i as usize)
                    .map(|p| p.coords.component_mul(&ctrl.scale))
            };
            let (Some(a), Some(b), Some(c)) =
                (corner(indices[0]), corner(indices[1]), corner(indices[2]))
            else {
                return Some(result);
            };
            (triangle, [a, b, c])
        };

        result.polygon = mesh.polygon_index.get(triangle).copied();
        if filter.wants_face_normal() {
            let rotation = collider.position().rotation;
            result.normal = world_face_normal(&tri, |n| rotation * n);
        }
        if filter.wants_uv() {
            if let Some(uvs) = mesh.triangle_uvs.get(triangle) {
                // Area ratios survive the scale, so the scaled corners interpolate the same.
                result.uv = interpolate_uv(&local.coords, &tri, uvs);
            }
        }
        Some(result)
    }

    /// Current contacts between two controllers.
    ///
    /// Returns `(a_is_first, data)` for the first manifold holding points, `None` when
    /// the pair is not touching.
    pub fn check_collision(&self, a: ControllerId, b: ControllerId) -> Option<(bool, CollisionData)> {
        let ctrl_a = self.controllers.get(&a)?;
        let ctrl_b = self.controllers.get(&b)?;
        if !ctrl_a.registered || !ctrl_b.registered {
            return None;
        }
        let pair = self
            .narrow_phase
            .contact_pair(ctrl_a.collider, ctrl_b.collider)?;
        let first = pair.collider1 == ctrl_a.collider;
        let (state_1, state_2, collider_2) = if first {
            (&ctrl_a.state, &ctrl_b.state, ctrl_b.collider)
        } else {
            (&ctrl_b.state, &ctrl_a.state, ctrl_a.collider)
        };
        let collider_2 = self.colliders.get(collider_2)?;

        let manifold = pair.manifolds.iter().find(|m| !m.points.is_empty())?;
        let data = manifold_data(manifold, collider_2, state_1, state_2, None);
        Some((first, data))
    }
}
