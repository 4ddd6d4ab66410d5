//! Soft-body node bookkeeping.
//!
//! Deformation is out of scope: a soft body is simulated as one bulk rigid body whose
//! welded mesh nodes ride along with it. The node list still matters to callers: it carries
//! the mass distribution, the node positions reported to the scene, and the anchors created
//! when a constraint touches a soft body.
//!
//! Anchors cannot be removed one by one. They go away together with either body.

use rapier3d::parry::query::PointQuery;
use rapier3d::parry::shape::Triangle;
use rapier3d::prelude::ImpulseJointHandle;

use crate::handle::ControllerId;
use crate::math::{Iso, Point3, Vec3};

/// Welded soft-body geometry in the body frame.
///
/// Welding drops faces that collapse, so `source_triangles[i]` names the mesh triangle
/// face `i` was built from.
#[derive(Clone, Debug, Default)]
pub struct SoftMesh {
    pub nodes: Vec<Point3>,
    pub faces: Vec<[u32; 3]>,
    pub source_triangles: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoftNode {
    /// Position in the bulk body's frame.
    pub local: Point3,
    /// World position after the last synchronization.
    pub position: Point3,
    /// Pinned nodes have zero mass.
    pub pinned: bool,
}

/// A node attached to another body, or pinned in place when `other` is `None`.
#[derive(Clone, Debug)]
pub struct SoftAnchor {
    pub node: usize,
    pub other: Option<ControllerId>,
    pub(crate) joint: Option<ImpulseJointHandle>,
}

#[derive(Clone, Debug)]
pub struct SoftBody {
    nodes: Vec<SoftNode>,
    faces: Vec<[u32; 3]>,
    source_triangles: Vec<usize>,
    total_mass: f32,
    margin: f32,
    anchors: Vec<SoftAnchor>,
}

impl SoftBody {
    /// Build from welded nodes given in the body frame. A mesh without nodes gets a single
    /// node at the body origin.
    pub fn new(mesh: SoftMesh, total_mass: f32, margin: f32, pose: &Iso) -> Self {
        let SoftMesh {
            nodes,
            faces,
            source_triangles,
        } = mesh;
        let locals = if nodes.is_empty() {
            vec![Point3::origin()]
        } else {
            nodes
        };
        let nodes = locals
            .into_iter()
            .map(|local| SoftNode {
                local,
                position: pose * local,
                pinned: false,
            })
            .collect();
        Self {
            nodes,
            faces,
            source_triangles,
            total_mass: total_mass.max(0.0),
            margin,
            anchors: Vec::new(),
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[SoftNode] {
        &self.nodes
    }

    #[inline]
    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    /// Mesh triangle that welded face `face` came from.
    pub fn source_triangle(&self, face: usize) -> Option<usize> {
        self.source_triangles.get(face).copied()
    }

    /// Corners of `face` in the body frame.
    pub fn face_corners(&self, face: usize) -> Option<[Vec3; 3]> {
        let f = self.faces.get(face)?;
        let corner = |i: u32| self.nodes.get(i as usize).map(|n| n.local.coords);
        Some([corner(f[0])?, corner(f[1])?, corner(f[2])?])
    }

    /// Face closest to a point given in the body frame.
    pub fn closest_face(&self, local: &Point3) -> Option<usize> {
        (0..self.faces.len())
            .filter_map(|i| {
                let [a, b, c] = self.face_corners(i)?;
                let triangle = Triangle::new(a.into(), b.into(), c.into());
                Some((i, triangle.distance_to_local_point(local, true)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    #[inline]
    pub fn margin(&self) -> f32 {
        self.margin
    }

    #[inline]
    pub fn anchors(&self) -> &[SoftAnchor] {
        &self.anchors
    }

    pub fn has_pinned_nodes(&self) -> bool {
        self.nodes.iter().any(|n| n.pinned)
    }

    /// Mass of one node. The total mass is spread evenly over the free nodes.
    pub fn node_mass(&self, node: usize) -> f32 {
        match self.nodes.get(node) {
            Some(n) if !n.pinned => {
                let free = self.nodes.iter().filter(|n| !n.pinned).count();
                self.total_mass / free as f32
            }
            _ => 0.0,
        }
    }

    pub fn set_total_mass(&mut self, mass: f32) {
        self.total_mass = mass.max(0.0);
    }

    /// Node closest to a world-space point.
    pub fn closest_node(&self, point: &Vec3) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (i, (n.position.coords - point).norm_squared()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Move every node with the bulk body.
    pub fn follow(&mut self, pose: &Iso) {
        for node in &mut self.nodes {
            node.position = pose * node.local;
        }
    }

    pub(crate) fn add_anchor(&mut self, anchor: SoftAnchor) {
        if anchor.other.is_none() {
            if let Some(node) = self.nodes.get_mut(anchor.node) {
                node.pinned = true;
            }
        }
        self.anchors.push(anchor);
    }

    /// Remove every anchor attached to `other`, returning their native joints.
    pub(crate) fn detach_from(&mut self, other: ControllerId) -> Vec<ImpulseJointHandle> {
        let mut joints = Vec::new();
        self.anchors.retain(|a| {
            if a.other == Some(other) {
                joints.extend(a.joint);
                false
            } else {
                true
            }
        });
        joints
    }

    /// Remove every anchor, returning their native joints.
    pub(crate) fn detach_all(&mut self) -> Vec<ImpulseJointHandle> {
        for node in &mut self.nodes {
            node.pinned = false;
        }
        self.anchors.drain(..).filter_map(|a| a.joint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> SoftBody {
        let nodes = vec![
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
        ];
        let mesh = SoftMesh {
            nodes,
            faces: vec![[0, 1, 2], [0, 2, 3]],
            source_triangles: vec![0, 2],
        };
        SoftBody::new(mesh, 2.0, 0.1, &Iso::translation(0.0, 0.0, 5.0))
    }

    #[test]
    fn faces_map_back_to_their_source_triangles() {
        let soft = square();
        let face = soft.closest_face(&Point3::new(-0.5, 0.6, 0.1)).unwrap();
        assert_eq!(face, 1);
        assert_eq!(soft.source_triangle(face), Some(2));
        assert_eq!(soft.closest_face(&Point3::new(0.6, -0.5, -0.2)), Some(0));
        assert_eq!(soft.source_triangle(7), None);
        assert!(soft.face_corners(2).is_none());
    }

    #[test]
    fn mass_is_spread_over_free_nodes() {
        let mut soft = square();
        assert_eq!(soft.node_mass(0), 0.5);

        soft.add_anchor(SoftAnchor {
            node: 0,
            other: None,
            joint: None,
        });
        assert_eq!(soft.node_mass(0), 0.0);
        assert!((soft.node_mass(1) - 2.0 / 3.0).abs() < 1e-6);
        assert!(soft.has_pinned_nodes());
    }

    #[test]
    fn nodes_follow_the_bulk_body() {
        let mut soft = square();
        assert_eq!(soft.nodes()[2].position, Point3::new(1.0, 1.0, 5.0));

        soft.follow(&Iso::translation(1.0, 0.0, 0.0));
        assert_eq!(soft.nodes()[2].position, Point3::new(2.0, 1.0, 0.0));
        assert_eq!(soft.closest_node(&Vec3::new(-0.2, 1.1, 0.0)), Some(3));
    }

    #[test]
    fn anchors_are_only_removed_with_their_other_body() {
        let mut soft = square();
        soft.add_anchor(SoftAnchor {
            node: 1,
            other: Some(ControllerId(4)),
            joint: None,
        });
        soft.add_anchor(SoftAnchor {
            node: 2,
            other: Some(ControllerId(5)),
            joint: None,
        });

        soft.detach_from(ControllerId(4));
        assert_eq!(soft.anchors().len(), 1);
        assert_eq!(soft.anchors()[0].other, Some(ControllerId(5)));

        soft.detach_all();
        assert!(soft.anchors().is_empty());
    }

    #[test]
    fn meshless_soft_bodies_get_one_node() {
        let soft = SoftBody::new(SoftMesh::default(), 1.0, 0.1, &Iso::identity());
        assert_eq!(soft.nodes().len(), 1);
        assert_eq!(soft.node_mass(0), 1.0);
    }
}
