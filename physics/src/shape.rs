//! Shared collision shape descriptors.
//!
//! A [`ShapeRegistry`] owns every [`ShapeDescriptor`] of a world. Controllers hold a
//! counted reference ([`ShapeId`]) to one descriptor; mesh-derived descriptors are shared by
//! `(mesh, deformer, kind)` so duplicated scene objects reuse the same geometry.
//!
//! Descriptors are plain data. The native shape is built on demand by
//! [`ShapeRegistry::build`] and cached per scale; compound edits drop the cache, so the
//! native compound is rebuilt lazily the next time somebody asks for it.

use std::collections::HashMap;
use std::f32::consts::FRAC_PI_2;

use log::{debug, warn};
use rapier3d::prelude::{Isometry, Point, Real, SharedShape, Vector};

use crate::handle::ControllerId;
use crate::math::{EPSILON, Iso, Point3, Vec3};
use crate::soft::SoftMesh;

/// Counted reference to a descriptor in a [`ShapeRegistry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeId(pub u32);

/// Identifier of a source mesh owned by the external scene.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub u64);

/// Identifier of a deformer (modifier stack) applied on top of a mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeformerId(pub u64);

/// Bound type chosen for an entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ShapeKind {
    Sphere,
    Box,
    Cylinder,
    Cone,
    Capsule,
    ConvexHull,
    ConcaveMesh,
    Compound,
    Proxy,
    Empty,
}

/// Triangle soup derived from a source mesh.
///
/// `polygon_index[t]` is the source polygon triangle `t` came from, `triangle_uvs[t]` its
/// three corner UVs (empty when the mesh has no UV layer).
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Point3>,
    pub triangles: Vec<[u32; 3]>,
    pub polygon_index: Vec<u32>,
    pub triangle_uvs: Vec<[[f32; 2]; 3]>,
    /// Vertex welding distance used when the mesh feeds a soft body. 0 = no welding.
    pub welding_threshold: f32,
}

/// A child of a compound descriptor.
#[derive(Clone, Debug)]
pub struct ChildShape {
    pub shape: ShapeId,
    /// Pose relative to the compound's origin.
    pub transform: Iso,
    /// Scale relative to the compound.
    pub scale: Vec3,
    /// Controller whose shape was folded in, if the child came from a compound child.
    pub owner: Option<ControllerId>,
}

/// Shape parameters, one variant per [`ShapeKind`].
///
/// Cylinders, cones and capsules are aligned with the local Z axis.
#[derive(Clone, Debug)]
pub enum ShapeGeometry {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Cylinder { radius: f32, half_height: f32 },
    Cone { radius: f32, half_height: f32 },
    Capsule { radius: f32, half_height: f32 },
    ConvexHull(MeshData),
    ConcaveMesh(MeshData),
    Compound(Vec<ChildShape>),
    Proxy(ShapeId),
    Empty,
}

impl ShapeGeometry {
    pub fn kind(&self) -> ShapeKind {
        match self {
            ShapeGeometry::Sphere { .. } => ShapeKind::Sphere,
            ShapeGeometry::Box { .. } => ShapeKind::Box,
            ShapeGeometry::Cylinder { .. } => ShapeKind::Cylinder,
            ShapeGeometry::Cone { .. } => ShapeKind::Cone,
            ShapeGeometry::Capsule { .. } => ShapeKind::Capsule,
            ShapeGeometry::ConvexHull(_) => ShapeKind::ConvexHull,
            ShapeGeometry::ConcaveMesh(_) => ShapeKind::ConcaveMesh,
            ShapeGeometry::Compound(_) => ShapeKind::Compound,
            ShapeGeometry::Proxy(_) => ShapeKind::Proxy,
            ShapeGeometry::Empty => ShapeKind::Empty,
        }
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        match self {
            ShapeGeometry::ConvexHull(mesh) | ShapeGeometry::ConcaveMesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

/// One polygon of a source mesh.
#[derive(Clone, Debug, Default)]
pub struct SourcePolygon {
    /// Indices into [`MeshSource::vertices`], 3 or more.
    pub vertices: Vec<u32>,
    /// Per-corner UVs, empty when the mesh has none.
    pub uvs: Vec<[f32; 2]>,
    /// Polygons flagged as non-colliding are skipped.
    pub collide: bool,
}

/// Geometry handed over by scene conversion for a mesh (after its deformer, if any).
#[derive(Clone, Debug, Default)]
pub struct MeshSource {
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<SourcePolygon>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct MeshKey {
    mesh: MeshId,
    deformer: Option<DeformerId>,
    kind: ShapeKind,
}

#[derive(Clone, Debug)]
pub struct ShapeDescriptor {
    pub geometry: ShapeGeometry,
    /// Radius used when the geometry turns out to be unusable.
    pub radius_hint: f32,
    ref_count: u32,
    key: Option<MeshKey>,
    cache: Option<(Vec3, SharedShape)>,
}

impl ShapeDescriptor {
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        self.geometry.kind()
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Registry of shape descriptors, shared by the controllers of one world.
#[derive(Default)]
pub struct ShapeRegistry {
    shapes: HashMap<ShapeId, ShapeDescriptor>,
    by_mesh: HashMap<MeshKey, ShapeId>,
    next_id: u32,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn get(&self, id: ShapeId) -> Option<&ShapeDescriptor> {
        self.shapes.get(&id)
    }

    /// Register a descriptor that is not derived from a shared mesh. Starts with one reference.
    pub fn create(&mut self, geometry: ShapeGeometry, radius_hint: f32) -> ShapeId {
        if let ShapeGeometry::Proxy(target) = &geometry {
            self.add_ref(*target);
        }
        if let ShapeGeometry::Compound(children) = &geometry {
            let targets: Vec<ShapeId> = children.iter().map(|c| c.shape).collect();
            for target in targets {
                self.add_ref(target);
            }
        }
        self.insert(geometry, radius_hint, None)
    }

    /// Return the descriptor shared by `(mesh, deformer, kind)`, building it from `source`
    /// on first use. Every call hands out one reference.
    pub fn find_or_create(
        &mut self,
        mesh: MeshId,
        deformer: Option<DeformerId>,
        kind: ShapeKind,
        source: &MeshSource,
        radius_hint: f32,
    ) -> ShapeId {
        let key = MeshKey {
            mesh,
            deformer,
            kind,
        };
        if let Some(&id) = self.by_mesh.get(&key) {
            self.add_ref(id);
            return id;
        }

        let geometry = geometry_from_mesh(kind, source, radius_hint);
        let id = self.insert(geometry, radius_hint, Some(key));
        self.by_mesh.insert(key, id);
        debug!("shape {:?}: built {:?} for mesh {:?}", id, kind, mesh);
        id
    }

    /// Add one reference. Unknown ids are ignored.
    pub fn add_ref(&mut self, id: ShapeId) {
        if let Some(desc) = self.shapes.get_mut(&id) {
            desc.ref_count += 1;
        }
    }

    /// Drop one reference. Returns true when this freed the descriptor.
    pub fn release(&mut self, id: ShapeId) -> bool {
        let Some(desc) = self.shapes.get_mut(&id) else {
            return false;
        };
        desc.ref_count = desc.ref_count.saturating_sub(1);
        if desc.ref_count > 0 {
            return false;
        }

        let Some(desc) = self.shapes.remove(&id) else {
            return false;
        };
        if let Some(key) = desc.key {
            if self.by_mesh.get(&key) == Some(&id) {
                self.by_mesh.remove(&key);
            }
        }
        match desc.geometry {
            ShapeGeometry::Compound(children) => {
                for child in children {
                    self.release(child.shape);
                }
            }
            ShapeGeometry::Proxy(target) => {
                self.release(target);
            }
            _ => {}
        }
        true
    }

    /// Append a child to a compound descriptor. The child's shape gains a reference.
    pub fn add_child(&mut self, parent: ShapeId, child: ChildShape) -> bool {
        if parent == child.shape || !self.shapes.contains_key(&child.shape) {
            return false;
        }
        let Some(desc) = self.shapes.get_mut(&parent) else {
            return false;
        };
        let ShapeGeometry::Compound(children) = &mut desc.geometry else {
            return false;
        };
        let target = child.shape;
        children.push(child);
        desc.cache = None;
        self.add_ref(target);
        true
    }

    /// Remove the child at `index` from a compound descriptor, releasing its shape.
    pub fn remove_child(&mut self, parent: ShapeId, index: usize) -> bool {
        let Some(desc) = self.shapes.get_mut(&parent) else {
            return false;
        };
        let ShapeGeometry::Compound(children) = &mut desc.geometry else {
            return false;
        };
        if index >= children.len() {
            return false;
        }
        let child = children.remove(index);
        desc.cache = None;
        self.release(child.shape);
        true
    }

    /// Index of the child folded in from controller `owner`.
    pub fn find_child(&self, parent: ShapeId, owner: ControllerId) -> Option<usize> {
        match &self.shapes.get(&parent)?.geometry {
            ShapeGeometry::Compound(children) => {
                children.iter().position(|c| c.owner == Some(owner))
            }
            _ => None,
        }
    }

    pub fn set_welding_threshold(&mut self, id: ShapeId, threshold: f32) {
        let Some(desc) = self.shapes.get_mut(&id) else {
            return;
        };
        if let ShapeGeometry::ConvexHull(mesh) | ShapeGeometry::ConcaveMesh(mesh) =
            &mut desc.geometry
        {
            mesh.welding_threshold = threshold.max(0.0);
        }
    }

    /// Follow proxies to the descriptor that actually carries geometry.
    pub fn resolve(&self, id: ShapeId) -> Option<&ShapeDescriptor> {
        let mut current = id;
        // Proxies form a chain, never a cycle; the bound guards corrupt input.
        for _ in 0..=self.shapes.len() {
            let desc = self.shapes.get(&current)?;
            match desc.geometry {
                ShapeGeometry::Proxy(target) => current = target,
                _ => return Some(desc),
            }
        }
        None
    }

    /// Native shape for `id` at `scale`.
    ///
    /// Degenerate or unknown geometry falls back to a sphere of the radius hint.
    pub fn build(&mut self, id: ShapeId, scale: Vec3) -> SharedShape {
        let cached = self.shapes.get(&id).and_then(|desc| desc.cache.as_ref());
        if let Some((cached_scale, shape)) = cached {
            if (cached_scale - scale).norm_squared() <= EPSILON * EPSILON {
                return shape.clone();
            }
        }

        let radius_hint = self.shapes.get(&id).map(|d| d.radius_hint).unwrap_or(1.0);
        let shape = match self.build_uncached(id, &scale, 0) {
            Some(shape) => shape,
            None => {
                warn!(
                    "shape {:?}: degenerate geometry, falling back to a sphere of radius {}",
                    id, radius_hint
                );
                SharedShape::ball(radius_hint.max(0.0) * max_abs(&scale))
            }
        };

        if let Some(desc) = self.shapes.get_mut(&id) {
            desc.cache = Some((scale, shape.clone()));
        }
        shape
    }

    /// Welded node positions and faces for a soft body built from `id` at `scale`.
    pub fn soft_body_mesh(&self, id: ShapeId, scale: &Vec3) -> Option<SoftMesh> {
        let mesh = self.resolve(id)?.geometry.mesh()?;
        if mesh.triangles.is_empty() {
            return None;
        }
        let scaled: Vec<Point3> = mesh
            .vertices
            .iter()
            .map(|p| Point3::from(p.coords.component_mul(scale)))
            .collect();
        if mesh.welding_threshold > 0.0 {
            Some(weld_vertices(&scaled, &mesh.triangles, mesh.welding_threshold))
        } else {
            Some(SoftMesh {
                nodes: scaled,
                faces: mesh.triangles.clone(),
                source_triangles: (0..mesh.triangles.len()).collect(),
            })
        }
    }

    fn insert(&mut self, geometry: ShapeGeometry, radius_hint: f32, key: Option<MeshKey>) -> ShapeId {
        self.next_id += 1;
        let id = ShapeId(self.next_id);
        self.shapes.insert(
            id,
            ShapeDescriptor {
                geometry,
                radius_hint,
                ref_count: 1,
                key,
                cache: None,
            },
        );
        id
    }

    fn build_uncached(&self, id: ShapeId, scale: &Vec3, depth: usize) -> Option<SharedShape> {
        if depth > self.shapes.len() {
            return None;
        }
        let desc = self.shapes.get(&id)?;
        let radial = scale.x.abs().max(scale.y.abs());
        let axial = scale.z.abs();

        match &desc.geometry {
            ShapeGeometry::Sphere { radius } => {
                let r = radius * max_abs(scale);
                (r > 0.0).then(|| SharedShape::ball(r))
            }
            ShapeGeometry::Box { half_extents } => {
                let he = half_extents.component_mul(scale).abs();
                (he.min() > 0.0).then(|| SharedShape::cuboid(he.x, he.y, he.z))
            }
            ShapeGeometry::Cylinder {
                radius,
                half_height,
            } => {
                let (r, hh) = (radius * radial, half_height * axial);
                (r > 0.0 && hh > 0.0).then(|| z_aligned(SharedShape::cylinder(hh, r)))
            }
            ShapeGeometry::Cone {
                radius,
                half_height,
            } => {
                let (r, hh) = (radius * radial, half_height * axial);
                (r > 0.0 && hh > 0.0).then(|| z_aligned(SharedShape::cone(hh, r)))
            }
            ShapeGeometry::Capsule {
                radius,
                half_height,
            } => {
                let (r, hh) = (radius * radial, half_height * axial);
                (r > 0.0).then(|| SharedShape::capsule_z(hh.max(0.0), r))
            }
            ShapeGeometry::ConvexHull(mesh) => {
                let points = scaled_points(&mesh.vertices, scale);
                SharedShape::convex_hull(&points)
            }
            ShapeGeometry::ConcaveMesh(mesh) => {
                if mesh.triangles.is_empty() {
                    return None;
                }
                let points = scaled_points(&mesh.vertices, scale);
                SharedShape::trimesh(points, mesh.triangles.clone()).ok()
            }
            ShapeGeometry::Compound(children) => {
                let mut parts: Vec<(Isometry<Real>, SharedShape)> = Vec::new();
                for child in children {
                    let child_scale = child.scale.component_mul(scale);
                    let Some(shape) = self.build_uncached(child.shape, &child_scale, depth + 1)
                    else {
                        continue;
                    };
                    let mut pose = child.transform;
                    pose.translation.vector = pose.translation.vector.component_mul(scale);
                    flatten_into(&mut parts, pose, shape);
                }
                (!parts.is_empty()).then(|| SharedShape::compound(parts))
            }
            ShapeGeometry::Proxy(target) => self.build_uncached(*target, scale, depth + 1),
            ShapeGeometry::Empty => Some(SharedShape::ball(EPSILON)),
        }
    }
}

/// Compounds cannot nest composite shapes: nested compounds are flattened and meshes are
/// replaced by their convex hull.
fn flatten_into(parts: &mut Vec<(Isometry<Real>, SharedShape)>, pose: Iso, shape: SharedShape) {
    if let Some(compound) = shape.as_compound() {
        for (sub_pose, sub_shape) in compound.shapes() {
            flatten_into(parts, pose * sub_pose, sub_shape.clone());
        }
    } else if let Some(trimesh) = shape.as_trimesh() {
        match SharedShape::convex_hull(trimesh.vertices()) {
            Some(hull) => parts.push((pose, hull)),
            None => warn!("compound child mesh has no convex hull, skipped"),
        }
    } else {
        parts.push((pose, shape));
    }
}

/// Native cylinders and cones are Y-aligned; rotate them onto Z.
fn z_aligned(shape: SharedShape) -> SharedShape {
    let pose = Isometry::rotation(Vector::x() * FRAC_PI_2);
    SharedShape::compound(vec![(pose, shape)])
}

fn max_abs(v: &Vec3) -> f32 {
    v.x.abs().max(v.y.abs()).max(v.z.abs())
}

fn scaled_points(vertices: &[Point3], scale: &Vec3) -> Vec<Point<Real>> {
    vertices
        .iter()
        .map(|p| Point::from(p.coords.component_mul(scale)))
        .collect()
}

/// Build descriptor geometry of `kind` from a source mesh.
fn geometry_from_mesh(kind: ShapeKind, source: &MeshSource, radius_hint: f32) -> ShapeGeometry {
    match kind {
        ShapeKind::ConcaveMesh => ShapeGeometry::ConcaveMesh(triangulate(source)),
        ShapeKind::ConvexHull => {
            let mut mesh = triangulate(source);
            // Hulls keep every vertex, referenced or not.
            mesh.vertices = source.vertices.iter().map(|v| Point3::from(*v)).collect();
            ShapeGeometry::ConvexHull(mesh)
        }
        ShapeKind::Empty => ShapeGeometry::Empty,
        ShapeKind::Compound => ShapeGeometry::Compound(Vec::new()),
        ShapeKind::Sphere => ShapeGeometry::Sphere {
            radius: radius_hint,
        },
        ShapeKind::Box | ShapeKind::Cylinder | ShapeKind::Cone | ShapeKind::Capsule => {
            let Some((mins, maxs)) = bounds(&source.vertices) else {
                return ShapeGeometry::Sphere {
                    radius: radius_hint,
                };
            };
            let half = (maxs - mins) * 0.5;
            let radius = half.x.max(half.y);
            match kind {
                ShapeKind::Box => ShapeGeometry::Box { half_extents: half },
                ShapeKind::Cylinder => ShapeGeometry::Cylinder {
                    radius,
                    half_height: half.z,
                },
                ShapeKind::Cone => ShapeGeometry::Cone {
                    radius,
                    half_height: half.z,
                },
                _ => ShapeGeometry::Capsule {
                    radius,
                    half_height: (half.z - radius).max(0.0),
                },
            }
        }
        ShapeKind::Proxy => ShapeGeometry::Sphere {
            radius: radius_hint,
        },
    }
}

fn bounds(vertices: &[Vec3]) -> Option<(Vec3, Vec3)> {
    let first = *vertices.first()?;
    Some(vertices.iter().fold((first, first), |(lo, hi), v| {
        (lo.inf(v), hi.sup(v))
    }))
}

/// Fan-triangulate the colliding polygons, remembering which polygon each triangle
/// came from and its corner UVs.
fn triangulate(source: &MeshSource) -> MeshData {
    let mut mesh = MeshData {
        vertices: source.vertices.iter().map(|v| Point3::from(*v)).collect(),
        ..MeshData::default()
    };
    let vertex_count = source.vertices.len() as u32;
    let has_uvs = source
        .polygons
        .iter()
        .filter(|p| p.collide)
        .all(|p| p.uvs.len() == p.vertices.len());

    for (poly_index, poly) in source.polygons.iter().enumerate() {
        if !poly.collide || poly.vertices.len() < 3 {
            continue;
        }
        if poly.vertices.iter().any(|&v| v >= vertex_count) {
            warn!("polygon {} references a missing vertex, skipped", poly_index);
            continue;
        }
        for i in 1..poly.vertices.len() - 1 {
            mesh.triangles
                .push([poly.vertices[0], poly.vertices[i], poly.vertices[i + 1]]);
            mesh.polygon_index.push(poly_index as u32);
            if has_uvs {
                mesh.triangle_uvs
                    .push([poly.uvs[0], poly.uvs[i], poly.uvs[i + 1]]);
            }
        }
    }
    mesh
}

/// Merge vertices closer than `threshold`, dropping triangles that collapse.
fn weld_vertices(
    vertices: &[Point3],
    triangles: &[[u32; 3]],
    threshold: f32,
) -> SoftMesh {
    let threshold_sq = threshold * threshold;
    let mut welded: Vec<Point3> = Vec::new();
    let mut remap: Vec<u32> = Vec::with_capacity(vertices.len());

    for v in vertices {
        let existing = welded
            .iter()
            .position(|w| (w - v).norm_squared() <= threshold_sq);
        match existing {
            Some(i) => remap.push(i as u32),
            None => {
                remap.push(welded.len() as u32);
                welded.push(*v);
            }
        }
    }

    let (faces, source_triangles) = triangles
        .iter()
        .map(|t| t.map(|i| remap[i as usize]))
        .enumerate()
        .filter(|(_, t)| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
        .map(|(i, t)| (t, i))
        .unzip();
    SoftMesh {
        nodes: welded,
        faces,
        source_triangles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_source() -> MeshSource {
        MeshSource {
            vertices: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            polygons: vec![SourcePolygon {
                vertices: vec![0, 1, 2, 3],
                uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
                collide: true,
            }],
        }
    }

    #[test]
    fn same_mesh_deformer_and_kind_share_one_descriptor() {
        let mut registry = ShapeRegistry::new();
        let source = quad_source();

        let a = registry.find_or_create(MeshId(7), None, ShapeKind::ConcaveMesh, &source, 1.0);
        let b = registry.find_or_create(MeshId(7), None, ShapeKind::ConcaveMesh, &source, 1.0);
        let c = registry.find_or_create(MeshId(7), Some(DeformerId(1)), ShapeKind::ConcaveMesh, &source, 1.0);
        let d = registry.find_or_create(MeshId(7), None, ShapeKind::ConvexHull, &source, 1.0);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(registry.get(a).unwrap().ref_count(), 2);
    }

    #[test]
    fn release_frees_only_at_zero_and_forgets_the_mesh_key() {
        let mut registry = ShapeRegistry::new();
        let source = quad_source();
        let a = registry.find_or_create(MeshId(1), None, ShapeKind::ConcaveMesh, &source, 1.0);
        let _ = registry.find_or_create(MeshId(1), None, ShapeKind::ConcaveMesh, &source, 1.0);

        assert!(!registry.release(a));
        assert!(registry.get(a).is_some());
        assert!(registry.release(a));
        assert!(registry.get(a).is_none());

        let again = registry.find_or_create(MeshId(1), None, ShapeKind::ConcaveMesh, &source, 1.0);
        assert_ne!(again, a);
        assert_eq!(registry.get(again).unwrap().ref_count(), 1);
    }

    #[test]
    fn quads_are_split_into_two_triangles_of_the_same_polygon() {
        let mut registry = ShapeRegistry::new();
        let id = registry.find_or_create(MeshId(1), None, ShapeKind::ConcaveMesh, &quad_source(), 1.0);
        let mesh = registry.get(id).unwrap().geometry.mesh().unwrap();

        assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.polygon_index, vec![0, 0]);
        assert_eq!(mesh.triangle_uvs[1], [[0.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn compound_children_hold_references_until_removed() {
        let mut registry = ShapeRegistry::new();
        let parent = registry.create(ShapeGeometry::Compound(Vec::new()), 1.0);
        let child = registry.create(ShapeGeometry::Sphere { radius: 0.5 }, 0.5);

        assert!(registry.add_child(
            parent,
            ChildShape {
                shape: child,
                transform: Iso::translation(1.0, 0.0, 0.0),
                scale: Vec3::new(1.0, 1.0, 1.0),
                owner: Some(ControllerId(9)),
            }
        ));
        assert_eq!(registry.get(child).unwrap().ref_count(), 2);
        assert_eq!(registry.find_child(parent, ControllerId(9)), Some(0));

        let shape = registry.build(parent, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(shape.as_compound().unwrap().shapes().len(), 1);

        assert!(registry.remove_child(parent, 0));
        assert_eq!(registry.get(child).unwrap().ref_count(), 1);
        assert!(!registry.remove_child(parent, 0));
    }

    #[test]
    fn releasing_a_compound_releases_its_children() {
        let mut registry = ShapeRegistry::new();
        let child = registry.create(ShapeGeometry::Sphere { radius: 0.5 }, 0.5);
        let parent = registry.create(
            ShapeGeometry::Compound(vec![ChildShape {
                shape: child,
                transform: Iso::identity(),
                scale: Vec3::new(1.0, 1.0, 1.0),
                owner: None,
            }]),
            1.0,
        );
        registry.release(child);

        assert!(registry.release(parent));
        assert!(registry.is_empty());
    }

    #[test]
    fn degenerate_geometry_falls_back_to_a_sphere_of_the_radius_hint() {
        let mut registry = ShapeRegistry::new();
        let flat_box = registry.create(ShapeGeometry::Box { half_extents: Vec3::new(1.0, 0.0, 1.0) }, 0.75);
        let empty_compound = registry.create(ShapeGeometry::Compound(Vec::new()), 0.25);

        let shape = registry.build(flat_box, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(shape.as_ball().unwrap().radius, 0.75);

        let shape = registry.build(empty_compound, Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(shape.as_ball().unwrap().radius, 0.5);
    }

    #[test]
    fn build_applies_scale_to_primitives() {
        let mut registry = ShapeRegistry::new();
        let id = registry.create(ShapeGeometry::Box { half_extents: Vec3::new(1.0, 2.0, 3.0) }, 1.0);
        let shape = registry.build(id, Vec3::new(2.0, 1.0, 0.5));
        let cuboid = shape.as_cuboid().unwrap();
        assert_eq!(cuboid.half_extents, Vector::new(2.0, 2.0, 1.5));
    }

    #[test]
    fn welding_only_applies_when_a_threshold_is_set() {
        let mut registry = ShapeRegistry::new();
        let mut source = quad_source();
        // A duplicate of vertex 0 used by a second polygon.
        source.vertices.push(Vec3::new(-1.0, -1.0, 0.0001));
        source.polygons.push(SourcePolygon {
            vertices: vec![4, 1, 2],
            uvs: Vec::new(),
            collide: true,
        });
        let id = registry.find_or_create(MeshId(3), None, ShapeKind::ConcaveMesh, &source, 1.0);
        let unit = Vec3::new(1.0, 1.0, 1.0);

        let mesh = registry.soft_body_mesh(id, &unit).unwrap();
        assert_eq!(mesh.nodes.len(), 5);

        registry.set_welding_threshold(id, 0.01);
        let mesh = registry.soft_body_mesh(id, &unit).unwrap();
        assert_eq!(mesh.nodes.len(), 4);
        assert_eq!(mesh.faces.len(), 3);
        assert_eq!(mesh.source_triangles, vec![0, 1, 2]);
    }

    #[test]
    fn welding_keeps_the_source_of_surviving_faces() {
        let vertices = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0001, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        // Triangle 0 collapses once vertices 1 and 2 weld.
        let mesh = weld_vertices(&vertices, &[[0, 1, 2], [0, 2, 3]], 0.01);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        assert_eq!(mesh.source_triangles, vec![1]);
    }

    #[test]
    fn proxies_resolve_to_their_target_and_keep_it_alive() {
        let mut registry = ShapeRegistry::new();
        let target = registry.find_or_create(MeshId(5), None, ShapeKind::ConcaveMesh, &quad_source(), 1.0);
        let proxy = registry.create(ShapeGeometry::Proxy(target), 1.0);
        registry.release(target);

        assert!(registry.get(target).is_some());
        assert_eq!(registry.resolve(proxy).unwrap().kind(), ShapeKind::ConcaveMesh);

        assert!(registry.release(proxy));
        assert!(registry.get(target).is_none());
    }
}
