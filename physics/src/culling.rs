//! Visual proxies and frustum/occlusion culling.
//!
//! Renderable objects register an axis-aligned box (and optionally occluder geometry) as a
//! [`VisualProxy`]. [`CullingTree::cull`] walks a bounding-volume tree of those boxes:
//! - nodes fully outside any frustum plane are skipped with their whole subtree,
//! - with an [`OcclusionBuffer`], every node box is also tested against the depth already
//!   rasterized, and children are visited front to back so near occluders are drawn before
//!   the things they hide,
//! - at a leaf the proxy's occluder polygons (if any) are rasterized, then the callback runs.
//!
//! The tree is rebuilt lazily on the first cull after proxies were added, moved or removed.

use std::collections::BTreeMap;

use crate::controller::EntityInfo;
use crate::handle::IdAllocator;
use crate::math::{Mat3, Mat4, Vec3, Vec4};
use crate::occlusion::{FaceMode, OcclusionBuffer};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId(pub u32);

/// Axis-aligned box in world space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Normalizes swapped corners.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn merged(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }
}

/// Frustum plane `(normal, offset)` packed as `(nx, ny, nz, d)`.
///
/// Normals point into the frustum: a point is inside when `n . p + d >= 0`.
pub type Plane = Vec4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Side {
    Outside,
    Straddling,
    Inside,
}

fn classify(bounds: &Bounds, plane: &Plane) -> Side {
    let n = plane.xyz();
    // Corners farthest along and against the normal.
    let mut far = bounds.min;
    let mut near = bounds.max;
    for k in 0..3 {
        if n[k] >= 0.0 {
            far[k] = bounds.max[k];
            near[k] = bounds.min[k];
        }
    }
    if n.dot(&far) + plane.w < 0.0 {
        Side::Outside
    } else if n.dot(&near) + plane.w >= 0.0 {
        Side::Inside
    } else {
        Side::Straddling
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OccluderPolygon {
    Triangle([Vec3; 3]),
    Quad([Vec3; 4]),
}

/// Model-space geometry drawn into the occlusion buffer.
#[derive(Clone, Debug)]
pub struct Occluder {
    pub polygons: Vec<OccluderPolygon>,
    /// Rasterize both windings.
    pub two_sided: bool,
    pub model_to_world: Mat4,
}

impl Occluder {
    pub fn new(polygons: Vec<OccluderPolygon>, model_to_world: Mat4) -> Self {
        Self {
            polygons,
            two_sided: false,
            model_to_world,
        }
    }

    /// Mirroring transforms flip the on-screen winding of front faces.
    fn face_mode(&self) -> FaceMode {
        if self.two_sided {
            return FaceMode::DoubleSided;
        }
        let linear: Mat3 = self.model_to_world.fixed_view::<3, 3>(0, 0).into_owned();
        if linear.determinant() < 0.0 {
            FaceMode::Back
        } else {
            FaceMode::Front
        }
    }

    fn rasterize(&self, ocb: &mut OcclusionBuffer) {
        let face = self.face_mode();
        ocb.set_model_matrix(&self.model_to_world);
        for poly in &self.polygons {
            match poly {
                OccluderPolygon::Triangle([a, b, c]) => ocb.append_triangle(a, b, c, face),
                OccluderPolygon::Quad([a, b, c, d]) => ocb.append_quad(a, b, c, d, face),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct VisualProxy {
    pub info: EntityInfo,
    pub bounds: Bounds,
    pub occluder: Option<Occluder>,
}

#[derive(Clone, Debug)]
enum Node {
    Leaf { bounds: Bounds, proxy: ProxyId },
    Branch { bounds: Bounds, children: [usize; 2] },
}

impl Node {
    fn bounds(&self) -> &Bounds {
        match self {
            Node::Leaf { bounds, .. } | Node::Branch { bounds, .. } => bounds,
        }
    }
}

#[derive(Debug, Default)]
pub struct CullingTree {
    proxies: BTreeMap<ProxyId, VisualProxy>,
    ids: IdAllocator,
    nodes: Vec<Node>,
    root: Option<usize>,
    dirty: bool,
}

impl CullingTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, id: ProxyId) -> Option<&VisualProxy> {
        self.proxies.get(&id)
    }

    pub fn insert(&mut self, info: EntityInfo, bounds: Bounds, occluder: Option<Occluder>) -> ProxyId {
        let id = ProxyId(self.ids.next_id());
        self.proxies.insert(
            id,
            VisualProxy {
                info,
                bounds,
                occluder,
            },
        );
        self.dirty = true;
        id
    }

    pub fn update(&mut self, id: ProxyId, bounds: Bounds) -> bool {
        match self.proxies.get_mut(&id) {
            Some(proxy) => {
                if proxy.bounds != bounds {
                    proxy.bounds = bounds;
                    self.dirty = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn set_occluder(&mut self, id: ProxyId, occluder: Option<Occluder>) -> bool {
        match self.proxies.get_mut(&id) {
            Some(proxy) => {
                proxy.occluder = occluder;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: ProxyId) -> Option<VisualProxy> {
        let removed = self.proxies.remove(&id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn rebuild(&mut self) {
        self.nodes.clear();
        let mut leaves: Vec<(ProxyId, Bounds)> = self
            .proxies
            .iter()
            .map(|(id, p)| (*id, p.bounds))
            .collect();
        self.root = if leaves.is_empty() {
            None
        } else {
            Some(self.build(&mut leaves))
        };
        self.dirty = false;
    }

    /// Top-down median split along the widest axis of the leaf centers.
    fn build(&mut self, leaves: &mut [(ProxyId, Bounds)]) -> usize {
        if let [(proxy, bounds)] = leaves {
            self.nodes.push(Node::Leaf {
                bounds: *bounds,
                proxy: *proxy,
            });
            return self.nodes.len() - 1;
        }

        let first = leaves[0].1.center();
        let (lo, hi) = leaves.iter().fold((first, first), |(lo, hi), (_, b)| {
            let c = b.center();
            (lo.inf(&c), hi.sup(&c))
        });
        let axis = (hi - lo).imax();
        leaves.sort_by(|a, b| a.1.center()[axis].total_cmp(&b.1.center()[axis]));

        let (left, right) = leaves.split_at_mut(leaves.len() / 2);
        let l = self.build(left);
        let r = self.build(right);
        let bounds = self.nodes[l].bounds().merged(self.nodes[r].bounds());
        self.nodes.push(Node::Branch {
            bounds,
            children: [l, r],
        });
        self.nodes.len() - 1
    }

    /// Report every proxy inside the frustum and, with `occlusion`, not hidden by occluders.
    ///
    /// Front-to-back ordering uses the normal of `planes[0]`, which must be the near plane.
    /// Returns false when there is nothing to traverse.
    pub fn cull(
        &mut self,
        planes: &[Plane; 6],
        mut occlusion: Option<&mut OcclusionBuffer>,
        mut callback: impl FnMut(&EntityInfo),
    ) -> bool {
        if self.dirty {
            self.rebuild();
        }
        let Some(root) = self.root else {
            return false;
        };

        let view = planes[0].xyz();
        let mut stack = vec![(root, 0u8)];
        while let Some((index, mut inside_mask)) = stack.pop() {
            let node = &self.nodes[index];
            let bounds = node.bounds();

            let mut culled = false;
            for (k, plane) in planes.iter().enumerate() {
                let bit = 1u8 << k;
                if inside_mask & bit != 0 {
                    continue;
                }
                match classify(bounds, plane) {
                    Side::Outside => {
                        culled = true;
                        break;
                    }
                    Side::Inside => inside_mask |= bit,
                    Side::Straddling => {}
                }
            }
            if culled {
                continue;
            }
            if let Some(ocb) = occlusion.as_deref_mut() {
                if !ocb.query_box(&bounds.center(), &bounds.extents()) {
                    continue;
                }
            }

            match node {
                Node::Branch { children, .. } => {
                    let [a, b] = *children;
                    let depth = |i: usize| view.dot(&self.nodes[i].bounds().center());
                    // Pushed far first so the nearer child pops next.
                    if depth(a) <= depth(b) {
                        stack.push((b, inside_mask));
                        stack.push((a, inside_mask));
                    } else {
                        stack.push((a, inside_mask));
                        stack.push((b, inside_mask));
                    }
                }
                Node::Leaf { proxy, .. } => {
                    let Some(proxy) = self.proxies.get(proxy) else {
                        continue;
                    };
                    if let (Some(ocb), Some(occluder)) = (occlusion.as_deref_mut(), proxy.occluder.as_ref()) {
                        occluder.rasterize(ocb);
                    }
                    callback(&proxy.info);
                }
            }
        }
        true
    }
}
