/*!
Software occlusion buffer.

A small depth buffer filled by rasterizing occluder polygons, then queried with bounding
boxes to decide whether anything behind the occluders can be visible.

Depth convention
- Each pixel stores `1 / w` of the clip-space position, so larger values are nearer and an
  untouched pixel (0) is infinitely far away.
- Occluders keep the larger value per pixel. A box face passes as soon as one covered pixel
  is at or in front of the stored value, so the query is conservative: it only reports
  "occluded" when every tested pixel lies strictly behind recorded occluder depth.

Polygons are clipped against the near (`z + w >= 0`) and far (`z - w <= 0`) planes in
homogeneous coordinates, projected, fanned into triangles and scan-converted on an integer
pixel lattice. Triangles one pixel wide or tall are walked along their edges instead,
since the plane equation is degenerate there.
*/

use crate::math::{Mat4, Vec3, Vec4};

/// Which triangle windings are rasterized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaceMode {
    DoubleSided,
    /// Counter-clockwise on screen only.
    Front,
    /// Clockwise on screen only (mirrored geometry).
    Back,
}

impl FaceMode {
    fn sign(self) -> f32 {
        match self {
            FaceMode::DoubleSided => 0.0,
            FaceMode::Front => 1.0,
            FaceMode::Back => -1.0,
        }
    }
}

trait DepthTest {
    /// Whether drawing with this test counts as writing to the buffer.
    const WRITES: bool;

    /// Returns true to stop rasterizing.
    fn process(stored: &mut f32, depth: f32) -> bool;
}

struct WriteMax;

impl DepthTest for WriteMax {
    const WRITES: bool = true;

    #[inline]
    fn process(stored: &mut f32, depth: f32) -> bool {
        if *stored < depth {
            *stored = depth;
        }
        false
    }
}

struct VisibleTest;

impl DepthTest for VisibleTest {
    const WRITES: bool = false;

    #[inline]
    fn process(stored: &mut f32, depth: f32) -> bool {
        *stored <= depth
    }
}

/// Box faces as corner indices, wound counter-clockwise seen from outside.
const BOX_FACES: [[usize; 4]; 6] = [
    [1, 0, 3, 2],
    [4, 5, 6, 7],
    [4, 7, 3, 0],
    [6, 5, 1, 2],
    [7, 6, 2, 3],
    [5, 4, 0, 1],
];

#[derive(Debug, Clone)]
pub struct OcclusionBuffer {
    buffer: Vec<f32>,
    sizes: [i32; 2],
    scales: [f32; 2],
    offsets: [f32; 2],
    world_to_clip: Mat4,
    model_to_clip: Mat4,
    initialized: bool,
    occlusion: bool,
    min_area: f32,
}

impl Default for OcclusionBuffer {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            sizes: [0, 0],
            scales: [0.0, 0.0],
            offsets: [0.0, 0.0],
            world_to_clip: Mat4::identity(),
            model_to_clip: Mat4::identity(),
            initialized: false,
            occlusion: false,
            min_area: 0.0,
        }
    }
}

impl OcclusionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the buffer for a frame.
    ///
    /// `resolution` is the buffer size along the larger side of `viewport`
    /// (`[x, y, width, height]`); both sides are rounded to even pixel counts. The pixel
    /// storage is cleared lazily by the first occluder.
    pub fn setup(&mut self, resolution: u32, viewport: [i32; 4], world_to_clip: Mat4) {
        self.initialized = false;
        self.occlusion = false;

        let (width, height) = (viewport[2].max(1), viewport[3].max(1));
        let ratio = 1.0 / (2.0 * width.max(height) as f64);
        let res = resolution as f64;
        self.sizes = [
            2 * ((res * width as f64 * ratio + 0.5) as i32),
            2 * ((res * height as f64 * ratio + 0.5) as i32),
        ];
        self.scales = [(self.sizes[0] / 2) as f32, (self.sizes[1] / 2) as f32];
        self.offsets = [self.scales[0] + 0.5, self.scales[1] + 0.5];
        self.world_to_clip = world_to_clip;
    }

    /// Triangles whose projected area (device units) is below this are skipped.
    pub fn set_min_area(&mut self, min_area: f32) {
        self.min_area = min_area.max(0.0);
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (usize, usize) {
        (self.sizes[0].max(0) as usize, self.sizes[1].max(0) as usize)
    }

    /// True once any occluder reached the rasterizer.
    #[inline]
    pub fn has_occluders(&self) -> bool {
        self.occlusion
    }

    /// Transform for the following occluder submissions.
    pub fn set_model_matrix(&mut self, model_to_world: &Mat4) {
        self.model_to_clip = self.world_to_clip * model_to_world;
        if !self.initialized {
            self.initialize();
        }
    }

    fn initialize(&mut self) {
        let (w, h) = self.size();
        // Reuses the allocation of earlier frames.
        self.buffer.clear();
        self.buffer.resize(w * h, 0.0);
        self.initialized = true;
        self.occlusion = false;
    }

    /// Rasterize a model-space triangle.
    pub fn append_triangle(&mut self, a: &Vec3, b: &Vec3, c: &Vec3, face: FaceMode) {
        if !self.initialized {
            self.initialize();
        }
        let m = self.model_to_clip;
        let p = [to_clip(&m, a), to_clip(&m, b), to_clip(&m, c)];
        self.clip_draw::<WriteMax>(&p, face.sign(), self.min_area);
    }

    /// Rasterize a model-space quad.
    pub fn append_quad(&mut self, a: &Vec3, b: &Vec3, c: &Vec3, d: &Vec3, face: FaceMode) {
        if !self.initialized {
            self.initialize();
        }
        let m = self.model_to_clip;
        let p = [to_clip(&m, a), to_clip(&m, b), to_clip(&m, c), to_clip(&m, d)];
        self.clip_draw::<WriteMax>(&p, face.sign(), self.min_area);
    }

    /// Whether a world-space box (center, half extents) may be visible.
    pub fn query_box(&mut self, center: &Vec3, extents: &Vec3) -> bool {
        if !self.occlusion {
            return true;
        }
        let m = self.world_to_clip;
        let (c, e) = (center, extents);
        let corners = [
            Vec3::new(c.x - e.x, c.y - e.y, c.z - e.z),
            Vec3::new(c.x + e.x, c.y - e.y, c.z - e.z),
            Vec3::new(c.x + e.x, c.y + e.y, c.z - e.z),
            Vec3::new(c.x - e.x, c.y + e.y, c.z - e.z),
            Vec3::new(c.x - e.x, c.y - e.y, c.z + e.z),
            Vec3::new(c.x + e.x, c.y - e.y, c.z + e.z),
            Vec3::new(c.x + e.x, c.y + e.y, c.z + e.z),
            Vec3::new(c.x - e.x, c.y + e.y, c.z + e.z),
        ]
        .map(|p| to_clip(&m, &p));

        // A box crossing the near plane is large on screen; not worth testing.
        if corners.iter().any(|x| x.z + x.w <= 0.0) {
            return true;
        }
        BOX_FACES.iter().any(|face| {
            let quad = face.map(|i| corners[i]);
            self.clip_draw::<VisibleTest>(&quad, 1.0, 0.0)
        })
    }

    fn clip_draw<P: DepthTest>(&mut self, polygon: &[Vec4], face: f32, min_area: f32) -> bool {
        let mut clipped = clip_polygon(polygon);
        if clipped.len() < 3 {
            return false;
        }
        project(&mut clipped);
        for i in 2..clipped.len() {
            if self.draw::<P>(&clipped[0], &clipped[i - 1], &clipped[i], face, min_area) {
                return true;
            }
        }
        false
    }

    fn pixel(&self, v: &Vec4) -> (i64, i64) {
        (
            (v.x * self.scales[0] + self.offsets[0]) as i64,
            (v.y * self.scales[1] + self.offsets[1]) as i64,
        )
    }

    /// Write or test one device-space triangle.
    fn draw<P: DepthTest>(&mut self, a: &Vec4, b: &Vec4, c: &Vec4, face: f32, min_area: f32) -> bool {
        let area2 = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if face * area2 < 0.0 || area2.abs() < min_area {
            return false;
        }
        if P::WRITES {
            self.occlusion = true;
        }

        // Negative area is only possible double-sided; swap to keep the edge functions positive.
        let (b, c) = if area2 < 0.0 { (c, b) } else { (b, c) };
        let (p0, p1, p2) = (self.pixel(a), self.pixel(b), self.pixel(c));
        let mut x = [p0.0, p1.0, p2.0];
        let mut y = [p0.1, p1.1, p2.1];
        let mut z = [a.z, b.z, c.z];

        let (size_x, size_y) = (self.sizes[0] as i64, self.sizes[1] as i64);
        let mix = x.iter().copied().min().unwrap_or(0).max(0);
        let mxx = (1 + x.iter().copied().max().unwrap_or(0)).min(size_x);
        let miy = y.iter().copied().min().unwrap_or(0).max(0);
        let mxy = (1 + y.iter().copied().max().unwrap_or(0)).min(size_y);
        let width = mxx - mix;
        let height = mxy - miy;
        if width <= 0 || height <= 0 {
            return false;
        }

        let signed_area =
            x[2] * y[0] + x[0] * y[1] - x[2] * y[1] - x[0] * y[2] + x[1] * y[2] - x[1] * y[0];

        if width * height <= 1 {
            let idx = (miy * size_x + mix) as usize;
            return z.iter().any(|&v| P::process(&mut self.buffer[idx], v));
        }
        if width == 1 {
            sort_by_coord(&mut y, &mut z);
            let start = (miy * size_x + mix) as usize;
            return self.draw_thin::<P>(&y, &z, miy, mxy, start, size_x as usize);
        }
        if height == 1 {
            sort_by_coord(&mut x, &mut z);
            let start = (miy * size_x + mix) as usize;
            return self.draw_thin::<P>(&x, &z, mix, mxx, start, 1);
        }
        if signed_area == 0 {
            return false;
        }

        // General case: incremental edge functions and depth plane.
        let dx = [y[0] - y[1], y[1] - y[2], y[2] - y[0]];
        let dy = [
            x[1] - x[0] - dx[0] * width,
            x[2] - x[1] - dx[1] * width,
            x[0] - x[2] - dx[2] * width,
        ];
        let ia = 1.0 / signed_area as f32;
        let (xf, yf) = (x.map(|v| v as f32), y.map(|v| v as f32));
        let dzx = ia * (yf[2] * (z[1] - z[0]) + yf[1] * (z[0] - z[2]) + yf[0] * (z[2] - z[1]));
        let dzy = ia * (xf[2] * (z[0] - z[1]) + xf[0] * (z[1] - z[2]) + xf[1] * (z[2] - z[0]))
            - dzx * width as f32;
        let mut edge = [
            miy * x[1] + mix * y[0] - x[1] * y[0] - mix * y[1] + x[0] * y[1] - miy * x[0],
            miy * x[2] + mix * y[1] - x[2] * y[1] - mix * y[2] + x[1] * y[2] - miy * x[1],
            miy * x[0] + mix * y[2] - x[0] * y[2] - mix * y[0] + x[2] * y[0] - miy * x[2],
        ];
        let mut v = ia * (z[2] * edge[0] as f32 + z[0] * edge[1] as f32 + z[1] * edge[2] as f32);

        for iy in miy..mxy {
            let row = (iy * size_x) as usize;
            for ix in mix..mxx {
                if edge.iter().all(|&e| e >= 0) {
                    if P::process(&mut self.buffer[row + ix as usize], v) {
                        return true;
                    }
                }
                for k in 0..3 {
                    edge[k] += dx[k];
                }
                v += dzx;
            }
            for k in 0..3 {
                edge[k] += dy[k];
            }
            v += dzy;
        }
        false
    }

    /// One pixel wide (or tall) triangle: interpolate depth along each overlapping edge.
    ///
    /// `u` holds the vertex coordinates along the long direction, sorted ascending.
    fn draw_thin<P: DepthTest>(
        &mut self,
        u: &[i64; 3],
        z: &[f32; 3],
        start_u: i64,
        end_u: i64,
        start: usize,
        stride: usize,
    ) -> bool {
        let mut du = [u[0] - u[1], u[1] - u[2], u[2] - u[0]];
        let mut dz = [0.0f32; 3];
        for k in 0..3 {
            if du[k] != 0 {
                dz[k] = (z[k] - z[(k + 1) % 3]) / du[k] as f32;
            }
        }
        let mut v = [
            dz[0] * (start_u - u[0]) as f32 + z[0],
            dz[1] * (start_u - u[1]) as f32 + z[1],
            dz[2] * (start_u - u[2]) as f32 + z[2],
        ];
        du = [u[1] - u[0], u[0] - u[1], u[2] - u[0]];

        let mut idx = start;
        for _ in start_u..end_u {
            for k in 0..3 {
                if du[k] >= 0 && P::process(&mut self.buffer[idx], v[k]) {
                    return true;
                }
            }
            idx += stride;
            for k in 0..3 {
                v[k] += dz[k];
            }
            du[0] -= 1;
            du[1] += 1;
            du[2] -= 1;
        }
        false
    }
}

#[inline]
fn to_clip(m: &Mat4, p: &Vec3) -> Vec4 {
    m * Vec4::new(p.x, p.y, p.z, 1.0)
}

/// Sort vertices by one pixel coordinate, carrying their depth along.
fn sort_by_coord(coord: &mut [i64; 3], z: &mut [f32; 3]) {
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        if coord[i] > coord[j] {
            coord.swap(i, j);
            z.swap(i, j);
        }
    }
}

/// Replace x, y by their perspective division and z by `1 / w`.
fn project(polygon: &mut [Vec4]) {
    for p in polygon {
        p.z = 1.0 / p.w;
        p.x *= p.z;
        p.y *= p.z;
    }
}

/// Clip a closed polygon against the near and far planes in clip space.
pub fn clip_polygon(polygon: &[Vec4]) -> Vec<Vec4> {
    let near = clip_against(polygon, |p| p.z + p.w, |s| s < 0.0);
    if near.len() < 3 {
        return near;
    }
    clip_against(&near, |p| p.z - p.w, |s| s > 0.0)
}

/// One Sutherland-Hodgman pass. `distance` is linear in clip space.
fn clip_against(
    polygon: &[Vec4],
    distance: impl Fn(&Vec4) -> f32,
    outside: impl Fn(f32) -> bool,
) -> Vec<Vec4> {
    let s: Vec<f32> = polygon.iter().map(&distance).collect();
    let outside_count = s.iter().filter(|&&d| outside(d)).count();
    if outside_count == polygon.len() {
        return Vec::new();
    }
    if outside_count == 0 {
        return polygon.to_vec();
    }

    let n = polygon.len();
    let mut out = Vec::with_capacity(n + 1);
    let mut i = n - 1;
    for j in 0..n {
        let (a, b) = (&polygon[i], &polygon[j]);
        let t = s[i] / (s[i] - s[j]);
        if t > 0.0 && t < 1.0 {
            out.push(a + (b - a) * t);
        }
        if !outside(s[j]) && s[j] != 0.0 {
            out.push(*b);
        }
        i = j;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Mat4 {
        // Camera at the origin looking down -Z.
        Mat4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0)
    }

    fn buffer() -> OcclusionBuffer {
        let mut ocb = OcclusionBuffer::new();
        ocb.setup(64, [0, 0, 640, 480], camera());
        ocb
    }

    fn wall(ocb: &mut OcclusionBuffer, z: f32) {
        ocb.set_model_matrix(&Mat4::identity());
        ocb.append_quad(
            &Vec3::new(-50.0, -50.0, z),
            &Vec3::new(50.0, -50.0, z),
            &Vec3::new(50.0, 50.0, z),
            &Vec3::new(-50.0, 50.0, z),
            FaceMode::DoubleSided,
        );
    }

    #[test]
    fn buffer_size_follows_the_viewport_aspect() {
        let ocb = buffer();
        assert_eq!(ocb.size(), (64, 48));
        assert!(!ocb.has_occluders());
    }

    #[test]
    fn everything_is_visible_before_any_occluder() {
        let mut ocb = buffer();
        assert!(ocb.query_box(&Vec3::new(0.0, 0.0, -20.0), &Vec3::new(1.0, 1.0, 1.0)));
        assert!(ocb.query_box(&Vec3::new(0.0, 0.0, 20.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn a_nearer_wall_hides_the_box() {
        let mut ocb = buffer();
        wall(&mut ocb, -5.0);
        assert!(ocb.has_occluders());
        assert!(!ocb.query_box(&Vec3::new(0.0, 0.0, -20.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn a_farther_wall_never_hides_the_box() {
        let mut ocb = buffer();
        wall(&mut ocb, -50.0);
        assert!(ocb.query_box(&Vec3::new(0.0, 0.0, -20.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn submission_order_does_not_matter_for_the_kept_depth() {
        let mut ocb = buffer();
        wall(&mut ocb, -5.0);
        wall(&mut ocb, -50.0);
        assert!(!ocb.query_box(&Vec3::new(0.0, 0.0, -20.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn boxes_crossing_the_near_plane_are_visible() {
        let mut ocb = buffer();
        wall(&mut ocb, -5.0);
        assert!(ocb.query_box(&Vec3::new(0.0, 0.0, 0.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn back_facing_occluders_are_skipped_when_single_sided() {
        let mut ocb = buffer();
        ocb.set_model_matrix(&Mat4::identity());
        // Clockwise seen from the camera.
        ocb.append_triangle(
            &Vec3::new(-50.0, -50.0, -5.0),
            &Vec3::new(0.0, 50.0, -5.0),
            &Vec3::new(50.0, -50.0, -5.0),
            FaceMode::Front,
        );
        assert!(!ocb.has_occluders());
        assert!(ocb.query_box(&Vec3::new(0.0, 0.0, -20.0), &Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn polygons_behind_the_camera_are_clipped_away() {
        let tri = [
            Vec4::new(0.0, 0.0, -2.0, 1.0),
            Vec4::new(1.0, 0.0, -2.0, 1.0),
            Vec4::new(0.0, 1.0, -2.0, 1.0),
        ];
        assert!(clip_polygon(&tri).is_empty());

        // One vertex behind the near plane: the triangle becomes a quad.
        let straddling = [
            Vec4::new(0.0, 0.0, -2.0, 1.0),
            Vec4::new(1.0, 0.0, 0.0, 1.0),
            Vec4::new(0.0, 1.0, 0.0, 1.0),
        ];
        assert_eq!(clip_polygon(&straddling).len(), 4);
    }
}
