//! Visual proxies and view culling.

use crate::controller::EntityInfo;
use crate::culling::{Bounds, Occluder, Plane, ProxyId};
use crate::math::Mat4;

use super::PhysicsWorld;

impl PhysicsWorld {
    /// Register a visual bound for culling. Proxies are independent of controllers.
    pub fn add_visual_proxy(&mut self, info: EntityInfo, bounds: Bounds, occluder: Option<Occluder>) -> ProxyId {
        self.culling.insert(info, bounds, occluder)
    }

    pub fn update_visual_proxy(&mut self, id: ProxyId, bounds: Bounds) -> bool {
        self.culling.update(id, bounds)
    }

    pub fn set_visual_occluder(&mut self, id: ProxyId, occluder: Option<Occluder>) -> bool {
        self.culling.set_occluder(id, occluder)
    }

    pub fn remove_visual_proxy(&mut self, id: ProxyId) -> bool {
        self.culling.remove(id).is_some()
    }

    /// Report every visible proxy to `callback`.
    ///
    /// `planes[0]` must be the near plane. `occlusion_resolution` of `None` uses the
    /// configured default; a resolution of 0 turns occlusion off. Returns false when there
    /// are no proxies.
    pub fn cull(
        &mut self,
        planes: &[Plane; 6],
        occlusion_resolution: Option<u32>,
        viewport: [i32; 4],
        world_to_clip: Mat4,
        callback: impl FnMut(&EntityInfo),
    ) -> bool {
        let resolution = occlusion_resolution.unwrap_or(self.config.occlusion.resolution);
        if resolution == 0 {
            return self.culling.cull(planes, None, callback);
        }
        self.occlusion.setup(resolution, viewport, world_to_clip);
        self.occlusion.set_min_area(self.config.occlusion.min_area);
        self.culling.cull(planes, Some(&mut self.occlusion), callback)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::world;
    use crate::controller::EntityInfo;
    use crate::culling::{Bounds, Occluder, OccluderPolygon, Plane};
    use crate::math::{Mat4, Vec3, Vec4};

    fn frustum() -> [Plane; 6] {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        [
            Vec4::new(0.0, 0.0, -1.0, -0.1),
            Vec4::new(0.0, 0.0, 1.0, 100.0),
            Vec4::new(s, 0.0, -s, 0.0),
            Vec4::new(-s, 0.0, -s, 0.0),
            Vec4::new(0.0, s, -s, 0.0),
            Vec4::new(0.0, -s, -s, 0.0),
        ]
    }

    fn cube_at(z: f32) -> Bounds {
        Bounds::new(Vec3::new(-1.0, -1.0, z - 1.0), Vec3::new(1.0, 1.0, z + 1.0))
    }

    #[test]
    fn world_culling_uses_occluders_on_request() {
        let mut w = world();
        let mut wall = Occluder::new(
            vec![OccluderPolygon::Quad([
                Vec3::new(-50.0, -50.0, 0.0),
                Vec3::new(50.0, -50.0, 0.0),
                Vec3::new(50.0, 50.0, 0.0),
                Vec3::new(-50.0, 50.0, 0.0),
            ])],
            Mat4::new_translation(&Vec3::new(0.0, 0.0, -5.0)),
        );
        wall.two_sided = true;
        w.add_visual_proxy(EntityInfo::new(1, "wall"), cube_at(-5.0), Some(wall));
        let hidden = w.add_visual_proxy(EntityInfo::new(2, "hidden"), cube_at(-30.0), None);

        let camera = Mat4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0);
        let mut seen = Vec::new();
        assert!(w.cull(&frustum(), Some(64), [0, 0, 640, 640], camera, |i| seen.push(i.id)));
        seen.sort_unstable();
        assert_eq!(seen, vec![1]);

        // Occlusion is off by default.
        seen.clear();
        assert!(w.cull(&frustum(), None, [0, 0, 640, 640], camera, |i| seen.push(i.id)));
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);

        assert!(w.remove_visual_proxy(hidden));
        assert!(!w.remove_visual_proxy(hidden));
    }
}
