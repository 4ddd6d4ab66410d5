//! Binary world snapshots for offline inspection.
//!
//! The file is a single bincode-encoded [`WorldSnapshot`]: every controller with its pose,
//! velocities, filtering and resolved shape parameters. Mesh geometry is summarized by
//! counts rather than written out.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use super::PhysicsWorld;
use crate::body::BodyKind;
use crate::controller::EntityInfo;
use crate::error::Result;
use crate::math::to_array;
use crate::shape::{ShapeGeometry, ShapeKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShapeRecord {
    Sphere { radius: f32 },
    Box { half_extents: [f32; 3] },
    Cylinder { radius: f32, half_height: f32 },
    Cone { radius: f32, half_height: f32 },
    Capsule { radius: f32, half_height: f32 },
    Mesh {
        kind: ShapeKind,
        vertices: usize,
        triangles: usize,
    },
    Compound { children: usize },
    Empty,
}

impl ShapeRecord {
    fn from_geometry(geometry: &ShapeGeometry) -> Self {
        match geometry {
            ShapeGeometry::Sphere { radius } => ShapeRecord::Sphere { radius: *radius },
            ShapeGeometry::Box { half_extents } => ShapeRecord::Box {
                half_extents: to_array(half_extents),
            },
            ShapeGeometry::Cylinder {
                radius,
                half_height,
            } => ShapeRecord::Cylinder {
                radius: *radius,
                half_height: *half_height,
            },
            ShapeGeometry::Cone {
                radius,
                half_height,
            } => ShapeRecord::Cone {
                radius: *radius,
                half_height: *half_height,
            },
            ShapeGeometry::Capsule {
                radius,
                half_height,
            } => ShapeRecord::Capsule {
                radius: *radius,
                half_height: *half_height,
            },
            ShapeGeometry::ConvexHull(mesh) | ShapeGeometry::ConcaveMesh(mesh) => {
                ShapeRecord::Mesh {
                    kind: geometry.kind(),
                    vertices: mesh.vertices.len(),
                    triangles: mesh.triangles.len(),
                }
            }
            ShapeGeometry::Compound(children) => ShapeRecord::Compound {
                children: children.len(),
            },
            ShapeGeometry::Proxy(_) | ShapeGeometry::Empty => ShapeRecord::Empty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub controller: u32,
    /// Entity name, or `ctrl<id>` for unnamed controllers.
    pub name: String,
    pub info: EntityInfo,
    pub kind: BodyKind,
    pub registered: bool,
    pub position: [f32; 3],
    /// Quaternion as `[i, j, k, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub mass: f32,
    pub collision_group: u16,
    pub collision_mask: u16,
    pub shape: ShapeRecord,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub gravity: [f32; 3],
    pub objects: Vec<ObjectRecord>,
}

impl PhysicsWorld {
    /// Snapshot of every controller, in id order.
    pub fn snapshot(&self) -> WorldSnapshot {
        let objects = self
            .controllers
            .values()
            .map(|ctrl| {
                let body = self.bodies.get(ctrl.body);
                let pose = body.map(|b| *b.position()).unwrap_or_else(|| ctrl.transform().iso());
                let q = pose.rotation.coords;
                let shape = self
                    .shapes
                    .resolve(ctrl.shape)
                    .map(|d| ShapeRecord::from_geometry(&d.geometry))
                    .unwrap_or(ShapeRecord::Empty);

                let name = if ctrl.info.name.is_empty() {
                    format!("ctrl{}", ctrl.id.0)
                } else {
                    ctrl.info.name.clone()
                };

                ObjectRecord {
                    controller: ctrl.id.0,
                    name,
                    info: ctrl.info.clone(),
                    kind: ctrl.state.kind,
                    registered: ctrl.registered,
                    position: to_array(&pose.translation.vector),
                    rotation: [q.x, q.y, q.z, q.w],
                    scale: to_array(&ctrl.scale),
                    linear_velocity: body.map(|b| to_array(b.linvel())).unwrap_or_default(),
                    angular_velocity: body.map(|b| to_array(b.angvel())).unwrap_or_default(),
                    mass: ctrl.state.mass,
                    collision_group: ctrl.state.collision_group,
                    collision_mask: ctrl.state.collision_mask,
                    shape,
                }
            })
            .collect();

        WorldSnapshot {
            gravity: to_array(&self.gravity),
            objects,
        }
    }

    /// Write [`Self::snapshot`] to `path`. Returns the number of objects written.
    pub fn export_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let write = || -> Result<()> {
            let mut writer = BufWriter::new(File::create(path)?);
            bincode::serialize_into(&mut writer, &snapshot)?;
            Ok(())
        };
        match write() {
            Ok(()) => {
                info!(
                    "exported {} physics object(s) to {}",
                    snapshot.objects.len(),
                    path.display()
                );
                Ok(snapshot.objects.len())
            }
            Err(err) => {
                error!("physics export to {} failed: {err}", path.display());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floor, sphere, world};
    use super::*;

    #[test]
    fn snapshots_describe_every_controller() {
        let mut w = world();
        let floor = floor(&mut w);
        let ball = sphere(&mut w, BodyKind::Rigid, crate::math::Vec3::new(0.0, 0.0, 2.0));

        let snapshot = w.snapshot();
        assert_eq!(snapshot.objects.len(), 2);
        let floor_record = &snapshot.objects[0];
        assert_eq!(floor_record.controller, floor.0);
        assert!(floor_record.registered);
        assert_eq!(
            floor_record.shape,
            ShapeRecord::Box {
                half_extents: [10.0, 10.0, 0.5]
            }
        );
        let ball_record = &snapshot.objects[1];
        assert_eq!(ball_record.controller, ball.0);
        assert_eq!(ball_record.name, ball_record.info.name);
        assert!(!ball_record.registered);
        assert_eq!(ball_record.position, [0.0, 0.0, 2.0]);
        assert_eq!(ball_record.shape, ShapeRecord::Sphere { radius: 0.5 });
    }

    #[test]
    fn exports_round_trip_through_bincode() {
        let mut w = world();
        floor(&mut w);
        let path = std::env::temp_dir().join(format!("physics-export-{}.bin", std::process::id()));

        assert_eq!(w.export_file(&path).unwrap(), 1);
        let bytes = std::fs::read(&path).unwrap();
        let decoded: WorldSnapshot = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, w.snapshot());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn export_errors_surface() {
        let w = world();
        let missing = std::env::temp_dir().join("no-such-dir-for-physics").join("x.bin");
        assert!(w.export_file(missing).is_err());
    }
}
