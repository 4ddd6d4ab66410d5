pub mod bitmask_flags;
pub mod body;
pub mod character;
pub mod config;
pub mod constraint;
pub mod contact;
pub mod controller;
pub mod culling;
pub mod error;
pub mod fh_spring;
pub mod filter;
pub mod handle;
pub mod math;
pub mod occlusion;
pub mod raycast;
pub mod settings;
pub mod shape;
pub mod soft;
pub mod vehicle;
pub mod world;

pub use body::{BodyFlag, BodyKind, BodyState, CharacterParams, FhParams, SoftParams};
pub use config::{OcclusionConfig, SolverKind, WorldConfig};
pub use constraint::{ConstraintDesc, ConstraintKind, DofLimit, DofMotor};
pub use contact::{CollisionData, ContactPoint};
pub use controller::{ControllerMut, DefaultMotionState, EntityInfo, MotionState};
pub use culling::{Bounds, Occluder, OccluderPolygon, Plane, ProxyId};
pub use error::{PhysicsError, Result};
pub use filter::BroadphaseFilter;
pub use handle::{ConstraintId, ControllerId};
pub use math::Transform;
pub use occlusion::{FaceMode, OcclusionBuffer};
pub use raycast::{IgnoreController, RayFilter, RayHit};
pub use shape::{ChildShape, MeshData, MeshSource, ShapeGeometry, ShapeId, ShapeKind, ShapeRegistry};
pub use vehicle::{VehicleTuning, WheelDesc};
pub use world::{CollisionCallback, DebugStats, PhysicsWorld, WorldCallbacks, WorldSnapshot};
