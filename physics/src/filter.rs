//! Pair filtering inside the native pipeline.
//!
//! The native narrow phase asks [`PairFilter`] about every new candidate pair. The decision
//! only uses the [`BodyTag`](crate::handle::BodyTag) packed in each collider's `user_data`,
//! plus the optional broad-phase callback that lets sensor logic veto a pair.

use std::sync::Arc;

use rapier3d::prelude::{PairFilterContext, PhysicsHooks, SolverFlags};

use crate::handle::{ControllerId, TagFields, try_unpack_tag};

/// `(sensor, other) -> keep pair`. Called for pairs where exactly one side is a sensor.
pub type BroadphaseFilter = Arc<dyn Fn(ControllerId, ControllerId) -> bool + Send + Sync>;

#[derive(Default, Clone)]
pub struct PairFilter {
    pub broadphase: Option<BroadphaseFilter>,
}

impl PairFilter {
    pub fn new(broadphase: Option<BroadphaseFilter>) -> Self {
        Self { broadphase }
    }

    /// Decide a pair from its two tags.
    ///
    /// `None` drops the pair, `Some(empty)` keeps contacts without solving them (sensors,
    /// ghosts), `Some(COMPUTE_IMPULSES)` is a regular contact.
    pub fn decide(&self, a: Option<TagFields>, b: Option<TagFields>) -> Option<SolverFlags> {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            // Colliders not created by this crate collide normally.
            _ => return Some(SolverFlags::COMPUTE_IMPULSES),
        };
        if !a.pairs_with(&b) {
            return None;
        }

        let sensor_pair = if a.is_sensor() {
            Some((a.controller, b.controller))
        } else if b.is_sensor() {
            Some((b.controller, a.controller))
        } else {
            None
        };
        if let (Some((sensor, other)), Some(veto)) = (sensor_pair, self.broadphase.as_ref()) {
            if !veto(sensor, other) {
                return None;
            }
        }

        if a.no_contact_response || b.no_contact_response {
            Some(SolverFlags::empty())
        } else {
            Some(SolverFlags::COMPUTE_IMPULSES)
        }
    }
}

impl PhysicsHooks for PairFilter {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let a = context
            .colliders
            .get(context.collider1)
            .and_then(|c| try_unpack_tag(c.user_data));
        let b = context
            .colliders
            .get(context.collider2)
            .and_then(|c| try_unpack_tag(c.user_data));
        self.decide(a, b)
    }
}
