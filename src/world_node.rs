//! WorldNode – an entity's motion state bound to its spatial-index membership.
//!
//! ## Lock order
//!
//! ```text
//! tree lock  ──►  node lock  ──►  (perceiver / tree-ref leaf locks)
//! ```
//!
//! Every setter that can move the entity in the index takes the tree lock
//! first (when spawned), then the node lock, and only then touches the index.
//! The node lock is reentrant: the index reads this node's location back
//! while the lock is held by the same thread.

use crate::element::{QuadNodeRef, QuadTreeElement};
use crate::error::Result;
use crate::interpolation::{
    orientation_for, Interpolatable, InterpolationSnapshot, PathInterpolator,
};
use crate::mobile::{MobilePerceiver, DEFAULT_UPDATE_THRESHOLD};
use crate::perceiver::BasicPerceiverFilter;
use crate::quadtree::QuadTree;
use crate::types::{now_millis, Oid, Point};
use glam::{Quat, Vec3};
use log::debug;
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::{Arc, Weak};

// ---------------------------------------------------------------------------
// Construction options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorldNodeOptions {
    /// Extent within which others can perceive this node.
    pub perception_radius: f32,
    pub object_radius: f32,
    /// Give the node a mobile perceiver of this radius.
    pub perceiver_radius: Option<f32>,
    /// Hysteresis distance for the mobile perceiver.
    pub update_threshold: f32,
}

impl Default for WorldNodeOptions {
    fn default() -> Self {
        Self {
            perception_radius: 0.0,
            object_radius: 0.0,
            perceiver_radius: None,
            update_threshold: DEFAULT_UPDATE_THRESHOLD,
        }
    }
}

/// Value fields of a world node. Index membership, perceiver subscriptions
/// and callbacks are never persisted; they are rebuilt when the node is
/// spawned again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedWorldNode {
    pub oid: Oid,
    pub loc: Point,
    pub direction: Vec3,
    pub orientation: Quat,
    pub perception_radius: f32,
    pub object_radius: f32,
    pub perceiver_radius: Option<f32>,
}

// ---------------------------------------------------------------------------
// World node
// ---------------------------------------------------------------------------

struct WorldNodeState {
    raw_loc: Point,
    interp_loc: Point,
    direction: Vec3,
    orientation: Quat,
    last_interpolation_time: i64,
    path_interpolator: Option<Arc<dyn PathInterpolator>>,
    quad_node: Option<QuadNodeRef>,
}

pub struct WorldNode {
    oid: Oid,
    perception_radius: f32,
    object_radius: f32,
    perceiver: Option<Arc<MobilePerceiver>>,
    lock: ReentrantMutex<RefCell<WorldNodeState>>,
    /// Cached owner of `quad_node`; read before the node lock is taken.
    tree_lock: RwLock<Option<Weak<QuadTree>>>,
}

impl WorldNode {
    pub fn new(oid: Oid, loc: Point, options: WorldNodeOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<WorldNode>| {
            let element: Weak<dyn QuadTreeElement> = weak.clone();
            let perceiver = options.perceiver_radius.map(|radius| {
                let perceiver = MobilePerceiver::with_filter(
                    element,
                    radius,
                    Some(Arc::new(BasicPerceiverFilter)),
                );
                perceiver.set_update_threshold(options.update_threshold);
                Arc::new(perceiver)
            });

            Self {
                oid,
                perception_radius: options.perception_radius,
                object_radius: options.object_radius,
                perceiver,
                lock: ReentrantMutex::new(RefCell::new(WorldNodeState {
                    raw_loc: loc,
                    interp_loc: loc,
                    direction: Vec3::ZERO,
                    orientation: Quat::IDENTITY,
                    last_interpolation_time: now_millis(),
                    path_interpolator: None,
                    quad_node: None,
                })),
                tree_lock: RwLock::new(None),
            }
        })
    }

    /// Rebuild a node from persisted value fields. The result is unspawned.
    pub fn from_persisted(persisted: &PersistedWorldNode, update_threshold: f32) -> Arc<Self> {
        let node = Self::new(
            persisted.oid,
            persisted.loc,
            WorldNodeOptions {
                perception_radius: persisted.perception_radius,
                object_radius: persisted.object_radius,
                perceiver_radius: persisted.perceiver_radius,
                update_threshold,
            },
        );
        node.with_state(|state| {
            state.direction = persisted.direction;
            state.orientation = persisted.orientation;
        });
        node
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_spawned(&self) -> bool {
        self.read(|state| state.quad_node.is_some())
    }

    pub fn to_persisted(&self) -> PersistedWorldNode {
        self.read(|state| PersistedWorldNode {
            oid: self.oid,
            loc: state.raw_loc,
            direction: state.direction,
            orientation: state.orientation,
            perception_radius: self.perception_radius,
            object_radius: self.object_radius,
            perceiver_radius: self.perceiver.as_ref().map(|p| p.radius()),
        })
    }

    // -----------------------------------------------------------------------
    // Spawn lifecycle
    // -----------------------------------------------------------------------

    /// Index this node (and its perceiver) in `tree`.
    pub fn spawn(self: &Arc<Self>, tree: &QuadTree) -> Result<()> {
        let element: Arc<dyn QuadTreeElement> = self.clone();
        tree.lock().insert(element)
    }

    /// Leave the index. A node that is not spawned is left alone.
    pub fn despawn(&self) -> Result<()> {
        let Some(tree) = self.tree() else {
            return Ok(());
        };
        let mut guard = tree.lock();
        guard.remove(self)
    }

    /// The tree this node is spawned in.
    pub fn tree(&self) -> Option<Arc<QuadTree>> {
        self.tree_lock.read().as_ref().and_then(Weak::upgrade)
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    /// Move the rendered location, updating the index when spawned.
    pub fn set_interp_loc(&self, loc: Point) {
        self.update_indexed(false, |state| {
            state.interp_loc = loc;
            loc
        });
    }

    /// Authoritative location update: raw and rendered location jump to
    /// `loc` and extrapolation restarts from now.
    pub fn set_loc(&self, loc: Point) {
        let now = now_millis();
        self.update_indexed(false, |state| {
            state.raw_loc = loc;
            state.interp_loc = loc;
            state.last_interpolation_time = now;
            loc
        });
    }

    /// Authoritative location and velocity update.
    pub fn set_loc_and_direction(&self, loc: Point, dir: Vec3) {
        let now = now_millis();
        self.update_indexed(false, |state| {
            state.raw_loc = loc;
            state.interp_loc = loc;
            state.direction = dir;
            state.orientation = orientation_for(dir);
            state.last_interpolation_time = now;
            loc
        });
    }

    /// New velocity, applied from the last interpolation time onwards.
    pub fn set_direction(&self, dir: Vec3) {
        self.with_state(|state| state.direction = dir);
    }

    pub fn set_orientation(&self, orientation: Quat) {
        self.with_state(|state| state.orientation = orientation);
    }

    pub fn set_path_interpolator(&self, path: Option<Arc<dyn PathInterpolator>>) {
        self.with_state(|state| state.path_interpolator = path);
    }

    // -----------------------------------------------------------------------
    // Lock helpers
    // -----------------------------------------------------------------------

    fn read<R>(&self, f: impl FnOnce(&WorldNodeState) -> R) -> R {
        let cell = self.lock.lock();
        let state = cell.borrow();
        f(&state)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut WorldNodeState) -> R) -> R {
        let cell = self.lock.lock();
        let mut state = cell.borrow_mut();
        f(&mut state)
    }

    /// Tree lock, then node lock, then `apply`, then the index update.
    /// With `require_spawned` an unspawned node is left untouched.
    ///
    /// Retries when the node was spawned or despawned between reading its
    /// tree and taking its lock.
    fn update_indexed<F>(&self, require_spawned: bool, apply: F)
    where
        F: FnOnce(&mut WorldNodeState) -> Point,
    {
        loop {
            let tree = self.tree();
            let mut guard = tree.as_deref().map(QuadTree::lock);
            let cell = self.lock.lock();

            let spawned_in = cell.borrow().quad_node.as_ref().map(QuadNodeRef::tree_weak);
            let settled = match (&tree, &spawned_in) {
                (Some(tree), Some(owner)) => std::ptr::eq(Arc::as_ptr(tree), owner.as_ptr()),
                (None, None) => true,
                // Tree dropped underneath a spawned node.
                (None, Some(owner)) => owner.strong_count() == 0,
                (Some(_), None) => false,
            };
            if !settled {
                continue;
            }
            if require_spawned && spawned_in.is_none() {
                return;
            }

            let loc = {
                let mut state = cell.borrow_mut();
                apply(&mut state)
            };
            if let Some(guard) = guard.as_mut() {
                if let Err(e) = guard.update_element(self, loc) {
                    debug!("{}: index not updated: {}", self.oid, e);
                }
            }
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Index membership
// ---------------------------------------------------------------------------

impl QuadTreeElement for WorldNode {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn current_loc(&self) -> Point {
        self.read(|state| state.interp_loc)
    }

    fn perception_radius(&self) -> f32 {
        self.perception_radius
    }

    fn object_radius(&self) -> f32 {
        self.object_radius
    }

    fn perceiver(&self) -> Option<Arc<MobilePerceiver>> {
        self.perceiver.clone()
    }

    fn quad_node(&self) -> Option<QuadNodeRef> {
        self.read(|state| state.quad_node.clone())
    }

    fn set_quad_node(&self, node: Option<QuadNodeRef>) {
        let cell = self.lock.lock();
        *self.tree_lock.write() = node.as_ref().map(QuadNodeRef::tree_weak);
        cell.borrow_mut().quad_node = node;
    }
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

impl Interpolatable for WorldNode {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn is_spawned(&self) -> bool {
        WorldNode::is_spawned(self)
    }

    fn direction(&self) -> Vec3 {
        self.read(|state| state.direction)
    }

    fn raw_loc(&self) -> Point {
        self.read(|state| state.raw_loc)
    }

    fn interp_loc(&self) -> Point {
        self.read(|state| state.interp_loc)
    }

    fn orientation(&self) -> Quat {
        self.read(|state| state.orientation)
    }

    fn last_interpolation_time(&self) -> i64 {
        self.read(|state| state.last_interpolation_time)
    }

    fn set_last_interpolation_time(&self, time_ms: i64) {
        self.with_state(|state| state.last_interpolation_time = time_ms);
    }

    fn path_interpolator(&self) -> Option<Arc<dyn PathInterpolator>> {
        self.read(|state| state.path_interpolator.clone())
    }

    /// Ignored once the node is unspawned: despawned entities stay frozen.
    fn set_path_interpolator_values(&self, time_ms: i64, dir: Vec3, loc: Point, orientation: Quat) {
        self.update_indexed(true, |state| {
            state.last_interpolation_time = time_ms;
            state.direction = dir;
            state.interp_loc = loc;
            state.orientation = orientation;
            loc
        });
    }

    fn interpolation_snapshot(&self) -> InterpolationSnapshot {
        self.read(|state| InterpolationSnapshot {
            direction: state.direction,
            interp_loc: state.interp_loc,
            last_interpolation_time: state.last_interpolation_time,
        })
    }
}
