//! The contract an entity satisfies to live in the spatial index.

use crate::mobile::MobilePerceiver;
use crate::quadtree::{NodeId, QuadTree};
use crate::types::{Oid, Point};
use std::sync::{Arc, Weak};

// ---------------------------------------------------------------------------
// Node back-reference
// ---------------------------------------------------------------------------

/// Non-owning reference from an element to the leaf that currently holds it.
///
/// The tree owns membership; elements only remember where they live.
#[derive(Debug, Clone)]
pub struct QuadNodeRef {
    tree: Weak<QuadTree>,
    node: NodeId,
}

impl QuadNodeRef {
    pub(crate) fn new(tree: Weak<QuadTree>, node: NodeId) -> Self {
        Self { tree, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The tree owning this node; its lock guards every structural change.
    pub fn tree(&self) -> Option<Arc<QuadTree>> {
        self.tree.upgrade()
    }

    pub(crate) fn tree_weak(&self) -> Weak<QuadTree> {
        self.tree.clone()
    }
}

// ---------------------------------------------------------------------------
// Element trait
// ---------------------------------------------------------------------------

pub trait QuadTreeElement: Send + Sync {
    fn oid(&self) -> Oid;

    /// Location last committed to the index. Never extrapolates.
    fn current_loc(&self) -> Point;

    /// Extent within which the element can be perceived. Zero means the
    /// element only occupies the leaf containing its location.
    fn perception_radius(&self) -> f32;

    fn object_radius(&self) -> f32;

    /// The perceiver riding along with this element, if it can see.
    fn perceiver(&self) -> Option<Arc<MobilePerceiver>>;

    /// Home leaf, or `None` while unspawned.
    fn quad_node(&self) -> Option<QuadNodeRef>;

    /// Called by the tree, under its lock, whenever the home leaf changes.
    fn set_quad_node(&self, node: Option<QuadNodeRef>);

    fn is_spawned(&self) -> bool {
        self.quad_node().is_some()
    }
}

impl std::fmt::Debug for dyn QuadTreeElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadTreeElement")
            .field("oid", &self.oid())
            .finish()
    }
}
