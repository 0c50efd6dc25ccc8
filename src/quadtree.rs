//! Spatial index: a region-partitioning quadtree over the horizontal plane.
//!
//! ## Locking
//!
//! The tree owns exactly one lock. [`QuadTree::lock`] returns a [`TreeGuard`]
//! and every structural operation and query is a method on that guard, so
//! nothing can touch the index without holding the lock. Callers that also
//! need an element's own lock must take the tree lock first.
//!
//! ## Membership
//!
//! | Element kind                  | Member of                                         |
//! |-------------------------------|---------------------------------------------------|
//! | perception radius `0`         | the leaf containing its location (its home)       |
//! | perception radius `r > 0`     | its home plus every leaf overlapping `loc ± r`    |
//!
//! Nodes live in an arena addressed by [`NodeId`]; elements only keep a
//! [`QuadNodeRef`] back to their home leaf. Leaves split into quadrants when
//! they hold too many home elements. They are never merged back.

use crate::element::{QuadNodeRef, QuadTreeElement};
use crate::error::{PerceptionError, Result};
use crate::geometry::Geometry;
use crate::mobile::MobilePerceiver;
use crate::perceiver::{update_perceived, Perceiver, PerceiverId};
use crate::types::{Oid, Point, QuadTreeConfig, TreeStats};
use log::{debug, error, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

pub type NodeId = usize;

const ROOT: NodeId = 0;

// ---------------------------------------------------------------------------
// Arena records
// ---------------------------------------------------------------------------

struct QuadNode {
    geometry: Geometry,
    depth: u8,
    children: Option<[NodeId; 4]>,
    /// Elements whose location falls inside this leaf.
    homes: HashSet<Oid>,
    /// Homes plus extent elements overlapping this leaf.
    members: HashSet<Oid>,
    perceivers: HashSet<PerceiverId>,
}

impl QuadNode {
    fn new(geometry: Geometry, depth: u8) -> Self {
        Self {
            geometry,
            depth,
            children: None,
            homes: HashSet::new(),
            members: HashSet::new(),
            perceivers: HashSet::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

struct Membership {
    element: Arc<dyn QuadTreeElement>,
    loc: Point,
    home: NodeId,
    leaves: BTreeSet<NodeId>,
}

struct TreeState {
    nodes: Vec<QuadNode>,
    members: HashMap<Oid, Membership>,
    perceivers: HashMap<PerceiverId, Arc<dyn Perceiver>>,
    splits: u64,
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

pub struct QuadTree {
    config: QuadTreeConfig,
    self_ref: Weak<QuadTree>,
    state: Mutex<TreeState>,
}

impl QuadTree {
    pub fn new(config: QuadTreeConfig) -> Arc<Self> {
        let root = QuadNode::new(config.bounds, 0);
        Arc::new_cyclic(|self_ref| Self {
            config,
            self_ref: self_ref.clone(),
            state: Mutex::new(TreeState {
                nodes: vec![root],
                members: HashMap::new(),
                perceivers: HashMap::new(),
                splits: 0,
            }),
        })
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.config
    }

    pub fn bounds(&self) -> Geometry {
        self.config.bounds
    }

    /// Acquire the tree-wide lock.
    pub fn lock(&self) -> TreeGuard<'_> {
        TreeGuard {
            tree: self,
            state: self.state.lock(),
        }
    }
}

/// Proof that the tree lock is held. All index operations live here.
///
/// Callbacks fired from these operations run before the guard is released,
/// so they must never try to lock the same tree.
pub struct TreeGuard<'a> {
    tree: &'a QuadTree,
    state: MutexGuard<'a, TreeState>,
}

impl TreeGuard<'_> {
    // -----------------------------------------------------------------------
    // Elements
    // -----------------------------------------------------------------------

    /// Index `element` at its current location and register its perceiver.
    pub fn insert(&mut self, element: Arc<dyn QuadTreeElement>) -> Result<()> {
        let oid = element.oid();
        if self.state.members.contains_key(&oid) {
            let err = PerceptionError::AlreadyIndexed(oid);
            error!("insert: {}", err);
            return Err(err);
        }

        let loc = element.current_loc();
        let (home, leaves) = self.placement(element.as_ref(), &loc);
        for leaf in &leaves {
            self.state.nodes[*leaf].members.insert(oid);
        }
        self.state.nodes[home].homes.insert(oid);

        let mut dirty = self.subscribers(leaves.iter().copied());
        self.state.members.insert(
            oid,
            Membership {
                element: element.clone(),
                loc,
                home,
                leaves,
            },
        );
        element.set_quad_node(Some(self.node_ref(home)));
        debug!("Indexed {} at {} in node {}", oid, loc, home);

        if let Some(perceiver) = element.perceiver() {
            perceiver.reset_hysteresis();
            perceiver.should_update_based_on_loc(&loc);
            let perceiver: Arc<dyn Perceiver> = perceiver;
            let id = perceiver.id();
            self.state.perceivers.insert(id, perceiver.clone());
            self.resubscribe(perceiver.as_ref());
            dirty.insert(id);
        }

        self.split_if_needed(home, &mut dirty);
        self.refresh_visibility(&dirty);
        Ok(())
    }

    /// Remove `element` from the index, unregister its perceiver and clear
    /// its node back-reference.
    pub fn remove(&mut self, element: &dyn QuadTreeElement) -> Result<()> {
        let oid = element.oid();
        let Some(membership) = self.state.members.remove(&oid) else {
            let err = PerceptionError::NotIndexed(oid);
            error!("remove: {}", err);
            return Err(err);
        };

        for leaf in &membership.leaves {
            self.state.nodes[*leaf].members.remove(&oid);
        }
        self.state.nodes[membership.home].homes.remove(&oid);
        let dirty = self.subscribers(membership.leaves.iter().copied());

        if let Some(perceiver) = element.perceiver() {
            self.detach_perceiver(&*perceiver);
            perceiver.reset_hysteresis();
        }

        element.set_quad_node(None);
        debug!("Removed {} from node {}", oid, membership.home);

        self.refresh_visibility(&dirty);
        Ok(())
    }

    /// Move `element` to `loc`, reassigning its home leaf when needed.
    pub fn update_element(&mut self, element: &dyn QuadTreeElement, loc: Point) -> Result<()> {
        let oid = element.oid();
        let Some(membership) = self.state.members.get(&oid) else {
            let err = PerceptionError::NotIndexed(oid);
            error!("update_element: {}", err);
            return Err(err);
        };
        let old_home = membership.home;
        let old_leaves = membership.leaves.clone();
        let stored = membership.element.clone();

        let (home, leaves) = self.placement(stored.as_ref(), &loc);
        let changed: Vec<NodeId> = old_leaves
            .symmetric_difference(&leaves)
            .copied()
            .collect();
        for leaf in old_leaves.difference(&leaves) {
            self.state.nodes[*leaf].members.remove(&oid);
        }
        for leaf in leaves.difference(&old_leaves) {
            self.state.nodes[*leaf].members.insert(oid);
        }
        if home != old_home {
            self.state.nodes[old_home].homes.remove(&oid);
            self.state.nodes[home].homes.insert(oid);
            stored.set_quad_node(Some(self.node_ref(home)));
            debug!("{} moved from node {} to node {}", oid, old_home, home);
        }
        if let Some(membership) = self.state.members.get_mut(&oid) {
            membership.loc = loc;
            membership.home = home;
            membership.leaves = leaves;
        }

        let mut dirty = self.subscribers(changed);
        if let Some(perceiver) = stored.perceiver() {
            // Skipped once removed with `remove_perceiver`.
            let registered = self.state.perceivers.contains_key(&perceiver.id());
            if registered && perceiver.should_update_based_on_loc(&loc) {
                self.resubscribe(&*perceiver);
                dirty.insert(perceiver.id());
            }
        }

        if home != old_home {
            self.split_if_needed(home, &mut dirty);
        }
        self.refresh_visibility(&dirty);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Perceivers
    // -----------------------------------------------------------------------

    /// Register a stand-alone perceiver and subscribe it to the leaves it
    /// senses. Mobile perceivers are registered by [`TreeGuard::insert`].
    pub fn add_perceiver(&mut self, perceiver: Arc<dyn Perceiver>) {
        let id = perceiver.id();
        self.state.perceivers.insert(id, perceiver.clone());
        self.resubscribe(perceiver.as_ref());
        self.refresh_visibility(&BTreeSet::from([id]));
    }

    pub fn remove_perceiver(&mut self, perceiver: &dyn Perceiver) -> Result<()> {
        if !self.state.perceivers.contains_key(&perceiver.id()) {
            let err = PerceptionError::PerceiverNotRegistered(perceiver.id());
            error!("remove_perceiver: {} ({})", err, perceiver.describe_owner());
            return Err(err);
        }
        self.detach_perceiver(perceiver);
        Ok(())
    }

    /// Recompute subscriptions and visibility after a perceiver's sensed
    /// area changed by means other than its owner moving.
    pub fn refresh_perceiver(&mut self, perceiver: &dyn Perceiver) -> Result<()> {
        let id = perceiver.id();
        if !self.state.perceivers.contains_key(&id) {
            let err = PerceptionError::PerceiverNotRegistered(id);
            error!("refresh_perceiver: {} ({})", err, perceiver.describe_owner());
            return Err(err);
        }
        self.resubscribe(perceiver);
        self.refresh_visibility(&BTreeSet::from([id]));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Leaves whose region overlaps `geometry`.
    pub fn overlapping_nodes(&self, geometry: &Geometry) -> Vec<NodeId> {
        self.collect_leaves(|g| geometry.overlaps(g), |g| geometry.contains(g))
    }

    /// Leaves whose region lies entirely inside `geometry`.
    pub fn contained_nodes(&self, geometry: &Geometry) -> Vec<NodeId> {
        self.overlapping_nodes(geometry)
            .into_iter()
            .filter(|id| geometry.contains(&self.state.nodes[*id].geometry))
            .collect()
    }

    /// Indexed elements whose location lies inside `geometry`, ordered by oid.
    pub fn elements_in(&self, geometry: &Geometry) -> Vec<Arc<dyn QuadTreeElement>> {
        let mut found = BTreeMap::new();
        for leaf in self.overlapping_nodes(geometry) {
            for oid in &self.state.nodes[leaf].homes {
                if let Some(m) = self.state.members.get(oid) {
                    if geometry.contains_point(&m.loc) {
                        found.insert(*oid, m.element.clone());
                    }
                }
            }
        }
        found.into_values().collect()
    }

    /// The leaf a point at `loc` would live in.
    pub fn leaf_at(&self, loc: &Point) -> NodeId {
        self.leaf_for(loc)
    }

    pub fn node_geometry(&self, node: NodeId) -> Option<Geometry> {
        self.state.nodes.get(node).map(|n| n.geometry)
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.state.nodes.get(node).is_some_and(QuadNode::is_leaf)
    }

    pub fn home_node(&self, oid: Oid) -> Option<NodeId> {
        self.state.members.get(&oid).map(|m| m.home)
    }

    pub fn indexed_loc(&self, oid: Oid) -> Option<Point> {
        self.state.members.get(&oid).map(|m| m.loc)
    }

    pub fn contains_element(&self, oid: Oid) -> bool {
        self.state.members.contains_key(&oid)
    }

    /// Every element that is a member of `node`, ordered by oid.
    pub fn node_members(&self, node: NodeId) -> Vec<Oid> {
        let mut oids: Vec<_> = self
            .state
            .nodes
            .get(node)
            .map(|n| n.members.iter().copied().collect())
            .unwrap_or_default();
        oids.sort_unstable();
        oids
    }

    pub fn node_perceivers(&self, node: NodeId) -> Vec<PerceiverId> {
        let mut ids: Vec<_> = self
            .state
            .nodes
            .get(node)
            .map(|n| n.perceivers.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn element_count(&self) -> usize {
        self.state.members.len()
    }

    pub fn perceiver_count(&self) -> usize {
        self.state.perceivers.len()
    }

    pub fn stats(&self) -> TreeStats {
        let leaves = self.state.nodes.iter().filter(|n| n.is_leaf());
        TreeStats {
            leaves: leaves.clone().count(),
            max_depth_reached: leaves.map(|n| n.depth).max().unwrap_or(0),
            elements: self.state.members.len(),
            perceivers: self.state.perceivers.len(),
            splits: self.state.splits,
        }
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    fn node_ref(&self, node: NodeId) -> QuadNodeRef {
        QuadNodeRef::new(self.tree.self_ref.clone(), node)
    }

    fn leaf_for(&self, loc: &Point) -> NodeId {
        let bounds = &self.state.nodes[ROOT].geometry;
        let loc = bounds.clamp_point(loc);
        let mut current = ROOT;
        while let Some(children) = self.state.nodes[current].children {
            let quadrant = self.state.nodes[current].geometry.quadrant_index(&loc);
            current = children[quadrant];
        }
        current
    }

    fn placement(&self, element: &dyn QuadTreeElement, loc: &Point) -> (NodeId, BTreeSet<NodeId>) {
        if !self.tree.config.bounds.contains_point(loc) {
            warn!(
                "{} at {} is outside the tree bounds {}; clamping",
                element.oid(),
                loc,
                self.tree.config.bounds
            );
        }
        let home = self.leaf_for(loc);
        let mut leaves = BTreeSet::from([home]);
        let radius = element.perception_radius();
        if radius > 0.0 {
            let extent = Geometry::around(&self.tree.config.bounds.clamp_point(loc), radius);
            leaves.extend(self.overlapping_nodes(&extent));
        }
        (home, leaves)
    }

    /// Walk the tree collecting leaves. `take_all` short-circuits whole
    /// subtrees, `descend` prunes those that cannot match.
    fn collect_leaves<D, T>(&self, descend: D, take_all: T) -> Vec<NodeId>
    where
        D: Fn(&Geometry) -> bool,
        T: Fn(&Geometry) -> bool,
    {
        let mut leaves = Vec::new();
        let mut to_process = vec![(ROOT, false)];
        while let Some((id, inside)) = to_process.pop() {
            let node = &self.state.nodes[id];
            let inside = inside || take_all(&node.geometry);
            if !inside && !descend(&node.geometry) {
                continue;
            }
            match node.children {
                None => leaves.push(id),
                Some(children) => to_process.extend(children.iter().map(|c| (*c, inside))),
            }
        }
        leaves.sort_unstable();
        leaves
    }

    // -----------------------------------------------------------------------
    // Subscriptions and visibility
    // -----------------------------------------------------------------------

    fn subscribers<I>(&self, nodes: I) -> BTreeSet<PerceiverId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        nodes
            .into_iter()
            .flat_map(|id| self.state.nodes[id].perceivers.iter().copied())
            .collect()
    }

    /// Make `perceiver`'s subscriptions equal the leaves it senses.
    fn resubscribe(&mut self, perceiver: &dyn Perceiver) {
        let id = perceiver.id();
        let wanted: BTreeSet<NodeId> = self
            .collect_leaves(|g| perceiver.overlaps(g), |g| perceiver.contains(g))
            .into_iter()
            .collect();
        let current: BTreeSet<NodeId> = perceiver.quad_tree_nodes().into_iter().collect();

        for node in current.difference(&wanted) {
            if perceiver.remove_quad_tree_node(*node).is_ok() {
                self.state.nodes[*node].perceivers.remove(&id);
            }
        }
        for node in wanted.difference(&current) {
            if perceiver.add_quad_tree_node(*node).is_ok() {
                self.state.nodes[*node].perceivers.insert(id);
            }
        }
    }

    /// Unsubscribe and unregister `perceiver`, freeing everything it saw.
    fn detach_perceiver(&mut self, perceiver: &dyn Perceiver) {
        let id = perceiver.id();
        for node in perceiver.clear_quad_tree_nodes() {
            if let Some(n) = self.state.nodes.get_mut(node) {
                n.perceivers.remove(&id);
            }
        }
        self.state.perceivers.remove(&id);
        self.publish(perceiver, &BTreeMap::new());
    }

    fn candidates(&self, perceiver: &dyn Perceiver) -> BTreeMap<Oid, Arc<dyn QuadTreeElement>> {
        let mut candidates = BTreeMap::new();
        for node in perceiver.quad_tree_nodes() {
            let Some(n) = self.state.nodes.get(node) else {
                continue;
            };
            for oid in &n.members {
                if let Some(m) = self.state.members.get(oid) {
                    candidates.insert(*oid, m.element.clone());
                }
            }
        }
        candidates
    }

    fn refresh_visibility(&self, dirty: &BTreeSet<PerceiverId>) {
        for id in dirty {
            let Some(perceiver) = self.state.perceivers.get(id).cloned() else {
                continue;
            };
            let candidates = self.candidates(perceiver.as_ref());
            self.publish(perceiver.as_ref(), &candidates);
        }
    }

    fn publish(
        &self,
        perceiver: &dyn Perceiver,
        candidates: &BTreeMap<Oid, Arc<dyn QuadTreeElement>>,
    ) {
        let news_and_frees = update_perceived(perceiver, candidates);
        if !news_and_frees.is_empty() {
            debug!(
                "{}: {} news, {} frees",
                perceiver.describe_owner(),
                news_and_frees.news_count(),
                news_and_frees.free_count()
            );
            perceiver.process_news_and_frees(&news_and_frees, perceiver.owner_oid());
        }
    }

    // -----------------------------------------------------------------------
    // Splitting
    // -----------------------------------------------------------------------

    fn split_if_needed(&mut self, leaf: NodeId, dirty: &mut BTreeSet<PerceiverId>) {
        let node = &self.state.nodes[leaf];
        if !node.is_leaf()
            || node.homes.len() <= self.tree.config.max_elements_per_leaf
            || node.depth >= self.tree.config.max_depth
        {
            return;
        }

        let depth = node.depth + 1;
        let first = self.state.nodes.len();
        let quadrants = node.geometry.quadrants();
        for geometry in quadrants {
            self.state.nodes.push(QuadNode::new(geometry, depth));
        }
        let children = [first, first + 1, first + 2, first + 3];

        let parent = &mut self.state.nodes[leaf];
        parent.children = Some(children);
        parent.homes.clear();
        let members = std::mem::take(&mut parent.members);
        let subscribers = std::mem::take(&mut parent.perceivers);
        self.state.splits += 1;
        debug!("Split node {} into {:?} at depth {}", leaf, children, depth);

        let mut members: Vec<Oid> = members.into_iter().collect();
        members.sort_unstable();
        for oid in members {
            self.replace_member(oid, leaf);
        }

        for id in subscribers {
            let Some(perceiver) = self.state.perceivers.get(&id).cloned() else {
                error!("Node {} had unregistered perceiver {} subscribed", leaf, id);
                if let Some(stale) = self.member_perceiver(id) {
                    let _ = stale.remove_quad_tree_node(leaf);
                }
                continue;
            };
            if perceiver.remove_quad_tree_node(leaf).is_err() {
                continue;
            }
            for child in children {
                let geometry = self.state.nodes[child].geometry;
                if perceiver.overlaps(&geometry) && perceiver.add_quad_tree_node(child).is_ok() {
                    self.state.nodes[child].perceivers.insert(id);
                }
            }
            dirty.insert(id);
        }

        for child in children {
            self.split_if_needed(child, dirty);
        }
    }

    /// Mobile perceiver `id` carried by an indexed element, registered or not.
    fn member_perceiver(&self, id: PerceiverId) -> Option<Arc<MobilePerceiver>> {
        self.state
            .members
            .values()
            .filter_map(|membership| membership.element.perceiver())
            .find(|perceiver| perceiver.id() == id)
    }

    /// Re-place a member of the freshly split `parent` among its children.
    fn replace_member(&mut self, oid: Oid, parent: NodeId) {
        let Some(membership) = self.state.members.get(&oid) else {
            error!("Node {} held unknown member {}", parent, oid);
            return;
        };
        let element = membership.element.clone();
        let loc = membership.loc;
        let old_home = membership.home;

        let (home, leaves) = self.placement(element.as_ref(), &loc);
        for leaf in &leaves {
            self.state.nodes[*leaf].members.insert(oid);
        }
        if home != old_home {
            self.state.nodes[home].homes.insert(oid);
            element.set_quad_node(Some(self.node_ref(home)));
        }
        if let Some(membership) = self.state.members.get_mut(&oid) {
            membership.home = home;
            membership.leaves = leaves;
        }
    }
}
