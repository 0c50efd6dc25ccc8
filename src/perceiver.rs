//! Perceiver framework: the viewpoint abstraction, its filters, callbacks and
//! the per-update news/frees aggregate.
//!
//! ## Visibility model
//!
//! A perceiver subscribes to the index leaves its sensed area overlaps. Every
//! element that is a member of a subscribed leaf is a *candidate*. Candidates
//! accepted by [`Perceiver::should_notify_new_element`] become news; perceived
//! elements that stop being candidates and are accepted by
//! [`Perceiver::should_free_element`] become frees.
//!
//! | Filter configured | new element | freed element |
//! |-------------------|-------------|---------------|
//! | none              | never       | always        |
//! | some              | `matches`   | `matches`     |

use crate::element::QuadTreeElement;
use crate::error::{PerceptionError, Result};
use crate::geometry::Geometry;
use crate::quadtree::NodeId;
use crate::types::Oid;
use log::error;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub type PerceiverId = u64;

static NEXT_PERCEIVER_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// News and frees
// ---------------------------------------------------------------------------

/// Elements that became visible (news) or stopped being visible (frees) to a
/// perceiver during one update.
#[derive(Debug, Default)]
pub struct PerceiverNewsAndFrees {
    news: Vec<Arc<dyn QuadTreeElement>>,
    frees: Vec<Oid>,
}

impl PerceiverNewsAndFrees {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_news(&mut self, element: Arc<dyn QuadTreeElement>) {
        self.news.push(element);
    }

    pub fn add_free(&mut self, oid: Oid) {
        self.frees.push(oid);
    }

    pub fn news(&self) -> &[Arc<dyn QuadTreeElement>] {
        &self.news
    }

    pub fn frees(&self) -> &[Oid] {
        &self.frees
    }

    pub fn news_count(&self) -> usize {
        self.news.len()
    }

    pub fn free_count(&self) -> usize {
        self.frees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.news.is_empty() && self.frees.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Callbacks and filters
// ---------------------------------------------------------------------------

/// Sink for visibility changes, e.g. the session layer that sends new-object
/// and free-object messages to a client.
///
/// Runs inline with perception recomputation while the tree lock is held, so
/// it must return quickly and must not touch the tree.
pub trait PerceiverCallback: Send + Sync {
    /// Returns an occupancy count when the callback tracks one.
    fn process_news_and_frees(
        &self,
        news_and_frees: &PerceiverNewsAndFrees,
        perceiver_oid: Option<Oid>,
    ) -> Option<usize>;
}

/// Predicate excluding specific perceiver/element pairs.
pub trait PerceiverFilter: Send + Sync {
    fn matches(&self, perceiver: &dyn Perceiver, element: &dyn QuadTreeElement) -> bool;
}

/// Matches everything except the perceiver's own element.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicPerceiverFilter;

impl PerceiverFilter for BasicPerceiverFilter {
    fn matches(&self, perceiver: &dyn Perceiver, element: &dyn QuadTreeElement) -> bool {
        perceiver.owner_oid() != Some(element.oid())
    }
}

// ---------------------------------------------------------------------------
// Shared perceiver state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PerceiverState {
    nodes: HashSet<NodeId>,
    perceived: HashMap<Oid, Weak<dyn QuadTreeElement>>,
}

/// State common to every perceiver variant.
///
/// The internal locks are leaves in the lock order: they are never held while
/// calling into elements, filters or callbacks.
pub struct PerceiverCore {
    id: PerceiverId,
    state: Mutex<PerceiverState>,
    filter: RwLock<Option<Arc<dyn PerceiverFilter>>>,
    callbacks: RwLock<Vec<Arc<dyn PerceiverCallback>>>,
}

impl PerceiverCore {
    pub fn new(filter: Option<Arc<dyn PerceiverFilter>>) -> Self {
        Self {
            id: NEXT_PERCEIVER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PerceiverState::default()),
            filter: RwLock::new(filter),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> PerceiverId {
        self.id
    }

    fn perceived_snapshot(&self) -> HashMap<Oid, Weak<dyn QuadTreeElement>> {
        self.state.lock().perceived.clone()
    }

    fn apply(&self, news: &[Arc<dyn QuadTreeElement>], frees: &[Oid]) {
        let mut state = self.state.lock();
        for element in news {
            state
                .perceived
                .insert(element.oid(), Arc::downgrade(element));
        }
        for oid in frees {
            state.perceived.remove(oid);
        }
    }
}

impl Default for PerceiverCore {
    fn default() -> Self {
        Self::new(None)
    }
}

fn same_callback(a: &Arc<dyn PerceiverCallback>, b: &Arc<dyn PerceiverCallback>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// ---------------------------------------------------------------------------
// Perceiver trait
// ---------------------------------------------------------------------------

/// Answers "does this viewpoint sense this region?" and keeps the node
/// subscriptions that back the answer.
pub trait Perceiver: Send + Sync {
    fn core(&self) -> &PerceiverCore;

    /// Upcast support (implement by returning `self`).
    fn as_perceiver(&self) -> &dyn Perceiver;

    fn overlaps(&self, geometry: &Geometry) -> bool;

    fn contains(&self, geometry: &Geometry) -> bool;

    /// Oid of the element this perceiver rides on, if any.
    fn owner_oid(&self) -> Option<Oid> {
        None
    }

    /// Human-readable identity used in diagnostics.
    fn describe_owner(&self) -> String {
        format!("perceiver {}", self.id())
    }

    fn id(&self) -> PerceiverId {
        self.core().id()
    }

    // -----------------------------------------------------------------------
    // Filtering
    // -----------------------------------------------------------------------

    fn filter(&self) -> Option<Arc<dyn PerceiverFilter>> {
        self.core().filter.read().clone()
    }

    fn set_filter(&self, filter: Option<Arc<dyn PerceiverFilter>>) {
        *self.core().filter.write() = filter;
    }

    fn should_notify_new_element(&self, element: &dyn QuadTreeElement) -> bool {
        match self.filter() {
            Some(filter) => filter.matches(self.as_perceiver(), element),
            None => false,
        }
    }

    fn should_free_element(&self, element: &dyn QuadTreeElement) -> bool {
        match self.filter() {
            Some(filter) => filter.matches(self.as_perceiver(), element),
            None => true,
        }
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    fn register_callback(&self, callback: Arc<dyn PerceiverCallback>) {
        let mut callbacks = self.core().callbacks.write();
        if !callbacks.iter().any(|c| same_callback(c, &callback)) {
            callbacks.push(callback);
        }
    }

    fn unregister_callback(&self, callback: &Arc<dyn PerceiverCallback>) {
        self.core()
            .callbacks
            .write()
            .retain(|c| !same_callback(c, callback));
    }

    fn callback_count(&self) -> usize {
        self.core().callbacks.read().len()
    }

    /// Hand `news_and_frees` to every callback in registration order and
    /// return the last count any of them reported.
    fn process_news_and_frees(
        &self,
        news_and_frees: &PerceiverNewsAndFrees,
        perceiver_oid: Option<Oid>,
    ) -> Option<usize> {
        let callbacks = self.core().callbacks.read().clone();
        let mut count = None;
        for callback in callbacks {
            if let Some(n) = callback.process_news_and_frees(news_and_frees, perceiver_oid) {
                count = Some(n);
            }
        }
        count
    }

    // -----------------------------------------------------------------------
    // Node subscriptions
    // -----------------------------------------------------------------------

    fn add_quad_tree_node(&self, node: NodeId) -> Result<()> {
        if self.core().state.lock().nodes.insert(node) {
            return Ok(());
        }
        let err = PerceptionError::SubscriptionExists {
            perceiver: self.describe_owner(),
            node,
        };
        error!("{}", err);
        Err(err)
    }

    fn remove_quad_tree_node(&self, node: NodeId) -> Result<()> {
        if self.core().state.lock().nodes.remove(&node) {
            return Ok(());
        }
        let err = PerceptionError::SubscriptionMissing {
            perceiver: self.describe_owner(),
            node,
        };
        error!("{}", err);
        Err(err)
    }

    /// Drop every subscription, returning the nodes that were subscribed.
    fn clear_quad_tree_nodes(&self) -> Vec<NodeId> {
        let mut state = self.core().state.lock();
        let mut nodes: Vec<_> = state.nodes.drain().collect();
        nodes.sort_unstable();
        nodes
    }

    fn quad_tree_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.core().state.lock().nodes.iter().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    fn is_subscribed(&self, node: NodeId) -> bool {
        self.core().state.lock().nodes.contains(&node)
    }

    // -----------------------------------------------------------------------
    // Perceived set
    // -----------------------------------------------------------------------

    fn perceived(&self) -> Vec<Oid> {
        let mut oids: Vec<_> = self.core().state.lock().perceived.keys().copied().collect();
        oids.sort_unstable();
        oids
    }

    fn is_perceiving(&self, oid: Oid) -> bool {
        self.core().state.lock().perceived.contains_key(&oid)
    }
}

/// Diff `candidates` against what `perceiver` currently perceives, record the
/// result and return it. Callbacks are not invoked here.
pub(crate) fn update_perceived(
    perceiver: &dyn Perceiver,
    candidates: &BTreeMap<Oid, Arc<dyn QuadTreeElement>>,
) -> PerceiverNewsAndFrees {
    let previous = perceiver.core().perceived_snapshot();
    let mut news_and_frees = PerceiverNewsAndFrees::new();

    for (oid, element) in candidates {
        if !previous.contains_key(oid) && perceiver.should_notify_new_element(element.as_ref()) {
            news_and_frees.add_news(element.clone());
        }
    }

    let mut gone: Vec<_> = previous
        .into_iter()
        .filter(|(oid, _)| !candidates.contains_key(oid))
        .collect();
    gone.sort_unstable_by_key(|(oid, _)| *oid);
    for (oid, weak) in gone {
        match weak.upgrade() {
            Some(element) => {
                if perceiver.should_free_element(element.as_ref()) {
                    news_and_frees.add_free(oid);
                }
            }
            None => news_and_frees.add_free(oid),
        }
    }

    perceiver
        .core()
        .apply(&news_and_frees.news, &news_and_frees.frees);
    news_and_frees
}
