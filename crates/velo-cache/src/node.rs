//! The cache node tree.
//!
//! Cache nodes form a persistent-ish structure: a reducer producing a new
//! generation allocates fresh nodes along the path it changes and shares
//! every untouched branch with the previous generation. "Is this still the
//! same subtree" is therefore an `Arc::ptr_eq` check, both on nodes and on
//! child segment maps.
//!
//! Fields are interior-mutable because two collaborators legitimately write
//! after a node is published: the dynamic completion of a partial prerender
//! fills deferred content in place, and the rendering layer records its lazy
//! fetches. All writes happen from a reducer body or its single resolution
//! continuation, so the locks are uncontended by construction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use velo_tree::{LoadingState, Rsc, SegmentKey, SlotKey};

use crate::deferred::DeferredRsc;

/// Rendered content state for a segment.
#[derive(Debug, Clone, Default)]
pub enum DataState {
    /// Nothing fetched yet; the renderer triggers a lazy fetch when it
    /// reaches this node.
    #[default]
    Missing,
    /// A dynamic request will fill this slot.
    Pending(DeferredRsc),
    /// Rendered content is available.
    Ready(Rsc),
}

impl DataState {
    /// The ready content, if any.
    pub fn ready(&self) -> Option<&Rsc> {
        match self {
            Self::Ready(rsc) => Some(rsc),
            _ => None,
        }
    }

    /// Check for a pending deferred slot.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Lazy fetch bookkeeping owned by the rendering collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LazyData {
    /// No lazy fetch has been started for this node.
    #[default]
    Idle,
    /// The renderer has a fetch in flight for this node.
    InFlight,
}

/// A child segment map: cache nodes for one parallel route slot, keyed by
/// segment cache key. Shared by reference between cache generations; cloned
/// (detached) before the first write of a generation.
#[derive(Debug, Clone, Default)]
pub struct ChildSegmentMap {
    entries: Arc<RwLock<HashMap<SegmentKey, Arc<CacheNode>>>>,
}

impl ChildSegmentMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node by segment cache key.
    pub fn get(&self, key: &str) -> Option<Arc<CacheNode>> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Insert or replace a node.
    pub fn insert(&self, key: SegmentKey, node: Arc<CacheNode>) {
        self.entries.write().unwrap().insert(key, node);
    }

    /// Remove a node, forcing a lazy refetch on the next visit.
    pub fn remove(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Snapshot the entries (nodes shared by reference).
    pub fn snapshot(&self) -> HashMap<SegmentKey, Arc<CacheNode>> {
        self.entries.read().unwrap().clone()
    }

    /// Copy the entries into a freshly allocated map. The copy can be
    /// mutated without affecting any generation still holding the original.
    pub fn detach(&self) -> Self {
        Self {
            entries: Arc::new(RwLock::new(self.snapshot())),
        }
    }

    /// Identity comparison: true when both handles refer to the same
    /// allocation (and thus the same generation).
    pub fn ptr_eq(&self, other: &ChildSegmentMap) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl FromIterator<(SegmentKey, Arc<CacheNode>)> for ChildSegmentMap {
    fn from_iter<T: IntoIterator<Item = (SegmentKey, Arc<CacheNode>)>>(iter: T) -> Self {
        Self {
            entries: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

/// One node of the cache tree: rendered content for a segment plus its
/// children, organized by parallel route slot.
#[derive(Debug, Default)]
pub struct CacheNode {
    rsc: RwLock<DataState>,
    prefetch_rsc: RwLock<Option<Rsc>>,
    head: RwLock<Option<Rsc>>,
    prefetch_head: RwLock<Option<Rsc>>,
    loading: RwLock<LoadingState>,
    lazy_data: RwLock<LazyData>,
    parallel_routes: RwLock<HashMap<SlotKey, ChildSegmentMap>>,
}

impl CacheNode {
    /// Create an empty node: nothing fetched, no children.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node carrying fetched content and a loading boundary.
    pub fn with_data(rsc: Option<Rsc>, loading: LoadingState) -> Self {
        let node = Self::new();
        node.set_rsc(rsc);
        node.set_loading(loading);
        node
    }

    /// Current content state.
    pub fn rsc(&self) -> DataState {
        self.rsc.read().unwrap().clone()
    }

    /// Replace the content state.
    pub fn set_rsc_state(&self, state: DataState) {
        *self.rsc.write().unwrap() = state;
    }

    /// Set ready content, or mark the node as missing data.
    pub fn set_rsc(&self, rsc: Option<Rsc>) {
        self.set_rsc_state(match rsc {
            Some(rsc) => DataState::Ready(rsc),
            None => DataState::Missing,
        });
    }

    /// The statically prefetched content variant.
    pub fn prefetch_rsc(&self) -> Option<Rsc> {
        self.prefetch_rsc.read().unwrap().clone()
    }

    /// Set the prefetched content variant.
    pub fn set_prefetch_rsc(&self, rsc: Option<Rsc>) {
        *self.prefetch_rsc.write().unwrap() = rsc;
    }

    /// Out-of-band head content.
    pub fn head(&self) -> Option<Rsc> {
        self.head.read().unwrap().clone()
    }

    /// Set the head content.
    pub fn set_head(&self, head: Option<Rsc>) {
        *self.head.write().unwrap() = head;
    }

    /// The prefetched head variant.
    pub fn prefetch_head(&self) -> Option<Rsc> {
        self.prefetch_head.read().unwrap().clone()
    }

    /// Set the prefetched head variant.
    pub fn set_prefetch_head(&self, head: Option<Rsc>) {
        *self.prefetch_head.write().unwrap() = head;
    }

    /// Loading boundary state.
    pub fn loading(&self) -> LoadingState {
        self.loading.read().unwrap().clone()
    }

    /// Set the loading boundary state.
    pub fn set_loading(&self, loading: LoadingState) {
        *self.loading.write().unwrap() = loading;
    }

    /// Check whether the renderer has a lazy fetch in flight here.
    pub fn lazy_in_flight(&self) -> bool {
        *self.lazy_data.read().unwrap() == LazyData::InFlight
    }

    /// Record the start of a lazy fetch. Returns false if one is already in
    /// flight, so concurrent render passes do not fetch twice.
    pub fn begin_lazy_fetch(&self) -> bool {
        let mut lazy = self.lazy_data.write().unwrap();
        if *lazy == LazyData::InFlight {
            return false;
        }
        *lazy = LazyData::InFlight;
        true
    }

    /// Record the end of a lazy fetch.
    pub fn finish_lazy_fetch(&self) {
        *self.lazy_data.write().unwrap() = LazyData::Idle;
    }

    /// The child segment map for a slot, if present.
    pub fn child_map(&self, slot: &str) -> Option<ChildSegmentMap> {
        self.parallel_routes.read().unwrap().get(slot).cloned()
    }

    /// Install a child segment map for a slot.
    pub fn set_child_map(&self, slot: impl Into<SlotKey>, map: ChildSegmentMap) {
        self.parallel_routes.write().unwrap().insert(slot.into(), map);
    }

    /// Snapshot all slots (maps shared by reference).
    pub fn parallel_routes_snapshot(&self) -> HashMap<SlotKey, ChildSegmentMap> {
        self.parallel_routes.read().unwrap().clone()
    }

    /// Replace all slots.
    pub fn set_parallel_routes(&self, routes: HashMap<SlotKey, ChildSegmentMap>) {
        *self.parallel_routes.write().unwrap() = routes;
    }

    /// Slot names currently present.
    pub fn slots(&self) -> Vec<SlotKey> {
        self.parallel_routes.read().unwrap().keys().cloned().collect()
    }

    /// Copy content, loading, and the child map references from another
    /// node. Used when a new cache generation starts from the previous root.
    pub fn inherit_from(&self, other: &CacheNode) {
        self.set_rsc_state(other.rsc());
        self.set_prefetch_rsc(other.prefetch_rsc());
        self.set_loading(other.loading());
        self.set_parallel_routes(other.parallel_routes_snapshot());
    }

    /// Full detached copy: every data field plus a fresh outer slot map whose
    /// child segment maps are still shared. Mutating the copy's slot layout
    /// leaves the original generation untouched.
    pub fn clone_detached(&self) -> Arc<CacheNode> {
        let node = CacheNode::new();
        node.set_rsc_state(self.rsc());
        node.set_prefetch_rsc(self.prefetch_rsc());
        node.set_head(self.head());
        node.set_prefetch_head(self.prefetch_head());
        node.set_loading(self.loading());
        node.set_parallel_routes(self.parallel_routes_snapshot());
        Arc::new(node)
    }
}
