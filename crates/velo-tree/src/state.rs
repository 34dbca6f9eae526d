//! The router state tree.
//!
//! A [`RouterStateTree`] mirrors the server's route tree shape. The same type
//! describes both the client's current state and the partial patches the
//! server sends back during navigation, so a patch is simply a subtree whose
//! root lines up with some position in the current tree.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::segment::{Segment, SlotKey, CHILDREN_SLOT};

/// Marker controlling when a tree node must be refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMarker {
    /// No special refetch behavior.
    #[default]
    None,
    /// Send this subtree as the refetch hint on the next fetch.
    Refetch,
    /// Refetch this subtree on the next refresh even if it did not match in
    /// the latest server response.
    Refresh,
}

/// One node of the router state tree.
///
/// Child subtrees are held behind `Arc` so that patching can reuse untouched
/// branches by reference instead of deep-cloning them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStateTree {
    /// The segment at this position.
    pub segment: Segment,
    /// Child subtrees keyed by parallel route slot name.
    #[serde(default)]
    pub parallel_routes: HashMap<SlotKey, Arc<RouterStateTree>>,
    /// URL override for this subtree (set on interception routes so the
    /// subtree can be refetched from its own address).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Refetch behavior for this node.
    #[serde(default)]
    pub refresh: RefreshMarker,
    /// True at the first node along a path whose layout module is the root
    /// layout. Set at most once per path.
    #[serde(default)]
    pub is_root_layout: bool,
}

impl RouterStateTree {
    /// Create a leaf node for the given segment.
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            parallel_routes: HashMap::new(),
            url: None,
            refresh: RefreshMarker::None,
            is_root_layout: false,
        }
    }

    /// Add a child subtree under a parallel route slot.
    pub fn with_child(mut self, slot: impl Into<SlotKey>, child: RouterStateTree) -> Self {
        self.parallel_routes.insert(slot.into(), Arc::new(child));
        self
    }

    /// Set the refetch URL override.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the refresh marker.
    pub fn with_refresh(mut self, marker: RefreshMarker) -> Self {
        self.refresh = marker;
        self
    }

    /// Mark this node as the root layout.
    pub fn mark_root_layout(mut self) -> Self {
        self.is_root_layout = true;
        self
    }

    /// The subtree under the main `children` slot, if any.
    pub fn children_slot(&self) -> Option<&Arc<RouterStateTree>> {
        self.parallel_routes.get(CHILDREN_SLOT)
    }

    /// Check whether any segment in this tree belongs to an interception
    /// route. Interception state changes which cache key and request headers
    /// a fetch must use.
    pub fn contains_interception(&self) -> bool {
        if self.segment.is_intercepted() {
            return true;
        }
        self.parallel_routes
            .values()
            .any(|child| child.contains_interception())
    }

    /// Clone this node with its refresh marker set to [`RefreshMarker::Refetch`],
    /// producing the tree hint sent along a refresh fetch.
    pub fn with_root_refetch_marker(&self) -> Arc<RouterStateTree> {
        Arc::new(Self {
            segment: self.segment.clone(),
            parallel_routes: self.parallel_routes.clone(),
            url: self.url.clone(),
            refresh: RefreshMarker::Refetch,
            is_root_layout: self.is_root_layout,
        })
    }

    /// Enumerate the `(slot, segment)` paths from this node down to every
    /// leaf. An empty path is returned for a tree with no children, so the
    /// caller's own position still counts as a leaf.
    pub fn leaf_paths(&self) -> Vec<Vec<(SlotKey, Segment)>> {
        if self.parallel_routes.is_empty() {
            return vec![Vec::new()];
        }
        let mut paths = Vec::new();
        for (slot, child) in &self.parallel_routes {
            for mut tail in child.leaf_paths() {
                let mut path = Vec::with_capacity(tail.len() + 1);
                path.push((slot.clone(), child.segment.clone()));
                path.append(&mut tail);
                paths.push(path);
            }
        }
        paths
    }
}
