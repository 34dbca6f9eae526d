//! Wire-format types for route diff payloads.
//!
//! The transport collaborator fetches these from the server; the engine
//! treats rendered content as opaque handles and only inspects the tree
//! structure around them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::segment::{Segment, SlotKey};
use crate::state::RouterStateTree;

/// Opaque handle to a rendered segment payload produced by the server.
///
/// The engine never looks inside; it only stores, copies, and compares these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rsc(Arc<str>);

impl Rsc {
    /// Wrap a rendered payload reference.
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        Self(payload.into())
    }

    /// The underlying payload reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Loading boundary state for a segment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingState {
    /// Not yet determined; the renderer must not assume either way.
    #[default]
    Unknown,
    /// The segment has no loading boundary.
    None,
    /// The segment renders this boundary while its data is pending.
    Boundary(Rsc),
}

impl LoadingState {
    /// Check whether a boundary is present.
    pub fn has_boundary(&self) -> bool {
        matches!(self, Self::Boundary(_))
    }
}

/// Rendered seed data accompanying a tree patch, one node per route segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    /// The segment this data belongs to.
    pub segment: Segment,
    /// Rendered content, or `None` for a dynamic hole in a partial prerender.
    pub rsc: Option<Rsc>,
    /// Seed data for child slots.
    #[serde(default)]
    pub children: HashMap<SlotKey, SeedData>,
    /// Loading boundary for this segment.
    #[serde(default)]
    pub loading: LoadingState,
    /// True when parts of this subtree were postponed and must be completed
    /// by a follow-up dynamic request.
    #[serde(default)]
    pub is_partial: bool,
}

impl SeedData {
    /// Create seed data for a fully rendered segment.
    pub fn new(segment: Segment, rsc: Option<Rsc>) -> Self {
        Self {
            segment,
            rsc,
            children: HashMap::new(),
            loading: LoadingState::Unknown,
            is_partial: false,
        }
    }

    /// Add seed data for a child slot.
    pub fn with_child(mut self, slot: impl Into<SlotKey>, child: SeedData) -> Self {
        self.children.insert(slot.into(), child);
        self
    }

    /// Set the loading boundary.
    pub fn with_loading(mut self, loading: LoadingState) -> Self {
        self.loading = loading;
        self
    }

    /// Mark this subtree as partially prerendered.
    pub fn partial(mut self) -> Self {
        self.is_partial = true;
        self
    }
}

/// One segment diff: where it applies in the tree, the new router state
/// subtree, the rendered seed data, and any out-of-band head content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightDataPath {
    /// `(slot, segment)` pairs locating the target subtree; empty for a
    /// render from the root. The final segment equals `tree.segment`.
    pub segment_path: Vec<(SlotKey, Segment)>,
    /// The router state subtree to splice in.
    pub tree: RouterStateTree,
    /// Rendered data for the subtree, or `None` for a tree-only patch.
    pub seed_data: Option<SeedData>,
    /// Head content delivered with the deepest segment.
    pub head: Option<Rsc>,
}

impl FlightDataPath {
    /// A diff rendered from the root of the tree.
    pub fn root(tree: RouterStateTree, seed_data: Option<SeedData>, head: Option<Rsc>) -> Self {
        Self {
            segment_path: Vec::new(),
            tree,
            seed_data,
            head,
        }
    }

    /// A diff targeting a nested subtree.
    pub fn at(
        segment_path: Vec<(SlotKey, Segment)>,
        tree: RouterStateTree,
        seed_data: Option<SeedData>,
        head: Option<Rsc>,
    ) -> Self {
        Self {
            segment_path,
            tree,
            seed_data,
            head,
        }
    }

    /// Whether this diff was rendered from the root of the route tree.
    pub fn is_root_render(&self) -> bool {
        self.segment_path.is_empty()
    }
}

/// The body of a route diff response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlightData {
    /// One or more segment diffs, applied strictly in order.
    Paths(Vec<FlightDataPath>),
    /// The server answered with a location outside this app surface (a
    /// different build or a non-app page); the client must perform a
    /// full-page navigation there.
    ExternalUrl(String),
}

/// A complete response from the route diff transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDiffResponse {
    /// The diff payload.
    pub flight_data: FlightData,
    /// Canonical URL the server wants the client to show instead of the
    /// requested one (redirects resolved server-side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url_override: Option<String>,
    /// The response may have been produced by an interception route, so the
    /// prefetch entry must be keyed with the next-URL discriminator.
    #[serde(default)]
    pub could_be_intercepted: bool,
    /// Parts of the response were postponed for a follow-up dynamic request.
    #[serde(default)]
    pub postponed: bool,
    /// The response was served from a full static prerender.
    #[serde(default)]
    pub prerendered: bool,
}

impl RouteDiffResponse {
    /// A response carrying segment diffs.
    pub fn with_paths(paths: Vec<FlightDataPath>) -> Self {
        Self {
            flight_data: FlightData::Paths(paths),
            canonical_url_override: None,
            could_be_intercepted: false,
            postponed: false,
            prerendered: false,
        }
    }

    /// A response redirecting out of the app surface.
    pub fn external(url: impl Into<String>) -> Self {
        Self {
            flight_data: FlightData::ExternalUrl(url.into()),
            canonical_url_override: None,
            could_be_intercepted: false,
            postponed: false,
            prerendered: false,
        }
    }

    /// Set the canonical URL override.
    pub fn with_canonical_url(mut self, url: impl Into<String>) -> Self {
        self.canonical_url_override = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::CHILDREN_SLOT;

    #[test]
    fn test_root_render_detection() {
        let root = FlightDataPath::root(RouterStateTree::new(Segment::literal("")), None, None);
        assert!(root.is_root_render());

        let nested = FlightDataPath::at(
            vec![(CHILDREN_SLOT.to_string(), Segment::literal("shop"))],
            RouterStateTree::new(Segment::literal("shop")),
            None,
            None,
        );
        assert!(!nested.is_root_render());
    }

    #[test]
    fn test_response_round_trip() {
        let seed = SeedData::new(Segment::literal("shop"), Some(Rsc::new("shop-layout")))
            .with_child(
                CHILDREN_SLOT,
                SeedData::new(Segment::page(), Some(Rsc::new("shop-page")))
                    .with_loading(LoadingState::Boundary(Rsc::new("spinner"))),
            );
        let response = RouteDiffResponse::with_paths(vec![FlightDataPath::at(
            vec![(CHILDREN_SLOT.to_string(), Segment::literal("shop"))],
            RouterStateTree::new(Segment::literal("shop")),
            Some(seed),
            Some(Rsc::new("<title>shop</title>")),
        )])
        .with_canonical_url("/shop");

        let json = serde_json::to_string(&response).unwrap();
        let back: RouteDiffResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, back);
    }
}
