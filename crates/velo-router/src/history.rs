//! History-state integration.
//!
//! The history collaborator stores this payload on each entry it writes and
//! feeds it back verbatim on a traversal, so a restore can trust the tree
//! that was current when the entry was created.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use velo_tree::RouterStateTree;

/// The payload written into a browser history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    /// Marks the entry as written by this engine; entries without the marker
    /// were pushed by application code and carry no tree.
    #[serde(rename = "__VA")]
    pub app_router: bool,
    /// The router state tree at the time the entry was written.
    #[serde(rename = "__PRIVATE_VELO_INTERNALS_TREE")]
    pub tree: Arc<RouterStateTree>,
}

impl HistoryState {
    /// Wrap the current tree for storage on a history entry.
    pub fn new(tree: Arc<RouterStateTree>) -> Self {
        Self {
            app_router: true,
            tree,
        }
    }

    /// Serialize for the history collaborator.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a payload read back from a history entry. Returns `None` for
    /// entries this engine did not write.
    pub fn from_json(raw: &str) -> Option<Self> {
        let state: Self = serde_json::from_str(raw).ok()?;
        state.app_router.then_some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_tree::{Segment, CHILDREN_SLOT};

    #[test]
    fn test_round_trip() {
        let tree = Arc::new(RouterStateTree::new(Segment::literal("")).with_child(
            CHILDREN_SLOT,
            RouterStateTree::new(Segment::literal("account")),
        ));
        let state = HistoryState::new(tree.clone());
        let json = state.to_json().unwrap();
        let back = HistoryState::from_json(&json).unwrap();
        assert_eq!(*back.tree, *tree);
    }

    #[test]
    fn test_foreign_entries_rejected() {
        assert!(HistoryState::from_json(r#"{"scroll": 42}"#).is_none());
        assert!(HistoryState::from_json("not json").is_none());
    }
}
