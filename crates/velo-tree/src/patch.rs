//! Applying server-sent tree patches onto the current router state tree.

use std::collections::HashMap;
use std::sync::Arc;

use crate::segment::{Segment, SlotKey};
use crate::state::RouterStateTree;

/// Apply a partial tree patch at the position named by `segment_path`.
///
/// The path is walked as `(slot, segment)` pairs from the root. A missing
/// slot or an interior segment that no longer matches the tree yields `None`,
/// signalling that the patch is inapplicable and the caller should fall back
/// (first to the tree captured at prefetch time, then to a full navigation).
///
/// On success a new tree is returned; branches the patch does not touch are
/// shared by reference with the input tree.
pub fn apply_router_state_patch(
    segment_path: &[(SlotKey, Segment)],
    current: &Arc<RouterStateTree>,
    patch: &RouterStateTree,
) -> Option<Arc<RouterStateTree>> {
    let Some((slot, segment)) = segment_path.first() else {
        return apply_patch(current, patch);
    };
    let child = current.parallel_routes.get(slot)?;
    if segment_path.len() > 1 && !child.segment.matches_shape(segment) {
        return None;
    }
    let new_child = apply_router_state_patch(&segment_path[1..], child, patch)?;
    let mut parallel_routes = current.parallel_routes.clone();
    parallel_routes.insert(slot.clone(), new_child);
    Some(Arc::new(RouterStateTree {
        segment: current.segment.clone(),
        parallel_routes,
        url: current.url.clone(),
        refresh: current.refresh,
        is_root_layout: current.is_root_layout,
    }))
}

/// Splice a patch into the node it targets.
///
/// A patch carrying the default sentinel never displaces real content, and a
/// shape mismatch at the splice point makes the whole patch inapplicable.
fn apply_patch(current: &Arc<RouterStateTree>, patch: &RouterStateTree) -> Option<Arc<RouterStateTree>> {
    if patch.segment.is_default() && !current.segment.is_default() {
        return Some(Arc::clone(current));
    }
    if !current.segment.matches_shape(&patch.segment) {
        return None;
    }
    Some(merge_patch(current, patch))
}

/// Merge a shape-matched patch over an existing node.
///
/// The merged node takes the patch's segment (so a dynamic parameter adopts
/// the patch's value), recurses into slots both sides know, keeps existing
/// slots the patch omits, and adopts slots only the patch provides. Metadata
/// (`url`, `refresh`, `is_root_layout`) survives from the existing node.
fn merge_patch(current: &Arc<RouterStateTree>, patch: &RouterStateTree) -> Arc<RouterStateTree> {
    let mut parallel_routes =
        HashMap::with_capacity(current.parallel_routes.len().max(patch.parallel_routes.len()));
    for (slot, existing) in &current.parallel_routes {
        let merged = match patch.parallel_routes.get(slot) {
            Some(patched) if patched.segment.is_default() && !existing.segment.is_default() => {
                // Skip patching default segments: the placeholder never
                // overwrites a previously matched subtree.
                Arc::clone(existing)
            }
            Some(patched) if existing.segment.matches_shape(&patched.segment) => {
                merge_patch(existing, patched)
            }
            // A different subtree now occupies this slot; take it wholesale.
            Some(patched) => Arc::clone(patched),
            None => Arc::clone(existing),
        };
        parallel_routes.insert(slot.clone(), merged);
    }
    for (slot, patched) in &patch.parallel_routes {
        parallel_routes
            .entry(slot.clone())
            .or_insert_with(|| Arc::clone(patched));
    }
    Arc::new(RouterStateTree {
        segment: patch.segment.clone(),
        parallel_routes,
        url: current.url.clone(),
        refresh: current.refresh,
        is_root_layout: current.is_root_layout,
    })
}

/// Check whether moving from `current` to `next` crosses a root layout
/// boundary. Incremental patching across distinct root layouts is
/// unsupported; the caller must fall back to a full-page navigation.
pub fn is_navigating_to_new_root_layout(current: &RouterStateTree, next: &RouterStateTree) -> bool {
    if !current.segment.matches_shape(&next.segment) {
        return true;
    }
    if current.is_root_layout {
        return !next.is_root_layout;
    }
    if next.is_root_layout {
        return true;
    }
    match (current.children_slot(), next.children_slot()) {
        (Some(current_child), Some(next_child)) => {
            is_navigating_to_new_root_layout(current_child, next_child)
        }
        (None, None) => false,
        // One tree ran out before a root layout was found; treat the
        // layouts as different rather than guessing.
        _ => true,
    }
}

/// Decide whether a navigation to `segment_path` can reuse the current tree.
///
/// The walk compares segments exactly. A dynamic parameter whose value
/// differs from the tree's means every segment below it was rendered for a
/// different entity, so the subtree must be discarded and refetched (hard
/// navigation). A changed static segment is handled by the normal patch path
/// and does not force one.
pub fn should_hard_navigate(
    segment_path: &[(SlotKey, Segment)],
    tree: &RouterStateTree,
) -> bool {
    let Some((slot, segment)) = segment_path.first() else {
        return false;
    };
    let Some(child) = tree.parallel_routes.get(slot) else {
        return false;
    };
    if *segment != child.segment {
        return matches!(segment, Segment::Param { .. });
    }
    should_hard_navigate(&segment_path[1..], child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{ParamKind, CHILDREN_SLOT};

    fn slot(name: &str, seg: Segment) -> (SlotKey, Segment) {
        (name.to_string(), seg)
    }

    fn product_tree(id: &str) -> Arc<RouterStateTree> {
        Arc::new(
            RouterStateTree::new(Segment::literal(""))
                .mark_root_layout()
                .with_child(
                    CHILDREN_SLOT,
                    RouterStateTree::new(Segment::literal("products")).with_child(
                        CHILDREN_SLOT,
                        RouterStateTree::new(Segment::param("id", id, ParamKind::Dynamic))
                            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page())),
                    ),
                ),
        )
    }

    #[test]
    fn test_patch_replaces_dynamic_value() {
        let current = product_tree("1");
        let patch = RouterStateTree::new(Segment::param("id", "2", ParamKind::Dynamic))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page()));
        let path = vec![
            slot(CHILDREN_SLOT, Segment::literal("products")),
            slot(CHILDREN_SLOT, Segment::param("id", "2", ParamKind::Dynamic)),
        ];

        let patched = apply_router_state_patch(&path, &current, &patch).unwrap();
        let products = patched.children_slot().unwrap();
        let id_node = products.children_slot().unwrap();
        // Shape matching accepted the patch; the patch's value won.
        assert_eq!(
            id_node.segment,
            Segment::param("id", "2", ParamKind::Dynamic)
        );
    }

    #[test]
    fn test_patch_mismatch_returns_none() {
        let current = product_tree("1");
        let patch = RouterStateTree::new(Segment::param("slug", "x", ParamKind::CatchAll));
        let path = vec![
            slot(CHILDREN_SLOT, Segment::literal("products")),
            slot(CHILDREN_SLOT, Segment::param("slug", "x", ParamKind::CatchAll)),
        ];
        assert!(apply_router_state_patch(&path, &current, &patch).is_none());
    }

    #[test]
    fn test_patch_missing_slot_returns_none() {
        let current = product_tree("1");
        let patch = RouterStateTree::new(Segment::page());
        let path = vec![slot("missing", Segment::page())];
        assert!(apply_router_state_patch(&path, &current, &patch).is_none());
    }

    #[test]
    fn test_untouched_branches_shared_by_reference() {
        let sidebar = RouterStateTree::new(Segment::literal("sidebar"));
        let current = Arc::new(
            RouterStateTree::new(Segment::literal(""))
                .with_child(
                    CHILDREN_SLOT,
                    RouterStateTree::new(Segment::literal("products"))
                        .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page())),
                )
                .with_child("nav", sidebar),
        );
        let patch = RouterStateTree::new(Segment::literal("products"))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page()));
        let path = vec![slot(CHILDREN_SLOT, Segment::literal("products"))];

        let patched = apply_router_state_patch(&path, &current, &patch).unwrap();
        assert!(Arc::ptr_eq(
            current.parallel_routes.get("nav").unwrap(),
            patched.parallel_routes.get("nav").unwrap()
        ));
    }

    #[test]
    fn test_default_segment_preserved_when_patch_omits_slot() {
        let current = Arc::new(
            RouterStateTree::new(Segment::literal(""))
                .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::literal("feed")))
                .with_child("modal", RouterStateTree::new(Segment::default_slot())),
        );
        let patch = RouterStateTree::new(Segment::literal(""))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::literal("feed")));

        let patched = apply_router_state_patch(&[], &current, &patch).unwrap();
        assert_eq!(
            patched.parallel_routes.get("modal").unwrap().segment,
            Segment::default_slot()
        );
    }

    #[test]
    fn test_default_patch_does_not_displace_content() {
        let current = Arc::new(
            RouterStateTree::new(Segment::literal("")).with_child(
                "modal",
                RouterStateTree::new(Segment::literal("photo")),
            ),
        );
        let patch = RouterStateTree::new(Segment::literal(""))
            .with_child("modal", RouterStateTree::new(Segment::default_slot()));

        let patched = apply_router_state_patch(&[], &current, &patch).unwrap();
        assert_eq!(
            patched.parallel_routes.get("modal").unwrap().segment,
            Segment::literal("photo")
        );
    }

    #[test]
    fn test_new_root_layout_detection() {
        let current = RouterStateTree::new(Segment::literal(""))
            .mark_root_layout()
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::literal("shop")));
        let same = RouterStateTree::new(Segment::literal(""))
            .mark_root_layout()
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::literal("blog")));
        assert!(!is_navigating_to_new_root_layout(&current, &same));

        // Root layout moved one level down: different layout boundary.
        let moved = RouterStateTree::new(Segment::literal("")).with_child(
            CHILDREN_SLOT,
            RouterStateTree::new(Segment::literal("shop")).mark_root_layout(),
        );
        assert!(is_navigating_to_new_root_layout(&current, &moved));
    }

    #[test]
    fn test_hard_navigate_on_param_value_change() {
        let current = product_tree("1");
        let path = vec![
            slot(CHILDREN_SLOT, Segment::literal("products")),
            slot(CHILDREN_SLOT, Segment::param("id", "2", ParamKind::Dynamic)),
            slot(CHILDREN_SLOT, Segment::page()),
        ];
        assert!(should_hard_navigate(&path, &current));
    }

    #[test]
    fn test_no_hard_navigate_on_same_param_value() {
        let current = product_tree("1");
        let path = vec![
            slot(CHILDREN_SLOT, Segment::literal("products")),
            slot(CHILDREN_SLOT, Segment::param("id", "1", ParamKind::Dynamic)),
            slot(CHILDREN_SLOT, Segment::page()),
        ];
        assert!(!should_hard_navigate(&path, &current));
    }

    #[test]
    fn test_no_hard_navigate_on_static_mismatch() {
        let current = product_tree("1");
        let path = vec![slot(CHILDREN_SLOT, Segment::literal("blog"))];
        assert!(!should_hard_navigate(&path, &current));
    }
}
