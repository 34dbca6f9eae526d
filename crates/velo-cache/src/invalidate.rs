//! Marking cache subtrees stale.

use std::sync::Arc;

use tracing::debug;
use velo_tree::{RouterStateTree, Segment, SlotKey};

use crate::node::{CacheNode, ChildSegmentMap};

/// Clear the slot entries one level below a freshly filled node.
///
/// Only the immediate next level is presumed stale; deeper levels are
/// re-validated when the renderer reaches them. Each touched child map is
/// detached before the removal so generations still holding the existing map
/// are unaffected. Grandchildren are never visited.
pub fn invalidate_cache_by_router_state(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    router_state: &RouterStateTree,
) {
    for (slot, child_state) in &router_state.parallel_routes {
        let key = child_state.segment.cache_key();
        if let Some(existing_map) = existing_cache.child_map(slot) {
            let new_map = existing_map.detach();
            new_map.remove(&key);
            debug!(slot = %slot, segment = %child_state.segment, "invalidated cache entry");
            new_cache.set_child_map(slot.clone(), new_map);
        }
    }
}

/// Walk down a segment path cloning nodes, and wipe the subtree at the
/// terminal entry so every deeper segment is forced to refetch. Used on hard
/// navigation, where a changed dynamic parameter poisons everything below it.
pub fn invalidate_cache_below_flight_segment_path(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    segment_path: &[(SlotKey, Segment)],
) {
    let Some((slot, segment)) = segment_path.first() else {
        debug_assert!(false, "empty segment path");
        return;
    };
    let is_last = segment_path.len() == 1;
    let key = segment.cache_key();

    let Some(existing_map) = existing_cache.child_map(slot) else {
        // Nothing cached below this point; there is nothing to wipe.
        return;
    };
    let child_map = detach_if_shared(new_cache, slot, &existing_map);

    if is_last {
        // An empty node here drops rendered content and children alike.
        child_map.insert(key, Arc::new(CacheNode::new()));
        return;
    }

    let Some(existing_child) = existing_map.get(&key) else {
        return;
    };
    let Some(child) = child_map.get(&key) else {
        return;
    };
    let child = if Arc::ptr_eq(&child, &existing_child) {
        let detached = child.clone_detached();
        child_map.insert(key, detached.clone());
        detached
    } else {
        child
    };
    invalidate_cache_below_flight_segment_path(&child, &existing_child, &segment_path[1..]);
}

/// Walk down a segment path and clear the terminal node's data while keeping
/// its loading boundary and children. The renderer sees a node with no
/// content and refetches it lazily, showing the retained boundary meanwhile.
pub fn clear_cache_node_data_for_segment_path(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    segment_path: &[(SlotKey, Segment)],
) {
    let Some((slot, segment)) = segment_path.first() else {
        debug_assert!(false, "empty segment path");
        return;
    };
    let is_last = segment_path.len() == 1;
    let key = segment.cache_key();

    let existing_map = existing_cache.child_map(slot);
    let child_map = match &existing_map {
        Some(map) => detach_if_shared(new_cache, slot, map),
        None => match new_cache.child_map(slot) {
            Some(map) => map,
            None => {
                let fresh = ChildSegmentMap::new();
                new_cache.set_child_map(slot.clone(), fresh.clone());
                fresh
            }
        },
    };

    let existing_child = existing_map.as_ref().and_then(|m| m.get(&key));
    let child = child_map.get(&key);

    if is_last {
        let should_replace = match (&child, &existing_child) {
            (None, _) => true,
            (Some(c), Some(e)) => !c.lazy_in_flight() || Arc::ptr_eq(c, e),
            (Some(c), None) => !c.lazy_in_flight(),
        };
        if should_replace {
            let cleared = CacheNode::new();
            if let Some(existing_child) = &existing_child {
                cleared.set_loading(existing_child.loading());
                cleared.set_parallel_routes(existing_child.parallel_routes_snapshot());
            }
            child_map.insert(key, Arc::new(cleared));
        }
        return;
    }

    let (Some(child), Some(existing_child)) = (child, existing_child) else {
        // The existing cache never had this path; insert an empty node so
        // the renderer notices and fetches from here down.
        child_map.insert(key, Arc::new(CacheNode::new()));
        return;
    };
    let child = if Arc::ptr_eq(&child, &existing_child) {
        let detached = child.clone_detached();
        child_map.insert(key, detached.clone());
        detached
    } else {
        child
    };
    clear_cache_node_data_for_segment_path(&child, &existing_child, &segment_path[1..]);
}

/// Seed `new_cache` from the current root and clear every leaf named by the
/// tree patch, so each leaf refetches lazily while keeping its loading
/// boundary. Returns whether any leaf was cleared.
pub fn trigger_lazy_fetch_for_leaf_segments(
    new_cache: &CacheNode,
    current_cache: &CacheNode,
    flight_segment_path: &[(SlotKey, Segment)],
    tree_patch: &RouterStateTree,
) -> bool {
    let mut applied = false;
    new_cache.inherit_from(current_cache);
    for tail in tree_patch.leaf_paths() {
        let mut path = flight_segment_path.to_vec();
        path.extend(tail);
        if path.is_empty() {
            continue;
        }
        clear_cache_node_data_for_segment_path(new_cache, current_cache, &path);
        applied = true;
    }
    applied
}

/// Detach the slot's map on `new_cache` unless a previous step of the same
/// pass already did; the identity check against the existing generation's
/// map decides whether an allocation is needed.
pub(crate) fn detach_if_shared(
    new_cache: &CacheNode,
    slot: &str,
    existing_map: &ChildSegmentMap,
) -> ChildSegmentMap {
    match new_cache.child_map(slot) {
        Some(map) if !map.ptr_eq(existing_map) => map,
        _ => {
            let fresh = existing_map.detach();
            new_cache.set_child_map(slot.to_string(), fresh.clone());
            fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_tree::{LoadingState, Rsc, CHILDREN_SLOT};

    fn node_with_child(slot: &str, key: &str, child: Arc<CacheNode>) -> CacheNode {
        let node = CacheNode::new();
        let map = ChildSegmentMap::new();
        map.insert(key.to_string(), child);
        node.set_child_map(slot.to_string(), map);
        node
    }

    #[test]
    fn test_invalidate_by_router_state_is_one_level_deep() {
        // existing: children -> { "products" -> node with grandchild } , modal -> { "photo" }
        let grandchild = Arc::new(CacheNode::with_data(
            Some(Rsc::new("deep")),
            LoadingState::None,
        ));
        let products = Arc::new(node_with_child(CHILDREN_SLOT, "42", grandchild.clone()));
        let existing = node_with_child(CHILDREN_SLOT, "products", products.clone());
        let modal_map = ChildSegmentMap::new();
        modal_map.insert("photo".to_string(), Arc::new(CacheNode::new()));
        existing.set_child_map("modal", modal_map.clone());

        let state = RouterStateTree::new(Segment::literal(""))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::literal("products")));

        let new_cache = CacheNode::new();
        new_cache.set_parallel_routes(existing.parallel_routes_snapshot());
        invalidate_cache_by_router_state(&new_cache, &existing, &state);

        // The named slot entry is gone from the new generation...
        assert!(new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("products")
            .is_none());
        // ...but still present in the existing generation.
        assert!(existing
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("products")
            .is_some());
        // Slots the router state does not name are untouched and shared.
        assert!(new_cache.child_map("modal").unwrap().ptr_eq(&modal_map));
        // Grandchildren of the removed entry were never visited.
        assert_eq!(grandchild.rsc().ready(), Some(&Rsc::new("deep")));
    }

    #[test]
    fn test_invalidate_below_path_wipes_terminal() {
        let page = Arc::new(CacheNode::with_data(
            Some(Rsc::new("page")),
            LoadingState::None,
        ));
        let id_node = Arc::new(node_with_child(CHILDREN_SLOT, "__PAGE__", page));
        id_node.set_rsc(Some(Rsc::new("detail")));
        let products = Arc::new(node_with_child(CHILDREN_SLOT, "1", id_node.clone()));
        let existing = node_with_child(CHILDREN_SLOT, "products", products.clone());

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        let path = vec![
            (CHILDREN_SLOT.to_string(), Segment::literal("products")),
            (
                CHILDREN_SLOT.to_string(),
                Segment::param("id", "1", velo_tree::ParamKind::Dynamic),
            ),
        ];
        invalidate_cache_below_flight_segment_path(&new_cache, &existing, &path);

        let wiped = new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("products")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("1")
            .unwrap();
        assert!(wiped.rsc().ready().is_none());
        assert!(wiped.child_map(CHILDREN_SLOT).is_none());
        // Old generation untouched.
        assert_eq!(id_node.rsc().ready(), Some(&Rsc::new("detail")));
    }

    #[test]
    fn test_clear_keeps_loading_and_children() {
        let page = Arc::new(CacheNode::with_data(
            Some(Rsc::new("page")),
            LoadingState::Boundary(Rsc::new("spinner")),
        ));
        let inner_map = ChildSegmentMap::new();
        inner_map.insert("sub".to_string(), Arc::new(CacheNode::new()));
        page.set_child_map(CHILDREN_SLOT, inner_map.clone());
        let existing = node_with_child(CHILDREN_SLOT, "__PAGE__", page);

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        let path = vec![(CHILDREN_SLOT.to_string(), Segment::page())];
        clear_cache_node_data_for_segment_path(&new_cache, &existing, &path);

        let cleared = new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert!(cleared.rsc().ready().is_none());
        assert_eq!(
            cleared.loading(),
            LoadingState::Boundary(Rsc::new("spinner"))
        );
        assert!(cleared.child_map(CHILDREN_SLOT).unwrap().ptr_eq(&inner_map));
    }

    #[test]
    fn test_trigger_lazy_fetch_clears_each_leaf() {
        let page = Arc::new(CacheNode::with_data(
            Some(Rsc::new("page")),
            LoadingState::None,
        ));
        let shop = Arc::new(node_with_child(CHILDREN_SLOT, "__PAGE__", page));
        shop.set_rsc(Some(Rsc::new("shop")));
        let existing = node_with_child(CHILDREN_SLOT, "shop", shop);

        let patch = RouterStateTree::new(Segment::literal("shop"))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page()));
        let new_cache = CacheNode::new();
        let applied = trigger_lazy_fetch_for_leaf_segments(
            &new_cache,
            &existing,
            &[(CHILDREN_SLOT.to_string(), Segment::literal("shop"))],
            &patch,
        );
        assert!(applied);

        let leaf = new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("shop")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert!(leaf.rsc().ready().is_none());
    }
}
