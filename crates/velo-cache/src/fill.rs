//! Copy-on-write cache fill algorithms.

use std::sync::Arc;

use tracing::debug;
use velo_tree::{FlightDataPath, RouterStateTree, Rsc, SeedData, Segment, SlotKey};

use crate::invalidate::{detach_if_shared, invalidate_cache_by_router_state};
use crate::node::{CacheNode, ChildSegmentMap};

/// What the cache algorithms need to know about the prefetch entry whose
/// data they are applying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillPrefetchInfo {
    /// The data came from a background (`auto`) prefetch that is still
    /// within its reuse window; segments without fresh seed data may carry
    /// the existing node forward instead of forcing a lazy fetch.
    pub reusable_auto_prefetch: bool,
    /// The entry is stale: only its loading boundary may be applied.
    pub stale: bool,
}

enum FillMode {
    /// Apply rendered content and loading boundaries.
    Full,
    /// Apply only the loading boundary; content is left missing so the
    /// renderer refetches it lazily.
    LoadingOnly,
}

/// Walk down to the subtree a flight data path targets and fill new cache
/// nodes along the way, sharing every untouched sibling with the existing
/// generation.
///
/// Returns `false` when the existing cache lacks the path to the target;
/// the caller treats that as "missing segment, let the renderer fetch
/// lazily" rather than fabricating data.
pub fn fill_cache_with_new_subtree_data(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    data: &FlightDataPath,
    info: FillPrefetchInfo,
) -> bool {
    fill_impl(
        new_cache,
        existing_cache,
        &data.segment_path,
        data,
        info,
        FillMode::Full,
    )
}

/// Variant of [`fill_cache_with_new_subtree_data`] that upgrades only the
/// loading boundary at the target, used when a stale prefetch should improve
/// the pending UI while the actual data is refetched lazily.
pub fn fill_cache_with_new_subtree_data_but_only_loading(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    data: &FlightDataPath,
    info: FillPrefetchInfo,
) -> bool {
    fill_impl(
        new_cache,
        existing_cache,
        &data.segment_path,
        data,
        info,
        FillMode::LoadingOnly,
    )
}

fn fill_impl(
    new_cache: &CacheNode,
    existing_cache: &CacheNode,
    segment_path: &[(SlotKey, Segment)],
    data: &FlightDataPath,
    info: FillPrefetchInfo,
    mode: FillMode,
) -> bool {
    let Some((slot, segment)) = segment_path.first() else {
        // Root renders do not go through the subtree fill.
        debug_assert!(false, "fill called with an empty segment path");
        return false;
    };
    let is_last = segment_path.len() == 1;
    let key = segment.cache_key();

    let Some(existing_map) = existing_cache.child_map(slot) else {
        debug!(slot = %slot, "existing cache lacks slot, deferring to lazy fetch");
        return false;
    };
    let child_map = detach_if_shared(new_cache, slot, &existing_map);

    let existing_child = existing_map.get(&key);
    let child = child_map.get(&key);

    if is_last {
        let should_fill = match (&child, &existing_child) {
            (None, _) => true,
            (Some(c), Some(e)) => !c.lazy_in_flight() || Arc::ptr_eq(c, e),
            (Some(c), None) => !c.lazy_in_flight(),
        };
        if should_fill {
            let Some(seed) = &data.seed_data else {
                return false;
            };
            let new_child = match mode {
                FillMode::Full => CacheNode::with_data(seed.rsc.clone(), seed.loading.clone()),
                FillMode::LoadingOnly => CacheNode::with_data(None, seed.loading.clone()),
            };
            if let Some(existing_child) = &existing_child {
                // Keep siblings under other slots of this node, then drop
                // the one-level-deep entries the new router state replaces.
                new_child.set_parallel_routes(existing_child.parallel_routes_snapshot());
                invalidate_cache_by_router_state(&new_child, existing_child, &data.tree);
            }
            let new_child = Arc::new(new_child);
            if matches!(mode, FillMode::Full) {
                fill_lazy_items_till_leaf_with_head(
                    &new_child,
                    existing_child.as_deref(),
                    &data.tree,
                    data.seed_data.as_ref(),
                    data.head.as_ref(),
                    info,
                );
            }
            child_map.insert(key, new_child);
        }
        return true;
    }

    let (Some(child), Some(existing_child)) = (child, existing_child) else {
        debug!(slot = %slot, segment = %segment, "existing cache lacks segment, deferring to lazy fetch");
        return false;
    };
    let child = if Arc::ptr_eq(&child, &existing_child) {
        // Still the shared node from the previous generation; detach before
        // descending so the old tree is never mutated.
        let detached = child.clone_detached();
        child_map.insert(key, detached.clone());
        detached
    } else {
        child
    };
    fill_impl(&child, &existing_child, &segment_path[1..], data, info, mode)
}

/// Populate a freshly filled node's descendants down to the leaf.
///
/// Each slot named by the patched router state gets, in order of preference:
/// the seed data the server sent, the existing node carried forward (only
/// when the data came from a reusable auto prefetch), or an empty node that
/// the renderer fills lazily. The deepest leaf receives the head content.
pub fn fill_lazy_items_till_leaf_with_head(
    new_cache: &Arc<CacheNode>,
    existing_cache: Option<&CacheNode>,
    router_state: &RouterStateTree,
    seed_data: Option<&SeedData>,
    head: Option<&Rsc>,
    info: FillPrefetchInfo,
) {
    if router_state.parallel_routes.is_empty() {
        new_cache.set_head(head.cloned());
        return;
    }
    for (slot, child_state) in &router_state.parallel_routes {
        let key = child_state.segment.cache_key();
        let child_seed = seed_data.and_then(|s| s.children.get(slot));

        if let Some(existing) = existing_cache {
            if let Some(existing_map) = existing.child_map(slot) {
                let new_map = existing_map.detach();
                let existing_child = new_map.get(&key);
                let new_child = match (child_seed, &existing_child) {
                    (Some(seed), _) => {
                        let node = CacheNode::with_data(seed.rsc.clone(), seed.loading.clone());
                        if let Some(existing_child) = &existing_child {
                            node.set_parallel_routes(existing_child.parallel_routes_snapshot());
                        }
                        Arc::new(node)
                    }
                    (None, Some(existing_child)) if info.reusable_auto_prefetch => {
                        existing_child.clone_detached()
                    }
                    (None, existing_child) => {
                        let node = CacheNode::new();
                        if let Some(existing_child) = existing_child {
                            node.set_parallel_routes(existing_child.parallel_routes_snapshot());
                        }
                        Arc::new(node)
                    }
                };
                new_map.insert(key, new_child.clone());
                fill_lazy_items_till_leaf_with_head(
                    &new_child,
                    existing_child.as_deref(),
                    child_state,
                    child_seed,
                    head,
                    info,
                );
                new_cache.set_child_map(slot.clone(), new_map);
                continue;
            }
        }

        // The existing cache has nothing for this slot; build from seed data
        // alone (or leave a hole for the lazy fetch).
        let new_child = Arc::new(match child_seed {
            Some(seed) => CacheNode::with_data(seed.rsc.clone(), seed.loading.clone()),
            None => CacheNode::new(),
        });
        match new_cache.child_map(slot) {
            Some(map) => map.insert(key, new_child.clone()),
            None => {
                let map = ChildSegmentMap::new();
                map.insert(key, new_child.clone());
                new_cache.set_child_map(slot.clone(), map);
            }
        }
        fill_lazy_items_till_leaf_with_head(&new_child, None, child_state, child_seed, head, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_tree::{LoadingState, CHILDREN_SLOT};

    fn leaf_seed(rsc: &str) -> SeedData {
        SeedData::new(Segment::page(), Some(Rsc::new(rsc)))
    }

    fn shop_data(head: &str) -> FlightDataPath {
        let tree = RouterStateTree::new(Segment::literal("shop"))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page()));
        let seed = SeedData::new(Segment::literal("shop"), Some(Rsc::new("shop-layout")))
            .with_child(CHILDREN_SLOT, leaf_seed("shop-page"));
        FlightDataPath::at(
            vec![(CHILDREN_SLOT.to_string(), Segment::literal("shop"))],
            tree,
            Some(seed),
            Some(Rsc::new(head)),
        )
    }

    fn root_with(slot_entries: &[(&str, &str, Arc<CacheNode>)]) -> CacheNode {
        let root = CacheNode::new();
        for (slot, key, node) in slot_entries {
            match root.child_map(slot) {
                Some(map) => map.insert(key.to_string(), node.clone()),
                None => {
                    let map = ChildSegmentMap::new();
                    map.insert(key.to_string(), node.clone());
                    root.set_child_map(slot.to_string(), map);
                }
            }
        }
        root
    }

    #[test]
    fn test_fill_populates_target_and_leaves() {
        let old_shop = Arc::new(CacheNode::with_data(Some(Rsc::new("old")), LoadingState::None));
        let existing = root_with(&[(CHILDREN_SLOT, "shop", old_shop)]);

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        let applied =
            fill_cache_with_new_subtree_data(&new_cache, &existing, &shop_data("<title>"), FillPrefetchInfo::default());
        assert!(applied);

        let shop = new_cache.child_map(CHILDREN_SLOT).unwrap().get("shop").unwrap();
        assert_eq!(shop.rsc().ready(), Some(&Rsc::new("shop-layout")));
        let page = shop
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert_eq!(page.rsc().ready(), Some(&Rsc::new("shop-page")));
        // Head lands on the deepest leaf.
        assert_eq!(page.head(), Some(Rsc::new("<title>")));
    }

    #[test]
    fn test_fill_bails_on_missing_slot() {
        let existing = CacheNode::new();
        let new_cache = CacheNode::new();
        let applied = fill_cache_with_new_subtree_data(
            &new_cache,
            &existing,
            &shop_data("h"),
            FillPrefetchInfo::default(),
        );
        assert!(!applied);
    }

    #[test]
    fn test_fill_preserves_sibling_slots() {
        // The shop node has a sibling "modal" slot that the patch does not
        // mention; the new node must keep it by reference.
        let modal_map = ChildSegmentMap::new();
        modal_map.insert("photo".to_string(), Arc::new(CacheNode::new()));
        let old_shop = Arc::new(CacheNode::with_data(Some(Rsc::new("old")), LoadingState::None));
        old_shop.set_child_map("modal", modal_map.clone());
        let existing = root_with(&[(CHILDREN_SLOT, "shop", old_shop)]);

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        fill_cache_with_new_subtree_data(
            &new_cache,
            &existing,
            &shop_data("h"),
            FillPrefetchInfo::default(),
        );

        let shop = new_cache.child_map(CHILDREN_SLOT).unwrap().get("shop").unwrap();
        assert!(shop.child_map("modal").unwrap().ptr_eq(&modal_map));
    }

    #[test]
    fn test_structural_sharing_of_untouched_slots() {
        // A fill touching only "children" must leave the root's other slot
        // maps identity-equal to the previous generation's.
        let old_shop = Arc::new(CacheNode::new());
        let existing = root_with(&[(CHILDREN_SLOT, "shop", old_shop)]);
        let side_map = ChildSegmentMap::new();
        side_map.insert("promo".to_string(), Arc::new(CacheNode::new()));
        existing.set_child_map("banner", side_map.clone());

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        fill_cache_with_new_subtree_data(
            &new_cache,
            &existing,
            &shop_data("h"),
            FillPrefetchInfo::default(),
        );

        assert!(new_cache.child_map("banner").unwrap().ptr_eq(&side_map));
        assert!(!new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .ptr_eq(&existing.child_map(CHILDREN_SLOT).unwrap()));
    }

    #[test]
    fn test_loading_only_fill_leaves_content_missing() {
        let old_shop = Arc::new(CacheNode::with_data(Some(Rsc::new("old")), LoadingState::None));
        let existing = root_with(&[(CHILDREN_SLOT, "shop", old_shop)]);

        let mut data = shop_data("h");
        if let Some(seed) = &mut data.seed_data {
            seed.loading = LoadingState::Boundary(Rsc::new("spinner"));
        }
        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        let applied = fill_cache_with_new_subtree_data_but_only_loading(
            &new_cache,
            &existing,
            &data,
            FillPrefetchInfo { stale: true, ..Default::default() },
        );
        assert!(applied);

        let shop = new_cache.child_map(CHILDREN_SLOT).unwrap().get("shop").unwrap();
        assert!(shop.rsc().ready().is_none());
        assert_eq!(shop.loading(), LoadingState::Boundary(Rsc::new("spinner")));
    }

    #[test]
    fn test_reusable_auto_prefetch_carries_existing_forward() {
        // Seed data covers only the layout; the page level has no seed but
        // the existing node may be reused under a fresh auto prefetch.
        let old_page = Arc::new(CacheNode::with_data(
            Some(Rsc::new("cached-page")),
            LoadingState::None,
        ));
        let old_shop = Arc::new(CacheNode::new());
        let page_map = ChildSegmentMap::new();
        page_map.insert("__PAGE__".to_string(), old_page);
        old_shop.set_child_map(CHILDREN_SLOT, page_map);
        let existing = root_with(&[(CHILDREN_SLOT, "shop", old_shop)]);

        let tree = RouterStateTree::new(Segment::literal("shop"))
            .with_child(CHILDREN_SLOT, RouterStateTree::new(Segment::page()));
        let seed = SeedData::new(Segment::literal("shop"), Some(Rsc::new("new-layout")));
        let data = FlightDataPath::at(
            vec![(CHILDREN_SLOT.to_string(), Segment::literal("shop"))],
            tree,
            Some(seed),
            None,
        );

        let new_cache = CacheNode::new();
        new_cache.inherit_from(&existing);
        fill_cache_with_new_subtree_data(
            &new_cache,
            &existing,
            &data,
            FillPrefetchInfo {
                reusable_auto_prefetch: true,
                ..Default::default()
            },
        );

        let page = new_cache
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("shop")
            .unwrap()
            .child_map(CHILDREN_SLOT)
            .unwrap()
            .get("__PAGE__")
            .unwrap();
        assert_eq!(page.rsc().ready(), Some(&Rsc::new("cached-page")));
    }
}
