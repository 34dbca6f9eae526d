//! Applying a flight data path to the cache tree.

use std::sync::Arc;

use velo_tree::FlightDataPath;

use crate::fill::{
    fill_cache_with_new_subtree_data, fill_cache_with_new_subtree_data_but_only_loading,
    fill_lazy_items_till_leaf_with_head, FillPrefetchInfo,
};
use crate::node::CacheNode;

/// Apply one flight data path onto a new cache generation.
///
/// Root renders replace the root node's content from seed data and populate
/// the whole tree below it. Nested renders seed the new root from the
/// existing generation and splice the subtree in copy-on-write, applying only
/// the loading boundary when the data came from a stale prefetch entry.
///
/// Returns whether the data was applied; `false` means the existing cache
/// lacks the target path (or the payload carried no seed data) and the
/// renderer should fetch lazily instead.
pub fn apply_flight_data(
    existing_cache: &Arc<CacheNode>,
    new_cache: &Arc<CacheNode>,
    data: &FlightDataPath,
    info: FillPrefetchInfo,
) -> bool {
    let Some(seed) = &data.seed_data else {
        return false;
    };
    if data.is_root_render() {
        new_cache.set_loading(seed.loading.clone());
        new_cache.set_rsc(seed.rsc.clone());
        // The prefetch variant is obsolete the moment real content lands.
        new_cache.set_prefetch_rsc(None);
        fill_lazy_items_till_leaf_with_head(
            new_cache,
            Some(existing_cache),
            &data.tree,
            Some(seed),
            data.head.as_ref(),
            info,
        );
        true
    } else {
        new_cache.inherit_from(existing_cache);
        if info.stale {
            fill_cache_with_new_subtree_data_but_only_loading(new_cache, existing_cache, data, info)
        } else {
            fill_cache_with_new_subtree_data(new_cache, existing_cache, data, info)
        }
    }
}
