//! The refresh reducer and inactive-parallel-segment refetching.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use velo_cache::{
    apply_flight_data, fill_lazy_items_till_leaf_with_head, CacheNode, FillPrefetchInfo,
};
use velo_tree::{
    apply_router_state_patch, is_navigating_to_new_root_layout, FlightData, RefreshMarker,
    RouterStateTree,
};

use crate::error::RouterError;
use crate::fetch::FetchKind;
use crate::prefetch::PrefetchCache;
use crate::queue::EngineInner;
use crate::reducers::{handle_external_url, handle_segment_mismatch};
use crate::state::{handle_mutable, AppRouterState, Mutable};
use crate::url::NavigationUrl;

pub(crate) async fn refresh_reducer(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    fetch_kind: FetchKind,
) -> Result<Arc<AppRouterState>, RouterError> {
    let url = NavigationUrl::parse(&state.canonical_url);
    let mut mutable = Mutable::new();
    mutable.preserve_custom_history_state = Some(false);

    // Forward the interception discriminator only when the current tree was
    // intercepted; otherwise the server would resolve the refresh against
    // the wrong route.
    let include_next_url = state.tree.contains_interception();
    let next_url = if include_next_url {
        state.next_url.clone()
    } else {
        None
    };

    let hint = state.tree.with_root_refetch_marker();
    let response = match engine
        .fetcher
        .fetch_route_diff(&url.href_without_hash(), &hint, next_url.as_deref(), fetch_kind)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, "refresh fetch failed, keeping previous state");
            return Ok(state);
        }
    };

    let paths = match &response.flight_data {
        FlightData::ExternalUrl(target) => {
            return Ok(handle_external_url(&state, mutable, target, false));
        }
        FlightData::Paths(paths) => paths,
    };

    let mut current_tree = Arc::clone(&state.tree);
    for path in paths {
        if !path.is_root_render() {
            warn!("refresh received a non-root render, keeping previous state");
            return Ok(state);
        }
        let Some(new_tree) = apply_router_state_patch(&[], &current_tree, &path.tree) else {
            return Ok(handle_segment_mismatch(&state, mutable, &path.tree));
        };
        if is_navigating_to_new_root_layout(&current_tree, &new_tree) {
            return Ok(handle_external_url(&state, mutable, &url.href(), false));
        }

        if let Some(seed) = &path.seed_data {
            // A refresh replaces the cache wholesale; nothing from the old
            // generation may survive into the new one.
            let cache = Arc::new(CacheNode::new());
            cache.set_rsc(seed.rsc.clone());
            cache.set_prefetch_rsc(None);
            cache.set_loading(seed.loading.clone());
            fill_lazy_items_till_leaf_with_head(
                &cache,
                None,
                &path.tree,
                Some(seed),
                path.head.as_ref(),
                FillPrefetchInfo::default(),
            );
            mutable.prefetch_cache = Some(Arc::new(PrefetchCache::new(
                Arc::clone(&engine.fetcher),
                &engine.config,
            )));
            mutable.cache = Some(Arc::clone(&cache));
            refresh_inactive_parallel_segments(engine, &state, &new_tree, &cache, include_next_url)
                .await;
        }

        mutable.patched_tree = Some(Arc::clone(&new_tree));
        mutable.canonical_url = Some(url.href());
        current_tree = new_tree;
    }

    Ok(Arc::new(handle_mutable(&state, mutable)))
}

/// Refetch subtrees that did not match the latest response but are marked to
/// refresh anyway (interception routes left open in parallel slots), and
/// apply their data into the new cache.
pub(crate) async fn refresh_inactive_parallel_segments(
    engine: &Arc<EngineInner>,
    state: &AppRouterState,
    updated_tree: &Arc<RouterStateTree>,
    updated_cache: &Arc<CacheNode>,
    include_next_url: bool,
) {
    let mut targets = Vec::new();
    collect_refresh_targets(updated_tree, &state.canonical_url, &mut targets);
    let mut fetched: HashSet<String> = HashSet::new();
    let next_url = if include_next_url {
        state.next_url.clone()
    } else {
        None
    };
    for target in targets {
        if !fetched.insert(target.clone()) {
            continue;
        }
        let hint = updated_tree.with_root_refetch_marker();
        match engine
            .fetcher
            .fetch_route_diff(&target, &hint, next_url.as_deref(), FetchKind::Refresh)
            .await
        {
            Ok(response) => {
                if let FlightData::Paths(paths) = &response.flight_data {
                    for path in paths {
                        apply_flight_data(
                            updated_cache,
                            updated_cache,
                            path,
                            FillPrefetchInfo::default(),
                        );
                    }
                }
            }
            Err(err) => {
                debug!(url = %target, error = %err, "inactive segment refetch failed");
            }
        }
    }
}

fn collect_refresh_targets(tree: &RouterStateTree, canonical_url: &str, out: &mut Vec<String>) {
    if tree.refresh == RefreshMarker::Refresh {
        if let Some(url) = &tree.url {
            // The segment matching the current location refreshes through
            // the main fetch; only inactive ones need their own request.
            if url != canonical_url {
                out.push(url.clone());
            }
        }
    }
    for child in tree.parallel_routes.values() {
        collect_refresh_targets(child, canonical_url, out);
    }
}
