//! The navigate reducer.

use std::sync::Arc;

use tracing::debug;
use velo_cache::{
    apply_flight_data, invalidate_cache_below_flight_segment_path,
    trigger_lazy_fetch_for_leaf_segments, CacheNode, FillPrefetchInfo,
};
use velo_tree::{
    apply_router_state_patch, is_navigating_to_new_root_layout, should_hard_navigate, FlightData,
    FlightDataPath, RouterStateTree,
};

use crate::action::HistoryAction;
use crate::error::RouterError;
use crate::fetch::FetchKind;
use crate::ppr::{listen_for_dynamic_request, update_cache_node_on_navigation};
use crate::prefetch::{PrefetchKind, PrefetchRequest, PrefetchStatus};
use crate::queue::EngineInner;
use crate::reducers::{handle_external_url, handle_segment_mismatch};
use crate::state::{handle_mutable, AppRouterState, Mutable};
use crate::url::NavigationUrl;

pub(crate) async fn navigate_reducer(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    url: String,
    history: HistoryAction,
    should_scroll: bool,
) -> Result<Arc<AppRouterState>, RouterError> {
    let url = NavigationUrl::parse(&url);
    let href = url.href();
    let pending_push = history == HistoryAction::Push;
    let mut mutable = Mutable::new();
    mutable.preserve_custom_history_state = Some(false);

    // Prune on every navigation so the prefetch cache cannot grow without
    // bound.
    let now_ms = engine.now_ms();
    state.prefetch_cache.prune(now_ms);

    if url.is_external(&engine.config.origin) {
        return Ok(handle_external_url(
            &state,
            mutable,
            &url.to_full_string(),
            pending_push,
        ));
    }

    let entry = state.prefetch_cache.get_or_create(
        &PrefetchRequest {
            url: &url,
            next_url: state.next_url.as_deref(),
            tree: &state.tree,
            kind: None,
            allow_aliasing: true,
        },
        now_ms,
    );
    // A real navigation now depends on this fetch; let it skip the queue.
    state.prefetch_cache.bump(&entry.key);

    let tree_at_time_of_prefetch = Arc::clone(&entry.tree_at_time_of_prefetch);
    let response = match entry.data.clone().await {
        Ok(response) => response,
        Err(err) => {
            // Navigation silently fails to progress; the caller sees the
            // failure only through the action's own channel.
            debug!(url = %href, error = %err, "navigation fetch failed, keeping previous state");
            return Ok(state);
        }
    };

    let is_first_read = entry.last_used_ms.is_none();
    let now_ms = engine.now_ms();
    state.prefetch_cache.mark_used(&entry.key, now_ms);

    let paths = match &response.flight_data {
        FlightData::ExternalUrl(target) => {
            return Ok(handle_external_url(&state, mutable, target, pending_push));
        }
        FlightData::Paths(paths) => paths,
    };

    let mut current_tree = Arc::clone(&state.tree);
    let mut current_cache = Arc::clone(&state.cache);
    let mut scrollable_segments = Vec::new();

    for path in paths {
        // Tree patches apply strictly in order: each depends on the
        // cumulative tree and cache of the previous iteration.
        let mut new_tree =
            apply_router_state_patch(&path.segment_path, &current_tree, &path.tree);
        if new_tree.is_none() {
            // The live tree moved on since the prefetch; try the tree that
            // was current when the prefetch was issued.
            new_tree = apply_router_state_patch(
                &path.segment_path,
                &tree_at_time_of_prefetch,
                &path.tree,
            );
        }
        let Some(new_tree) = new_tree else {
            return Ok(handle_segment_mismatch(&state, mutable, &path.tree));
        };

        if is_navigating_to_new_root_layout(&current_tree, &new_tree) {
            return Ok(handle_external_url(&state, mutable, &href, pending_push));
        }

        if engine.config.ppr_enabled && path.is_root_render() {
            if let Some(applied_tree) = navigate_ppr(
                engine,
                &state,
                &mut mutable,
                &current_tree,
                &mut current_cache,
                &url,
                path,
            ) {
                current_tree = applied_tree;
            } else {
                // Nothing changed; render the old cache under the new tree.
                current_tree = Arc::new(path.tree.clone());
            }
        } else {
            let cache = Arc::new(CacheNode::new());
            let applied = if entry.status == PrefetchStatus::Stale && !is_first_read {
                // Reuse only the loading boundaries of the stale entry; the
                // cleared leaves refetch lazily. Subsequent reads only: the
                // first read has no rendered loading state to reuse yet.
                let applied = trigger_lazy_fetch_for_leaf_segments(
                    &cache,
                    &current_cache,
                    &path.segment_path,
                    &path.tree,
                );
                // The loading state was just consumed; keep the entry warm
                // for the next navigation.
                state.prefetch_cache.mark_used(&entry.key, engine.now_ms());
                applied
            } else {
                let info = FillPrefetchInfo {
                    reusable_auto_prefetch: entry.kind == PrefetchKind::Auto
                        && entry.status == PrefetchStatus::Reusable,
                    stale: false,
                };
                apply_flight_data(&current_cache, &cache, path, info)
            };

            if should_hard_navigate(&path.segment_path, &current_tree) {
                // A dynamic parameter changed: everything below the path is
                // for a different entity. Keep the root content and wipe the
                // subtree.
                cache.set_rsc_state(current_cache.rsc());
                cache.set_prefetch_rsc(current_cache.prefetch_rsc());
                invalidate_cache_below_flight_segment_path(
                    &cache,
                    &current_cache,
                    &path.segment_path,
                );
                mutable.cache = Some(Arc::clone(&cache));
            } else if applied {
                mutable.cache = Some(Arc::clone(&cache));
                current_cache = cache;
            }
            current_tree = new_tree;
        }

        for tail in path.tree.leaf_paths() {
            let mut segment_path = path.segment_path.clone();
            segment_path.extend(tail);
            // Default placeholders are not scroll targets.
            let is_default = matches!(segment_path.last(), Some((_, segment)) if segment.is_default());
            if !segment_path.is_empty() && !is_default {
                scrollable_segments.push(segment_path);
            }
        }
    }

    mutable.patched_tree = Some(current_tree);
    mutable.canonical_url = Some(match &response.canonical_url_override {
        Some(target) => NavigationUrl::parse(target).href(),
        None => href,
    });
    mutable.pending_push = Some(pending_push);
    mutable.scrollable_segments = Some(scrollable_segments);
    mutable.hash_fragment = url.hash_fragment();
    mutable.should_scroll = should_scroll;
    Ok(Arc::new(handle_mutable(&state, mutable)))
}

/// The partial prerendering path for a root render: build the task tree,
/// publish whatever can render now, and let the trailing dynamic request
/// fill the holes without blocking.
fn navigate_ppr(
    engine: &Arc<EngineInner>,
    state: &AppRouterState,
    mutable: &mut Mutable,
    current_tree: &Arc<RouterStateTree>,
    current_cache: &mut Arc<CacheNode>,
    url: &NavigationUrl,
    path: &FlightDataPath,
) -> Option<Arc<RouterStateTree>> {
    let new_route = Arc::new(path.tree.clone());
    let task = update_cache_node_on_navigation(
        current_cache,
        current_tree,
        &new_route,
        path.seed_data.as_ref(),
        path.head.as_ref(),
    )?;
    let node = task.node.clone()?;
    let patched_route = Arc::clone(&task.route);

    if task.needs_dynamic_request {
        let fetcher = Arc::clone(&engine.fetcher);
        let hint = Arc::clone(current_tree);
        let next_url = state.next_url.clone();
        let target = url.href_without_hash();
        // Render immediately; the dynamic response streams into the task
        // tree and pings the deferred slots as it lands.
        tokio::spawn(listen_for_dynamic_request(task, async move {
            fetcher
                .fetch_route_diff(&target, &hint, next_url.as_deref(), FetchKind::Navigation)
                .await
                .map(Arc::new)
        }));
    }

    mutable.cache = Some(Arc::clone(&node));
    *current_cache = node;
    Some(patched_route)
}
