//! The server-action reducer.

use std::sync::Arc;

use tracing::warn;
use velo_cache::{fill_lazy_items_till_leaf_with_head, CacheNode, FillPrefetchInfo};
use velo_tree::{
    apply_router_state_patch, is_navigating_to_new_root_layout, FlightData, RouteDiffResponse,
};

use crate::action::ServerActionResultSender;
use crate::error::RouterError;
use crate::fetch::RedirectKind;
use crate::prefetch::{PrefetchCache, PrefetchKind};
use crate::queue::EngineInner;
use crate::reducers::{
    handle_external_url, handle_segment_mismatch, refresh_inactive_parallel_segments,
};
use crate::state::{handle_mutable, AppRouterState, Mutable};
use crate::url::NavigationUrl;

pub(crate) async fn server_action_reducer(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    action_id: String,
    args: serde_json::Value,
    result_tx: Option<ServerActionResultSender>,
) -> Result<Arc<AppRouterState>, RouterError> {
    let mut result_tx = result_tx;
    let mut deliver = move |result: Result<Option<serde_json::Value>, RouterError>| {
        if let Some(tx) = result_tx.take() {
            let _ = tx.send(result);
        }
    };

    let mut mutable = Mutable::new();
    mutable.preserve_custom_history_state = Some(false);

    // Forward the interception discriminator only when the current route was
    // itself intercepted; otherwise the server might resolve the action
    // against the intercepting route's reference space.
    let next_url = if state.tree.contains_interception() {
        state.next_url.clone()
    } else {
        None
    };

    let response = match engine
        .fetcher
        .call_server_action(&action_id, args, &state.tree, next_url.as_deref())
        .await
    {
        Ok(response) => response,
        Err(err) => {
            // The failure surfaces to application code through the action's
            // own channel; the published state does not move.
            deliver(Err(RouterError::Fetch(err)));
            return Ok(state);
        }
    };

    let redirect = response
        .redirect
        .as_ref()
        .map(|(target, kind)| (NavigationUrl::parse(target), *kind));
    if let Some((target, kind)) = &redirect {
        mutable.pending_push = Some(*kind == RedirectKind::Push);
        mutable.canonical_url = Some(target.href());
    }

    let Some(flight_data) = response.flight_data else {
        deliver(Ok(response.action_result));
        if let Some((target, _)) = &redirect {
            let pending_push = mutable.pending_push.unwrap_or(false);
            return Ok(handle_external_url(
                &state,
                mutable,
                &target.to_full_string(),
                pending_push,
            ));
        }
        return Ok(state);
    };

    let paths = match flight_data {
        FlightData::ExternalUrl(target) => {
            deliver(Ok(response.action_result));
            let pending_push = state.push_ref.pending_push;
            return Ok(handle_external_url(&state, mutable, &target, pending_push));
        }
        FlightData::Paths(paths) => paths,
    };

    let action_revalidated = response.revalidated.any();
    let mut current_tree = Arc::clone(&state.tree);
    for path in &paths {
        if !path.is_root_render() {
            warn!("server action produced a non-root render, keeping previous state");
            deliver(Ok(response.action_result));
            return Ok(state);
        }
        let Some(new_tree) = apply_router_state_patch(&[], &current_tree, &path.tree) else {
            deliver(Ok(response.action_result));
            return Ok(handle_segment_mismatch(&state, mutable, &path.tree));
        };
        if is_navigating_to_new_root_layout(&current_tree, &new_tree) {
            deliver(Ok(response.action_result));
            let target = mutable
                .canonical_url
                .clone()
                .unwrap_or_else(|| state.canonical_url.clone());
            let pending_push = mutable.pending_push.unwrap_or(state.push_ref.pending_push);
            return Ok(handle_external_url(&state, mutable, &target, pending_push));
        }

        if let Some(seed) = &path.seed_data {
            // A server action may have changed anything on the server, so
            // the entire cache is rebuilt from its response.
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
            mutable.cache = Some(Arc::clone(&cache));
            mutable.prefetch_cache = Some(Arc::new(PrefetchCache::new(
                Arc::clone(&engine.fetcher),
                &engine.config,
            )));
            if action_revalidated {
                refresh_inactive_parallel_segments(
                    engine,
                    &state,
                    &new_tree,
                    &cache,
                    next_url.is_some(),
                )
                .await;
            }
        }

        mutable.patched_tree = Some(Arc::clone(&new_tree));
        current_tree = new_tree;
    }

    if let Some((target, _)) = &redirect {
        if !action_revalidated {
            // Seed the prefetch cache with the payload we already hold, so
            // the follow-up navigation to the redirect target needs no
            // round-trip. Skipped when the action revalidated: the cache was
            // cleared and the data must be refetched anyway.
            let prefetch_cache = mutable
                .prefetch_cache
                .as_ref()
                .unwrap_or(&state.prefetch_cache);
            prefetch_cache.create_seeded_entry(
                target,
                state.next_url.as_deref(),
                &state.tree,
                if response.is_prerender {
                    PrefetchKind::Full
                } else {
                    PrefetchKind::Auto
                },
                RouteDiffResponse::with_paths(paths.clone()),
                engine.now_ms(),
            );
        }
    }

    deliver(Ok(response.action_result));
    Ok(Arc::new(handle_mutable(&state, mutable)))
}
