//! The server-patch reducer (lazy fetches completing out-of-band).

use std::sync::Arc;

use tracing::debug;
use velo_cache::{apply_flight_data, CacheNode, FillPrefetchInfo};
use velo_tree::{
    apply_router_state_patch, is_navigating_to_new_root_layout, FlightData, RouterStateTree,
};

use crate::error::RouterError;
use crate::queue::EngineInner;
use crate::reducers::{handle_external_url, handle_segment_mismatch};
use crate::state::{handle_mutable, AppRouterState, Mutable};
use crate::url::NavigationUrl;

pub(crate) fn server_patch_reducer(
    _engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    flight_data: FlightData,
    previous_tree: Arc<RouterStateTree>,
    canonical_url_override: Option<String>,
) -> Result<Arc<AppRouterState>, RouterError> {
    // The tree moved on while the lazy fetch was in flight; its data
    // describes a position that no longer exists. Drop it.
    if *previous_tree != *state.tree {
        debug!("server patch ignored: tree changed while the fetch was in flight");
        return Ok(state);
    }

    let mut mutable = Mutable::new();
    mutable.preserve_custom_history_state = Some(false);

    let paths = match &flight_data {
        FlightData::ExternalUrl(target) => {
            let pending_push = state.push_ref.pending_push;
            return Ok(handle_external_url(&state, mutable, target, pending_push));
        }
        FlightData::Paths(paths) => paths,
    };

    if let Some(target) = &canonical_url_override {
        mutable.canonical_url = Some(NavigationUrl::parse(target).href());
    }

    let mut current_tree = Arc::clone(&state.tree);
    let mut current_cache = Arc::clone(&state.cache);
    for path in paths {
        let Some(new_tree) = apply_router_state_patch(&path.segment_path, &current_tree, &path.tree)
        else {
            return Ok(handle_segment_mismatch(&state, mutable, &path.tree));
        };
        if is_navigating_to_new_root_layout(&current_tree, &new_tree) {
            let canonical_url = state.canonical_url.clone();
            let pending_push = state.push_ref.pending_push;
            return Ok(handle_external_url(&state, mutable, &canonical_url, pending_push));
        }

        let cache = Arc::new(CacheNode::new());
        if apply_flight_data(&current_cache, &cache, path, FillPrefetchInfo::default()) {
            mutable.cache = Some(Arc::clone(&cache));
            current_cache = cache;
        }
        mutable.patched_tree = Some(Arc::clone(&new_tree));
        current_tree = new_tree;
    }

    Ok(Arc::new(handle_mutable(&state, mutable)))
}
