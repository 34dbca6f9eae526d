//! The restore reducer (history back/forward).

use std::sync::Arc;

use velo_tree::{extract_path_from_tree, RouterStateTree};

use crate::error::RouterError;
use crate::ppr::update_cache_node_on_popstate_restoration;
use crate::queue::EngineInner;
use crate::state::{AppRouterState, FocusAndScrollRef, PushRef};
use crate::url::NavigationUrl;

pub(crate) fn restore_reducer(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    url: String,
    tree: Option<Arc<RouterStateTree>>,
) -> Result<Arc<AppRouterState>, RouterError> {
    let url = NavigationUrl::parse(&url);
    // Trust the tree the history entry carried; entries written by
    // application code carry none, in which case the current tree stands.
    let new_tree = tree.unwrap_or_else(|| Arc::clone(&state.tree));
    // The cache is reused as-is: no patch/fill pipeline runs on a traversal.
    // Under partial prerendering the rendered path is rehydrated so settled
    // nodes stop advertising their prefetch variants.
    let cache = if engine.config.ppr_enabled {
        update_cache_node_on_popstate_restoration(&state.cache, &new_tree)
    } else {
        Arc::clone(&state.cache)
    };
    let next_url = extract_path_from_tree(&new_tree).or_else(|| Some(url.pathname.clone()));
    Ok(Arc::new(AppRouterState {
        build_id: state.build_id.clone(),
        canonical_url: url.href(),
        tree: new_tree,
        cache,
        prefetch_cache: Arc::clone(&state.prefetch_cache),
        push_ref: PushRef {
            pending_push: false,
            mpa_navigation: false,
            // The entry being restored may carry state written by
            // application code; leave it alone.
            preserve_custom_history_state: true,
        },
        focus_and_scroll_ref: FocusAndScrollRef::default(),
        next_url,
    }))
}
