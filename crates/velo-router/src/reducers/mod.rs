//! One reducer per action kind.

use std::sync::Arc;

use tracing::warn;
use velo_tree::RouterStateTree;

use crate::action::Action;
use crate::error::RouterError;
use crate::queue::EngineInner;
use crate::state::{handle_mutable, AppRouterState, Mutable};

mod navigate;
mod prefetch;
mod refresh;
mod restore;
mod server_action;
mod server_patch;

pub(crate) use refresh::refresh_inactive_parallel_segments;

/// Run the reducer for an action against the current state, producing the
/// next snapshot.
pub(crate) async fn reduce(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    action: Action,
) -> Result<Arc<AppRouterState>, RouterError> {
    match action {
        Action::Navigate {
            url,
            history,
            should_scroll,
        } => navigate::navigate_reducer(engine, state, url, history, should_scroll).await,
        Action::ServerPatch {
            flight_data,
            previous_tree,
            canonical_url_override,
        } => server_patch::server_patch_reducer(
            engine,
            state,
            flight_data,
            previous_tree,
            canonical_url_override,
        ),
        Action::Restore { url, tree } => restore::restore_reducer(engine, state, url, tree),
        Action::Refresh => refresh::refresh_reducer(engine, state, crate::fetch::FetchKind::Refresh).await,
        Action::HmrRefresh => {
            refresh::refresh_reducer(engine, state, crate::fetch::FetchKind::HmrRefresh).await
        }
        Action::Prefetch { url, kind } => prefetch::prefetch_reducer(engine, state, url, kind),
        Action::ServerAction {
            action_id,
            args,
            result_tx,
        } => server_action::server_action_reducer(engine, state, action_id, args, result_tx).await,
    }
}

/// Give up on incremental reconciliation: mark the state for a full-page
/// navigation to `url`. Not an error path; external URLs and root layout
/// changes always land here.
pub(crate) fn handle_external_url(
    state: &AppRouterState,
    mut mutable: Mutable,
    url: &str,
    pending_push: bool,
) -> Arc<AppRouterState> {
    mutable.mpa_navigation = Some(true);
    mutable.canonical_url = Some(url.to_string());
    mutable.pending_push = Some(pending_push);
    mutable.scrollable_segments = None;
    Arc::new(handle_mutable(state, mutable))
}

/// A patch failed against both the current tree and the prefetch-time tree.
/// Recover by reloading the canonical URL as a full page instead of risking
/// an inconsistent cache.
pub(crate) fn handle_segment_mismatch(
    state: &AppRouterState,
    mutable: Mutable,
    patch: &RouterStateTree,
) -> Arc<AppRouterState> {
    if cfg!(debug_assertions) {
        warn!(
            segment = %patch.segment,
            "segment mismatch while patching tree, performing full-page navigation"
        );
    }
    let canonical_url = state.canonical_url.clone();
    let pending_push = state.push_ref.pending_push;
    handle_external_url(state, mutable, &canonical_url, pending_push)
}
