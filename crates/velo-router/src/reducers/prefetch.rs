//! The prefetch reducer.

use std::sync::Arc;

use tracing::debug;

use crate::error::RouterError;
use crate::prefetch::{PrefetchKind, PrefetchRequest};
use crate::queue::EngineInner;
use crate::state::AppRouterState;
use crate::url::NavigationUrl;

pub(crate) fn prefetch_reducer(
    engine: &Arc<EngineInner>,
    state: Arc<AppRouterState>,
    url: String,
    kind: PrefetchKind,
) -> Result<Arc<AppRouterState>, RouterError> {
    let url = NavigationUrl::parse(&url);
    if url.is_external(&engine.config.origin) {
        // External targets cannot be prefetched through the app transport.
        debug!(url = %url, "ignoring prefetch for external URL");
        return Ok(state);
    }
    let now_ms = engine.now_ms();
    state.prefetch_cache.prune(now_ms);
    state.prefetch_cache.get_or_create(
        &PrefetchRequest {
            url: &url,
            next_url: state.next_url.as_deref(),
            tree: &state.tree,
            kind: Some(kind),
            allow_aliasing: true,
        },
        now_ms,
    );
    // Prefetching mutates only the prefetch store; the published snapshot is
    // unchanged.
    Ok(state)
}
