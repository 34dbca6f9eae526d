//! Building the first state snapshot.

use std::sync::Arc;

use velo_cache::{fill_lazy_items_till_leaf_with_head, CacheNode, FillPrefetchInfo};
use velo_tree::{extract_path_from_tree, FlightData, RouteDiffResponse, RouterStateTree};

use crate::config::RouterConfig;
use crate::fetch::RouteDiffFetcher;
use crate::prefetch::{PrefetchCache, PrefetchKind};
use crate::state::{AppRouterState, FocusAndScrollRef, PushRef};
use crate::url::NavigationUrl;

/// What the host hands the engine at startup: the tree and (optionally) the
/// payload that was delivered with the initial page load.
#[derive(Debug)]
pub struct InitialRouterState {
    /// Build identifier baked into the page.
    pub build_id: String,
    /// The route tree the server rendered.
    pub tree: RouterStateTree,
    /// The URL the page loaded at.
    pub canonical_url: String,
    /// The initial render payload, used to fill the cache and seed the
    /// prefetch store without a round-trip.
    pub seed_payload: Option<RouteDiffResponse>,
}

impl InitialRouterState {
    /// Describe the initial page.
    pub fn new(
        build_id: impl Into<String>,
        tree: RouterStateTree,
        canonical_url: impl Into<String>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            tree,
            canonical_url: canonical_url.into(),
            seed_payload: None,
        }
    }

    /// Attach the payload delivered with the initial page load.
    pub fn with_seed_payload(mut self, payload: RouteDiffResponse) -> Self {
        self.seed_payload = Some(payload);
        self
    }

    pub(crate) fn into_state(
        self,
        fetcher: &Arc<dyn RouteDiffFetcher>,
        config: &RouterConfig,
        now_ms: u64,
    ) -> Arc<AppRouterState> {
        let tree = Arc::new(self.tree);
        let cache = Arc::new(CacheNode::new());
        let prefetch_cache = Arc::new(PrefetchCache::new(Arc::clone(fetcher), config));
        let url = NavigationUrl::parse(&self.canonical_url);

        if let Some(payload) = self.seed_payload {
            if let FlightData::Paths(paths) = &payload.flight_data {
                for path in paths {
                    if !path.is_root_render() {
                        continue;
                    }
                    if let Some(seed) = &path.seed_data {
                        cache.set_rsc(seed.rsc.clone());
                        cache.set_loading(seed.loading.clone());
                        fill_lazy_items_till_leaf_with_head(
                            &cache,
                            None,
                            &path.tree,
                            Some(seed),
                            path.head.as_ref(),
                            FillPrefetchInfo::default(),
                        );
                    }
                }
            }
            // The first navigation back to this URL is served from memory.
            prefetch_cache.create_seeded_entry(
                &url,
                None,
                &tree,
                PrefetchKind::Auto,
                payload,
                now_ms,
            );
        }

        let next_url = extract_path_from_tree(&tree).or_else(|| Some(url.pathname.clone()));
        Arc::new(AppRouterState {
            build_id: self.build_id,
            tree,
            cache,
            prefetch_cache,
            push_ref: PushRef::default(),
            focus_and_scroll_ref: FocusAndScrollRef::default(),
            canonical_url: url.href(),
            next_url,
        })
    }
}
