//! The reducer state snapshot and the mutable-merge helper.

use std::sync::Arc;

use velo_cache::CacheNode;
use velo_tree::{compute_changed_path, RouterStateTree, Segment, SlotKey};

use crate::prefetch::PrefetchCache;

/// History integration flags carried with each state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRef {
    /// The canonical URL should be pushed (rather than replaced) when the
    /// history collaborator syncs.
    pub pending_push: bool,
    /// The engine gave up on incremental reconciliation; the collaborator
    /// must perform a full-page navigation to the canonical URL.
    pub mpa_navigation: bool,
    /// Keep history state written by application code instead of
    /// overwriting it on the next sync.
    pub preserve_custom_history_state: bool,
}

/// Scroll and focus restoration targets for the rendering collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusAndScrollRef {
    /// Whether focus/scroll should be applied on the next render.
    pub apply: bool,
    /// The navigation changed only the hash fragment.
    pub only_hash_change: bool,
    /// Fragment to scroll to, without the leading `#`.
    pub hash_fragment: Option<String>,
    /// Segment paths of the newly filled leaves to scroll into view.
    pub segment_paths: Vec<Vec<(SlotKey, Segment)>>,
}

/// The single serialized snapshot threaded through the action queue.
///
/// A new snapshot is produced per action; published snapshots are never
/// mutated (cache node internals may settle in place, but the observed
/// tree/cache root references only change by replacement).
#[derive(Clone)]
pub struct AppRouterState {
    /// Build identifier, sent with fetches so the server can detect skew.
    pub build_id: String,
    /// The current router state tree.
    pub tree: Arc<RouterStateTree>,
    /// Root of the cache node tree.
    pub cache: Arc<CacheNode>,
    /// Prefetch entry store.
    pub prefetch_cache: Arc<PrefetchCache>,
    /// History flags.
    pub push_ref: PushRef,
    /// Scroll/focus targets.
    pub focus_and_scroll_ref: FocusAndScrollRef,
    /// The URL the address bar should show.
    pub canonical_url: String,
    /// Interception-route discriminator derived from the last tree change.
    pub next_url: Option<String>,
}

impl std::fmt::Debug for AppRouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRouterState")
            .field("build_id", &self.build_id)
            .field("canonical_url", &self.canonical_url)
            .field("next_url", &self.next_url)
            .field("push_ref", &self.push_ref)
            .finish_non_exhaustive()
    }
}

/// Accumulator for the fields an action wants to change. Merged over the
/// previous state by [`handle_mutable`], so reducers only name what they
/// touched.
#[derive(Default)]
pub(crate) struct Mutable {
    pub(crate) patched_tree: Option<Arc<RouterStateTree>>,
    pub(crate) cache: Option<Arc<CacheNode>>,
    pub(crate) prefetch_cache: Option<Arc<PrefetchCache>>,
    pub(crate) canonical_url: Option<String>,
    pub(crate) pending_push: Option<bool>,
    pub(crate) mpa_navigation: Option<bool>,
    pub(crate) preserve_custom_history_state: Option<bool>,
    pub(crate) scrollable_segments: Option<Vec<Vec<(SlotKey, Segment)>>>,
    pub(crate) hash_fragment: Option<String>,
    pub(crate) should_scroll: bool,
}

impl Mutable {
    pub(crate) fn new() -> Self {
        Self {
            should_scroll: true,
            ..Default::default()
        }
    }
}

/// Produce the next state snapshot from the previous one plus an action's
/// accumulated changes.
pub(crate) fn handle_mutable(state: &AppRouterState, mutable: Mutable) -> AppRouterState {
    let canonical_url = mutable
        .canonical_url
        .unwrap_or_else(|| state.canonical_url.clone());
    let only_hash_change = mutable.hash_fragment.is_some()
        && strip_hash(&state.canonical_url) == strip_hash(&canonical_url);
    let next_url = match &mutable.patched_tree {
        Some(patched) => compute_changed_path(&state.tree, patched)
            .or_else(|| Some(state.canonical_url.clone())),
        None => state.next_url.clone(),
    };
    AppRouterState {
        build_id: state.build_id.clone(),
        canonical_url,
        push_ref: PushRef {
            pending_push: mutable.pending_push.unwrap_or(state.push_ref.pending_push),
            mpa_navigation: mutable
                .mpa_navigation
                .unwrap_or(state.push_ref.mpa_navigation),
            preserve_custom_history_state: mutable
                .preserve_custom_history_state
                .unwrap_or(state.push_ref.preserve_custom_history_state),
        },
        focus_and_scroll_ref: FocusAndScrollRef {
            apply: if mutable.should_scroll {
                mutable.scrollable_segments.is_some() || state.focus_and_scroll_ref.apply
            } else {
                false
            },
            only_hash_change,
            hash_fragment: if mutable.should_scroll {
                mutable
                    .hash_fragment
                    .or_else(|| state.focus_and_scroll_ref.hash_fragment.clone())
            } else {
                None
            },
            segment_paths: if mutable.should_scroll {
                mutable
                    .scrollable_segments
                    .unwrap_or_else(|| state.focus_and_scroll_ref.segment_paths.clone())
            } else {
                Vec::new()
            },
        },
        cache: mutable.cache.unwrap_or_else(|| Arc::clone(&state.cache)),
        prefetch_cache: mutable
            .prefetch_cache
            .unwrap_or_else(|| Arc::clone(&state.prefetch_cache)),
        tree: mutable.patched_tree.unwrap_or_else(|| Arc::clone(&state.tree)),
        next_url,
    }
}

fn strip_hash(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}
