//! The prefetch cache: deduplicated route diff fetches with staleness
//! classification and a bounded-concurrency fetch queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;
use velo_tree::{RouteDiffResponse, RouterStateTree};

use crate::config::RouterConfig;
use crate::error::FetchDiffError;
use crate::fetch::{FetchKind, PrefetchIntent, RouteDiffFetcher};
use crate::url::NavigationUrl;

/// A route diff result that any number of consumers can await.
pub type SharedRouteDiff =
    Shared<BoxFuture<'static, Result<Arc<RouteDiffResponse>, FetchDiffError>>>;

/// How much data a prefetch entry was created to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchKind {
    /// Intent unknown; a placeholder created on a navigation miss. Upgraded
    /// in place once a real prefetch states its intent.
    Temporary,
    /// The server decides how much to send (typically loading boundaries
    /// plus static data).
    Auto,
    /// The full route payload was requested.
    Full,
}

/// Usability of a prefetch entry, derived from its age on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchStatus {
    /// Within the dynamic window and never used: serve as-is.
    Fresh,
    /// Usable without a refetch.
    Reusable,
    /// Only the loading boundary may be reused; data must be refetched.
    Stale,
    /// Too old to use at all; pruned on the next sweep.
    Expired,
}

/// The two staleness windows, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct StaleWindows {
    /// Window in which dynamic data stays usable.
    pub dynamic_ms: u64,
    /// Window in which static data (loading boundaries, full prerenders)
    /// stays usable.
    pub static_ms: u64,
}

impl From<&RouterConfig> for StaleWindows {
    fn from(config: &RouterConfig) -> Self {
        Self {
            dynamic_ms: config.dynamic_stale_ms(),
            static_ms: config.static_stale_ms(),
        }
    }
}

/// Compose a cache key from a canonical href (hash already stripped) and the
/// optional interception discriminator.
fn compose_key(href: &str, next_url: Option<&str>) -> String {
    match next_url {
        Some(next_url) => format!("{}%{}", next_url, href),
        None => href.to_string(),
    }
}

/// One entry of the prefetch cache.
#[derive(Clone)]
pub struct PrefetchCacheEntry {
    /// Cache key this entry is filed under.
    pub key: String,
    /// Canonical href (pathname + search, hash stripped).
    pub url: String,
    /// Pathname alone, used for aliased lookups.
    pub pathname: String,
    /// The tree as it was when the prefetch was issued; patches fall back to
    /// it when the live tree has moved on.
    pub tree_at_time_of_prefetch: Arc<RouterStateTree>,
    /// The (possibly still pending) route diff.
    pub data: SharedRouteDiff,
    /// What the entry was created to hold.
    pub kind: PrefetchKind,
    /// When the prefetch was issued.
    pub prefetch_time_ms: u64,
    /// When a navigation last consumed this entry.
    pub last_used_ms: Option<u64>,
    /// Status as of the last read. Derived, never authoritative.
    pub status: PrefetchStatus,
}

impl std::fmt::Debug for PrefetchCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCacheEntry")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("prefetch_time_ms", &self.prefetch_time_ms)
            .field("last_used_ms", &self.last_used_ms)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl PrefetchCacheEntry {
    /// Derive the entry's status at `now_ms`.
    ///
    /// The dynamic window anchors at prefetch time; `last_used_ms` only
    /// distinguishes fresh from reusable inside it. Outside it, auto entries
    /// degrade to loading-boundary reuse and full entries stay reusable
    /// until the static window closes.
    pub fn status_at(&self, now_ms: u64, windows: StaleWindows) -> PrefetchStatus {
        if now_ms < self.prefetch_time_ms + windows.dynamic_ms {
            return if self.last_used_ms.is_none() {
                PrefetchStatus::Fresh
            } else {
                PrefetchStatus::Reusable
            };
        }
        match self.kind {
            PrefetchKind::Auto if now_ms < self.prefetch_time_ms + windows.static_ms => {
                PrefetchStatus::Stale
            }
            PrefetchKind::Full if now_ms < self.prefetch_time_ms + windows.static_ms => {
                PrefetchStatus::Reusable
            }
            _ => PrefetchStatus::Expired,
        }
    }
}

struct QueuedFetch {
    key: String,
    start: oneshot::Sender<()>,
}

struct QueueInner {
    running: usize,
    queued: VecDeque<QueuedFetch>,
}

/// Bounded-concurrency queue for outbound prefetch fetches.
///
/// Fetches beyond the limit wait in FIFO order; [`PrefetchTaskQueue::bump`]
/// promotes a queued fetch to run immediately when a navigation starts
/// depending on it.
pub struct PrefetchTaskQueue {
    max_concurrent: usize,
    inner: Arc<Mutex<QueueInner>>,
}

impl PrefetchTaskQueue {
    /// Create a queue with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            inner: Arc::new(Mutex::new(QueueInner {
                running: 0,
                queued: VecDeque::new(),
            })),
        }
    }

    /// Enqueue a fetch. The returned future resolves with the fetch result
    /// once the fetch has been allowed to run and completed.
    pub fn enqueue(
        &self,
        key: String,
        fut: BoxFuture<'static, Result<Arc<RouteDiffResponse>, FetchDiffError>>,
    ) -> SharedRouteDiff {
        let (done_tx, done_rx) = oneshot::channel();
        let (start_tx, start_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running < self.max_concurrent {
                inner.running += 1;
                let _ = start_tx.send(());
            } else {
                inner.queued.push_back(QueuedFetch {
                    key,
                    start: start_tx,
                });
            }
        }
        let inner_handle = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if start_rx.await.is_err() {
                // Dropped while queued; the shared future reports Canceled.
                return;
            }
            let result = fut.await;
            let _ = done_tx.send(result);
            // Free the slot and start the next queued fetch, if any.
            let mut inner = inner_handle.lock().unwrap();
            inner.running = inner.running.saturating_sub(1);
            if let Some(next) = inner.queued.pop_front() {
                inner.running += 1;
                let _ = next.start.send(());
            }
        });
        done_rx
            .map(|result| match result {
                Ok(result) => result,
                Err(_) => Err(FetchDiffError::Canceled),
            })
            .boxed()
            .shared()
    }

    /// Promote a still-queued fetch to run immediately, ahead of the
    /// concurrency limit. A fetch already running (or finished) is left
    /// alone.
    pub fn bump(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.queued.iter().position(|task| task.key == key) {
            if let Some(task) = inner.queued.remove(pos) {
                inner.running += 1;
                let _ = task.start.send(());
            }
        }
    }

    /// Number of fetches currently running.
    pub fn running(&self) -> usize {
        self.inner.lock().unwrap().running
    }

    /// Number of fetches waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().queued.len()
    }
}

type EntryMap = Arc<Mutex<HashMap<String, PrefetchCacheEntry>>>;

/// Arguments to [`PrefetchCache::get_or_create`].
pub struct PrefetchRequest<'a> {
    /// The target URL.
    pub url: &'a NavigationUrl,
    /// Interception discriminator from the current router state.
    pub next_url: Option<&'a str>,
    /// The current tree, captured into new entries.
    pub tree: &'a Arc<RouterStateTree>,
    /// Requested fidelity; `None` on a navigation miss (creates a
    /// temporary placeholder).
    pub kind: Option<PrefetchKind>,
    /// Whether an entry for the same pathname with a different search string
    /// may be served.
    pub allow_aliasing: bool,
}

/// Keyed store of in-flight and completed prefetches.
pub struct PrefetchCache {
    entries: EntryMap,
    queue: PrefetchTaskQueue,
    fetcher: Arc<dyn RouteDiffFetcher>,
    windows: StaleWindows,
}

impl PrefetchCache {
    /// Create an empty cache driving fetches through `fetcher`.
    pub fn new(fetcher: Arc<dyn RouteDiffFetcher>, config: &RouterConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            queue: PrefetchTaskQueue::new(config.prefetch_concurrency),
            fetcher,
            windows: StaleWindows::from(config),
        }
    }

    /// Look up the entry for a URL, creating (and enqueueing the fetch for)
    /// one when nothing usable exists.
    ///
    /// Interception-prefixed keys take priority over bare keys. A request
    /// for full data over a non-full entry creates a fresh entry rather than
    /// serving lower-fidelity cached data; a temporary placeholder instead
    /// upgrades its kind in place.
    pub fn get_or_create(&self, request: &PrefetchRequest<'_>, now_ms: u64) -> PrefetchCacheEntry {
        let href = request.url.href_without_hash();
        let mut entries = self.entries.lock().unwrap();

        let found_key = request
            .next_url
            .map(|next_url| compose_key(&href, Some(next_url)))
            .filter(|key| entries.contains_key(key))
            .or_else(|| {
                let bare = compose_key(&href, None);
                entries.contains_key(&bare).then_some(bare)
            })
            .or_else(|| {
                if !request.allow_aliasing {
                    return None;
                }
                // Fall back to a full-data entry for the same pathname; full
                // payloads do not vary by search string.
                entries
                    .values()
                    .find(|entry| {
                        entry.pathname == request.url.pathname
                            && entry.kind == PrefetchKind::Full
                    })
                    .map(|entry| entry.key.clone())
            });

        if let Some(key) = found_key {
            let requested_full_over_partial = {
                let entry = entries.get_mut(&key).expect("looked-up key present");
                if let Some(requested) = request.kind {
                    if entry.kind == PrefetchKind::Temporary {
                        entry.kind = requested;
                    }
                }
                entry.status = entry.status_at(now_ms, self.windows);
                request.kind == Some(PrefetchKind::Full) && entry.kind != PrefetchKind::Full
            };
            if !requested_full_over_partial {
                return entries[&key].clone();
            }
            debug!(key = %key, "full prefetch requested over partial entry, refetching");
        }

        let kind = request.kind.unwrap_or(PrefetchKind::Temporary);
        self.create_lazy_entry(&mut entries, request.url, request.next_url, request.tree, kind, now_ms)
    }

    /// Record that a navigation consumed an entry.
    pub fn mark_used(&self, key: &str, now_ms: u64) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
            entry.last_used_ms = Some(now_ms);
        }
    }

    /// Promote the entry's queued fetch, if it has not started yet.
    pub fn bump(&self, key: &str) {
        self.queue.bump(key);
    }

    /// Drop every entry whose derived status is expired. Called at the start
    /// of each navigate/prefetch dispatch; an eager incremental sweep instead
    /// of a background timer.
    pub fn prune(&self, now_ms: u64) {
        let windows = self.windows;
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.status_at(now_ms, windows) != PrefetchStatus::Expired);
    }

    /// Insert an already-resolved entry from a response obtained out-of-band
    /// (the initial page load, or a server action's redirect payload),
    /// avoiding a redundant round-trip.
    pub fn create_seeded_entry(
        &self,
        url: &NavigationUrl,
        next_url: Option<&str>,
        tree: &Arc<RouterStateTree>,
        kind: PrefetchKind,
        response: RouteDiffResponse,
        now_ms: u64,
    ) -> PrefetchCacheEntry {
        let href = url.href_without_hash();
        let key = if response.could_be_intercepted {
            compose_key(&href, next_url)
        } else {
            compose_key(&href, None)
        };
        let data: SharedRouteDiff = futures::future::ready(Ok(Arc::new(response)))
            .boxed()
            .shared();
        let entry = PrefetchCacheEntry {
            key: key.clone(),
            url: href,
            pathname: url.pathname.clone(),
            tree_at_time_of_prefetch: Arc::clone(tree),
            data,
            kind,
            prefetch_time_ms: now_ms,
            last_used_ms: None,
            status: PrefetchStatus::Fresh,
        };
        self.entries.lock().unwrap().insert(key, entry.clone());
        entry
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// The fetch queue, exposed for inspection.
    pub fn task_queue(&self) -> &PrefetchTaskQueue {
        &self.queue
    }

    fn create_lazy_entry(
        &self,
        entries: &mut HashMap<String, PrefetchCacheEntry>,
        url: &NavigationUrl,
        next_url: Option<&str>,
        tree: &Arc<RouterStateTree>,
        kind: PrefetchKind,
        now_ms: u64,
    ) -> PrefetchCacheEntry {
        let href = url.href_without_hash();
        let key = compose_key(&href, None);
        let fetch_kind = match kind {
            PrefetchKind::Auto => FetchKind::Prefetch(PrefetchIntent::Auto),
            PrefetchKind::Full => FetchKind::Prefetch(PrefetchIntent::Full),
            // A placeholder created by a navigation miss fetches the real
            // navigation payload.
            PrefetchKind::Temporary => FetchKind::Navigation,
        };
        let fetcher = Arc::clone(&self.fetcher);
        let fetch_url = href.clone();
        let tree_hint = Arc::clone(tree);
        let next_url_owned = next_url.map(String::from);
        let entries_weak = Arc::downgrade(&self.entries);
        let rekey_from = key.clone();
        let fut = async move {
            let response = fetcher
                .fetch_route_diff(
                    &fetch_url,
                    &tree_hint,
                    next_url_owned.as_deref(),
                    fetch_kind,
                )
                .await?;
            let response = Arc::new(response);
            if response.could_be_intercepted {
                // Now that the server told us the route can be intercepted,
                // re-file the entry under the interception-prefixed key.
                if let (Some(next_url), Some(entries)) =
                    (next_url_owned.as_deref(), entries_weak.upgrade())
                {
                    let mut entries = entries.lock().unwrap();
                    if let Some(mut entry) = entries.remove(&rekey_from) {
                        let new_key = compose_key(&entry.url, Some(next_url));
                        entry.key = new_key.clone();
                        entries.insert(new_key, entry);
                    }
                }
            }
            Ok(response)
        };
        let data = self.queue.enqueue(key.clone(), fut.boxed());
        let entry = PrefetchCacheEntry {
            key: key.clone(),
            url: href,
            pathname: url.pathname.clone(),
            tree_at_time_of_prefetch: Arc::clone(tree),
            data,
            kind,
            prefetch_time_ms: now_ms,
            last_used_ms: None,
            status: PrefetchStatus::Fresh,
        };
        entries.insert(key, entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticRouteDiffFetcher;
    use velo_tree::{RouterStateTree, Segment};

    const WINDOWS: StaleWindows = StaleWindows {
        dynamic_ms: 30_000,
        static_ms: 300_000,
    };

    fn entry_at(kind: PrefetchKind, prefetch_time_ms: u64) -> PrefetchCacheEntry {
        PrefetchCacheEntry {
            key: "/a".to_string(),
            url: "/a".to_string(),
            pathname: "/a".to_string(),
            tree_at_time_of_prefetch: Arc::new(RouterStateTree::new(Segment::literal(""))),
            data: futures::future::ready(Ok(Arc::new(RouteDiffResponse::with_paths(vec![]))))
                .boxed()
                .shared(),
            kind,
            prefetch_time_ms,
            last_used_ms: None,
            status: PrefetchStatus::Fresh,
        }
    }

    fn test_cache(config: &RouterConfig) -> PrefetchCache {
        PrefetchCache::new(Arc::new(StaticRouteDiffFetcher::new()), config)
    }

    #[test]
    fn test_status_timeline_for_auto_entry() {
        let mut entry = entry_at(PrefetchKind::Auto, 0);
        assert_eq!(entry.status_at(10_000, WINDOWS), PrefetchStatus::Fresh);
        entry.last_used_ms = Some(10_000);
        assert_eq!(entry.status_at(35_000, WINDOWS), PrefetchStatus::Stale);
        assert_eq!(entry.status_at(400_000, WINDOWS), PrefetchStatus::Expired);
    }

    #[test]
    fn test_status_full_entry_reusable_in_static_window() {
        let entry = entry_at(PrefetchKind::Full, 0);
        assert_eq!(entry.status_at(60_000, WINDOWS), PrefetchStatus::Reusable);
        assert_eq!(entry.status_at(400_000, WINDOWS), PrefetchStatus::Expired);
    }

    #[test]
    fn test_status_temporary_expires_after_dynamic_window() {
        let entry = entry_at(PrefetchKind::Temporary, 0);
        assert_eq!(entry.status_at(10_000, WINDOWS), PrefetchStatus::Fresh);
        assert_eq!(entry.status_at(31_000, WINDOWS), PrefetchStatus::Expired);
    }

    #[test]
    fn test_used_entry_is_reusable_within_dynamic_window() {
        let mut entry = entry_at(PrefetchKind::Auto, 0);
        entry.last_used_ms = Some(5_000);
        assert_eq!(entry.status_at(20_000, WINDOWS), PrefetchStatus::Reusable);
    }

    #[tokio::test]
    async fn test_seeded_entry_round_trip() {
        let config = RouterConfig::default();
        let cache = test_cache(&config);
        let url = NavigationUrl::parse("/dash");
        let tree = Arc::new(RouterStateTree::new(Segment::literal("")));

        let seeded = cache.create_seeded_entry(
            &url,
            None,
            &tree,
            PrefetchKind::Full,
            RouteDiffResponse::with_paths(vec![]),
            1_000,
        );
        let request = PrefetchRequest {
            url: &url,
            next_url: None,
            tree: &tree,
            kind: None,
            allow_aliasing: true,
        };
        let looked_up = cache.get_or_create(&request, 2_000);
        // The exact entry comes back; no second fetch was created.
        assert!(looked_up.data.ptr_eq(&seeded.data));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.task_queue().running(), 0);
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let config = RouterConfig::default();
        let cache = test_cache(&config);
        let tree = Arc::new(RouterStateTree::new(Segment::literal("")));
        for (path, at) in [("/old", 0), ("/new", 500_000)] {
            cache.create_seeded_entry(
                &NavigationUrl::parse(path),
                None,
                &tree,
                PrefetchKind::Full,
                RouteDiffResponse::with_paths(vec![]),
                at,
            );
        }

        cache.prune(600_000);
        assert_eq!(cache.len(), 1);
        // No time elapsed: the second sweep removes nothing.
        cache.prune(600_000);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_temporary_entry_upgrades_in_place() {
        let config = RouterConfig::default();
        let cache = test_cache(&config);
        let url = NavigationUrl::parse("/promo");
        let tree = Arc::new(RouterStateTree::new(Segment::literal("")));

        let first = cache.get_or_create(
            &PrefetchRequest {
                url: &url,
                next_url: None,
                tree: &tree,
                kind: None,
                allow_aliasing: true,
            },
            0,
        );
        assert_eq!(first.kind, PrefetchKind::Temporary);

        let upgraded = cache.get_or_create(
            &PrefetchRequest {
                url: &url,
                next_url: None,
                tree: &tree,
                kind: Some(PrefetchKind::Full),
                allow_aliasing: true,
            },
            1_000,
        );
        assert_eq!(upgraded.kind, PrefetchKind::Full);
        // Upgraded in place: same fetch, no new entry.
        assert!(upgraded.data.ptr_eq(&first.data));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_full_request_over_auto_entry_creates_new_fetch() {
        let config = RouterConfig::default();
        let cache = test_cache(&config);
        let url = NavigationUrl::parse("/promo");
        let tree = Arc::new(RouterStateTree::new(Segment::literal("")));

        let auto = cache.get_or_create(
            &PrefetchRequest {
                url: &url,
                next_url: None,
                tree: &tree,
                kind: Some(PrefetchKind::Auto),
                allow_aliasing: true,
            },
            0,
        );
        let full = cache.get_or_create(
            &PrefetchRequest {
                url: &url,
                next_url: None,
                tree: &tree,
                kind: Some(PrefetchKind::Full),
                allow_aliasing: true,
            },
            1_000,
        );
        assert_eq!(full.kind, PrefetchKind::Full);
        assert!(!full.data.ptr_eq(&auto.data));
    }

    #[tokio::test]
    async fn test_queue_bounds_concurrency_and_bump_promotes() {
        let queue = PrefetchTaskQueue::new(2);
        let mut shared = Vec::new();
        for i in 0..4 {
            let fut = async move {
                futures::future::pending::<()>().await;
                let _ = i;
                Ok(Arc::new(RouteDiffResponse::with_paths(vec![])))
            }
            .boxed();
            shared.push(queue.enqueue(format!("/p{}", i), fut));
        }
        tokio::task::yield_now().await;
        assert_eq!(queue.running(), 2);
        assert_eq!(queue.queued(), 2);

        // Promoting a queued fetch starts it past the limit.
        queue.bump("/p3");
        tokio::task::yield_now().await;
        assert_eq!(queue.running(), 3);
        assert_eq!(queue.queued(), 1);

        // Bumping a running fetch is a no-op.
        queue.bump("/p0");
        assert_eq!(queue.running(), 3);
    }

    #[tokio::test]
    async fn test_queue_starts_next_when_slot_frees() {
        let queue = PrefetchTaskQueue::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = queue.enqueue(
            "/first".to_string(),
            async move {
                let _ = release_rx.await;
                Ok(Arc::new(RouteDiffResponse::with_paths(vec![])))
            }
            .boxed(),
        );
        let second = queue.enqueue(
            "/second".to_string(),
            async { Ok(Arc::new(RouteDiffResponse::with_paths(vec![]))) }.boxed(),
        );
        tokio::task::yield_now().await;
        assert_eq!(queue.queued(), 1);

        release_tx.send(()).unwrap();
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert_eq!(queue.queued(), 0);
    }
}
