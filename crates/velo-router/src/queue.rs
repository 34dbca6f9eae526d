//! The serialized action queue.
//!
//! Exactly one action is in flight at a time; later dispatches wait in FIFO
//! order. Mutual exclusion is structural: shared state is only written from
//! the pending action's completion, never concurrently. Navigations and
//! restores are the exception to FIFO: a user's new navigation always wins,
//! discarding whatever was pending.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::action::{Action, ActionKind, HistoryAction};
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::fetch::RouteDiffFetcher;
use crate::initial::InitialRouterState;
use crate::prefetch::PrefetchKind;
use crate::reducers;
use crate::state::AppRouterState;

/// Resolves with the state snapshot an action produced (or the error it
/// surfaced). A discarded action resolves with [`RouterError::Discarded`]
/// rather than hanging.
pub struct ActionHandle {
    rx: oneshot::Receiver<Result<Arc<AppRouterState>, RouterError>>,
}

impl ActionHandle {
    /// Wait for the action to settle.
    pub async fn wait(self) -> Result<Arc<AppRouterState>, RouterError> {
        self.rx.await.unwrap_or(Err(RouterError::ShutDown))
    }
}

struct PendingAction {
    kind: ActionKind,
    discarded: Arc<AtomicBool>,
}

struct QueuedAction {
    action: Action,
    done_tx: oneshot::Sender<Result<Arc<AppRouterState>, RouterError>>,
}

struct QueueState {
    state: Arc<AppRouterState>,
    pending: Option<PendingAction>,
    queued: VecDeque<QueuedAction>,
    needs_refresh: bool,
}

pub(crate) struct EngineInner {
    pub(crate) config: RouterConfig,
    pub(crate) fetcher: Arc<dyn RouteDiffFetcher>,
    epoch: Instant,
    queue: Mutex<QueueState>,
    publish_tx: watch::Sender<Arc<AppRouterState>>,
}

impl EngineInner {
    /// Milliseconds since the engine started; the time base for prefetch
    /// staleness.
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn dispatch(self: &Arc<Self>, action: Action) -> ActionHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let mut queue = self.queue.lock().unwrap();
        if queue.pending.is_none() {
            self.start_locked(&mut queue, action, done_tx);
        } else if action.takes_priority() {
            // A navigation always wins: the pending action keeps running but
            // its result will be dropped, and everything queued behind it is
            // abandoned.
            {
                let pending_kind = {
                    let pending = queue.pending.as_ref().expect("pending checked above");
                    pending.discarded.store(true, Ordering::SeqCst);
                    pending.kind
                };
                if pending_kind == ActionKind::ServerAction {
                    // The discarded action may have already caused effects on
                    // the server; reconcile once the queue drains.
                    queue.needs_refresh = true;
                }
                debug!(discarded = %pending_kind, starting = %action.kind(), "navigation superseded pending action");
            }
            queue.queued.clear();
            self.start_locked(&mut queue, action, done_tx);
        } else {
            queue.queued.push_back(QueuedAction { action, done_tx });
        }
        ActionHandle { rx: done_rx }
    }

    fn start_locked(
        self: &Arc<Self>,
        queue: &mut QueueState,
        action: Action,
        done_tx: oneshot::Sender<Result<Arc<AppRouterState>, RouterError>>,
    ) {
        let discarded = Arc::new(AtomicBool::new(false));
        queue.pending = Some(PendingAction {
            kind: action.kind(),
            discarded: Arc::clone(&discarded),
        });
        let engine = Arc::clone(self);
        let prev_state = Arc::clone(&queue.state);
        tokio::spawn(async move {
            let result = reducers::reduce(&engine, prev_state, action).await;
            engine.finish(&discarded, result, done_tx);
        });
    }

    fn finish(
        self: &Arc<Self>,
        discarded: &AtomicBool,
        result: Result<Arc<AppRouterState>, RouterError>,
        done_tx: oneshot::Sender<Result<Arc<AppRouterState>, RouterError>>,
    ) {
        let mut queue = self.queue.lock().unwrap();
        if discarded.load(Ordering::SeqCst) {
            // The queue belongs to the superseding navigation now. The
            // result is dropped without touching shared state, but the
            // awaiter still hears back.
            let _ = done_tx.send(Err(RouterError::Discarded));
            return;
        }
        match result {
            Ok(next_state) => {
                queue.state = Arc::clone(&next_state);
                let _ = self.publish_tx.send(Arc::clone(&next_state));
                let _ = done_tx.send(Ok(next_state));
            }
            Err(err) => {
                // The published state does not move on failure; the error
                // travels on the action's own channel.
                let _ = done_tx.send(Err(err));
            }
        }
        queue.pending = None;
        if let Some(next) = queue.queued.pop_front() {
            self.start_locked(&mut queue, next.action, next.done_tx);
        } else if queue.needs_refresh {
            // A server action was discarded mid-flight; its server-side
            // effects are unknown, so fetch the truth.
            queue.needs_refresh = false;
            let (done_tx, _) = oneshot::channel();
            self.start_locked(&mut queue, Action::Refresh, done_tx);
        }
    }
}

/// The router cache engine: owns the serialized action queue, the published
/// state, and the transport handle.
///
/// Cheap to clone; clones share the same queue and state.
#[derive(Clone)]
pub struct RouterEngine {
    inner: Arc<EngineInner>,
}

impl RouterEngine {
    /// Build an engine from an initial payload (typically the data delivered
    /// with the first page load).
    pub fn new(
        fetcher: Arc<dyn RouteDiffFetcher>,
        config: RouterConfig,
        initial: InitialRouterState,
    ) -> Self {
        let epoch = Instant::now();
        let state = initial.into_state(&fetcher, &config, 0);
        let (publish_tx, _) = watch::channel(Arc::clone(&state));
        Self {
            inner: Arc::new(EngineInner {
                config,
                fetcher,
                epoch,
                queue: Mutex::new(QueueState {
                    state,
                    pending: None,
                    queued: VecDeque::new(),
                    needs_refresh: false,
                }),
                publish_tx,
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// The most recently published state snapshot.
    pub fn state(&self) -> Arc<AppRouterState> {
        Arc::clone(&self.inner.queue.lock().unwrap().state)
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppRouterState>> {
        self.inner.publish_tx.subscribe()
    }

    /// Whether an action is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.queue.lock().unwrap().pending.is_some()
    }

    /// Dispatch an action.
    pub fn dispatch(&self, action: Action) -> ActionHandle {
        self.inner.dispatch(action)
    }

    /// Navigate, pushing a history entry.
    pub fn push(&self, url: impl Into<String>) -> ActionHandle {
        self.dispatch(Action::Navigate {
            url: url.into(),
            history: HistoryAction::Push,
            should_scroll: true,
        })
    }

    /// Navigate, replacing the current history entry.
    pub fn replace(&self, url: impl Into<String>) -> ActionHandle {
        self.dispatch(Action::Navigate {
            url: url.into(),
            history: HistoryAction::Replace,
            should_scroll: true,
        })
    }

    /// Prefetch a URL in the background.
    pub fn prefetch(&self, url: impl Into<String>, kind: PrefetchKind) -> ActionHandle {
        self.dispatch(Action::Prefetch {
            url: url.into(),
            kind,
        })
    }

    /// Refetch the current location.
    pub fn refresh(&self) -> ActionHandle {
        self.dispatch(Action::Refresh)
    }
}

impl std::fmt::Debug for RouterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterEngine")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}
