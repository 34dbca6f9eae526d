//! The closed set of router actions.

use std::sync::Arc;

use tokio::sync::oneshot;
use velo_tree::{FlightData, RouterStateTree};

use crate::error::RouterError;
use crate::prefetch::PrefetchKind;

/// How a navigation updates browser history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    /// Push a new history entry.
    Push,
    /// Replace the current entry.
    Replace,
}

/// Channel on which a server action's own result is delivered, independent
/// of the state snapshot the action produces.
pub type ServerActionResultSender =
    oneshot::Sender<Result<Option<serde_json::Value>, RouterError>>;

/// An operation dispatched against the router state. The set is closed;
/// every consumer matches exhaustively.
pub enum Action {
    /// Navigate to a URL.
    Navigate {
        /// Target URL (absolute or origin-relative).
        url: String,
        /// History behavior.
        history: HistoryAction,
        /// Whether to scroll to the new content.
        should_scroll: bool,
    },
    /// Apply flight data that arrived outside a navigation (a lazy fetch
    /// completing).
    ServerPatch {
        /// The payload to apply.
        flight_data: FlightData,
        /// The tree the fetch was issued against; the patch is dropped if
        /// the tree has changed since.
        previous_tree: Arc<RouterStateTree>,
        /// Canonical URL override delivered with the payload.
        canonical_url_override: Option<String>,
    },
    /// Restore state for a history traversal (back/forward).
    Restore {
        /// The URL being restored.
        url: String,
        /// Tree carried in the history entry, when the entry was written by
        /// this engine.
        tree: Option<Arc<RouterStateTree>>,
    },
    /// Refetch the current location from the server.
    Refresh,
    /// Development-mode refresh after hot module replacement.
    HmrRefresh,
    /// Prefetch a URL in the background.
    Prefetch {
        /// Target URL.
        url: String,
        /// Requested fidelity.
        kind: PrefetchKind,
    },
    /// Invoke a server action and apply whatever it renders.
    ServerAction {
        /// Server reference id of the action.
        action_id: String,
        /// Serialized arguments.
        args: serde_json::Value,
        /// Where to deliver the action's own result.
        result_tx: Option<ServerActionResultSender>,
    },
}

impl Action {
    /// Short name for logging.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Navigate { .. } => ActionKind::Navigate,
            Self::ServerPatch { .. } => ActionKind::ServerPatch,
            Self::Restore { .. } => ActionKind::Restore,
            Self::Refresh => ActionKind::Refresh,
            Self::HmrRefresh => ActionKind::HmrRefresh,
            Self::Prefetch { .. } => ActionKind::Prefetch,
            Self::ServerAction { .. } => ActionKind::ServerAction,
        }
    }

    /// Whether this action jumps the queue, discarding whatever is pending.
    pub fn takes_priority(&self) -> bool {
        matches!(self, Self::Navigate { .. } | Self::Restore { .. })
    }
}

/// Discriminant of [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Navigate,
    ServerPatch,
    Restore,
    Refresh,
    HmrRefresh,
    Prefetch,
    ServerAction,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Navigate => "navigate",
            Self::ServerPatch => "server-patch",
            Self::Restore => "restore",
            Self::Refresh => "refresh",
            Self::HmrRefresh => "hmr-refresh",
            Self::Prefetch => "prefetch",
            Self::ServerAction => "server-action",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action::{}", self.kind())
    }
}
