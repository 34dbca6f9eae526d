//! Error types for the router engine.

use thiserror::Error;

/// Errors surfaced through action handles and the transport boundary.
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    /// The transport failed to produce a route diff.
    #[error("route diff fetch failed: {0}")]
    Fetch(#[from] FetchDiffError),

    /// The action was superseded by a navigation before it finished; its
    /// result was dropped without being applied.
    #[error("action discarded by a later navigation")]
    Discarded,

    /// The engine shut down before the action could run.
    #[error("router engine shut down")]
    ShutDown,

    /// A server action finished without producing a usable result.
    #[error("server action failed: {0}")]
    ServerAction(String),
}

/// Errors from the route diff transport.
#[derive(Error, Debug, Clone)]
pub enum FetchDiffError {
    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The queued fetch was dropped before it ran.
    #[error("prefetch canceled before it started")]
    Canceled,

    /// The response could not be interpreted as a route diff.
    #[error("invalid route diff payload: {0}")]
    InvalidResponse(String),
}
