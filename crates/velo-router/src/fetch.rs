//! The route diff transport boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use velo_tree::{FlightData, RouterStateTree};

use crate::error::FetchDiffError;

pub use velo_tree::RouteDiffResponse;

/// Why a route diff is being fetched. The transport maps this onto request
/// headers (prefetch hints, dev-mode markers) without the engine knowing the
/// header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    /// Background prefetch; the server may answer with a partial payload.
    Prefetch(PrefetchIntent),
    /// A user navigation that found no usable prefetch entry.
    Navigation,
    /// A refresh of the current location.
    Refresh,
    /// A development-mode refresh after hot module replacement.
    HmrRefresh,
}

/// How much data a prefetch asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchIntent {
    /// Let the server decide (loading boundaries plus static data).
    Auto,
    /// Request the full route payload.
    Full,
}

/// Server state revalidated by a server action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidatedParts {
    /// Paths explicitly revalidated.
    pub paths: Vec<String>,
    /// A cache tag was revalidated.
    pub tag: bool,
    /// A cookie was set or cleared.
    pub cookie: bool,
}

impl RevalidatedParts {
    /// Whether anything on the server changed.
    pub fn any(&self) -> bool {
        !self.paths.is_empty() || self.tag || self.cookie
    }
}

/// Where a server action asked the client to go afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    /// Push a new history entry.
    Push,
    /// Replace the current history entry.
    Replace,
}

/// The outcome of a server action call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerActionResponse {
    /// The action's own return value, if the server sent one.
    pub action_result: Option<serde_json::Value>,
    /// Route diff data rendered alongside the action.
    pub flight_data: Option<FlightData>,
    /// Redirect target and kind, if the action redirected.
    pub redirect: Option<(String, RedirectKind)>,
    /// What server state the action revalidated.
    #[serde(default)]
    pub revalidated: RevalidatedParts,
    /// The redirect target was served from a full prerender.
    #[serde(default)]
    pub is_prerender: bool,
}

/// The network collaborator the engine drives.
///
/// The engine treats every call as an opaque async operation; retries and
/// timeouts live behind this boundary, not in the engine.
#[async_trait]
pub trait RouteDiffFetcher: Send + Sync {
    /// Fetch a route diff for `url`, diffed against `tree_hint`.
    ///
    /// `next_url` carries the interception-route discriminator when the
    /// current tree contains one.
    async fn fetch_route_diff(
        &self,
        url: &str,
        tree_hint: &RouterStateTree,
        next_url: Option<&str>,
        kind: FetchKind,
    ) -> Result<RouteDiffResponse, FetchDiffError>;

    /// Invoke a server action.
    async fn call_server_action(
        &self,
        action_id: &str,
        args: serde_json::Value,
        tree: &RouterStateTree,
        next_url: Option<&str>,
    ) -> Result<ServerActionResponse, FetchDiffError>;
}

/// Transport stub serving canned responses, for tests and demos.
#[derive(Default)]
pub struct StaticRouteDiffFetcher {
    responses: std::sync::Mutex<HashMap<String, RouteDiffResponse>>,
}

impl StaticRouteDiffFetcher {
    /// Create an empty stub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response served for a URL.
    pub fn insert(&self, url: impl Into<String>, response: RouteDiffResponse) {
        self.responses.lock().unwrap().insert(url.into(), response);
    }
}

#[async_trait]
impl RouteDiffFetcher for StaticRouteDiffFetcher {
    async fn fetch_route_diff(
        &self,
        url: &str,
        _tree_hint: &RouterStateTree,
        _next_url: Option<&str>,
        _kind: FetchKind,
    ) -> Result<RouteDiffResponse, FetchDiffError> {
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchDiffError::Network(format!("no response registered for {}", url)))
    }

    async fn call_server_action(
        &self,
        action_id: &str,
        _args: serde_json::Value,
        _tree: &RouterStateTree,
        _next_url: Option<&str>,
    ) -> Result<ServerActionResponse, FetchDiffError> {
        Err(FetchDiffError::Network(format!(
            "no server action handler registered for {}",
            action_id
        )))
    }
}
