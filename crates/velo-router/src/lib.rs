//! Client router cache engine.
//!
//! This crate provides:
//! - `RouterEngine` - The serialized action queue and published state
//! - `Action` - The closed set of router operations
//! - `PrefetchCache` - Deduplicated prefetches with staleness windows
//! - `RouteDiffFetcher` - The transport boundary
//! - PPR navigation tasks (`update_cache_node_on_navigation`, ...)
//! - `HistoryState` / `NavigationUrl` - Browser integration types
//!
//! # Example
//!
//! ```rust,ignore
//! use velo_router::{InitialRouterState, RouterConfig, RouterEngine};
//!
//! let engine = RouterEngine::new(transport, RouterConfig::default(), initial);
//! let state = engine.push("/products/42").wait().await?;
//! render(&state.cache, &state.tree);
//! ```

mod action;
mod config;
mod error;
mod fetch;
mod history;
mod initial;
mod ppr;
mod prefetch;
mod queue;
mod reducers;
mod state;
mod url;

pub use action::*;
pub use config::*;
pub use error::*;
pub use fetch::*;
pub use history::*;
pub use initial::*;
pub use ppr::*;
pub use prefetch::*;
pub use queue::{ActionHandle, RouterEngine};
pub use state::{AppRouterState, FocusAndScrollRef, PushRef};
pub use url::*;
