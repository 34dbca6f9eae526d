//! Cache node tree for the Velo client router.
//!
//! This crate provides:
//! - `CacheNode` / `ChildSegmentMap` - The structurally shared cache tree
//! - `DeferredRsc` - Settle-once slots for dynamic holes
//! - `fill_cache_with_new_subtree_data` and friends - Copy-on-write fill
//! - `invalidate_cache_by_router_state` / `invalidate_cache_below_flight_segment_path` -
//!   Staleness marking
//! - `apply_flight_data` - One-call application of a flight data path

mod apply;
mod deferred;
mod fill;
mod invalidate;
mod node;

pub use apply::*;
pub use deferred::*;
pub use fill::*;
pub use invalidate::*;
pub use node::*;
