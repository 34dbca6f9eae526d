//! Route segment and router state tree model for the Velo client router.
//!
//! This crate provides:
//! - `Segment` - Route path components and their cache keys
//! - `RouterStateTree` - The nested route tree shared between client and server
//! - `apply_router_state_patch` - Splicing server-sent tree patches
//! - `should_hard_navigate` / `is_navigating_to_new_root_layout` - Navigation
//!   mode decisions
//! - Wire types for route diff payloads (`FlightDataPath`, `SeedData`, ...)

mod patch;
mod path;
mod segment;
mod state;
mod wire;

pub use patch::*;
pub use path::*;
pub use segment::*;
pub use state::*;
pub use wire::*;
