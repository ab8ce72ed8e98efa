//! Domain models for packet summaries and pipeline lifecycle.
//!
//! These types are independent of capture backends and output targets.

mod state;
mod summary;

pub use state::PipelineState;
pub use summary::{Endpoint, PacketSummary, Protocol};
