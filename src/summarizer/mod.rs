//! Packet summarization module.
//!
//! Turns captured packets into bounded, single-line summaries.

mod packet_summarizer;

pub use packet_summarizer::{Summarizer, DEFAULT_DESCRIPTOR_CAP};
