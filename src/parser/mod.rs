//! Frame parsing module.
//!
//! This module decodes raw link-layer frames into borrowed header views
//! shared by the capture filter and the summarizer.

mod frame_parser;

pub use frame_parser::{parse_frame, LinkHeader, NetworkHeader, ParsedFrame, TransportHeader};

#[cfg(test)]
pub(crate) use frame_parser::test_frames;
