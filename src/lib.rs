//! Wirelog - packet capture logger.
//!
//! Captures packets from a network interface, summarizes each one into a
//! single line, and appends the lines to a log file through a bounded
//! buffer. A [`PipelineController`] ties the pieces together and runs the
//! capture loop on a worker thread.
//!
//! ```no_run
//! use wirelog::{PipelineConfig, PipelineController};
//!
//! let mut controller = PipelineController::new(PipelineConfig::for_interface("eth0"));
//! controller.start()?;
//! let handle = controller.handle();
//! // ... later, from any thread
//! handle.stop();
//! controller.wait();
//! # Ok::<(), wirelog::PipelineError>(())
//! ```

pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod summarizer;

pub use capture::{CaptureFilter, PacketCapture, PnetCapture, RawPacket, ReplayCapture};
pub use config::PipelineConfig;
pub use domain::{Endpoint, PacketSummary, PipelineState, Protocol};
pub use error::{CaptureError, ConfigError, PipelineError, SinkError};
pub use pipeline::{ControlHandle, PipelineController, PipelineStats};
pub use sink::{LogSink, LogTarget};
pub use summarizer::Summarizer;
