//! Pipeline lifecycle state.

use std::fmt;

/// Lifecycle of a capture pipeline.
///
/// ```text
/// Idle -> Capturing -> Draining -> Stopped
///   |                     |
///   +-> Stopped           +-> Failed(reason)
///   +-> Failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Draining,
    Stopped,
    Failed(String),
}

impl PipelineState {
    /// Whether the controller may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, next),
            (Idle, Capturing)
                | (Idle, Stopped)
                | (Idle, Failed(_))
                | (Capturing, Draining)
                | (Draining, Stopped)
                | (Draining, Failed(_))
        )
    }

    /// Returns true once the pipeline can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }

    /// The failure reason, if the pipeline failed.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Capturing => write!(f, "capturing"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
