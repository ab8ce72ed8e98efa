//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Packets delivered by the capture source
    pub packets_received: u64,
    /// Lines handed to the log target
    pub lines_written: u64,
    /// Packets rejected by the capture filter
    pub filtered_out: u64,
    /// Transient capture errors seen, retried or not
    pub transient_errors: u64,
}

/// Counters updated by the worker and read by control handles.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    packets_received: AtomicU64,
    lines_written: AtomicU64,
    filtered_out: AtomicU64,
    transient_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_lines_written(&self, lines: u64) {
        self.lines_written.store(lines, Ordering::Relaxed);
    }

    pub(crate) fn set_filtered_out(&self, filtered: u64) {
        self.filtered_out.store(filtered, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            lines_written: self.lines_written.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
        }
    }
}
