//! Receive loop and drain sequence, run on the capture worker thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::Shared;
use crate::capture::PacketCapture;
use crate::domain::PipelineState;
use crate::error::CaptureError;
use crate::sink::{LogSink, LogTarget};
use crate::summarizer::Summarizer;

/// Bounded retry with exponential backoff for transient capture errors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Consecutive failures tolerated before giving up
    pub limit: u32,
    pub base: Duration,
    /// Upper bound on a single delay, so stop requests stay responsive
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }
}

/// Why the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopExit {
    StopRequested,
    CaptureClosed,
    Fatal(String),
}

pub(crate) struct Worker<C, T: LogTarget> {
    pub capture: C,
    pub sink: LogSink<T>,
    pub summarizer: Summarizer,
    pub retry: RetryPolicy,
    pub flush_interval: Duration,
    pub shared: Arc<Shared>,
}

impl<C: PacketCapture, T: LogTarget> Worker<C, T> {
    pub fn run(mut self) {
        tracing::info!(interface = %self.capture.interface_name(), "Capture worker started");

        let exit = self.receive_loop();
        self.shared.transition(PipelineState::Draining);

        let final_state = self.drain(exit);
        match &final_state {
            PipelineState::Failed(reason) => tracing::error!("Pipeline failed: {}", reason),
            _ => tracing::info!(stats = ?self.shared.stats.snapshot(), "Pipeline stopped"),
        }
        self.shared.transition(final_state);
    }

    fn receive_loop(&mut self) -> LoopExit {
        let mut failures = 0u32;
        let mut last_flush = Instant::now();

        loop {
            if self.shared.stop_requested() {
                tracing::info!("Stop requested");
                return LoopExit::StopRequested;
            }

            match self.capture.receive() {
                Ok(Some(packet)) => {
                    failures = 0;
                    self.shared.stats.record_packet();

                    let summary = self.summarizer.summarize(&packet);
                    tracing::trace!(protocol = %summary.protocol, length = summary.length, "Packet summarized");
                    if let Err(e) = self.sink.write(&summary) {
                        return LoopExit::Fatal(format!("log write failed: {}", e));
                    }
                }
                Ok(None) => failures = 0,
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.shared.stats.record_transient_error();
                    if failures > self.retry.limit {
                        return LoopExit::Fatal(format!(
                            "capture failed after {} retries: {}",
                            self.retry.limit, e
                        ));
                    }

                    let delay = self.retry.backoff(failures);
                    tracing::warn!(attempt = failures, ?delay, "Retrying after capture error: {}", e);
                    thread::sleep(delay);
                }
                Err(CaptureError::Closed) => {
                    tracing::info!("Capture source closed");
                    return LoopExit::CaptureClosed;
                }
                Err(e) => return LoopExit::Fatal(format!("capture error: {}", e)),
            }

            if last_flush.elapsed() >= self.flush_interval {
                if let Err(e) = self.sink.flush() {
                    return LoopExit::Fatal(format!("log flush failed: {}", e));
                }
                last_flush = Instant::now();
            }
            self.publish_stats();
        }
    }

    /// Flush and close the sink, then close the capture.
    fn drain(&mut self, exit: LoopExit) -> PipelineState {
        let sink_result = self.sink.close();
        let capture_result = self.capture.close();
        self.publish_stats();

        if let Err(e) = &sink_result {
            tracing::error!("Failed to close log sink: {}", e);
        }
        if let Err(e) = &capture_result {
            tracing::error!("Failed to close capture: {}", e);
        }

        match exit {
            LoopExit::Fatal(reason) => PipelineState::Failed(reason),
            LoopExit::StopRequested | LoopExit::CaptureClosed => match (sink_result, capture_result) {
                (Ok(()), Ok(())) => PipelineState::Stopped,
                (Err(e), _) => PipelineState::Failed(format!("failed to close log sink: {}", e)),
                (_, Err(e)) => PipelineState::Failed(format!("failed to close capture: {}", e)),
            },
        }
    }

    fn publish_stats(&self) {
        self.shared.stats.set_lines_written(self.sink.lines_written());
        self.shared.stats.set_filtered_out(self.capture.filtered_count());
    }
}
