//! Pipeline controller.
//!
//! Owns a capture source and a log sink, runs the receive loop on one
//! dedicated worker thread, and exposes `start`, `stop` and `status`.
//!
//! The caller and the worker share only the lifecycle state (behind a
//! mutex, changed by compare-and-set), a stop flag and atomic counters.
//! The capture, summarizer and sink are owned by the worker.

mod stats;
mod worker;

pub use stats::PipelineStats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::capture::{CaptureOptions, PacketCapture, PnetCapture};
use crate::config::PipelineConfig;
use crate::domain::PipelineState;
use crate::error::PipelineError;
use crate::sink::{LogSink, LogTarget};
use crate::summarizer::Summarizer;
use stats::StatsCounters;
use worker::{RetryPolicy, Worker};

/// State shared between the controller, its handles and the worker.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<PipelineState>,
    stop: AtomicBool,
    stats: StatsCounters,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            stop: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    fn transition(&self, next: PipelineState) -> bool {
        let mut state = self.lock_state();
        let current = state.clone();
        if !current.can_transition_to(&next) {
            tracing::debug!(from = %current, to = %next, "Ignoring illegal state transition");
            return false;
        }
        tracing::info!(from = %current, to = %next, "Pipeline state changed");
        *state = next;
        true
    }

    fn status(&self) -> PipelineState {
        self.lock_state().clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for stopping and observing a pipeline from other threads.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    /// Ask the pipeline to stop. The worker notices within one poll interval.
    ///
    /// Stopping a pipeline that was never started moves it straight to
    /// `Stopped`. Repeated calls are no-ops.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let mut state = self.shared.lock_state();
        if *state == PipelineState::Idle {
            tracing::info!("Pipeline stopped before start");
            *state = PipelineState::Stopped;
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> PipelineState {
        self.shared.status()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }
}

/// Drives one capture pipeline through its lifecycle.
pub struct PipelineController {
    config: PipelineConfig,
    handle: ControlHandle,
    worker: Option<JoinHandle<()>>,
}

impl PipelineController {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            handle: ControlHandle {
                shared: Arc::new(Shared::new()),
            },
            worker: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A handle that can stop and observe the pipeline from any thread.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> PipelineState {
        self.handle.status()
    }

    pub fn stats(&self) -> PipelineStats {
        self.handle.stats()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Open the configured interface and log file, then start capturing.
    ///
    /// If either cannot be opened the pipeline moves to `Failed` and the
    /// error is returned.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;

        match self.open_live() {
            Ok((capture, sink)) => self.start_with(capture, sink),
            Err(e) => {
                self.handle
                    .shared
                    .transition(PipelineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start capturing with caller-supplied components.
    pub fn start_with<C, T>(&mut self, capture: C, sink: LogSink<T>) -> Result<(), PipelineError>
    where
        C: PacketCapture + 'static,
        T: LogTarget + 'static,
    {
        self.ensure_idle()?;

        let shared = Arc::clone(&self.handle.shared);
        if let Err(e) = self.config.validate() {
            shared.transition(PipelineState::Failed(e.to_string()));
            return Err(e.into());
        }
        if !shared.transition(PipelineState::Capturing) {
            return Err(PipelineError::AlreadyStarted);
        }

        let worker = Worker {
            capture,
            sink,
            summarizer: Summarizer::new(self.config.descriptor_cap),
            retry: RetryPolicy {
                limit: self.config.retry_limit,
                base: self.config.retry_backoff(),
                max: self.config.poll_interval(),
            },
            flush_interval: self.config.flush_interval(),
            shared: Arc::clone(&shared),
        };

        let spawned = thread::Builder::new()
            .name("wirelog-capture".to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(join) => {
                self.worker = Some(join);
                Ok(())
            }
            Err(e) => {
                // Capturing -> Draining -> Failed keeps the transition table intact
                shared.transition(PipelineState::Draining);
                shared.transition(PipelineState::Failed(format!(
                    "failed to spawn capture worker: {}",
                    e
                )));
                Err(PipelineError::Spawn(e))
            }
        }
    }

    /// Block until the worker exits and return the final state.
    pub fn wait(&mut self) -> PipelineState {
        if let Some(join) = self.worker.take() {
            if join.join().is_err() {
                let mut state = self.handle.shared.lock_state();
                if !state.is_terminal() {
                    *state = PipelineState::Failed("capture worker panicked".to_string());
                }
            }
        }
        self.status()
    }

    /// Request a stop and wait for the drain to finish.
    pub fn shutdown(&mut self) -> PipelineState {
        self.stop();
        self.wait()
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.status() == PipelineState::Idle {
            Ok(())
        } else {
            Err(PipelineError::AlreadyStarted)
        }
    }

    fn open_live(&self) -> Result<(PnetCapture, LogSink), PipelineError> {
        self.config.validate()?;

        let options = CaptureOptions {
            poll_interval: self.config.poll_interval(),
            snaplen: self.config.snaplen,
            promiscuous: self.config.promiscuous,
        };
        let capture = PnetCapture::open(
            &self.config.interface,
            self.config.filter.as_deref(),
            &options,
        )?;
        let sink = LogSink::open(&self.config.log_path, self.config.buffer_capacity)?;
        Ok((capture, sink))
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}
