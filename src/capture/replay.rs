//! In-memory replay capture.
//!
//! Plays back a fixed script of packets and errors. Used to drive the
//! pipeline without a network device.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

use super::{CaptureFilter, LinkType, PacketCapture, RawPacket};
use crate::error::CaptureError;

/// One scripted step of a replay.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    /// Deliver a packet
    Packet(RawPacket),
    /// Fail the receive with a retryable error
    TransientError,
    /// Fail the receive with an unrecoverable error
    FatalError(String),
    /// Wait one poll interval with no packet
    Idle,
}

/// Capture source that replays a script.
///
/// When the script runs out the source either reports `Closed`, or keeps
/// idling until closed if built with [`ReplayCapture::idle_when_exhausted`].
pub struct ReplayCapture {
    name: String,
    events: VecDeque<ReplayEvent>,
    filter: CaptureFilter,
    poll_interval: Duration,
    idle_when_exhausted: bool,
    closed: bool,
    filtered: u64,
}

impl ReplayCapture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: VecDeque::new(),
            filter: CaptureFilter::accept_all(),
            poll_interval: Duration::from_millis(200),
            idle_when_exhausted: false,
            closed: false,
            filtered: 0,
        }
    }

    /// Replay Ethernet frames, stamped with the time they are queued.
    pub fn from_frames<I>(name: impl Into<String>, frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut capture = Self::new(name);
        for frame in frames {
            capture.push_frame(&frame);
        }
        capture
    }

    /// Append an Ethernet frame to the script.
    pub fn push_frame(&mut self, frame: &[u8]) {
        self.push(ReplayEvent::Packet(RawPacket::captured(
            frame,
            LinkType::Ethernet,
            usize::MAX,
        )));
    }

    /// Append a step to the script.
    pub fn push(&mut self, event: ReplayEvent) {
        self.events.push_back(event);
    }

    /// Apply a capture filter to replayed packets.
    pub fn with_filter(mut self, filter: CaptureFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the delay used for idle steps.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Keep idling instead of closing once the script is exhausted.
    pub fn idle_when_exhausted(mut self) -> Self {
        self.idle_when_exhausted = true;
        self
    }

    /// Steps not yet replayed.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn idle(&self) -> Result<Option<RawPacket>, CaptureError> {
        thread::sleep(self.poll_interval);
        Ok(None)
    }
}

impl PacketCapture for ReplayCapture {
    fn receive(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }

        match self.events.pop_front() {
            Some(ReplayEvent::Packet(packet)) => {
                if self.filter.matches(&packet) {
                    Ok(Some(packet))
                } else {
                    self.filtered += 1;
                    Ok(None)
                }
            }
            Some(ReplayEvent::TransientError) => Err(CaptureError::Transient(io::Error::new(
                io::ErrorKind::Interrupted,
                "replayed transient error",
            ))),
            Some(ReplayEvent::FatalError(reason)) => Err(CaptureError::Fatal(reason)),
            Some(ReplayEvent::Idle) => self.idle(),
            None if self.idle_when_exhausted => self.idle(),
            None => Err(CaptureError::Closed),
        }
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if !self.closed {
            self.closed = true;
            self.events.clear();
            tracing::debug!(interface = %self.name, "Closed replay capture");
        }
        Ok(())
    }

    fn interface_name(&self) -> &str {
        &self.name
    }

    fn filtered_count(&self) -> u64 {
        self.filtered
    }
}
