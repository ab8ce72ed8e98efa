//! Packet capture abstraction.
//!
//! This module defines the `PacketCapture` trait and provides a pnet-based
//! live implementation and an in-memory replay implementation, so the
//! pipeline can be driven without a network device.

mod filter;
mod pnet_capture;
mod replay;

pub use filter::CaptureFilter;
pub use pnet_capture::PnetCapture;
pub use replay::{ReplayCapture, ReplayEvent};

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CaptureError;

/// Link-layer framing of captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Bare IPv4/IPv6 with no link header (tun devices)
    RawIp,
    Unknown(u32),
}

/// A raw network packet captured from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// The captured bytes, at most snaplen long
    pub data: Vec<u8>,
    /// Length of the packet on the wire
    pub original_len: usize,
    /// When the packet was received
    pub timestamp: DateTime<Utc>,
    pub link_type: LinkType,
}

impl RawPacket {
    /// Build a packet stamped with the current time, keeping at most `snaplen` bytes.
    pub fn captured(data: &[u8], link_type: LinkType, snaplen: usize) -> Self {
        let kept = data.len().min(snaplen);
        Self {
            data: data[..kept].to_vec(),
            original_len: data.len(),
            timestamp: Utc::now(),
            link_type,
        }
    }
}

/// Options for opening a live capture.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Maximum time a single `receive` blocks
    pub poll_interval: Duration,
    /// Maximum bytes kept per packet
    pub snaplen: usize,
    pub promiscuous: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            snaplen: 65535,
            promiscuous: true,
        }
    }
}

/// Trait for packet capture implementations.
///
/// A capture yields packets in arrival order until it is closed. Packets
/// are never reordered or duplicated.
pub trait PacketCapture: Send {
    /// Wait up to one poll interval for the next packet.
    ///
    /// Returns `Ok(None)` when the interval elapsed without a packet or the
    /// packet was rejected by the capture filter, `Err(CaptureError::Closed)`
    /// once the source is exhausted or closed, and
    /// `Err(CaptureError::Transient)` for errors worth retrying.
    fn receive(&mut self) -> Result<Option<RawPacket>, CaptureError>;

    /// Release the underlying device. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), CaptureError>;

    /// Get the name of the interface being captured.
    fn interface_name(&self) -> &str;

    /// Packets dropped by the capture filter so far.
    fn filtered_count(&self) -> u64 {
        0
    }
}

impl<C: PacketCapture + ?Sized> PacketCapture for Box<C> {
    fn receive(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        (**self).receive()
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        (**self).close()
    }

    fn interface_name(&self) -> &str {
        (**self).interface_name()
    }

    fn filtered_count(&self) -> u64 {
        (**self).filtered_count()
    }
}
