//! pnet-based live packet capture implementation.

use std::io::{self, ErrorKind};

use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};

use super::{CaptureFilter, CaptureOptions, LinkType, PacketCapture, RawPacket};
use crate::error::CaptureError;

/// Live packet capture using the pnet library.
///
/// The datalink channel is held for the lifetime of the capture and released
/// by `close` or on drop, which also ends promiscuous mode for this socket.
pub struct PnetCapture {
    interface: NetworkInterface,
    link_type: LinkType,
    filter: CaptureFilter,
    snaplen: usize,
    rx: Option<Box<dyn DataLinkReceiver>>,
    filtered: u64,
}

impl PnetCapture {
    /// Open a live capture on the named interface.
    pub fn open(
        interface_name: &str,
        filter: Option<&str>,
        options: &CaptureOptions,
    ) -> Result<Self, CaptureError> {
        // Reject a bad filter before touching the device
        let filter = match filter {
            Some(expr) => CaptureFilter::parse(expr)?,
            None => CaptureFilter::accept_all(),
        };

        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| CaptureError::DeviceUnavailable(interface_name.to_string()))?;

        if !interface.is_up() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is down",
                interface_name
            )));
        }

        let config = Config {
            read_timeout: Some(options.poll_interval),
            promiscuous: options.promiscuous,
            ..Config::default()
        };

        let rx = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(CaptureError::ChannelCreation(
                    "unsupported channel type".to_string(),
                ))
            }
            Err(e) => {
                let msg = e.to_string();
                if e.kind() == ErrorKind::PermissionDenied
                    || msg.contains("permission")
                    || msg.contains("Operation not permitted")
                {
                    return Err(CaptureError::InsufficientPermissions);
                }
                return Err(CaptureError::ChannelCreation(msg));
            }
        };

        let link_type = if interface.is_point_to_point() && !interface.is_loopback() {
            LinkType::RawIp
        } else {
            LinkType::Ethernet
        };

        tracing::info!(
            interface = %interface.name,
            filter = %filter.as_str(),
            promiscuous = options.promiscuous,
            "Opened live capture"
        );

        Ok(Self {
            interface,
            link_type,
            filter,
            snaplen: options.snaplen,
            rx: Some(rx),
            filtered: 0,
        })
    }

    /// List all available network interfaces.
    pub fn list_interfaces() -> Vec<String> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let status = if iface.is_up() { "UP" } else { "DOWN" };
                let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
                format!(
                    "{}: {} [{}]",
                    iface.name,
                    status,
                    if ips.is_empty() {
                        "no IP".to_string()
                    } else {
                        ips.join(", ")
                    }
                )
            })
            .collect()
    }
}

impl PacketCapture for PnetCapture {
    fn receive(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        let rx = self.rx.as_mut().ok_or(CaptureError::Closed)?;

        match rx.next() {
            Ok(frame) => {
                let packet = RawPacket::captured(frame, self.link_type, self.snaplen);
                if self.filter.matches(&packet) {
                    Ok(Some(packet))
                } else {
                    self.filtered += 1;
                    tracing::debug!(length = packet.original_len, "Packet rejected by filter");
                    Ok(None)
                }
            }
            Err(e) => classify_receive_error(e),
        }
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.rx.take().is_some() {
            tracing::info!(interface = %self.interface.name, "Closed live capture");
        }
        Ok(())
    }

    fn interface_name(&self) -> &str {
        &self.interface.name
    }

    fn filtered_count(&self) -> u64 {
        self.filtered
    }
}

/// Map a failed read on the datalink channel to a receive outcome.
fn classify_receive_error(e: io::Error) -> Result<Option<RawPacket>, CaptureError> {
    match e.kind() {
        // Read timeout: no packet within the poll interval
        ErrorKind::TimedOut | ErrorKind::WouldBlock => Ok(None),
        ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
            Err(CaptureError::Closed)
        }
        _ if device_gone(&e) => Err(CaptureError::Fatal(format!("interface gone: {}", e))),
        _ => Err(CaptureError::Transient(e)),
    }
}

/// The interface was removed or taken down under the open channel.
#[cfg(target_os = "linux")]
fn device_gone(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ENODEV) | Some(libc::ENXIO) | Some(libc::ENETDOWN)
    )
}

#[cfg(not(target_os = "linux"))]
fn device_gone(_e: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_interface() {
        let result = PnetCapture::open("wirelog-does-not-exist0", None, &CaptureOptions::default());
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_invalid_filter_rejected_before_device_lookup() {
        let result = PnetCapture::open(
            "wirelog-does-not-exist0",
            Some("tcp and"),
            &CaptureOptions::default(),
        );
        assert!(matches!(result, Err(CaptureError::InvalidFilter(_))));
    }

    #[test]
    fn test_timeout_is_idle() {
        let result = classify_receive_error(io::Error::from(ErrorKind::TimedOut));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_interrupted_read_is_transient() {
        let result = classify_receive_error(io::Error::from(ErrorKind::Interrupted));
        assert!(matches!(result, Err(CaptureError::Transient(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_removed_device_is_fatal() {
        for errno in [libc::ENODEV, libc::ENXIO, libc::ENETDOWN] {
            let result = classify_receive_error(io::Error::from_raw_os_error(errno));
            assert!(
                matches!(result, Err(CaptureError::Fatal(_))),
                "errno {} should be fatal",
                errno
            );
        }
    }
}
