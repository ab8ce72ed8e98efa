//! Packet summary domain model.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, SecondsFormat, Utc};
use macaddr::MacAddr6;

/// Protocol label written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    Arp,
    /// IPv4 carrying a transport we do not dissect
    Ipv4,
    /// IPv6 carrying a transport we do not dissect
    Ipv6,
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Icmp => write!(f, "ICMP"),
            Self::Icmpv6 => write!(f, "ICMPv6"),
            Self::Arp => write!(f, "ARP"),
            Self::Ipv4 => write!(f, "IPv4"),
            Self::Ipv6 => write!(f, "IPv6"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One side of a packet exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Address and port (TCP/UDP)
    Socket(SocketAddr),
    /// Network address only
    Ip(IpAddr),
    /// Link-layer address only
    Link(MacAddr6),
    Unknown,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{}", addr),
            Self::Ip(ip) => write!(f, "{}", ip),
            Self::Link(mac) => write!(f, "{}", format_mac(mac)),
            Self::Unknown => write!(f, "?"),
        }
    }
}

/// Format a MAC as lowercase colon-separated hex.
fn format_mac(mac: &MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Bounded description of one captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSummary {
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Length of the packet on the wire
    pub length: usize,
    /// Free text, ASCII and newline-free, capped by the summarizer
    pub descriptor: String,
}

impl PacketSummary {
    /// Render the summary as a newline-terminated log line.
    ///
    /// Format: `<timestamp> <protocol> <src>-><dst> len=<N> <descriptor>`
    pub fn to_log_line(&self) -> String {
        format!(
            "{} {} {}->{} len={} {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.protocol,
            self.source,
            self.destination,
            self.length,
            self.descriptor
        )
    }
}
