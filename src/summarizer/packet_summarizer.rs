//! Packet summarizer implementation.

use std::fmt::Write as _;
use std::net::SocketAddr;

use crate::capture::RawPacket;
use crate::domain::{Endpoint, PacketSummary, Protocol};
use crate::parser::{parse_frame, LinkHeader, NetworkHeader, ParsedFrame, TransportHeader};

/// Default maximum descriptor length in bytes.
pub const DEFAULT_DESCRIPTOR_CAP: usize = 128;

/// Payload bytes shown in a TCP/UDP data preview.
const PREVIEW_BYTES: usize = 32;

const TCP_FLAG_NAMES: [(u16, &str); 8] = [
    (0x02, "SYN"),
    (0x10, "ACK"),
    (0x01, "FIN"),
    (0x04, "RST"),
    (0x08, "PSH"),
    (0x20, "URG"),
    (0x40, "ECE"),
    (0x80, "CWR"),
];
const TCP_FLAG_ACK: u16 = 0x10;

const ARP_REQUEST: u16 = 1;
const ARP_REPLY: u16 = 2;

/// Maps raw packets to bounded summaries.
///
/// `summarize` is total: malformed or unrecognized input yields an
/// `UNKNOWN` summary instead of an error, and the packet is never dropped.
#[derive(Debug, Clone)]
pub struct Summarizer {
    descriptor_cap: usize,
}

impl Summarizer {
    /// Create a summarizer whose descriptors never exceed `descriptor_cap` bytes.
    pub fn new(descriptor_cap: usize) -> Self {
        Self { descriptor_cap }
    }

    pub fn descriptor_cap(&self) -> usize {
        self.descriptor_cap
    }

    /// Summarize one packet.
    pub fn summarize(&self, packet: &RawPacket) -> PacketSummary {
        let frame = parse_frame(packet.link_type, &packet.data);

        let (protocol, source, destination, descriptor) = if frame.truncated {
            unknown(&frame, packet)
        } else {
            describe(&frame).unwrap_or_else(|| unknown(&frame, packet))
        };

        PacketSummary {
            timestamp: packet.timestamp,
            protocol,
            source,
            destination,
            length: packet.original_len,
            descriptor: truncate(descriptor, self.descriptor_cap),
        }
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_CAP)
    }
}

type Described = (Protocol, Endpoint, Endpoint, String);

fn describe(frame: &ParsedFrame<'_>) -> Option<Described> {
    let network = frame.network?;
    let mut descriptor = String::new();
    if let Some(LinkHeader { vlan: Some(id), .. }) = frame.link {
        let _ = write!(descriptor, "vlan={} ", id);
    }

    if let NetworkHeader::Arp {
        operation,
        sender_mac,
        sender_ip,
        target_ip,
    } = network
    {
        match operation {
            ARP_REQUEST => {
                let _ = write!(descriptor, "who-has {} tell {}", target_ip, sender_ip);
            }
            ARP_REPLY => {
                let _ = write!(
                    descriptor,
                    "{} is-at {}",
                    sender_ip,
                    Endpoint::Link(sender_mac)
                );
            }
            other => {
                let _ = write!(descriptor, "op={}", other);
            }
        }
        return Some((
            Protocol::Arp,
            Endpoint::Ip(sender_ip.into()),
            Endpoint::Ip(target_ip.into()),
            descriptor,
        ));
    }

    let (src_ip, dst_ip) = network.addresses();

    let Some(transport) = frame.transport else {
        let protocol = match network {
            NetworkHeader::Ipv4 {
                protocol,
                ttl,
                fragment,
                ..
            } => {
                let _ = write!(descriptor, "proto={} ttl={}", protocol, ttl);
                if fragment {
                    descriptor.push_str(" fragment");
                }
                Protocol::Ipv4
            }
            NetworkHeader::Ipv6 {
                next_header,
                hop_limit,
                ..
            } => {
                let _ = write!(descriptor, "next-header={} hop-limit={}", next_header, hop_limit);
                Protocol::Ipv6
            }
            NetworkHeader::Arp { .. } => return None,
        };
        return Some((protocol, Endpoint::Ip(src_ip), Endpoint::Ip(dst_ip), descriptor));
    };

    match transport {
        TransportHeader::Tcp {
            source_port,
            destination_port,
            sequence,
            acknowledgement,
            flags,
            window,
            payload,
        } => {
            let _ = write!(descriptor, "[{}] seq={}", tcp_flags(flags), sequence);
            if flags & TCP_FLAG_ACK != 0 {
                let _ = write!(descriptor, " ack={}", acknowledgement);
            }
            let _ = write!(descriptor, " win={} payload={}", window, payload.len());
            push_preview(&mut descriptor, payload);
            Some((
                Protocol::Tcp,
                Endpoint::Socket(SocketAddr::new(src_ip, source_port)),
                Endpoint::Socket(SocketAddr::new(dst_ip, destination_port)),
                descriptor,
            ))
        }
        TransportHeader::Udp {
            source_port,
            destination_port,
            payload,
        } => {
            let _ = write!(descriptor, "payload={}", payload.len());
            push_preview(&mut descriptor, payload);
            Some((
                Protocol::Udp,
                Endpoint::Socket(SocketAddr::new(src_ip, source_port)),
                Endpoint::Socket(SocketAddr::new(dst_ip, destination_port)),
                descriptor,
            ))
        }
        TransportHeader::Icmp { icmp_type, code } => {
            let _ = write!(descriptor, "type={} code={}", icmp_type, code);
            if let Some(name) = icmp_name(icmp_type) {
                let _ = write!(descriptor, " {}", name);
            }
            Some((
                Protocol::Icmp,
                Endpoint::Ip(src_ip),
                Endpoint::Ip(dst_ip),
                descriptor,
            ))
        }
        TransportHeader::Icmpv6 { icmp_type, code } => {
            let _ = write!(descriptor, "type={} code={}", icmp_type, code);
            if let Some(name) = icmpv6_name(icmp_type) {
                let _ = write!(descriptor, " {}", name);
            }
            Some((
                Protocol::Icmpv6,
                Endpoint::Ip(src_ip),
                Endpoint::Ip(dst_ip),
                descriptor,
            ))
        }
    }
}

/// Fallback for frames we cannot dissect: only the captured byte count.
fn unknown(frame: &ParsedFrame<'_>, packet: &RawPacket) -> Described {
    let (source, destination) = match frame.link {
        Some(link) => (Endpoint::Link(link.source), Endpoint::Link(link.destination)),
        None => (Endpoint::Unknown, Endpoint::Unknown),
    };
    (
        Protocol::Unknown,
        source,
        destination,
        format!("bytes={}", packet.data.len()),
    )
}

fn tcp_flags(flags: u16) -> String {
    let names: Vec<&str> = TCP_FLAG_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();

    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(",")
    }
}

/// Append a quoted, printable-ASCII preview of the payload.
fn push_preview(descriptor: &mut String, payload: &[u8]) {
    if payload.is_empty() {
        return;
    }
    descriptor.push_str(" data=\"");
    descriptor.extend(payload.iter().take(PREVIEW_BYTES).map(|&b| {
        if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            '.'
        }
    }));
    descriptor.push('"');
}

fn icmp_name(icmp_type: u8) -> Option<&'static str> {
    match icmp_type {
        0 => Some("echo-reply"),
        3 => Some("dest-unreachable"),
        5 => Some("redirect"),
        8 => Some("echo-request"),
        11 => Some("time-exceeded"),
        _ => None,
    }
}

fn icmpv6_name(icmp_type: u8) -> Option<&'static str> {
    match icmp_type {
        1 => Some("dest-unreachable"),
        3 => Some("time-exceeded"),
        128 => Some("echo-request"),
        129 => Some("echo-reply"),
        133 => Some("router-solicit"),
        134 => Some("router-advert"),
        135 => Some("neighbor-solicit"),
        136 => Some("neighbor-advert"),
        _ => None,
    }
}

/// Cut at the last char boundary at or below `cap` bytes.
fn truncate(mut descriptor: String, cap: usize) -> String {
    if descriptor.len() > cap {
        let mut end = cap;
        while !descriptor.is_char_boundary(end) {
            end -= 1;
        }
        descriptor.truncate(end);
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LinkType;
    use crate::parser::test_frames::*;
    use std::net::Ipv6Addr;

    fn packet(data: &[u8]) -> RawPacket {
        RawPacket::captured(data, LinkType::Ethernet, 65535)
    }

    #[test]
    fn test_summarize_tcp_syn() {
        let summarizer = Summarizer::default();
        let raw = packet(&tcp_frame([192, 168, 1, 10], 51000, [192, 168, 1, 1], 80, TCP_SYN, b""));

        let summary = summarizer.summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Tcp);
        assert_eq!(summary.source.to_string(), "192.168.1.10:51000");
        assert_eq!(summary.destination.to_string(), "192.168.1.1:80");
        assert_eq!(summary.length, raw.data.len());
        assert_eq!(summary.descriptor, "[SYN] seq=1000 win=64240 payload=0");
        assert_eq!(summary.timestamp, raw.timestamp);
    }

    #[test]
    fn test_summarize_tcp_payload_preview() {
        let summarizer = Summarizer::default();
        let raw = packet(&tcp_frame(
            [10, 0, 0, 1],
            40000,
            [10, 0, 0, 2],
            8080,
            TCP_PSH_ACK,
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        ));

        let summary = summarizer.summarize(&raw);
        assert_eq!(
            summary.descriptor,
            "[ACK,PSH] seq=1000 ack=0 win=64240 payload=27 data=\"GET / HTTP/1.1..Host: x....\""
        );
        assert!(!summary.to_log_line().trim_end_matches('\n').contains('\n'));
    }

    #[test]
    fn test_summarize_udp() {
        let summarizer = Summarizer::default();
        let raw = packet(&udp_frame([10, 0, 0, 1], 40000, [8, 8, 8, 8], 53, &[0x00, 0xff]));

        let summary = summarizer.summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Udp);
        assert_eq!(summary.destination.to_string(), "8.8.8.8:53");
        assert_eq!(summary.descriptor, "payload=2 data=\"..\"");
    }

    #[test]
    fn test_summarize_icmp_echo() {
        let summarizer = Summarizer::default();
        let raw = packet(&ethernet(
            0x0800,
            &ipv4(1, [10, 0, 0, 1].into(), [10, 0, 0, 2].into(), &icmp(8, 0)),
        ));

        let summary = summarizer.summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Icmp);
        assert_eq!(summary.source.to_string(), "10.0.0.1");
        assert_eq!(summary.descriptor, "type=8 code=0 echo-request");
    }

    #[test]
    fn test_summarize_icmpv6() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst: Ipv6Addr = "ff02::2".parse().unwrap();
        let raw = packet(&ethernet(0x86dd, &ipv6(58, src, dst, &icmp(133, 0))));

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Icmpv6);
        assert_eq!(summary.source.to_string(), "fe80::1");
        assert_eq!(summary.descriptor, "type=133 code=0 router-solicit");
    }

    #[test]
    fn test_summarize_arp_request() {
        let raw = packet(&ethernet(
            0x0806,
            &arp_request([192, 168, 1, 10].into(), [192, 168, 1, 1].into()),
        ));

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Arp);
        assert_eq!(summary.descriptor, "who-has 192.168.1.1 tell 192.168.1.10");
    }

    #[test]
    fn test_summarize_other_ip_protocol() {
        // GRE is carried but not dissected
        let raw = packet(&ethernet(
            0x0800,
            &ipv4(47, [10, 0, 0, 1].into(), [10, 0, 0, 2].into(), &[0u8; 8]),
        ));

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Ipv4);
        assert_eq!(summary.descriptor, "proto=47 ttl=64");
    }

    #[test]
    fn test_summarize_unknown_ethertype() {
        let raw = packet(&ethernet(0x88cc, &[0u8; 30]));

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Unknown);
        assert_eq!(summary.source.to_string(), "02:00:00:00:00:01");
        assert_eq!(summary.descriptor, "bytes=44");
    }

    #[test]
    fn test_summarize_garbage() {
        let raw = packet(&[0xde, 0xad]);

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.protocol, Protocol::Unknown);
        assert_eq!(summary.source, Endpoint::Unknown);
        assert_eq!(summary.descriptor, "bytes=2");
        assert_eq!(summary.length, 2);
    }

    #[test]
    fn test_snaplen_truncated_packet_reports_wire_length() {
        let frame = tcp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, TCP_SYN, &[b'a'; 200]);
        let raw = RawPacket::captured(&frame, LinkType::Ethernet, 40);

        let summary = Summarizer::default().summarize(&raw);
        assert_eq!(summary.length, frame.len());
        assert_eq!(summary.protocol, Protocol::Unknown);
        assert_eq!(summary.descriptor, "bytes=40");
    }

    #[test]
    fn test_descriptor_cap_is_deterministic() {
        let summarizer = Summarizer::new(16);
        let raw = packet(&tcp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, TCP_PSH_ACK, b"hello world"));

        let first = summarizer.summarize(&raw);
        let second = summarizer.summarize(&raw);
        assert_eq!(first.descriptor, "[ACK,PSH] seq=10");
        assert_eq!(first.descriptor, second.descriptor);
    }

    #[test]
    fn test_total_over_every_prefix() {
        let summarizer = Summarizer::new(24);
        let frames = [
            tcp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, TCP_PSH_ACK, b"payload bytes"),
            udp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, b"\x00\xff\n\r"),
            ethernet(0x0806, &arp_request([1, 1, 1, 1].into(), [2, 2, 2, 2].into())),
        ];

        for frame in &frames {
            for len in 0..=frame.len() {
                let summary = summarizer.summarize(&packet(&frame[..len]));
                assert!(summary.descriptor.len() <= 24);
                assert!(summary.descriptor.is_ascii());
                assert!(!summary.descriptor.contains('\n'));
            }
        }
    }

    #[test]
    fn test_total_over_pseudo_random_input() {
        let summarizer = Summarizer::new(32);
        let mut state: u32 = 0x1234_5678;
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };

        for len in 0..512usize {
            let mut data: Vec<u8> = (0..len % 128).map(|_| next()).collect();
            // Bias some inputs towards IPv4 and IPv6 ethertypes
            if data.len() > 14 && len % 3 == 0 {
                data[12] = 0x08;
                data[13] = 0x00;
                data[14] = 0x45;
            } else if data.len() > 14 && len % 3 == 1 {
                data[12] = 0x86;
                data[13] = 0xdd;
            }
            let summary = summarizer.summarize(&packet(&data));
            assert!(summary.descriptor.len() <= 32);
        }
    }

    #[test]
    fn test_vlan_prefix() {
        let inner = ipv4(1, [10, 0, 0, 1].into(), [10, 0, 0, 2].into(), &icmp(0, 0));
        let mut tagged = vec![0x00, 0x07, 0x08, 0x00];
        tagged.extend_from_slice(&inner);

        let summary = Summarizer::default().summarize(&packet(&ethernet(0x8100, &tagged)));
        assert_eq!(summary.descriptor, "vlan=7 type=0 code=0 echo-reply");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("abcdef".to_string(), 3), "abc");
        assert_eq!(truncate("ab".to_string(), 3), "ab");
        assert_eq!(truncate("aé".to_string(), 2), "a");
    }
}
