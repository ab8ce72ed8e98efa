//! Link, network and transport header decoding.
//!
//! Parsing never fails: each layer is decoded as far as the captured bytes
//! allow. A header that a lower layer announces but that cannot be decoded
//! marks the frame as truncated.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use macaddr::MacAddr6;
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;

use crate::capture::LinkType;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Ethernet header, with the inner ethertype when an 802.1Q tag is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub source: MacAddr6,
    pub destination: MacAddr6,
    pub ethertype: u16,
    pub vlan: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        /// Set for non-first fragments, which carry no transport header
        fragment: bool,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
    },
    Arp {
        operation: u16,
        sender_mac: MacAddr6,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    },
}

impl NetworkHeader {
    /// Source and destination protocol addresses.
    pub fn addresses(&self) -> (IpAddr, IpAddr) {
        match *self {
            Self::Ipv4 {
                source,
                destination,
                ..
            } => (IpAddr::V4(source), IpAddr::V4(destination)),
            Self::Ipv6 {
                source,
                destination,
                ..
            } => (IpAddr::V6(source), IpAddr::V6(destination)),
            Self::Arp {
                sender_ip,
                target_ip,
                ..
            } => (IpAddr::V4(sender_ip), IpAddr::V4(target_ip)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader<'a> {
    Tcp {
        source_port: u16,
        destination_port: u16,
        sequence: u32,
        acknowledgement: u32,
        flags: u16,
        window: u16,
        payload: &'a [u8],
    },
    Udp {
        source_port: u16,
        destination_port: u16,
        payload: &'a [u8],
    },
    Icmp {
        icmp_type: u8,
        code: u8,
    },
    Icmpv6 {
        icmp_type: u8,
        code: u8,
    },
}

impl TransportHeader<'_> {
    /// Source and destination ports for TCP and UDP.
    pub fn ports(&self) -> Option<(u16, u16)> {
        match *self {
            Self::Tcp {
                source_port,
                destination_port,
                ..
            }
            | Self::Udp {
                source_port,
                destination_port,
                ..
            } => Some((source_port, destination_port)),
            _ => None,
        }
    }
}

/// Headers decoded from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub link: Option<LinkHeader>,
    pub network: Option<NetworkHeader>,
    pub transport: Option<TransportHeader<'a>>,
    /// A header announced by a lower layer could not be decoded
    pub truncated: bool,
}

/// Decode as many layers of `data` as possible.
pub fn parse_frame(link_type: LinkType, data: &[u8]) -> ParsedFrame<'_> {
    let mut frame = ParsedFrame::default();

    match link_type {
        LinkType::Ethernet => parse_ethernet(data, &mut frame),
        LinkType::RawIp => match data.first().map(|b| b >> 4) {
            Some(4) => parse_ipv4(data, &mut frame),
            Some(6) => parse_ipv6(data, &mut frame),
            _ => frame.truncated = true,
        },
        LinkType::Unknown(_) => {}
    }

    frame
}

fn parse_ethernet<'a>(data: &'a [u8], frame: &mut ParsedFrame<'a>) {
    let Some(ethernet) = EthernetPacket::new(data) else {
        frame.truncated = true;
        return;
    };

    let mut ethertype = ethernet.get_ethertype();
    let mut offset = ETHERNET_HEADER_LEN;
    let mut vlan = None;

    if ethertype == EtherTypes::Vlan {
        match VlanPacket::new(&data[offset..]) {
            Some(tag) => {
                vlan = Some(tag.get_vlan_identifier());
                ethertype = tag.get_ethertype();
                offset += VLAN_TAG_LEN;
            }
            None => frame.truncated = true,
        }
    }

    frame.link = Some(LinkHeader {
        source: MacAddr6::from(ethernet.get_source().octets()),
        destination: MacAddr6::from(ethernet.get_destination().octets()),
        ethertype: ethertype.0,
        vlan,
    });

    if frame.truncated {
        return;
    }

    let payload = &data[offset..];
    match ethertype {
        EtherTypes::Ipv4 => parse_ipv4(payload, frame),
        EtherTypes::Ipv6 => parse_ipv6(payload, frame),
        EtherTypes::Arp => parse_arp(payload, frame),
        _ => {}
    }
}

fn parse_ipv4<'a>(data: &'a [u8], frame: &mut ParsedFrame<'a>) {
    let Some(ip) = Ipv4Packet::new(data) else {
        frame.truncated = true;
        return;
    };

    let header_len = ip.get_header_length() as usize * 4;
    let total_len = ip.get_total_length() as usize;
    if header_len < IPV4_MIN_HEADER_LEN || header_len > data.len() || total_len < header_len {
        frame.truncated = true;
        return;
    }

    let protocol = ip.get_next_level_protocol();
    let fragment = ip.get_fragment_offset() != 0;
    frame.network = Some(NetworkHeader::Ipv4 {
        source: ip.get_source(),
        destination: ip.get_destination(),
        protocol: protocol.0,
        ttl: ip.get_ttl(),
        fragment,
    });

    if fragment {
        return;
    }

    // total_len excludes Ethernet padding; snaplen may cut below it
    let end = total_len.min(data.len());
    parse_transport(protocol, &data[header_len..end], frame);
}

fn parse_ipv6<'a>(data: &'a [u8], frame: &mut ParsedFrame<'a>) {
    let Some(ip) = Ipv6Packet::new(data) else {
        frame.truncated = true;
        return;
    };

    let next_header = ip.get_next_header();
    frame.network = Some(NetworkHeader::Ipv6 {
        source: ip.get_source(),
        destination: ip.get_destination(),
        next_header: next_header.0,
        hop_limit: ip.get_hop_limit(),
    });

    let end = (IPV6_HEADER_LEN + ip.get_payload_length() as usize).min(data.len());
    parse_transport(next_header, &data[IPV6_HEADER_LEN..end], frame);
}

fn parse_arp<'a>(data: &'a [u8], frame: &mut ParsedFrame<'a>) {
    let Some(arp) = ArpPacket::new(data) else {
        frame.truncated = true;
        return;
    };

    frame.network = Some(NetworkHeader::Arp {
        operation: arp.get_operation().0,
        sender_mac: MacAddr6::from(arp.get_sender_hw_addr().octets()),
        sender_ip: arp.get_sender_proto_addr(),
        target_ip: arp.get_target_proto_addr(),
    });
}

fn parse_transport<'a>(protocol: IpNextHeaderProtocol, data: &'a [u8], frame: &mut ParsedFrame<'a>) {
    match protocol {
        IpNextHeaderProtocols::Tcp => {
            let Some(tcp) = TcpPacket::new(data) else {
                frame.truncated = true;
                return;
            };
            let header_len = tcp.get_data_offset() as usize * 4;
            if header_len < TCP_MIN_HEADER_LEN || header_len > data.len() {
                frame.truncated = true;
                return;
            }
            frame.transport = Some(TransportHeader::Tcp {
                source_port: tcp.get_source(),
                destination_port: tcp.get_destination(),
                sequence: tcp.get_sequence(),
                acknowledgement: tcp.get_acknowledgement(),
                flags: u16::from(tcp.get_flags()),
                window: tcp.get_window(),
                payload: &data[header_len..],
            });
        }
        IpNextHeaderProtocols::Udp => {
            let Some(udp) = UdpPacket::new(data) else {
                frame.truncated = true;
                return;
            };
            let length = udp.get_length() as usize;
            if length < UDP_HEADER_LEN {
                frame.truncated = true;
                return;
            }
            frame.transport = Some(TransportHeader::Udp {
                source_port: udp.get_source(),
                destination_port: udp.get_destination(),
                payload: &data[UDP_HEADER_LEN..length.min(data.len())],
            });
        }
        IpNextHeaderProtocols::Icmp => match IcmpPacket::new(data) {
            Some(icmp) => {
                frame.transport = Some(TransportHeader::Icmp {
                    icmp_type: icmp.get_icmp_type().0,
                    code: icmp.get_icmp_code().0,
                })
            }
            None => frame.truncated = true,
        },
        IpNextHeaderProtocols::Icmpv6 => match Icmpv6Packet::new(data) {
            Some(icmp) => {
                frame.transport = Some(TransportHeader::Icmpv6 {
                    icmp_type: icmp.get_icmpv6_type().0,
                    code: icmp.get_icmpv6_code().0,
                })
            }
            None => frame.truncated = true,
        },
        _ => {}
    }
}
