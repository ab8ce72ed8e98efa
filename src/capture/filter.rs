//! Capture filter expressions.
//!
//! A small BPF-like language evaluated in user space against decoded
//! headers:
//!
//! ```text
//! tcp and (port 80 or port 443)
//! not arp && src host 10.0.0.1
//! ```
//!
//! Primitives are `tcp`, `udp`, `icmp`, `icmp6`, `arp`, `ip`, `ip6`,
//! `[src|dst] host ADDR` and `[src|dst] port NUM`. They combine with
//! `and`/`&&`, `or`/`||`, `not`/`!` and parentheses. `not` binds tightest,
//! then `and`, then `or`.

use std::net::IpAddr;

use crate::capture::RawPacket;
use crate::error::CaptureError;
use crate::parser::{parse_frame, NetworkHeader, ParsedFrame, TransportHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtoKind {
    Tcp,
    Udp,
    Icmp,
    Icmp6,
    Arp,
    Ip,
    Ip6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Proto(ProtoKind),
    Host(Direction, IpAddr),
    Port(Direction, u16),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A compiled capture filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFilter {
    source: String,
    expr: Option<Expr>,
}

impl CaptureFilter {
    /// Compile a filter expression. An empty expression accepts every packet.
    pub fn parse(source: &str) -> Result<Self, CaptureError> {
        let tokens = tokenize(source);
        let expr = if tokens.is_empty() {
            None
        } else {
            let mut parser = Parser {
                tokens,
                pos: 0,
                depth: 0,
            };
            let expr = parser.parse_or()?;
            if let Some(token) = parser.peek() {
                return Err(CaptureError::InvalidFilter(format!(
                    "unexpected '{}' in '{}'",
                    token, source
                )));
            }
            Some(expr)
        };

        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// A filter that accepts every packet.
    pub fn accept_all() -> Self {
        Self {
            source: String::new(),
            expr: None,
        }
    }

    /// The expression this filter was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether a captured packet passes the filter.
    pub fn matches(&self, packet: &RawPacket) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => eval(expr, &parse_frame(packet.link_type, &packet.data)),
        }
    }
}

fn eval(expr: &Expr, frame: &ParsedFrame<'_>) -> bool {
    match expr {
        Expr::Proto(kind) => match kind {
            ProtoKind::Tcp => matches!(frame.transport, Some(TransportHeader::Tcp { .. })),
            ProtoKind::Udp => matches!(frame.transport, Some(TransportHeader::Udp { .. })),
            ProtoKind::Icmp => matches!(frame.transport, Some(TransportHeader::Icmp { .. })),
            ProtoKind::Icmp6 => matches!(frame.transport, Some(TransportHeader::Icmpv6 { .. })),
            ProtoKind::Arp => matches!(frame.network, Some(NetworkHeader::Arp { .. })),
            ProtoKind::Ip => matches!(frame.network, Some(NetworkHeader::Ipv4 { .. })),
            ProtoKind::Ip6 => matches!(frame.network, Some(NetworkHeader::Ipv6 { .. })),
        },
        Expr::Host(direction, addr) => frame
            .network
            .map(|network| directional(*direction, network.addresses(), addr))
            .unwrap_or(false),
        Expr::Port(direction, port) => frame
            .transport
            .and_then(|transport| transport.ports())
            .map(|ports| directional(*direction, ports, port))
            .unwrap_or(false),
        Expr::Not(inner) => !eval(inner, frame),
        Expr::And(lhs, rhs) => eval(lhs, frame) && eval(rhs, frame),
        Expr::Or(lhs, rhs) => eval(lhs, frame) || eval(rhs, frame),
    }
}

fn directional<T: PartialEq>(direction: Direction, (src, dst): (T, T), wanted: &T) -> bool {
    match direction {
        Direction::Src => src == *wanted,
        Direction::Dst => dst == *wanted,
        Direction::Either => src == *wanted || dst == *wanted,
    }
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' | ')' | '!' => {
                flush_token(&mut current, &mut tokens);
                tokens.push(c.to_string());
            }
            '&' | '|' if chars.peek() == Some(&c) => {
                chars.next();
                flush_token(&mut current, &mut tokens);
                tokens.push(if c == '&' { "and" } else { "or" }.to_string());
            }
            c if c.is_whitespace() => flush_token(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush_token(&mut current, &mut tokens);
    tokens
}

fn flush_token(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Deepest nesting of `not` and parentheses accepted.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<String>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek()
            .map(|token| token.eq_ignore_ascii_case(keyword))
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<String, CaptureError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| CaptureError::InvalidFilter("unexpected end of expression".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn parse_or(&mut self) -> Result<Expr, CaptureError> {
        let mut expr = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            expr = Expr::Or(Box::new(expr), Box::new(self.parse_and()?));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, CaptureError> {
        let mut expr = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            expr = Expr::And(Box::new(expr), Box::new(self.parse_unary()?));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, CaptureError> {
        if self.peek_keyword("not") || self.peek() == Some("!") {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary();
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner?)));
        }
        if self.peek() == Some("(") {
            self.pos += 1;
            self.enter()?;
            let expr = self.parse_or();
            self.depth -= 1;
            let expr = expr?;
            if self.next()? != ")" {
                return Err(CaptureError::InvalidFilter("expected ')'".to_string()));
            }
            return Ok(expr);
        }
        self.parse_primitive()
    }

    fn enter(&mut self) -> Result<(), CaptureError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CaptureError::InvalidFilter(format!(
                "nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        Ok(())
    }

    fn parse_primitive(&mut self) -> Result<Expr, CaptureError> {
        let token = self.next()?.to_ascii_lowercase();
        let (direction, keyword) = match token.as_str() {
            "src" => (Direction::Src, self.next()?.to_ascii_lowercase()),
            "dst" => (Direction::Dst, self.next()?.to_ascii_lowercase()),
            _ => (Direction::Either, token),
        };

        match keyword.as_str() {
            "host" => {
                let value = self.next()?;
                let addr = value
                    .parse()
                    .map_err(|_| CaptureError::InvalidFilter(format!("invalid host '{}'", value)))?;
                Ok(Expr::Host(direction, addr))
            }
            "port" => {
                let value = self.next()?;
                let port = value
                    .parse()
                    .map_err(|_| CaptureError::InvalidFilter(format!("invalid port '{}'", value)))?;
                Ok(Expr::Port(direction, port))
            }
            proto if direction == Direction::Either => {
                let kind = match proto {
                    "tcp" => ProtoKind::Tcp,
                    "udp" => ProtoKind::Udp,
                    "icmp" => ProtoKind::Icmp,
                    "icmp6" => ProtoKind::Icmp6,
                    "arp" => ProtoKind::Arp,
                    "ip" => ProtoKind::Ip,
                    "ip6" => ProtoKind::Ip6,
                    other => {
                        return Err(CaptureError::InvalidFilter(format!(
                            "unknown primitive '{}'",
                            other
                        )))
                    }
                };
                Ok(Expr::Proto(kind))
            }
            other => Err(CaptureError::InvalidFilter(format!(
                "expected 'host' or 'port' after direction, got '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LinkType;
    use crate::parser::test_frames::*;

    fn packet(data: Vec<u8>) -> RawPacket {
        RawPacket::captured(&data, LinkType::Ethernet, 65535)
    }

    fn http_syn() -> RawPacket {
        packet(tcp_frame([10, 0, 0, 1], 51000, [10, 0, 0, 2], 80, TCP_SYN, b""))
    }

    fn dns_query() -> RawPacket {
        packet(udp_frame([10, 0, 0, 1], 40000, [10, 0, 0, 53], 53, b"q"))
    }

    fn arp() -> RawPacket {
        packet(ethernet(
            0x0806,
            &arp_request([10, 0, 0, 1].into(), [10, 0, 0, 2].into()),
        ))
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter = CaptureFilter::parse("   ").unwrap();
        assert!(filter.matches(&http_syn()));
        assert!(filter.matches(&packet(vec![0xff; 3])));
        assert!(CaptureFilter::accept_all().matches(&arp()));
    }

    #[test]
    fn test_protocol_primitives() {
        let tcp = CaptureFilter::parse("tcp").unwrap();
        assert!(tcp.matches(&http_syn()));
        assert!(!tcp.matches(&dns_query()));

        let arp_filter = CaptureFilter::parse("ARP").unwrap();
        assert!(arp_filter.matches(&arp()));
        assert!(!arp_filter.matches(&http_syn()));

        let ip = CaptureFilter::parse("ip").unwrap();
        assert!(ip.matches(&dns_query()));
        assert!(!ip.matches(&arp()));
    }

    #[test]
    fn test_host_and_port() {
        assert!(CaptureFilter::parse("host 10.0.0.2").unwrap().matches(&http_syn()));
        assert!(CaptureFilter::parse("src host 10.0.0.1").unwrap().matches(&http_syn()));
        assert!(!CaptureFilter::parse("dst host 10.0.0.1").unwrap().matches(&http_syn()));
        assert!(CaptureFilter::parse("dst port 53").unwrap().matches(&dns_query()));
        assert!(!CaptureFilter::parse("port 53").unwrap().matches(&http_syn()));
        assert!(!CaptureFilter::parse("port 80").unwrap().matches(&arp()));
    }

    #[test]
    fn test_boolean_combinations() {
        let filter = CaptureFilter::parse("tcp and (port 80 or port 443)").unwrap();
        assert!(filter.matches(&http_syn()));
        assert!(!filter.matches(&dns_query()));

        let filter = CaptureFilter::parse("!arp && src host 10.0.0.1").unwrap();
        assert!(filter.matches(&http_syn()));
        assert!(!filter.matches(&arp()));

        // and binds tighter than or
        let filter = CaptureFilter::parse("arp or udp and port 80").unwrap();
        assert!(filter.matches(&arp()));
        assert!(!filter.matches(&dns_query()));
    }

    #[test]
    fn test_invalid_filters() {
        for source in ["tcp and", "port http", "host nowhere", "(tcp", "tcp )", "sctp", "src tcp"] {
            let result = CaptureFilter::parse(source);
            assert!(
                matches!(result, Err(CaptureError::InvalidFilter(_))),
                "expected '{}' to be rejected",
                source
            );
        }
    }

    #[test]
    fn test_source_preserved() {
        let filter = CaptureFilter::parse("  tcp and port 80 ").unwrap();
        assert_eq!(filter.as_str(), "tcp and port 80");
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let negations = format!("{}tcp", "! ".repeat(200_000));
        assert!(matches!(
            CaptureFilter::parse(&negations),
            Err(CaptureError::InvalidFilter(_))
        ));

        let parens = format!("{}tcp{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            CaptureFilter::parse(&parens),
            Err(CaptureError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_nesting_within_limit_accepted() {
        let filter = format!("{}tcp{}", "(".repeat(32), ")".repeat(32));
        assert!(CaptureFilter::parse(&filter).is_ok());
        assert!(CaptureFilter::parse(&format!("{}tcp", "not ".repeat(64))).is_ok());
    }
}
