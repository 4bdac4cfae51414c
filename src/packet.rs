//! Captured packets as seen by the classifiers.
//!
//! A [`Packet`] is immutable once built. It carries the raw frame, the
//! decoded network and transport identification, and the transport payload
//! that the heuristics inspect.

use crate::error::PacketError;
use crate::tcp_flags::TcpFlags;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const IP_PROTOCOL_ICMPV4: u8 = 1;
pub const IP_PROTOCOL_TCP: u8 = 6;
pub const IP_PROTOCOL_UDP: u8 = 17;
pub const IP_PROTOCOL_ICMPV6: u8 = 58;

/// Capture metadata delivered alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub timestamp_ns: u64,
    pub capture_length: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
    },
    Ipv6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
    },
}

impl NetworkLayer {
    pub fn src_addr(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4 { src, .. } => IpAddr::V4(*src),
            NetworkLayer::Ipv6 { src, .. } => IpAddr::V6(*src),
        }
    }

    pub fn dst_addr(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4 { dst, .. } => IpAddr::V4(*dst),
            NetworkLayer::Ipv6 { dst, .. } => IpAddr::V6(*dst),
        }
    }

    /// IPv4 protocol field or IPv6 next-header field.
    pub fn next_protocol(&self) -> u8 {
        match self {
            NetworkLayer::Ipv4 { protocol, .. } => *protocol,
            NetworkLayer::Ipv6 { next_header, .. } => *next_header,
        }
    }

    fn between(src: IpAddr, dst: IpAddr, next_protocol: u8) -> Self {
        match (src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => NetworkLayer::Ipv4 {
                src,
                dst,
                protocol: next_protocol,
            },
            (src, dst) => NetworkLayer::Ipv6 {
                src: to_ipv6(src),
                dst: to_ipv6(dst),
                next_header: next_protocol,
            },
        }
    }
}

fn to_ipv6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLayer {
    pub kind: TransportKind,
    pub src_port: u16,
    pub dst_port: u16,
    /// Only meaningful for TCP.
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub metadata: PacketMetadata,
    /// The raw captured bytes, empty for synthesized packets.
    pub data: Vec<u8>,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

impl Packet {
    pub fn new(network: Option<NetworkLayer>, transport: Option<TransportLayer>) -> Self {
        let length = transport.as_ref().map_or(0, |t| t.payload.len());
        Self {
            metadata: PacketMetadata {
                timestamp_ns: 0,
                capture_length: length,
                length,
            },
            data: Vec::new(),
            network,
            transport,
        }
    }

    /// Decodes a frame that starts with an Ethernet II header.
    pub fn from_ethernet(data: Vec<u8>, metadata: PacketMetadata) -> Result<Self, PacketError> {
        let (network, transport) = {
            let sliced = SlicedPacket::from_ethernet(&data)
                .map_err(|e| PacketError::Malformed(e.to_string()))?;
            decode_layers(&sliced)
        };
        Ok(Self {
            metadata,
            data,
            network,
            transport,
        })
    }

    /// Decodes a frame that starts directly with an IPv4 or IPv6 header.
    pub fn from_ip(data: Vec<u8>, metadata: PacketMetadata) -> Result<Self, PacketError> {
        let (network, transport) = {
            let sliced =
                SlicedPacket::from_ip(&data).map_err(|e| PacketError::Malformed(e.to_string()))?;
            decode_layers(&sliced)
        };
        Ok(Self {
            metadata,
            data,
            network,
            transport,
        })
    }

    pub fn tcp(src: SocketAddr, dst: SocketAddr, payload: &[u8]) -> Self {
        Self::tcp_with_flags(src, dst, TcpFlags(TcpFlags::PSH | TcpFlags::ACK), payload)
    }

    pub fn tcp_with_flags(
        src: SocketAddr,
        dst: SocketAddr,
        flags: TcpFlags,
        payload: &[u8],
    ) -> Self {
        Self::new(
            Some(NetworkLayer::between(src.ip(), dst.ip(), IP_PROTOCOL_TCP)),
            Some(TransportLayer {
                kind: TransportKind::Tcp,
                src_port: src.port(),
                dst_port: dst.port(),
                flags,
                payload: payload.to_vec(),
            }),
        )
    }

    pub fn udp(src: SocketAddr, dst: SocketAddr, payload: &[u8]) -> Self {
        Self::new(
            Some(NetworkLayer::between(src.ip(), dst.ip(), IP_PROTOCOL_UDP)),
            Some(TransportLayer {
                kind: TransportKind::Udp,
                src_port: src.port(),
                dst_port: dst.port(),
                flags: TcpFlags::default(),
                payload: payload.to_vec(),
            }),
        )
    }

    pub fn icmpv4(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self::new(
            Some(NetworkLayer::Ipv4 {
                src,
                dst,
                protocol: IP_PROTOCOL_ICMPV4,
            }),
            None,
        )
    }

    pub fn icmpv6(src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Self::new(
            Some(NetworkLayer::Ipv6 {
                src,
                dst,
                next_header: IP_PROTOCOL_ICMPV6,
            }),
            None,
        )
    }

    pub fn with_metadata(mut self, metadata: PacketMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The transport layer, if it is of the requested kind.
    pub fn transport_of(&self, kind: TransportKind) -> Option<&TransportLayer> {
        self.transport.as_ref().filter(|t| t.kind == kind)
    }

    /// Source and destination socket addresses, when both layers are present.
    pub fn endpoints(&self) -> Option<(SocketAddr, SocketAddr)> {
        let network = self.network.as_ref()?;
        let transport = self.transport.as_ref()?;
        Some((
            SocketAddr::new(network.src_addr(), transport.src_port),
            SocketAddr::new(network.dst_addr(), transport.dst_port),
        ))
    }
}

fn decode_layers(sliced: &SlicedPacket<'_>) -> (Option<NetworkLayer>, Option<TransportLayer>) {
    let network = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some(NetworkLayer::Ipv4 {
                src: header.source_addr(),
                dst: header.destination_addr(),
                protocol: header.protocol().0,
            })
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            Some(NetworkLayer::Ipv6 {
                src: header.source_addr(),
                dst: header.destination_addr(),
                next_header: header.next_header().0,
            })
        }
        #[allow(unreachable_patterns)]
        _ => None,
    };

    let transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let mut bits = 0u8;
            for (set, bit) in [
                (tcp.fin(), TcpFlags::FIN),
                (tcp.syn(), TcpFlags::SYN),
                (tcp.rst(), TcpFlags::RST),
                (tcp.psh(), TcpFlags::PSH),
                (tcp.ack(), TcpFlags::ACK),
                (tcp.urg(), TcpFlags::URG),
                (tcp.ece(), TcpFlags::ECE),
                (tcp.cwr(), TcpFlags::CWR),
            ] {
                if set {
                    bits |= bit;
                }
            }
            Some(TransportLayer {
                kind: TransportKind::Tcp,
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                flags: TcpFlags(bits),
                payload: tcp.payload().to_vec(),
            })
        }
        Some(TransportSlice::Udp(udp)) => Some(TransportLayer {
            kind: TransportKind::Udp,
            src_port: udp.source_port(),
            dst_port: udp.destination_port(),
            flags: TcpFlags::default(),
            payload: udp.payload().to_vec(),
        }),
        _ => None,
    };

    (network, transport)
}
