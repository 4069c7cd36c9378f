//! Ethernet / IPv4 / UDP framing around DHCP messages.

use crate::dhcp::DhcpMessage;
use crate::error::CodecError;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use tracing::trace;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLayer {
    pub source: MacAddr,
    pub destination: MacAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayer {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLayer {
    pub source_port: u16,
    pub destination_port: u16,
}

/// Outer layers shared by every frame one client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayers {
    pub link: LinkLayer,
    pub network: NetworkLayer,
    pub transport: TransportLayer,
}

impl FrameLayers {
    /// Broadcast from an unconfigured client: 0.0.0.0:68 to 255.255.255.255:67.
    pub fn client_broadcast(client: MacAddr) -> Self {
        Self {
            link: LinkLayer {
                source: client,
                destination: MacAddr::broadcast(),
            },
            network: NetworkLayer {
                source: Ipv4Addr::UNSPECIFIED,
                destination: Ipv4Addr::BROADCAST,
                ttl: DEFAULT_TTL,
            },
            transport: TransportLayer {
                source_port: DHCP_CLIENT_PORT,
                destination_port: DHCP_SERVER_PORT,
            },
        }
    }

    /// Wraps `payload` in UDP, IPv4 and Ethernet headers. Lengths and both
    /// checksums are filled in here.
    pub fn encapsulate(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let udp_len = UDP_HEADER_LEN + payload.len();
        let ip_len = IPV4_HEADER_LEN + udp_len;
        let ip_total = u16::try_from(ip_len).map_err(|_| CodecError::Oversized(payload.len()))?;

        let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ip_len];

        let mut ethernet =
            MutableEthernetPacket::new(&mut buffer).ok_or(CodecError::Buffer("ethernet"))?;
        ethernet.set_destination(self.link.destination);
        ethernet.set_source(self.link.source);
        ethernet.set_ethertype(EtherTypes::Ipv4);

        let mut ip =
            MutableIpv4Packet::new(ethernet.payload_mut()).ok_or(CodecError::Buffer("ipv4"))?;
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(ip_total);
        ip.set_ttl(self.network.ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(self.network.source);
        ip.set_destination(self.network.destination);
        ip.set_checksum(ipv4::checksum(&ip.to_immutable()));

        let mut datagram = MutableUdpPacket::new(ip.payload_mut()).ok_or(CodecError::Buffer("udp"))?;
        datagram.set_source(self.transport.source_port);
        datagram.set_destination(self.transport.destination_port);
        datagram.set_length(udp_len as u16);
        datagram.set_payload(payload);
        let checksum = udp::ipv4_checksum(
            &datagram.to_immutable(),
            &self.network.source,
            &self.network.destination,
        );
        datagram.set_checksum(checksum);

        Ok(buffer)
    }
}

/// A received frame that carried a DHCP message.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub link: LinkLayer,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub len: usize,
    pub message: DhcpMessage,
}

/// Peels Ethernet, IPv4 and UDP off `frame`.
///
/// Anything that is not DHCP over UDP, or whose DHCP payload does not decode,
/// yields `None`.
pub fn decode_frame(frame: &[u8]) -> Option<InboundFrame> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new(ethernet.payload())?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }

    let datagram = UdpPacket::new(ip.payload())?;
    let is_dhcp = |port: u16| port == DHCP_SERVER_PORT || port == DHCP_CLIENT_PORT;
    if !is_dhcp(datagram.get_source()) && !is_dhcp(datagram.get_destination()) {
        return None;
    }

    let message = match DhcpMessage::decode(datagram.payload()) {
        Ok(message) => message,
        Err(e) => {
            trace!("Skipping malformed DHCP frame from {}: {}", ethernet.get_source(), e);
            return None;
        }
    };

    Some(InboundFrame {
        link: LinkLayer {
            source: ethernet.get_source(),
            destination: ethernet.get_destination(),
        },
        source_ip: ip.get_source(),
        destination_ip: ip.get_destination(),
        len: frame.len(),
        message,
    })
}
