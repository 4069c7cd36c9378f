//! DHCPv4 message encoding and the narrow decoding the negotiation relies on.
//!
//! Options keep their wire order in both directions. Classification of an
//! inbound message looks only at the first option, it is not a general parser.

use crate::error::CodecError;
use crate::identity::ClientIdentity;
use dhcproto::v4::{MessageType, OptionCode};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_INTERFACE_MTU: u8 = 26;
pub const OPT_BROADCAST: u8 = 28;
pub const OPT_NTP_SERVERS: u8 = 42;
pub const OPT_VENDOR_SPECIFIC: u8 = 47;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST: u8 = 55;
pub const OPT_MESSAGE: u8 = 56;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_DOMAIN_SEARCH: u8 = 119;
pub const OPT_END: u8 = 255;

/// Subnet mask, router, DNS, interface MTU, NTP servers, broadcast address.
pub const PARAMETER_REQUEST_LIST: [u8; 6] = [
    OPT_SUBNET_MASK,
    OPT_ROUTER,
    OPT_DNS,
    OPT_INTERFACE_MTU,
    OPT_NTP_SERVERS,
    OPT_BROADCAST,
];

const HEADER_LEN: usize = 240;
const MIN_MESSAGE_LEN: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    pub fn name(&self) -> String {
        format!("{:?}", OptionCode::from(self.code))
    }

    /// Human readable value, typed for the options servers usually put in an OFFER.
    pub fn describe(&self) -> String {
        match self.code {
            OPT_SUBNET_MASK | OPT_ROUTER | OPT_DNS | OPT_BROADCAST | OPT_NTP_SERVERS
            | OPT_SERVER_ID => self
                .data
                .chunks(4)
                .map(|chunk| match chunk {
                    [a, b, c, d] => Ipv4Addr::new(*a, *b, *c, *d).to_string(),
                    _ => format!("{chunk:?}"),
                })
                .collect::<Vec<_>>()
                .join(", "),
            OPT_LEASE_TIME | OPT_RENEWAL_TIME | OPT_REBINDING_TIME => match self.data[..] {
                [a, b, c, d] => u32::from_be_bytes([a, b, c, d]).to_string(),
                _ => "INVALID".to_string(),
            },
            OPT_DOMAIN_NAME | OPT_VENDOR_SPECIFIC | OPT_DOMAIN_SEARCH => {
                String::from_utf8_lossy(&self.data).into_owned()
            }
            _ => format!("{:?}", self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub opcode: u8,
    pub htype: u8,
    pub chaddr: MacAddr,
    pub xid: u32,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    fn empty(opcode: u8, identity: &ClientIdentity) -> Self {
        Self {
            opcode,
            htype: HTYPE_ETHERNET,
            chaddr: identity.hardware_address,
            xid: identity.transaction_id,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
        }
    }

    pub fn discover(identity: &ClientIdentity, hostname_suffix: &str) -> Self {
        let mut msg = Self::empty(BOOTREQUEST, identity);
        msg.push_option(OPT_MSG_TYPE, [u8::from(MessageType::Discover)]);
        msg.push_option(
            OPT_HOSTNAME,
            format!("{}-{}", identity.transaction_id, hostname_suffix),
        );
        msg.push_option(OPT_PARAM_REQUEST, PARAMETER_REQUEST_LIST);
        msg
    }

    /// The REQUEST goes out with the BOOTREPLY opcode, as it always has.
    pub fn request(identity: &ClientIdentity, client_ip: Ipv4Addr, server_ip: Ipv4Addr) -> Self {
        let mut msg = Self::empty(BOOTREPLY, identity);
        msg.ciaddr = client_ip;
        msg.siaddr = server_ip;
        msg.push_option(OPT_MSG_TYPE, [u8::from(MessageType::Request)]);
        msg
    }

    pub fn push_option(&mut self, code: u8, data: impl Into<Vec<u8>>) {
        self.options.push(DhcpOption::new(code, data));
    }

    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    /// Message type as read from the first data byte of the first option.
    ///
    /// Servers put option 53 first; nothing here checks that they did.
    pub fn message_type(&self) -> Option<MessageType> {
        let first = self.options.first()?;
        first.data.first().map(|b| MessageType::from(*b))
    }

    /// Text of option 56, or an empty string when the server sent none.
    pub fn server_message(&self) -> String {
        self.option(OPT_MESSAGE)
            .map(|o| String::from_utf8_lossy(&o.data).into_owned())
            .unwrap_or_default()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = self.opcode;
        buf[1] = self.htype;
        buf[2] = HLEN_ETHERNET;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        let mac = self.chaddr;
        buf[28..34].copy_from_slice(&[mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
        buf[236..240].copy_from_slice(&MAGIC_COOKIE);

        for opt in &self.options {
            let len = u8::try_from(opt.data.len()).map_err(|_| CodecError::OptionTooLong {
                code: opt.code,
                len: opt.data.len(),
            })?;
            buf.push(opt.code);
            buf.push(len);
            buf.extend_from_slice(&opt.data);
        }
        buf.push(OPT_END);

        if buf.len() < MIN_MESSAGE_LEN {
            buf.resize(MIN_MESSAGE_LEN, OPT_PAD);
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::TooShort(data.len()));
        }
        if data[236..240] != MAGIC_COOKIE {
            return Err(CodecError::InvalidMagic);
        }

        let ip = |at: usize| Ipv4Addr::new(data[at], data[at + 1], data[at + 2], data[at + 3]);

        Ok(Self {
            opcode: data[0],
            htype: data[1],
            chaddr: MacAddr::new(data[28], data[29], data[30], data[31], data[32], data[33]),
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ciaddr: ip(12),
            yiaddr: ip(16),
            siaddr: ip(20),
            options: decode_options(&data[HEADER_LEN..], HEADER_LEN)?,
        })
    }
}

fn decode_options(data: &[u8], base: usize) -> Result<Vec<DhcpOption>, CodecError> {
    let mut options = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        match code {
            OPT_PAD => {
                i += 1;
                continue;
            }
            OPT_END => break,
            _ => {}
        }

        let len = *data.get(i + 1).ok_or(CodecError::TruncatedOption {
            code,
            offset: base + i,
        })? as usize;
        let start = i + 2;
        let value = data.get(start..start + len).ok_or(CodecError::TruncatedOption {
            code,
            offset: base + i,
        })?;
        options.push(DhcpOption::new(code, value));
        i = start + len;
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity {
            hardware_address: MacAddr::new(0x02, 0x11, 0x22, 0x33, 0x44, 0x55),
            transaction_id: 0xdead_beef,
        }
    }

    fn reply(options: &[(u8, &[u8])]) -> Vec<u8> {
        let mut pkt = vec![0u8; 240];
        pkt[0] = BOOTREPLY;
        pkt[1] = HTYPE_ETHERNET;
        pkt[2] = HLEN_ETHERNET;
        pkt[4..8].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        pkt[16..20].copy_from_slice(&[10, 0, 0, 5]);
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        for (code, data) in options {
            pkt.push(*code);
            pkt.push(data.len() as u8);
            pkt.extend_from_slice(data);
        }
        pkt.push(OPT_END);
        pkt
    }

    #[test]
    fn test_discover_layout() {
        let bytes = DhcpMessage::discover(&identity(), "lab.local").encode().unwrap();

        assert_eq!(bytes.len(), 300);
        assert_eq!(bytes[0], BOOTREQUEST);
        assert_eq!(bytes[1], HTYPE_ETHERNET);
        assert_eq!(bytes[2], HLEN_ETHERNET);
        assert_eq!(&bytes[4..8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&bytes[28..34], &[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(&bytes[236..240], &MAGIC_COOKIE);
        assert_eq!(&bytes[240..243], &[53, 1, 1]);

        let hostname = b"3735928559-lab.local";
        assert_eq!(bytes[243], OPT_HOSTNAME);
        assert_eq!(bytes[244] as usize, hostname.len());
        assert_eq!(&bytes[245..245 + hostname.len()], hostname);

        let prl = 245 + hostname.len();
        assert_eq!(&bytes[prl..prl + 8], &[55, 6, 1, 3, 6, 26, 42, 28]);
        assert_eq!(bytes[prl + 8], OPT_END);
    }

    #[test]
    fn test_discover_roundtrip() {
        let msg = DhcpMessage::discover(&identity(), "lab.local");
        let decoded = DhcpMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.xid, 0xdead_beef);
        assert_eq!(decoded.chaddr, identity().hardware_address);
        assert_eq!(
            decoded.option(OPT_PARAM_REQUEST).unwrap().data,
            PARAMETER_REQUEST_LIST.to_vec()
        );
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_request_fields() {
        let msg = DhcpMessage::request(
            &identity(),
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let bytes = msg.encode().unwrap();

        assert_eq!(bytes[0], BOOTREPLY);
        assert_eq!(&bytes[12..16], &[10, 0, 0, 5]);
        assert_eq!(&bytes[20..24], &[10, 0, 0, 1]);
        assert_eq!(&bytes[240..244], &[53, 1, 3, OPT_END]);
    }

    #[test]
    fn test_classify_offer_and_nack() {
        let offer = DhcpMessage::decode(&reply(&[(OPT_MSG_TYPE, &[2])])).unwrap();
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 5));

        let nack = DhcpMessage::decode(&reply(&[(OPT_MSG_TYPE, &[6])])).unwrap();
        assert_eq!(nack.message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn test_classify_reads_only_first_option() {
        let msg = DhcpMessage::decode(&reply(&[
            (OPT_SERVER_ID, &[10, 0, 0, 1]),
            (OPT_MSG_TYPE, &[2]),
        ]))
        .unwrap();
        assert_ne!(msg.message_type(), Some(MessageType::Offer));
    }

    #[test]
    fn test_no_options_is_unclassified() {
        let msg = DhcpMessage::decode(&reply(&[])).unwrap();
        assert!(msg.options.is_empty());
        assert_eq!(msg.message_type(), None);

        let empty_first = DhcpMessage::decode(&reply(&[(OPT_HOSTNAME, &[])])).unwrap();
        assert_eq!(empty_first.message_type(), None);
    }

    #[test]
    fn test_server_message() {
        let msg = DhcpMessage::decode(&reply(&[
            (OPT_MSG_TYPE, &[6]),
            (OPT_SERVER_ID, &[10, 0, 0, 1]),
            (OPT_MESSAGE, b"address in use"),
        ]))
        .unwrap();
        assert_eq!(msg.server_message(), "address in use");

        let bare = DhcpMessage::decode(&reply(&[(OPT_MSG_TYPE, &[6])])).unwrap();
        assert_eq!(bare.server_message(), "");
    }

    #[test]
    fn test_pad_options_skipped() {
        let mut pkt = reply(&[]);
        pkt.pop();
        pkt.extend_from_slice(&[OPT_PAD, OPT_PAD, OPT_MSG_TYPE, 1, 2, OPT_END]);
        let msg = DhcpMessage::decode(&pkt).unwrap();
        assert_eq!(msg.message_type(), Some(MessageType::Offer));
    }

    #[test]
    fn test_malformed_messages() {
        assert_eq!(DhcpMessage::decode(&[0u8; 100]), Err(CodecError::TooShort(100)));

        let mut bad_cookie = reply(&[]);
        bad_cookie[236] = 0;
        assert_eq!(DhcpMessage::decode(&bad_cookie), Err(CodecError::InvalidMagic));

        let mut truncated = reply(&[]);
        truncated.pop();
        truncated.extend_from_slice(&[OPT_MESSAGE, 10, b'a']);
        assert!(matches!(
            DhcpMessage::decode(&truncated),
            Err(CodecError::TruncatedOption { code: OPT_MESSAGE, .. })
        ));
    }

    #[test]
    fn test_oversized_option_rejected() {
        let mut msg = DhcpMessage::discover(&identity(), "x");
        msg.push_option(OPT_MESSAGE, vec![b'a'; 256]);
        assert_eq!(
            msg.encode(),
            Err(CodecError::OptionTooLong { code: OPT_MESSAGE, len: 256 })
        );
    }

    #[test]
    fn test_describe_options() {
        assert_eq!(
            DhcpOption::new(OPT_ROUTER, [10, 0, 0, 1, 10, 0, 0, 2]).describe(),
            "10.0.0.1, 10.0.0.2"
        );
        assert_eq!(DhcpOption::new(OPT_LEASE_TIME, [0, 0, 0x0e, 0x10]).describe(), "3600");
        assert_eq!(DhcpOption::new(OPT_RENEWAL_TIME, [1, 2]).describe(), "INVALID");
        assert_eq!(DhcpOption::new(OPT_DOMAIN_NAME, *b"corp.lan").describe(), "corp.lan");
        assert_eq!(DhcpOption::new(200, [1, 2]).describe(), "[1, 2]");
    }
}
