use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
#[error(
    "can't accept values - start: {start} - end: {end} - available hosts in this range {count} <= 0"
)]
pub struct RangeError {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub count: i64,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("unable to generate new MAC address: {0}")]
    RandomSource(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("DHCP message too short: {0} bytes (minimum 240)")]
    TooShort(usize),
    #[error("invalid DHCP magic cookie")]
    InvalidMagic,
    #[error("option {code} truncated at offset {offset}")]
    TruncatedOption { code: u8, offset: usize },
    #[error("option {code} carries {len} bytes, more than 255")]
    OptionTooLong { code: u8, len: usize },
    #[error("frame buffer too small for {0} layer")]
    Buffer(&'static str),
    #[error("payload of {0} bytes does not fit in a single IPv4 datagram")]
    Oversized(usize),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),
    #[error("failed to open datalink channel on {iface}: {source}")]
    Open { iface: String, source: io::Error },
    #[error("unsupported datalink channel type on {0}")]
    Unsupported(String),
    #[error("send error: {0}")]
    Send(#[from] io::Error),
    #[error("sender unavailable")]
    SenderUnavailable,
}

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to inject frame: {0}")]
    Inject(#[from] ChannelError),
}

#[derive(Error, Debug)]
pub enum AttackError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("negotiation for {address} failed: {source}")]
    Negotiation {
        address: Ipv4Addr,
        source: NegotiationError,
    },
    #[error("negotiation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("hostname suffix of {0} bytes does not fit in option 12")]
    HostnameTooLong(usize),
}
