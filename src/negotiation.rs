//! One simulated client: DISCOVER, wait for an OFFER, REQUEST, wait for a NACK.
//!
//! No ACK is ever parsed. A REQUEST that draws no NACK within the window counts
//! as a committed lease.

use crate::channel::FrameChannel;
use crate::dhcp::{DhcpMessage, OPT_MSG_TYPE};
use crate::error::NegotiationError;
use crate::frame::{FrameLayers, InboundFrame, decode_frame};
use crate::identity::{ClientIdentity, IdentityGenerator};
use bytes::Bytes;
use dhcproto::v4::MessageType;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, trace, warn};

/// Pause after the DISCOVER before replies are looked at.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(3);
pub const OFFER_WINDOW: Duration = Duration::from_secs(3);
pub const NACK_WINDOW: Duration = Duration::from_secs(3);

pub const NO_FREE_LEASES: &str = "may be no free leases";
pub const DEFAULT_HOSTNAME_SUFFIX: &str = "leasedrain.local";

/// Which captured replies a negotiation accepts as its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Correlation {
    /// Only replies echoing the negotiation's transaction id.
    #[default]
    TransactionId,
    /// Any reply of the expected type, whoever it was meant for.
    Shared,
}

#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub hostname_suffix: String,
    pub correlation: Correlation,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            hostname_suffix: DEFAULT_HOSTNAME_SUFFIX.to_string(),
            correlation: Correlation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub address: Ipv4Addr,
    pub starved: bool,
    pub no_free_lease: bool,
    pub message: String,
}

impl Outcome {
    pub fn starved(address: Ipv4Addr) -> Self {
        Self {
            address,
            starved: true,
            no_free_lease: false,
            message: String::new(),
        }
    }

    pub fn rejected(address: Ipv4Addr, message: impl Into<String>) -> Self {
        Self {
            address,
            starved: false,
            no_free_lease: false,
            message: message.into(),
        }
    }

    pub fn no_free_lease(address: Ipv4Addr) -> Self {
        Self {
            address,
            starved: false,
            no_free_lease: true,
            message: NO_FREE_LEASES.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Starved,
    NotStarved(String),
    NoFreeLease,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    DiscoverSent,
    OfferReceived,
    RequestSent,
    Terminal(Verdict),
}

/// Everything one attempt learns, owned by that attempt alone.
#[derive(Debug, Clone)]
pub struct NegotiationContext {
    pub candidate: Ipv4Addr,
    pub identity: ClientIdentity,
    pub server: Option<Ipv4Addr>,
    pub offered: Option<Ipv4Addr>,
    pub layers: FrameLayers,
}

impl NegotiationContext {
    pub fn new(candidate: Ipv4Addr, identity: ClientIdentity) -> Self {
        Self {
            candidate,
            identity,
            server: None,
            offered: None,
            layers: FrameLayers::client_broadcast(identity.hardware_address),
        }
    }

    /// The server is whoever sent the OFFER. The offered address is only
    /// taken the first time and only when the server filled it in.
    pub fn learn_offer(&mut self, offer: &InboundFrame) {
        self.server = Some(offer.source_ip);
        if self.offered.is_none() && !offer.message.yiaddr.is_unspecified() {
            self.offered = Some(offer.message.yiaddr);
        }
    }

    pub fn lease_address(&self) -> Ipv4Addr {
        self.offered.unwrap_or(self.candidate)
    }

    fn outcome(&self, verdict: Verdict) -> Outcome {
        match verdict {
            Verdict::Starved => Outcome::starved(self.lease_address()),
            Verdict::NotStarved(message) => Outcome::rejected(self.lease_address(), message),
            Verdict::NoFreeLease => Outcome::no_free_lease(self.candidate),
        }
    }
}

pub struct Negotiator {
    channel: Arc<FrameChannel>,
    identities: Arc<IdentityGenerator>,
    settings: NegotiationSettings,
}

impl Negotiator {
    pub fn new(
        channel: Arc<FrameChannel>,
        identities: Arc<IdentityGenerator>,
        settings: NegotiationSettings,
    ) -> Self {
        Self {
            channel,
            identities,
            settings,
        }
    }

    /// Runs one attempt for `candidate` under a freshly generated identity.
    pub async fn negotiate(&self, candidate: Ipv4Addr) -> Result<Outcome, NegotiationError> {
        let identity = self.identities.next_identity()?;
        self.negotiate_as(candidate, identity).await
    }

    pub async fn negotiate_as(
        &self,
        candidate: Ipv4Addr,
        identity: ClientIdentity,
    ) -> Result<Outcome, NegotiationError> {
        debug!("Negotiating {} as {}", candidate, identity);
        let mut ctx = NegotiationContext::new(candidate, identity);
        let mut frames = self.channel.subscribe();
        let mut state = State::Idle;

        loop {
            state = match state {
                State::Idle => {
                    let discover = DhcpMessage::discover(&ctx.identity, &self.settings.hostname_suffix);
                    self.send(&ctx, "DHCPDISCOVER", &discover)?;
                    sleep(SETTLE_WINDOW).await;
                    State::DiscoverSent
                }
                State::DiscoverSent => {
                    match self.await_reply(&mut frames, &ctx, MessageType::Offer, OFFER_WINDOW).await {
                        Some(offer) => {
                            log_offer(&offer);
                            ctx.learn_offer(&offer);
                            State::OfferReceived
                        }
                        None => State::Terminal(Verdict::NoFreeLease),
                    }
                }
                State::OfferReceived => {
                    let request = DhcpMessage::request(
                        &ctx.identity,
                        ctx.lease_address(),
                        ctx.server.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    );
                    self.send(&ctx, "DHCPREQUEST", &request)?;
                    State::RequestSent
                }
                State::RequestSent => {
                    match self.await_reply(&mut frames, &ctx, MessageType::Nak, NACK_WINDOW).await {
                        Some(nack) => {
                            debug!(
                                "Received DHCPNACK ({} bytes) from {} / {} for {}",
                                nack.len,
                                nack.link.source,
                                nack.source_ip,
                                ctx.lease_address()
                            );
                            State::Terminal(Verdict::NotStarved(nack.message.server_message()))
                        }
                        None => State::Terminal(Verdict::Starved),
                    }
                }
                State::Terminal(verdict) => return Ok(ctx.outcome(verdict)),
            };
            trace!("{} xid={:#010x} -> {:?}", ctx.candidate, ctx.identity.transaction_id, state);
        }
    }

    fn send(
        &self,
        ctx: &NegotiationContext,
        kind: &str,
        message: &DhcpMessage,
    ) -> Result<(), NegotiationError> {
        let frame = ctx.layers.encapsulate(&message.encode()?)?;
        debug!(
            "Sending {} ({} bytes): SourceMAC {} - DestMAC {} / SourceIP {} - DestIP {}",
            kind,
            frame.len(),
            ctx.layers.link.source,
            ctx.layers.link.destination,
            ctx.layers.network.source,
            ctx.layers.network.destination
        );
        self.channel.inject(&frame)?;
        Ok(())
    }

    /// Waits until `window` runs out for a captured reply of type `wanted`.
    /// Frames of other types, undecodable frames and, when correlating,
    /// replies for other transactions are passed over without ending the wait.
    async fn await_reply(
        &self,
        frames: &mut broadcast::Receiver<Bytes>,
        ctx: &NegotiationContext,
        wanted: MessageType,
        window: Duration,
    ) -> Option<InboundFrame> {
        let deadline = Instant::now() + window;

        loop {
            let raw = match timeout_at(deadline, frames.recv()).await {
                Err(_) => return None,
                Ok(Ok(raw)) => raw,
                Ok(Err(RecvError::Lagged(missed))) => {
                    warn!("{} fell behind the capture stream, {} frames dropped", ctx.candidate, missed);
                    continue;
                }
                Ok(Err(RecvError::Closed)) => {
                    sleep_until(deadline).await;
                    return None;
                }
            };

            let Some(inbound) = decode_frame(&raw) else {
                continue;
            };
            if inbound.message.message_type() != Some(wanted) {
                continue;
            }
            if self.settings.correlation == Correlation::TransactionId
                && inbound.message.xid != ctx.identity.transaction_id
            {
                trace!(
                    "Ignoring {:?} for xid {:#010x}, waiting on {:#010x}",
                    wanted, inbound.message.xid, ctx.identity.transaction_id
                );
                continue;
            }
            return Some(inbound);
        }
    }
}

fn log_offer(offer: &InboundFrame) {
    debug!(
        "Received DHCPOFFER ({} bytes): SourceMAC {} - DestMAC {} / SourceIP {} - DestIP {}",
        offer.len, offer.link.source, offer.link.destination, offer.source_ip, offer.destination_ip
    );
    debug!("  Offered IP: {}", offer.message.yiaddr);
    for opt in offer.message.options.iter().filter(|o| o.code != OPT_MSG_TYPE) {
        debug!("  {}({}): {}", opt.name(), opt.code, opt.describe());
    }
}
