use crate::error::{AttackError, NegotiationError};
use crate::negotiation::{Negotiator, Outcome};
use crate::range::AddressRange;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// What a failed frame injection does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abandon every negotiation and return the error.
    #[default]
    Abort,
    /// Record the failure against its own address and keep going.
    Isolate,
}

pub struct Orchestrator {
    negotiator: Arc<Negotiator>,
    policy: FailurePolicy,
}

impl Orchestrator {
    pub fn new(negotiator: Negotiator, policy: FailurePolicy) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
            policy,
        }
    }

    /// Negotiates every address of `range` at once and returns the outcomes
    /// in enumeration order, after the last negotiation has finished.
    pub async fn run(&self, range: &AddressRange) -> Result<Vec<Outcome>, AttackError> {
        let hosts: Vec<Ipv4Addr> = range.hosts()?.collect();
        info!("Spawning {} negotiations", hosts.len());

        let mut tasks = JoinSet::new();
        for (index, address) in hosts.iter().copied().enumerate() {
            let negotiator = Arc::clone(&self.negotiator);
            tasks.spawn(async move { (index, address, negotiator.negotiate(address).await) });
        }

        let mut outcomes: Vec<Option<Outcome>> = vec![None; hosts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, address, result) = joined?;
            outcomes[index] = Some(self.settle(address, result)?);
        }

        Ok(outcomes.into_iter().flatten().collect())
    }

    fn settle(
        &self,
        address: Ipv4Addr,
        result: Result<Outcome, NegotiationError>,
    ) -> Result<Outcome, AttackError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(NegotiationError::Inject(e)) if self.policy == FailurePolicy::Isolate => {
                warn!("Negotiation for {} could not send: {}", address, e);
                Ok(Outcome::rejected(address, e.to_string()))
            }
            Err(source) => Err(AttackError::Negotiation { address, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FrameChannel;
    use crate::channel::testing::RecordingSink;
    use crate::frame::decode_frame;
    use crate::identity::IdentityGenerator;
    use crate::negotiation::testing::{nack, offer};
    use crate::negotiation::{Correlation, NegotiationSettings};
    use dhcproto::v4::MessageType;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Answers the first `offers` DISCOVERs with an address-less OFFER and
    /// NACKs every REQUEST for an address in `in_use`.
    fn spawn_server(
        channel: Arc<FrameChannel>,
        mut sent: UnboundedReceiver<Vec<u8>>,
        offers: usize,
        in_use: Vec<Ipv4Addr>,
    ) {
        tokio::spawn(async move {
            let mut remaining = offers;
            while let Some(raw) = sent.recv().await {
                let Some(frame) = decode_frame(&raw) else {
                    continue;
                };
                match frame.message.message_type() {
                    Some(MessageType::Discover) if remaining > 0 => {
                        remaining -= 1;
                        channel.deliver(offer(&frame.message, Ipv4Addr::UNSPECIFIED));
                    }
                    Some(MessageType::Request) if in_use.contains(&frame.message.ciaddr) => {
                        channel.deliver(nack(&frame.message, "address in use"));
                    }
                    _ => {}
                }
            }
        });
    }

    fn orchestrator(
        policy: FailurePolicy,
    ) -> (Orchestrator, Arc<FrameChannel>, Arc<RecordingSink>, UnboundedReceiver<Vec<u8>>) {
        let (sink, sent) = RecordingSink::new();
        let channel = Arc::new(FrameChannel::new(sink.clone(), 256));
        let negotiator = Negotiator::new(
            Arc::clone(&channel),
            Arc::new(IdentityGenerator::with_seed(7)),
            NegotiationSettings {
                hostname_suffix: "test.lan".to_string(),
                correlation: Correlation::TransactionId,
            },
        );
        (Orchestrator::new(negotiator, policy), channel, sink, sent)
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_in_enumeration_order() {
        let (orchestrator, channel, _sink, sent) = orchestrator(FailurePolicy::Abort);
        spawn_server(channel, sent, usize::MAX, vec![addr(12)]);

        let outcomes = orchestrator
            .run(&AddressRange::new(addr(10), addr(14)))
            .await
            .unwrap();

        let addresses: Vec<Ipv4Addr> = outcomes.iter().map(|o| o.address).collect();
        assert_eq!(addresses, (10..=14).map(addr).collect::<Vec<_>>());
        assert_eq!(outcomes[2], Outcome::rejected(addr(12), "address in use"));
        for i in [0, 1, 3, 4] {
            assert_eq!(outcomes[i], Outcome::starved(addr(10 + i as u8)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_reports_no_free_lease() {
        let (orchestrator, channel, _sink, sent) = orchestrator(FailurePolicy::Abort);
        spawn_server(channel, sent, 2, vec![]);

        let outcomes = orchestrator
            .run(&AddressRange::new(addr(1), addr(3)))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.starved).count(), 2);
        let exhausted: Vec<&Outcome> = outcomes.iter().filter(|o| o.no_free_lease).collect();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].message, "may be no free leases");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_address_range() {
        let (orchestrator, channel, _sink, sent) = orchestrator(FailurePolicy::Abort);
        spawn_server(channel, sent, usize::MAX, vec![]);

        let outcomes = orchestrator
            .run(&AddressRange::new(addr(9), addr(9)))
            .await
            .unwrap();
        assert_eq!(outcomes, vec![Outcome::starved(addr(9))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversed_range_sends_nothing() {
        let (orchestrator, _channel, _sink, mut sent) = orchestrator(FailurePolicy::Abort);

        let result = orchestrator.run(&AddressRange::new(addr(20), addr(10))).await;

        assert!(matches!(result, Err(AttackError::Range(e)) if e.count == -10));
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_injection_failure_aborts() {
        let (orchestrator, _channel, sink, _sent) = orchestrator(FailurePolicy::Abort);
        sink.fail_sends();

        let result = orchestrator.run(&AddressRange::new(addr(1), addr(4))).await;

        assert!(matches!(
            result,
            Err(AttackError::Negotiation {
                source: NegotiationError::Inject(_),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injection_failure_isolated() {
        let (orchestrator, _channel, sink, _sent) = orchestrator(FailurePolicy::Isolate);
        sink.fail_sends();

        let outcomes = orchestrator
            .run(&AddressRange::new(addr(1), addr(3)))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.address, addr(1 + i as u8));
            assert!(!outcome.starved);
            assert!(!outcome.no_free_lease);
            assert!(outcome.message.contains("network is down"), "{}", outcome.message);
        }
    }
}
