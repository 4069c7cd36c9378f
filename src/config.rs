//! Command line and the validated run configuration built from it.

use crate::channel::DEFAULT_STREAM_CAPACITY;
use crate::error::ConfigError;
use crate::negotiation::{Correlation, DEFAULT_HOSTNAME_SUFFIX, NegotiationSettings};
use crate::orchestrator::FailurePolicy;
use crate::range::AddressRange;
use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;

/// Longest decimal xid plus the separating dash.
const XID_PREFIX_MAX: usize = 11;
const OPTION_MAX: usize = 255;

#[derive(Parser, Debug)]
#[command(name = "leasedrain")]
#[command(version, about = "DHCP starvation: lease every address a server has to give", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Request a lease for every address of a range
    Run(RunArgs),

    /// List the interfaces a capture can be opened on
    Interfaces,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Interface to start the attack on
    #[arg(long, value_name = "NAME")]
    pub iface: String,

    /// Range start address
    #[arg(long, value_name = "IPv4")]
    pub start: Ipv4Addr,

    /// Range end address
    #[arg(long, value_name = "IPv4")]
    pub end: Ipv4Addr,

    /// Show every frame sent and received
    #[arg(short, long)]
    pub verbose: bool,

    /// Suffix of the hostname sent in each DISCOVER
    #[arg(long, value_name = "TEXT", default_value = DEFAULT_HOSTNAME_SUFFIX)]
    pub hostname_suffix: String,

    /// Accept any OFFER/NACK on the wire instead of only those for our transaction
    #[arg(long)]
    pub shared_stream: bool,

    /// Keep going when a frame cannot be sent, marking only that address as failed
    #[arg(long)]
    pub isolate_failures: bool,

    /// Frames buffered per negotiation before the oldest are dropped
    #[arg(long, value_name = "N", default_value_t = DEFAULT_STREAM_CAPACITY as u32,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub stream_capacity: u32,
}

#[derive(Debug, Clone)]
pub struct AttackConfig {
    pub iface: String,
    pub range: AddressRange,
    pub verbose: bool,
    pub negotiation: NegotiationSettings,
    pub failure_policy: FailurePolicy,
    pub stream_capacity: usize,
}

impl TryFrom<RunArgs> for AttackConfig {
    type Error = ConfigError;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let range = AddressRange::new(args.start, args.end);
        range.validate()?;

        if args.hostname_suffix.len() + XID_PREFIX_MAX > OPTION_MAX {
            return Err(ConfigError::HostnameTooLong(args.hostname_suffix.len()));
        }

        Ok(Self {
            iface: args.iface,
            range,
            verbose: args.verbose,
            negotiation: NegotiationSettings {
                hostname_suffix: args.hostname_suffix,
                correlation: if args.shared_stream {
                    Correlation::Shared
                } else {
                    Correlation::TransactionId
                },
            },
            failure_policy: if args.isolate_failures {
                FailurePolicy::Isolate
            } else {
                FailurePolicy::Abort
            },
            stream_capacity: args.stream_capacity as usize,
        })
    }
}
