mod channel;
mod config;
mod dhcp;
mod error;
mod frame;
mod identity;
mod negotiation;
mod orchestrator;
mod range;
mod report;

use anyhow::Context;
use channel::FrameChannel;
use clap::Parser;
use clap::error::ErrorKind;
use config::{AttackConfig, Cli, Command, RunArgs};
use identity::IdentityGenerator;
use negotiation::Negotiator;
use orchestrator::Orchestrator;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            return Ok(match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            });
        }
    };

    match cli.command {
        Command::Interfaces => {
            report::print_interfaces(&channel::interfaces());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    init_tracing(args.verbose);
    report::print_banner();

    let config = AttackConfig::try_from(args).context("invalid run configuration")?;
    println!();
    println!("{}", report::start_line(chrono::Local::now()));
    println!();

    let channel = FrameChannel::open(&config.iface, config.stream_capacity)
        .with_context(|| format!("failed to open {}", config.iface))?;
    let identities = IdentityGenerator::new().context("unable to seed transaction ids")?;

    let negotiator = Negotiator::new(Arc::new(channel), Arc::new(identities), config.negotiation);
    let orchestrator = Orchestrator::new(negotiator, config.failure_policy);

    println!("{}", report::attack_line(&config.iface, &config.range));
    info!("Negotiation windows: settle {:?}, offer {:?}, nack {:?}",
        negotiation::SETTLE_WINDOW, negotiation::OFFER_WINDOW, negotiation::NACK_WINDOW);

    let outcomes = orchestrator.run(&config.range).await?;
    report::print_summary(&outcomes);
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "leasedrain=debug" } else { "leasedrain=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}
