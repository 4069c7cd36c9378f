use crate::negotiation::Outcome;
use crate::range::AddressRange;
use chrono::{DateTime, Local};
use colored::Colorize;
use pnet::datalink::NetworkInterface;

pub fn print_banner() {
    println!();
    println!("{}", "leasedrain - DHCP starvation attack tool".white().bold().on_red());
    println!("{}", "-----------------".yellow());

    let warnings = [
        "Using this tool against networks without prior mutual consent is illegal.",
        "It is the end user's responsibility to obey all applicable laws.",
        "The developers assume no liability for any misuse or damage it causes.",
    ];
    println!("{}", "DISCLAIMER".red().bold().on_cyan());
    for warning in warnings.iter() {
        println!("{}", warning.bright_red().bold());
    }
}

pub fn start_line(at: DateTime<Local>) -> String {
    format!(
        "{} Starting at: {}",
        " INFO ".black().on_cyan(),
        at.format("%d %b %Y - %H:%M:%S %Z").to_string().green()
    )
}

pub fn attack_line(iface: &str, range: &AddressRange) -> String {
    format!(
        "Attacking using {} and range {} - {} (available hosts: {}).",
        iface.green(),
        range.start.to_string().green(),
        range.end.to_string().green(),
        range.ip_range_count().to_string().bright_green()
    )
}

/// One summary line per outcome.
pub fn outcome_line(outcome: &Outcome) -> String {
    let address = outcome.address.to_string().bright_white();
    let reason = outcome.message.bright_red();

    if outcome.no_free_lease {
        format!("{} *** {} - failed to starving (reason:{}) ***", " WARNING ".black().on_yellow(), address, reason)
    } else if outcome.starved {
        format!("{} *** {} - Successfully Starved ***", " SUCCESS ".black().on_green(), address)
    } else {
        format!("{} *** failed to starving - {} (reason:{}) ***", " WARNING ".black().on_yellow(), address, reason)
    }
}

pub fn print_summary(outcomes: &[Outcome]) {
    println!();
    for outcome in outcomes {
        println!("{}", outcome_line(outcome));
    }
    let starved = outcomes.iter().filter(|o| o.starved).count();
    println!();
    println!(
        "{}",
        format!("{starved}/{} addresses starved", outcomes.len()).yellow().bold()
    );
}

pub fn interface_line(iface: &NetworkInterface) -> String {
    let mac = iface
        .mac
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());
    let ips = iface
        .ips
        .iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {} {}", iface.name.red().bold(), mac.cyan(), ips)
}

pub fn print_interfaces(interfaces: &[NetworkInterface]) {
    println!("{}", "Available interfaces:".green().bold());
    for iface in interfaces {
        println!("{}", interface_line(iface));
    }
}
