use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod demo;
pub mod url;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an endpoint URL from an address and a port.
    Url(UrlArgs),
    /// Run a receiver and a sender over the in-memory transport.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Url(args) => url::run(args, format),
        Command::Demo(args) => demo::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct UrlArgs {
    /// IPv4 or IPv6 literal.
    pub address: String,
    /// Port in 1-65535.
    pub port: String,
    /// Build a listen-mode URL.
    #[arg(long, short = 'l')]
    pub listen: bool,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Number of data packets the sender writes.
    #[arg(long, default_value_t = 10)]
    pub packets: usize,
    /// Payload size of each packet in bytes.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..=9968))]
    pub size: u64,
    /// Delay between packets in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub interval_ms: u64,
    /// Session configuration file (JSON) for both sessions.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
