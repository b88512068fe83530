mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ristnet", version, about = "RIST session toolkit")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "RISTNET_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_subcommand() {
        let cli = Cli::try_parse_from(["ristnet", "url", "0.0.0.0", "8000", "--listen"])
            .expect("url args should parse");
        match cli.command {
            Command::Url(args) => {
                assert_eq!(args.address, "0.0.0.0");
                assert_eq!(args.port, "8000");
                assert!(args.listen);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_demo_defaults() {
        let cli = Cli::try_parse_from(["ristnet", "--format", "json", "demo"])
            .expect("demo args should parse");
        match cli.command {
            Command::Demo(args) => {
                assert_eq!(args.packets, 10);
                assert_eq!(args.size, 1000);
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_packet_size() {
        let err = Cli::try_parse_from(["ristnet", "demo", "--size", "0"])
            .expect_err("zero size should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
