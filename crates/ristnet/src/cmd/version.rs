use ristnet_transport::{MemoryTransport, Transport};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, OutputFormat};

#[derive(Serialize)]
struct VersionOutput {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    extended: Option<Provenance>,
}

#[derive(Serialize)]
struct Provenance {
    target: &'static str,
    profile: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    rustc: &'static str,
    git_hash: &'static str,
    transport: String,
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let out = VersionOutput {
        name: "ristnet",
        version: env!("CARGO_PKG_VERSION"),
        extended: args.extended.then(provenance),
    };

    let Some(extended) = &out.extended else {
        match format {
            OutputFormat::Json => print_json(&out),
            _ => println!("{} {}", out.name, out.version),
        }
        return Ok(SUCCESS);
    };

    let fields = [
        ("name", out.name.to_string()),
        ("version", out.version.to_string()),
        ("target", extended.target.to_string()),
        ("profile", extended.profile.to_string()),
        ("target_os", extended.target_os.to_string()),
        ("target_arch", extended.target_arch.to_string()),
        ("rustc", extended.rustc.to_string()),
        ("git_hash", extended.git_hash.to_string()),
        ("transport", extended.transport.clone()),
    ];
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields),
        OutputFormat::Pretty => print_pretty(&fields),
    }
    Ok(SUCCESS)
}

fn provenance() -> Provenance {
    let transport = MemoryTransport::new();
    Provenance {
        target: option_env!("RISTNET_BUILD_TARGET").unwrap_or("unknown"),
        profile: option_env!("RISTNET_BUILD_PROFILE").unwrap_or("unknown"),
        target_os: std::env::consts::OS,
        target_arch: std::env::consts::ARCH,
        rustc: option_env!("RUSTC_VERSION").unwrap_or("unknown"),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
        transport: format!("{} {}", transport.name(), transport.version()),
    }
}
