use ristnet_url::{build_url, AddressFamily};
use serde::Serialize;

use crate::cmd::UrlArgs;
use crate::exit::{url_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct UrlOutput<'a> {
    url: &'a str,
    family: &'static str,
    address: String,
    port: u16,
    listen: bool,
}

pub fn run(args: UrlArgs, format: OutputFormat) -> CliResult<i32> {
    let url = build_url(&args.address, &args.port, args.listen)
        .map_err(|err| url_error("url build failed", err))?;

    let out = UrlOutput {
        url: url.as_str(),
        family: match url.family() {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        },
        address: url.ip().to_string(),
        port: url.port(),
        listen: url.is_listen(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("url", out.url.to_string()),
            ("family", out.family.to_string()),
            ("address", out.address.clone()),
            ("port", out.port.to_string()),
            ("listen", out.listen.to_string()),
        ]),
        OutputFormat::Pretty => println!("{}", out.url),
    }
    Ok(SUCCESS)
}
