//! RIST endpoint URLs.
//!
//! This is the leaf layer of ristnet. It turns a literal IP address and a
//! port into the transport's connection-string form:
//! - `rist://[@]<ipv4>:<port>`
//! - `rist6://[@][<ipv6>]:<port>`
//!
//! The `@` marker selects listen mode. Hostnames are never resolved.

pub mod builder;
pub mod endpoint;
pub mod error;

pub use builder::{build_url, parse_port, AddressFamily, EndpointUrl, SCHEME_V4, SCHEME_V6};
pub use endpoint::Endpoint;
pub use error::{Result, UrlError};
