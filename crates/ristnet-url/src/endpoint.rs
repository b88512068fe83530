use std::fmt;

use crate::builder::{build_url, EndpointUrl};
use crate::error::Result;

/// One endpoint handed to a session at init time.
///
/// Either a literal address/port pair that is rendered by [`build_url`], or a
/// pre-built connection string that is passed to the transport as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    target: Target,
    weight: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Address {
        address: String,
        port: String,
        listen: bool,
    },
    Url(String),
}

impl Endpoint {
    /// Listen-mode endpoint on a local address.
    pub fn listen(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self::address(address, port, true)
    }

    /// Connect-mode endpoint towards a remote address.
    pub fn connect(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self::address(address, port, false)
    }

    /// Endpoint from an address/port pair with explicit mode.
    pub fn address(address: impl Into<String>, port: impl Into<String>, listen: bool) -> Self {
        Self {
            target: Target::Address {
                address: address.into(),
                port: port.into(),
                listen,
            },
            weight: None,
        }
    }

    /// Endpoint from a pre-built connection string.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            target: Target::Url(url.into()),
            weight: None,
        }
    }

    /// Override the load-balancing weight for this endpoint.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Per-endpoint weight, if overridden.
    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    /// Connection string for the transport.
    ///
    /// Address endpoints are validated by the builder; pre-built URLs are
    /// returned untouched and left to the transport's address parser.
    pub fn to_url(&self) -> Result<String> {
        match &self.target {
            Target::Address {
                address,
                port,
                listen,
            } => build_url(address, port, *listen).map(EndpointUrl::into_string),
            Target::Url(url) => Ok(url.clone()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Address {
                address,
                port,
                listen: true,
            } => write!(f, "listen {address}:{port}"),
            Target::Address { address, port, .. } => write!(f, "connect {address}:{port}"),
            Target::Url(url) => f.write_str(url),
        }
    }
}

impl From<EndpointUrl> for Endpoint {
    fn from(url: EndpointUrl) -> Self {
        Self::url(url.into_string())
    }
}

impl From<&str> for Endpoint {
    fn from(url: &str) -> Self {
        Self::url(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UrlError;

    #[test]
    fn address_endpoints_go_through_builder() {
        assert_eq!(
            Endpoint::listen("0.0.0.0", "8000").to_url().unwrap(),
            "rist://@0.0.0.0:8000"
        );
        assert_eq!(
            Endpoint::connect("::1", "8000").to_url().unwrap(),
            "rist6://[::1]:8000"
        );
        assert!(matches!(
            Endpoint::connect("example.com", "8000").to_url(),
            Err(UrlError::InvalidAddress(_))
        ));
    }

    #[test]
    fn prebuilt_urls_pass_through() {
        let endpoint = Endpoint::url("rist://127.0.0.1:8000").with_weight(5);
        assert_eq!(endpoint.to_url().unwrap(), "rist://127.0.0.1:8000");
        assert_eq!(endpoint.weight(), Some(5));
        assert_eq!(Endpoint::url("").to_url().unwrap(), "");
    }

    #[test]
    fn display_names_the_endpoint() {
        assert_eq!(
            Endpoint::listen("0.0.0.0", "9000").to_string(),
            "listen 0.0.0.0:9000"
        );
        assert_eq!(
            Endpoint::from("rist://10.1.1.1:1").to_string(),
            "rist://10.1.1.1:1"
        );
    }
}
