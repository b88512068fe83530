use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, UrlError};

/// URL scheme for IPv4 endpoints.
pub const SCHEME_V4: &str = "rist";
/// URL scheme for IPv6 endpoints.
pub const SCHEME_V6: &str = "rist6";

/// Address family of an endpoint, which selects the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// URL scheme used for this family.
    pub fn scheme(self) -> &'static str {
        match self {
            AddressFamily::V4 => SCHEME_V4,
            AddressFamily::V6 => SCHEME_V6,
        }
    }

    fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// A validated endpoint URL in the transport's connection-string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointUrl {
    url: String,
    ip: IpAddr,
    port: u16,
    listen: bool,
    query: Option<String>,
}

impl EndpointUrl {
    /// Assemble the URL from the caller's address and port text.
    fn render(address: &str, ip: IpAddr, port_text: &str, port: u16, listen: bool) -> Self {
        let marker = if listen { "@" } else { "" };
        let url = match ip {
            IpAddr::V4(_) => format!("{SCHEME_V4}://{marker}{address}:{port_text}"),
            IpAddr::V6(_) => format!("{SCHEME_V6}://{marker}[{address}]:{port_text}"),
        };
        Self {
            url,
            ip,
            port,
            listen,
            query: None,
        }
    }

    /// Parse a URL of the form produced by [`build_url`].
    ///
    /// The text is kept verbatim. A trailing `?key=value&...` query is
    /// preserved but not interpreted.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason| UrlError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let (family, rest) = if let Some(rest) = url.strip_prefix("rist6://") {
            (AddressFamily::V6, rest)
        } else if let Some(rest) = url.strip_prefix("rist://") {
            (AddressFamily::V4, rest)
        } else {
            return Err(invalid("scheme must be rist:// or rist6://"));
        };

        let (listen, rest) = match rest.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) if !query.is_empty() => (authority, Some(query.to_string())),
            Some((authority, _)) => (authority, None),
            None => (rest, None),
        };

        let (host, port) = match family {
            AddressFamily::V6 => {
                let inner = authority
                    .strip_prefix('[')
                    .ok_or_else(|| invalid("IPv6 address must be bracketed"))?;
                let (host, port) = inner
                    .split_once("]:")
                    .ok_or_else(|| invalid("missing port"))?;
                (host, port)
            }
            AddressFamily::V4 => authority
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?,
        };

        let ip = classify(host)?;
        if AddressFamily::of(&ip) != family {
            return Err(invalid("address family does not match scheme"));
        }
        let port = parse_port(port)?;

        Ok(Self {
            url: url.to_string(),
            ip,
            port,
            listen,
            query,
        })
    }

    /// The full URL text.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Endpoint IP address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Endpoint port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this endpoint is a listen-mode socket.
    pub fn is_listen(&self) -> bool {
        self.listen
    }

    /// Address family (selects `rist://` vs `rist6://`).
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }

    /// Uninterpreted query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Consume and return the URL text.
    pub fn into_string(self) -> String {
        self.url
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl FromStr for EndpointUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for EndpointUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

/// Build an endpoint URL from a literal address and a decimal port.
///
/// `listen` prepends the `@` marker used for listen-mode sockets. IPv6
/// literals are bracketed and use the `rist6` scheme. Address and port are
/// validated, then joined exactly as given.
pub fn build_url(address: &str, port: &str, listen: bool) -> Result<EndpointUrl> {
    let ip = classify(address)?;
    let port_number = parse_port(port)?;
    let url = EndpointUrl::render(address, ip, port, port_number, listen);
    debug!(url = %url, "built endpoint url");
    Ok(url)
}

/// Parse a base-10 port in `1..=65535`.
///
/// Signs, whitespace and trailing characters are rejected.
pub fn parse_port(port: &str) -> Result<u16> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UrlError::InvalidPort(port.to_string()));
    }
    match port.parse::<u32>() {
        Ok(value @ 1..=65535) => Ok(value as u16),
        _ => Err(UrlError::InvalidPort(port.to_string())),
    }
}

fn classify(address: &str) -> Result<IpAddr> {
    if let Ok(v4) = address.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    if let Ok(v6) = address.parse::<Ipv6Addr>() {
        return Ok(IpAddr::V6(v6));
    }
    Err(UrlError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_listen_and_connect() {
        let url = build_url("0.0.0.0", "8000", true).unwrap();
        assert_eq!(url.as_str(), "rist://@0.0.0.0:8000");
        assert!(url.is_listen());

        let url = build_url("127.0.0.1", "65535", false).unwrap();
        assert_eq!(url.as_str(), "rist://127.0.0.1:65535");
        assert_eq!(url.port(), 65535);
    }

    #[test]
    fn ipv6_is_bracketed() {
        let url = build_url("::", "9000", true).unwrap();
        assert_eq!(url.as_str(), "rist6://@[::]:9000");
        assert_eq!(url.family(), AddressFamily::V6);

        let url = build_url("::1", "1", false).unwrap();
        assert_eq!(url.as_str(), "rist6://[::1]:1");
    }

    #[test]
    fn address_and_port_text_are_kept() {
        let url = build_url("0:0:0:0:0:0:0:1", "8000", false).unwrap();
        assert_eq!(url.as_str(), "rist6://[0:0:0:0:0:0:0:1]:8000");
        assert_eq!(url.ip(), "::1".parse::<IpAddr>().unwrap());

        let url = build_url("FE80::1", "9000", true).unwrap();
        assert_eq!(url.as_str(), "rist6://@[FE80::1]:9000");

        let url = build_url("10.0.0.1", "08000", false).unwrap();
        assert_eq!(url.as_str(), "rist://10.0.0.1:08000");
        assert_eq!(url.port(), 8000);
        assert_eq!(EndpointUrl::parse(url.as_str()).unwrap(), url);
    }

    #[test]
    fn hostnames_are_rejected() {
        let err = build_url("example.com", "9000", true).unwrap_err();
        assert_eq!(err, UrlError::InvalidAddress("example.com".to_string()));
        assert!(build_url("localhost", "9000", false).is_err());
    }

    #[test]
    fn out_of_range_octet_is_rejected() {
        let err = build_url("300.1.1.1", "8000", true).unwrap_err();
        assert!(matches!(err, UrlError::InvalidAddress(_)));
    }

    #[test]
    fn port_bounds() {
        assert!(matches!(
            build_url("0.0.0.0", "65536", true),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(matches!(
            build_url("0.0.0.0", "0", true),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(build_url("0.0.0.0", "1", true).is_ok());
        assert!(build_url("0.0.0.0", "65535", true).is_ok());
    }

    #[test]
    fn port_rejects_non_decimal_text() {
        for port in ["", "+80", "-1", " 80", "80a", "0x50", "99999999999"] {
            assert!(parse_port(port).is_err(), "port {port:?} should be rejected");
        }
    }

    #[test]
    fn parse_accepts_built_urls() {
        for (address, port, listen) in [("10.0.0.2", "5000", false), ("fe80::1", "7000", true)] {
            let built = build_url(address, port, listen).unwrap();
            let parsed = EndpointUrl::parse(built.as_str()).unwrap();
            assert_eq!(parsed, built);
        }
    }

    #[test]
    fn parse_keeps_query() {
        let url = EndpointUrl::parse("rist://127.0.0.1:8000?cname=cam1&weight=3").unwrap();
        assert_eq!(url.port(), 8000);
        assert_eq!(url.query(), Some("cname=cam1&weight=3"));
        assert_eq!(url.as_str(), "rist://127.0.0.1:8000?cname=cam1&weight=3");
    }

    #[test]
    fn parse_rejects_malformed_urls() {
        for url in [
            "",
            "udp://127.0.0.1:8000",
            "rist://127.0.0.1",
            "rist://[::1]:8000",
            "rist6://::1:8000",
            "rist6://[127.0.0.1]:8000",
            "rist://example.com:8000",
        ] {
            assert!(EndpointUrl::parse(url).is_err(), "{url:?} should be rejected");
        }
    }
}
