/// Errors that can occur while building or parsing endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// The address is not a literal IPv4 or IPv6 address.
    #[error("invalid address '{0}' (expected an IPv4 or IPv6 literal)")]
    InvalidAddress(String),

    /// The port is not a base-10 integer in 1..=65535.
    #[error("invalid port '{0}' (expected 1-65535)")]
    InvalidPort(String),

    /// The string is not a well-formed `rist://` or `rist6://` URL.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, UrlError>;
