use std::fmt;
use std::io;

use ristnet_peer::{ErrorClass, SessionError};
use ristnet_url::UrlError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn url_error(context: &str, err: UrlError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Io(ref source) => io_error(context, source),
        SessionError::EmptyEndpointList => CliError::new(USAGE, format!("{context}: {err}")),
        SessionError::ConfigRejected(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        _ => {
            let code = match err.class() {
                ErrorClass::Validation => DATA_INVALID,
                ErrorClass::Transport => TRANSPORT_ERROR,
                ErrorClass::Runtime => FAILURE,
            };
            CliError::new(code, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use ristnet_transport::TransportError;

    use super::*;

    #[test]
    fn session_errors_map_by_class() {
        let err = session_error("init", SessionError::EmptyEndpointList);
        assert_eq!(err.code, USAGE);

        let err = session_error(
            "init",
            SessionError::StartFailed(TransportError::StartFailed("boom".into())),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(err.message, "init: transport start failed: failed to start transport: boom");

        let err = session_error("send", SessionError::NotRunning);
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn invalid_address_is_data_invalid() {
        let err = url_error("url", UrlError::InvalidAddress("example.com".into()));
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn missing_config_file_is_usage() {
        let err = session_error(
            "config",
            SessionError::Io(io::Error::new(io::ErrorKind::NotFound, "missing")),
        );
        assert_eq!(err.code, USAGE);
    }
}
