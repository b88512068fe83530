use std::fmt;

use ristnet_url::EndpointUrl;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TransportError};

const MAX_CNAME_LEN: usize = 128;
const MAX_SECRET_LEN: usize = 128;

/// Retransmission request strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    Disabled,
    Bytes,
    #[default]
    Time,
}

/// Bufferbloat mitigation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferbloatMode {
    Off,
    #[default]
    Normal,
    Aggressive,
}

/// Congestion control strategy for retransmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControl {
    Off,
    #[default]
    Normal,
    Aggressive,
}

/// Native per-peer configuration structure of the transport.
///
/// Bitrates are in kbps, all durations in milliseconds.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Connection string of the peer (`rist://...`).
    pub address: String,
    /// Load-balancing weight; 0 duplicates to every peer.
    pub weight: u32,
    /// Advertised flow id (senders only, must be even).
    pub flow_id: u32,
    pub recovery_mode: RecoveryMode,
    pub recovery_max_bitrate: u32,
    pub recovery_max_bitrate_return: u32,
    pub recovery_length_min: u32,
    pub recovery_length_max: u32,
    pub recovery_reorder_buffer: u32,
    pub recovery_rtt_min: u32,
    pub recovery_rtt_max: u32,
    pub congestion_control: CongestionControl,
    pub bufferbloat_mode: BufferbloatMode,
    pub bufferbloat_limit: u32,
    pub bufferbloat_hard_limit: u32,
    /// Pre-shared key. Never logged.
    pub secret: Option<String>,
    /// AES key size in bits; 0 disables encryption.
    pub key_size: u32,
    /// Common name announced to the peer.
    pub cname: Option<String>,
    pub session_timeout: u32,
    pub keepalive_interval: u32,
    pub max_jitter: u32,
    pub stats_interval: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            weight: 5,
            flow_id: 0,
            recovery_mode: RecoveryMode::Time,
            recovery_max_bitrate: 100_000,
            recovery_max_bitrate_return: 0,
            recovery_length_min: 1000,
            recovery_length_max: 1000,
            recovery_reorder_buffer: 25,
            recovery_rtt_min: 50,
            recovery_rtt_max: 500,
            congestion_control: CongestionControl::Normal,
            bufferbloat_mode: BufferbloatMode::Normal,
            bufferbloat_limit: 6,
            bufferbloat_hard_limit: 20,
            secret: None,
            key_size: 0,
            cname: None,
            session_timeout: 2000,
            keepalive_interval: 1000,
            max_jitter: 5,
            stats_interval: 1000,
        }
    }
}

impl fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("PeerConfig");
        dbg.field("address", &self.address)
            .field("weight", &self.weight)
            .field("flow_id", &self.flow_id)
            .field("recovery_mode", &self.recovery_mode)
            .field("recovery_max_bitrate", &self.recovery_max_bitrate)
            .field(
                "recovery_max_bitrate_return",
                &self.recovery_max_bitrate_return,
            )
            .field("recovery_length_min", &self.recovery_length_min)
            .field("recovery_length_max", &self.recovery_length_max)
            .field("recovery_reorder_buffer", &self.recovery_reorder_buffer)
            .field("recovery_rtt_min", &self.recovery_rtt_min)
            .field("recovery_rtt_max", &self.recovery_rtt_max)
            .field("congestion_control", &self.congestion_control)
            .field("bufferbloat_mode", &self.bufferbloat_mode)
            .field("bufferbloat_limit", &self.bufferbloat_limit)
            .field("bufferbloat_hard_limit", &self.bufferbloat_hard_limit);
        if let Some(secret) = &self.secret {
            dbg.field("secret", &format_args!("<redacted:{} bytes>", secret.len()));
        } else {
            dbg.field("secret", &Option::<String>::None);
        }
        dbg.field("key_size", &self.key_size)
            .field("cname", &self.cname)
            .field("session_timeout", &self.session_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("max_jitter", &self.max_jitter)
            .field("stats_interval", &self.stats_interval)
            .finish()
    }
}

impl PeerConfig {
    /// Check the field constraints every transport shares.
    ///
    /// Returns the first offending field as [`TransportError::ConfigRejected`].
    pub fn validate(&self) -> Result<()> {
        if self.recovery_length_min > self.recovery_length_max {
            return Err(rejected(
                "recovery_length_min",
                format!(
                    "{} exceeds recovery_length_max {}",
                    self.recovery_length_min, self.recovery_length_max
                ),
            ));
        }
        if self.recovery_rtt_min > self.recovery_rtt_max {
            return Err(rejected(
                "recovery_rtt_min",
                format!(
                    "{} exceeds recovery_rtt_max {}",
                    self.recovery_rtt_min, self.recovery_rtt_max
                ),
            ));
        }
        if self.bufferbloat_mode != BufferbloatMode::Off
            && self.bufferbloat_limit > self.bufferbloat_hard_limit
        {
            return Err(rejected(
                "bufferbloat_limit",
                format!(
                    "{} exceeds bufferbloat_hard_limit {}",
                    self.bufferbloat_limit, self.bufferbloat_hard_limit
                ),
            ));
        }
        if !matches!(self.key_size, 0 | 128 | 256) {
            return Err(rejected(
                "key_size",
                format!("{} (expected 0, 128 or 256)", self.key_size),
            ));
        }
        match self.secret.as_deref() {
            None | Some("") if self.key_size != 0 => {
                return Err(rejected("secret", "encryption requires a secret".into()));
            }
            Some(secret) if secret.len() > MAX_SECRET_LEN => {
                return Err(rejected(
                    "secret",
                    format!("longer than {MAX_SECRET_LEN} bytes"),
                ));
            }
            _ => {}
        }
        if let Some(cname) = &self.cname {
            if cname.len() > MAX_CNAME_LEN {
                return Err(rejected(
                    "cname",
                    format!("longer than {MAX_CNAME_LEN} bytes"),
                ));
            }
        }
        if self.session_timeout != 0 && self.session_timeout < self.keepalive_interval {
            return Err(rejected(
                "session_timeout",
                format!(
                    "{} is shorter than keepalive_interval {}",
                    self.session_timeout, self.keepalive_interval
                ),
            ));
        }
        Ok(())
    }
}

fn rejected(field: &'static str, reason: String) -> TransportError {
    TransportError::ConfigRejected { field, reason }
}

/// Parse a connection string into a per-peer configuration.
///
/// Starts from `base` and applies the URL's query parameters
/// (`buffer`, `bandwidth`, `return-bandwidth`, `rtt-min`, `rtt-max`,
/// `reorder-buffer`, `weight`, `cname`, `secret`, `aes-type`,
/// `session-timeout`, `keepalive-interval`). Unknown keys are logged and
/// ignored; malformed values are rejected.
pub fn parse_address(url: &str, base: &PeerConfig) -> Result<PeerConfig> {
    let parsed = EndpointUrl::parse(url)?;
    let mut config = base.clone();
    config.address = url.to_string();

    let Some(query) = parsed.query() else {
        return Ok(config);
    };

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let invalid = || TransportError::InvalidParameter {
            url: url.to_string(),
            key: key.to_string(),
        };
        let number = || value.parse::<u32>().map_err(|_| invalid());

        match key {
            "buffer" => {
                let buffer = number()?;
                config.recovery_length_min = buffer;
                config.recovery_length_max = buffer;
            }
            "bandwidth" => config.recovery_max_bitrate = number()?,
            "return-bandwidth" => config.recovery_max_bitrate_return = number()?,
            "rtt-min" => config.recovery_rtt_min = number()?,
            "rtt-max" => config.recovery_rtt_max = number()?,
            "reorder-buffer" => config.recovery_reorder_buffer = number()?,
            "weight" => config.weight = number()?,
            "aes-type" => config.key_size = number()?,
            "session-timeout" => config.session_timeout = number()?,
            "keepalive-interval" => config.keepalive_interval = number()?,
            "cname" if !value.is_empty() => config.cname = Some(value.to_string()),
            "secret" if !value.is_empty() => config.secret = Some(value.to_string()),
            "cname" | "secret" => return Err(invalid()),
            _ => warn!(key, "ignoring unknown url parameter"),
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PeerConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = PeerConfig {
            recovery_rtt_min: 600,
            ..PeerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::ConfigRejected {
                field: "recovery_rtt_min",
                ..
            })
        ));

        let config = PeerConfig {
            recovery_length_min: 2000,
            ..PeerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::ConfigRejected {
                field: "recovery_length_min",
                ..
            })
        ));
    }

    #[test]
    fn encryption_needs_secret_and_known_key_size() {
        let config = PeerConfig {
            key_size: 128,
            ..PeerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::ConfigRejected { field: "secret", .. })
        ));

        let config = PeerConfig {
            key_size: 192,
            secret: Some("psk".into()),
            ..PeerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::ConfigRejected {
                field: "key_size",
                ..
            })
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = PeerConfig {
            secret: Some("Th1$_is_4n_0pt10N4L_P$k".into()),
            key_size: 128,
            ..PeerConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("Th1$"));
        assert!(rendered.contains("<redacted:23 bytes>"));
    }

    #[test]
    fn parse_address_applies_query() {
        let base = PeerConfig::default();
        let config = parse_address(
            "rist://127.0.0.1:8000?buffer=250&weight=2&cname=cam1&aes-type=256&secret=abc",
            &base,
        )
        .unwrap();
        assert_eq!(config.recovery_length_min, 250);
        assert_eq!(config.recovery_length_max, 250);
        assert_eq!(config.weight, 2);
        assert_eq!(config.cname.as_deref(), Some("cam1"));
        assert_eq!(config.key_size, 256);
        assert_eq!(config.secret.as_deref(), Some("abc"));
        assert!(config.address.starts_with("rist://127.0.0.1:8000"));
    }

    #[test]
    fn parse_address_rejects_bad_input() {
        let base = PeerConfig::default();
        assert!(matches!(
            parse_address("", &base),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_address("rist://127.0.0.1:8000?buffer=lots", &base),
            Err(TransportError::InvalidParameter { .. })
        ));
        assert!(parse_address("rist://127.0.0.1:8000?colour=blue", &base).is_ok());
    }
}
