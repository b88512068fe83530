use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use ristnet_transport::{
    BufferbloatMode, CongestionControl, PeerConfig, Profile, RecoveryMode, Role,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatch::UnboundData;
use crate::error::Result;

/// Key size used when a pre-shared key is given without one.
pub const DEFAULT_KEY_SIZE: u32 = 128;

/// Session-wide configuration, fixed at `init`.
///
/// Missing fields in a JSON document take their defaults. Durations are in
/// milliseconds and bitrates in kbps.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub profile: Profile,
    pub recovery_mode: RecoveryMode,
    pub recovery_max_bitrate: u32,
    pub recovery_max_bitrate_return: u32,
    pub recovery_length_min_ms: u32,
    pub recovery_length_max_ms: u32,
    pub recovery_reorder_buffer_ms: u32,
    pub recovery_rtt_min_ms: u32,
    pub recovery_rtt_max_ms: u32,
    pub congestion_control: CongestionControl,
    pub bufferbloat_mode: BufferbloatMode,
    pub bufferbloat_limit: u32,
    pub bufferbloat_hard_limit: u32,
    /// Default load-balancing weight for every endpoint.
    pub weight: u32,
    /// Pre-shared key. Read from config documents but never written back
    /// out, and redacted in debug output.
    #[serde(skip_serializing)]
    pub psk: Option<String>,
    /// AES key size in bits; 0 picks 128 when a key is set.
    pub key_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    pub session_timeout_ms: u32,
    pub keepalive_interval_ms: u32,
    pub max_jitter_ms: u32,
    pub stats_interval_ms: u32,
    /// Advertised flow id for senders. Derived from the clock when unset;
    /// the low bit is always cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<u32>,
    pub unbound_data: UnboundData,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let peer = PeerConfig::default();
        Self {
            profile: Profile::Main,
            recovery_mode: peer.recovery_mode,
            recovery_max_bitrate: peer.recovery_max_bitrate,
            recovery_max_bitrate_return: peer.recovery_max_bitrate_return,
            recovery_length_min_ms: peer.recovery_length_min,
            recovery_length_max_ms: peer.recovery_length_max,
            recovery_reorder_buffer_ms: peer.recovery_reorder_buffer,
            recovery_rtt_min_ms: peer.recovery_rtt_min,
            recovery_rtt_max_ms: peer.recovery_rtt_max,
            congestion_control: peer.congestion_control,
            bufferbloat_mode: peer.bufferbloat_mode,
            bufferbloat_limit: peer.bufferbloat_limit,
            bufferbloat_hard_limit: peer.bufferbloat_hard_limit,
            weight: peer.weight,
            psk: None,
            key_size: 0,
            cname: None,
            session_timeout_ms: peer.session_timeout,
            keepalive_interval_ms: peer.keepalive_interval,
            max_jitter_ms: peer.max_jitter,
            stats_interval_ms: peer.stats_interval,
            flow_id: None,
            unbound_data: UnboundData::Deliver,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SessionConfig");
        dbg.field("profile", &self.profile)
            .field("recovery_mode", &self.recovery_mode)
            .field("recovery_max_bitrate", &self.recovery_max_bitrate)
            .field(
                "recovery_max_bitrate_return",
                &self.recovery_max_bitrate_return,
            )
            .field("recovery_length_min_ms", &self.recovery_length_min_ms)
            .field("recovery_length_max_ms", &self.recovery_length_max_ms)
            .field(
                "recovery_reorder_buffer_ms",
                &self.recovery_reorder_buffer_ms,
            )
            .field("recovery_rtt_min_ms", &self.recovery_rtt_min_ms)
            .field("recovery_rtt_max_ms", &self.recovery_rtt_max_ms)
            .field("congestion_control", &self.congestion_control)
            .field("bufferbloat_mode", &self.bufferbloat_mode)
            .field("bufferbloat_limit", &self.bufferbloat_limit)
            .field("bufferbloat_hard_limit", &self.bufferbloat_hard_limit)
            .field("weight", &self.weight);
        if let Some(psk) = &self.psk {
            dbg.field("psk", &format_args!("<redacted:{} bytes>", psk.len()));
        } else {
            dbg.field("psk", &Option::<String>::None);
        }
        dbg.field("key_size", &self.key_size)
            .field("cname", &self.cname)
            .field("session_timeout_ms", &self.session_timeout_ms)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("max_jitter_ms", &self.max_jitter_ms)
            .field("stats_interval_ms", &self.stats_interval_ms)
            .field("flow_id", &self.flow_id)
            .field("unbound_data", &self.unbound_data)
            .finish()
    }
}

impl SessionConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Translate into the transport's native configuration for `role`.
    ///
    /// Only senders advertise a flow id.
    pub fn to_peer_config(&self, role: Role) -> PeerConfig {
        let psk = self.psk.clone().filter(|psk| !psk.is_empty());
        let key_size = match (&psk, self.key_size) {
            (Some(_), 0) => DEFAULT_KEY_SIZE,
            (_, key_size) => key_size,
        };
        let flow_id = match role {
            Role::Sender => match self.flow_id {
                Some(flow_id) if flow_id & 1 == 1 => {
                    warn!(flow_id, "odd flow id, clearing low bit");
                    flow_id & !1
                }
                Some(flow_id) => flow_id,
                None => clock_flow_id(),
            },
            Role::Receiver => 0,
        };

        PeerConfig {
            address: String::new(),
            weight: self.weight,
            flow_id,
            recovery_mode: self.recovery_mode,
            recovery_max_bitrate: self.recovery_max_bitrate,
            recovery_max_bitrate_return: self.recovery_max_bitrate_return,
            recovery_length_min: self.recovery_length_min_ms,
            recovery_length_max: self.recovery_length_max_ms,
            recovery_reorder_buffer: self.recovery_reorder_buffer_ms,
            recovery_rtt_min: self.recovery_rtt_min_ms,
            recovery_rtt_max: self.recovery_rtt_max_ms,
            congestion_control: self.congestion_control,
            bufferbloat_mode: self.bufferbloat_mode,
            bufferbloat_limit: self.bufferbloat_limit,
            bufferbloat_hard_limit: self.bufferbloat_hard_limit,
            secret: psk,
            key_size,
            cname: self.cname.clone(),
            session_timeout: self.session_timeout_ms,
            keepalive_interval: self.keepalive_interval_ms,
            max_jitter: self.max_jitter_ms,
            stats_interval: self.stats_interval_ms,
        }
    }
}

/// Even flow id derived from the wall clock.
fn clock_flow_id() -> u32 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros());
    ((micros >> 16) as u32) & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transport_defaults() {
        let config = SessionConfig::default();
        let peer = config.to_peer_config(Role::Receiver);
        assert_eq!(peer.recovery_length_min, 1000);
        assert_eq!(peer.recovery_rtt_max, 500);
        assert_eq!(peer.weight, 5);
        assert_eq!(peer.flow_id, 0);
        assert_eq!(peer.key_size, 0);
        peer.validate().expect("default config should validate");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(
            r#"{"profile":"simple","cname":"cam1","unbound_data":"drop"}"#,
        )
        .expect("partial document should parse");
        assert_eq!(config.profile, Profile::Simple);
        assert_eq!(config.cname.as_deref(), Some("cam1"));
        assert_eq!(config.unbound_data, UnboundData::Drop);
        assert_eq!(config.session_timeout_ms, 2000);
    }

    #[test]
    fn bad_json_is_rejected() {
        assert!(SessionConfig::from_json(r#"{"profile":"turbo"}"#).is_err());
        assert!(SessionConfig::from_json_file("/nonexistent/ristnet.json").is_err());
    }

    #[test]
    fn psk_without_key_size_uses_default() {
        let config = SessionConfig {
            psk: Some("Th1$_is_4n_0pt10N4L_P$k".into()),
            ..SessionConfig::default()
        };
        let peer = config.to_peer_config(Role::Sender);
        assert_eq!(peer.key_size, DEFAULT_KEY_SIZE);
        assert!(peer.secret.is_some());

        let empty = SessionConfig {
            psk: Some(String::new()),
            ..SessionConfig::default()
        };
        assert_eq!(empty.to_peer_config(Role::Sender).key_size, 0);
    }

    #[test]
    fn sender_flow_id_is_even() {
        let generated = SessionConfig::default().to_peer_config(Role::Sender);
        assert_eq!(generated.flow_id % 2, 0);

        let fixed = SessionConfig {
            flow_id: Some(4242),
            ..SessionConfig::default()
        };
        assert_eq!(fixed.to_peer_config(Role::Sender).flow_id, 4242);
        assert_eq!(fixed.to_peer_config(Role::Receiver).flow_id, 0);

        let odd = SessionConfig {
            flow_id: Some(4243),
            ..SessionConfig::default()
        };
        let peer = odd.to_peer_config(Role::Sender);
        assert_eq!(peer.flow_id, 4242);
        peer.validate().expect("masked flow id should validate");
    }

    #[test]
    fn debug_redacts_psk() {
        let config = SessionConfig {
            psk: Some("hunter2".into()),
            ..SessionConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted:7 bytes>"));
    }

    #[test]
    fn psk_is_read_but_not_serialized() {
        let config =
            SessionConfig::from_json(r#"{"psk":"hunter2","cname":"cam1"}"#).expect("should parse");
        assert_eq!(config.psk.as_deref(), Some("hunter2"));
        let json = serde_json::to_string(&config).expect("config should serialize");
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("psk"));
        assert!(json.contains("cam1"));
    }
}
