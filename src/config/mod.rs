//! Configuration loading for the bridge.
//!
//! TOML on disk, `serde` for parsing, a single `Config::load(path)`
//! entry point.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codec::Codec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sip: SipConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub rtp: RtpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SipTransport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SipConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub auth_user: Option<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub transport: SipTransport,
    #[serde(default)]
    pub enable_stun: bool,
    pub stun_server: Option<String>,
    #[serde(default = "default_stun_port")]
    pub stun_port: u16,
    /// Local port to bind the SIP transport; 0 = ephemeral.
    #[serde(default)]
    pub listen_port: u16,
    /// REGISTER refresh interval in seconds.
    #[serde(default = "default_register_expiry")]
    pub register_expiry_secs: u32,
}

fn default_stun_port() -> u16 {
    19302
}

fn default_register_expiry() -> u32 {
    120
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 5060,
            username: String::new(),
            password: String::new(),
            auth_user: None,
            domain: None,
            transport: SipTransport::default(),
            enable_stun: false,
            stun_server: None,
            stun_port: default_stun_port(),
            listen_port: 0,
            register_expiry_secs: default_register_expiry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            voice: String::new(),
            url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioConfig {
    #[serde(default)]
    pub preferred_codec: Codec,
    #[serde(default = "default_gain")]
    pub volume_boost: f32,
    #[serde(default = "default_gain")]
    pub ingress_boost: f32,
}

fn default_gain() -> f32 {
    1.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_codec: Codec::default(),
            volume_boost: default_gain(),
            ingress_boost: default_gain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RtpConfig {
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_rtp_timeout_secs")]
    pub rtp_timeout_secs: u64,
}

fn default_circuit_breaker_threshold() -> u32 {
    100
}

fn default_rtp_timeout_secs() -> u64 {
    30
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            rtp_timeout_secs: default_rtp_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        Self::parse(&text)
    }

    /// Parse configuration from a TOML string (used by tests and `load`).
    pub fn parse(text: &str) -> Result<Config, String> {
        toml::from_str(text).map_err(|e| format!("invalid config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = Config::parse(
            r#"
            [sip]
            server = "sip.example.com"
            port = 5060
            username = "bridge"
            password = "secret"

            [llm]
            api_key = "sk-test"
            model = "gpt-realtime"
            voice = "alloy"
            url = "wss://example.com/v1/realtime"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sip.server, "sip.example.com");
        assert_eq!(cfg.rtp.circuit_breaker_threshold, 100);
        assert_eq!(cfg.audio.preferred_codec, Codec::Alaw);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::parse(
            r#"
            [sip]
            server = "x"
            port = 5060
            username = "u"
            password = "p"
            bogus_field = true
            "#,
        );
        assert!(err.is_err());
    }
}
