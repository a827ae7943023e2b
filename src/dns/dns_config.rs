//! Signer Configuration
//!
//! Configuration structs for the DNSSEC signer: zone and key location,
//! signature timing, response size and signature cache limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DnsError;

/// Smallest UDP payload every resolver must accept
pub const MIN_UDP_SIZE: u16 = 512;

/// Largest UDP payload the signer advertises or honours
pub const MAX_UDP_SIZE: u16 = 4096;

/// Main signer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// DNSSEC signing configuration
    pub dnssec: DnssecConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl SignerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), DnsError> {
        self.dnssec.validate()?;
        self.logging.validate()
    }

    /// Load configuration from TOML file
    pub fn from_toml(content: &str) -> Result<Self, DnsError> {
        toml::from_str(content).map_err(|e| DnsError::ConfigError(format!("TOML parse error: {}", e)))
    }

    /// Load configuration from YAML file
    pub fn from_yaml(content: &str) -> Result<Self, DnsError> {
        serde_yaml::from_str(content)
            .map_err(|e| DnsError::ConfigError(format!("YAML parse error: {}", e)))
    }

    /// Pick the parser from the file extension (`.yaml`/`.yml`, else TOML)
    pub fn from_file_content(path: &str, content: &str) -> Result<Self, DnsError> {
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            Self::from_yaml(content)
        } else {
            Self::from_toml(content)
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, DnsError> {
        toml::to_string_pretty(self)
            .map_err(|e| DnsError::ConfigError(format!("TOML serialize error: {}", e)))
    }
}

/// DNSSEC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnssecConfig {
    /// Enable DNSSEC signing
    pub enabled: bool,
    /// Zone apex the server is authoritative for
    pub zone: String,
    /// Key file base name; `.key` and `.private` are appended
    pub key_path: Option<String>,
    /// TTL written into the RRSIG original TTL field and used for signing
    pub original_ttl: u32,
    /// TTL of synthesized NSEC records
    pub nsec_ttl: u32,
    /// How far in the past signature inception is set
    pub inception_offset_secs: u64,
    /// Signature validity period in days
    pub signature_validity_days: u32,
    /// Cached signatures closer than this to expiration are re-signed
    pub refresh_margin_hours: u32,
    /// Largest UDP payload advertised and honoured
    pub max_udp_size: u16,
    /// Upper bound on cached signatures
    pub cache_max_entries: usize,
    /// Period of the stale signature sweep
    pub cache_sweep_interval_secs: u64,
}

impl Default for DnssecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            zone: "skydns.local.".to_string(),
            key_path: None,
            original_ttl: 60,
            nsec_ttl: 60,
            inception_offset_secs: 2 * 3600,
            signature_validity_days: 7,
            refresh_margin_hours: 24,
            max_udp_size: 4096,
            cache_max_entries: 100_000,
            cache_sweep_interval_secs: 3600,
        }
    }
}

impl DnssecConfig {
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.enabled {
            if self.zone.trim_matches('.').is_empty() {
                return Err(DnsError::ConfigError(
                    "DNSSEC requires a zone when enabled".to_string(),
                ));
            }
            if self.key_path.is_none() {
                return Err(DnsError::ConfigError(
                    "DNSSEC requires key_path when enabled".to_string(),
                ));
            }
        }

        if !(MIN_UDP_SIZE..=MAX_UDP_SIZE).contains(&self.max_udp_size) {
            return Err(DnsError::ConfigError(format!(
                "max_udp_size must be between {} and {}",
                MIN_UDP_SIZE, MAX_UDP_SIZE
            )));
        }

        if self.signature_validity_days == 0 {
            return Err(DnsError::ConfigError(
                "signature_validity_days must be > 0".to_string(),
            ));
        }

        // Otherwise every fresh signature is already due for refresh
        if self.refresh_margin() >= self.validity() {
            return Err(DnsError::ConfigError(
                "refresh_margin_hours must be shorter than the signature validity".to_string(),
            ));
        }

        if self.cache_max_entries == 0 {
            return Err(DnsError::ConfigError(
                "cache_max_entries must be > 0".to_string(),
            ));
        }

        if self.cache_sweep_interval_secs == 0 {
            return Err(DnsError::ConfigError(
                "cache_sweep_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.signature_validity_days as u64 * 86_400)
    }

    pub fn inception_offset(&self) -> Duration {
        Duration::from_secs(self.inception_offset_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_hours as u64 * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    pub level: String,
}

impl LoggingConfig {
    /// The level must name a `tracing` level (`trace` through `error`)
    pub fn validate(&self) -> Result<(), DnsError> {
        self.level
            .parse::<tracing::Level>()
            .map(|_| ())
            .map_err(|_| DnsError::ConfigError(format!("unknown log level: {}", self.level)))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
