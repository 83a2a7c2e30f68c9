//! Configuration management for Redfire DTMF

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Environment variable prefix, e.g. `REDFIRE_DTMF_DTMF__PAYLOAD_TYPE=96`
pub const ENV_PREFIX: &str = "REDFIRE_DTMF";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rtp: RtpConfig,
    #[serde(default)]
    pub dtmf: DtmfConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    pub bind_address: String,
    pub port: u16,
    pub recv_buffer_size: Option<usize>,
    pub clock_rate: u32,
    pub ptime_ms: u32,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 40000,
            recv_buffer_size: None,
            clock_rate: 8000,
            ptime_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfConfig {
    /// Negotiated telephone-event payload type
    pub payload_type: u8,
    /// Attenuation in dBm0, sent as 0..=63
    pub volume: u8,
    pub duration_ms: u32,
    pub inter_digit_delay_ms: u32,
    /// Number of end-of-event packets per press
    pub redundancy: u8,
    /// Deprecated, accepted and ignored
    pub min_duration: Option<u16>,
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            payload_type: 101,
            volume: 10,
            duration_ms: 100,
            inter_digit_delay_ms: 50,
            redundancy: 3,
            min_duration: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    /// Defaults overlaid with `REDFIRE_DTMF_<SECTION>__<KEY>` variables
    pub fn load_from_env() -> Result<Self> {
        Self::load_with_environment(env_source())
    }

    fn load_with_environment(environment: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default_config())?)
            .add_source(environment)
            .build()?;

        let app_config: AppConfig = settings.try_deserialize()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rtp
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| Error::parse(format!("Invalid RTP bind address: {}", self.rtp.bind_address)))?;

        if self.rtp.clock_rate == 0 {
            return Err(Error::parse("RTP clock rate must be non-zero"));
        }

        if self.rtp.ptime_ms == 0 {
            return Err(Error::parse("RTP ptime must be non-zero"));
        }

        if self.dtmf.payload_type > 127 {
            return Err(Error::parse("DTMF payload type must be 0-127"));
        }

        if self.dtmf.volume > 63 {
            return Err(Error::parse("DTMF volume must be 0-63"));
        }

        if self.dtmf.duration_ms == 0 {
            return Err(Error::parse("DTMF duration must be non-zero"));
        }

        if self.dtmf.redundancy == 0 {
            return Err(Error::parse("DTMF redundancy must be at least 1"));
        }

        if self.dtmf.min_duration.is_some() {
            warn!("dtmf.min_duration is deprecated and ignored");
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Self::default()
    }
}
