//! Rig configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/rig.toml` (base configuration)
//! 2. Environment variables prefixed with `TIGER_RIG_`, nested with `__`
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration for the standard rig.
//!
//! # Example
//! ```no_run
//! use tiger_rig::config::RigConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // TIGER_RIG_TRANSPORT__PORT=/dev/ttyUSB1 overrides the file
//! let config = RigConfig::load()?;
//! config.validate()?;
//! println!("Rig on {}", config.transport.port);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RigError, RigResult};
use crate::error_recovery::RetryPolicy;
use crate::settings::{AcquisitionSettings, HardwareConstants};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rig.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "TIGER_RIG_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level rig configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial line to the controller
    pub transport: TransportConfig,
    /// Device labels and logic-card layout
    pub hardware: HardwareConstants,
    /// Template for acquisition runs
    pub acquisition: AcquisitionSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name shown in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Tiger Rig".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Serial device path
    pub port: String,
    /// Line speed (baud)
    pub baud_rate: u32,
    /// How long to wait for a reply line before failing the exchange
    pub read_timeout_ms: u64,
    /// Retry of transient transport failures
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// `read_timeout_ms` as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl RigConfig {
    /// Load configuration from `config/rig.toml` and environment variables
    ///
    /// Example override: `TIGER_RIG_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RigResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(RigError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.transport.port.is_empty() {
            return Err(RigError::Configuration(
                "transport.port must not be empty".to_string(),
            ));
        }
        if self.transport.baud_rate == 0 {
            return Err(RigError::Configuration(
                "transport.baud_rate must be positive".to_string(),
            ));
        }
        if self.transport.read_timeout_ms == 0 {
            return Err(RigError::Configuration(
                "transport.read_timeout_ms must be positive".to_string(),
            ));
        }
        self.transport
            .retry
            .validate()
            .map_err(|e| RigError::Configuration(format!("transport.retry: {e}")))?;

        self.hardware
            .validate()
            .map_err(|e| RigError::Configuration(format!("hardware: {e}")))?;
        self.acquisition
            .validate()
            .map_err(|e| RigError::Configuration(format!("acquisition: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StageArming;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = RigConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, RigConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
            [transport]
            port = "/dev/ttyACM3"
            read_timeout_ms = 250

            [transport.retry]
            max_attempts = 4
            backoff_delay = 20
            backoff_multiplier = 1.5

            [hardware]
            plogic_label = "PLogic:E:37"
            stage_arming = "ring_buffer"

            [acquisition]
            num_slices = 7
            "#,
        );

        let config = RigConfig::load_from(file.path()).unwrap();

        assert_eq!(config.transport.port, "/dev/ttyACM3");
        assert_eq!(config.transport.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.transport.baud_rate, 115_200);
        assert_eq!(config.transport.retry.max_attempts, 4);
        assert_eq!(
            config.transport.retry.backoff_delay,
            Duration::from_millis(20)
        );
        assert_eq!(config.hardware.plogic_address().unwrap(), "37");
        assert_eq!(config.hardware.stage_arming, StageArming::RingBuffer);
        assert_eq!(config.hardware.hub_label, "TigerCommHub");
        assert_eq!(config.acquisition.num_slices, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "rig.toml",
                r#"
                [application]
                log_level = "warn"
                "#,
            )?;
            jail.set_env("TIGER_RIG_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("TIGER_RIG_HARDWARE__PULSES_PER_MS", "8");

            let config = RigConfig::load_from("rig.toml")?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.hardware.pulses_per_ms, 8.0);
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = RigConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(RigError::Configuration(msg)) if msg.contains("loud")
        ));

        let mut config = RigConfig::default();
        config.hardware.plogic_label = "PLogic".to_string();
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.transport.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.acquisition.num_slices = 0;
        assert!(config.validate().is_err());
    }
}
