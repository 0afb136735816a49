//! Configuration file support for ymboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (YMBOOT_*)
//! 3. Local config file (./ymboot.toml)
//! 4. Global config file (~/.config/ymboot/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ymboot::{PlatformConfig, RetryPolicy, TooLargePolicy, YmodemConfig};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Receive engine settings. Unset fields keep the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveConfig {
    /// Per-byte timeout in milliseconds.
    pub byte_timeout_ms: Option<u64>,
    /// Consecutive faults tolerated.
    pub max_errors: Option<u32>,
    /// `bounded` or `single-shot`.
    pub retry: Option<RetryPolicy>,
    /// `abort` or `continue`.
    pub too_large: Option<TooLargePolicy>,
    /// Verify packet CRC trailers.
    pub verify_crc: Option<bool>,
    /// Number of 'C' start requests.
    pub handshake_attempts: Option<u32>,
}

impl ReceiveConfig {
    /// Apply the set fields on top of `base`.
    pub fn apply(&self, mut base: YmodemConfig) -> YmodemConfig {
        if let Some(ms) = self.byte_timeout_ms {
            base.byte_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.max_errors {
            base.max_errors = n;
        }
        if let Some(retry) = self.retry {
            base.retry = retry;
        }
        if let Some(too_large) = self.too_large {
            base.too_large = too_large;
        }
        if let Some(verify) = self.verify_crc {
            base.verify_crc = verify;
        }
        if let Some(n) = self.handshake_attempts {
            base.handshake_attempts = n;
        }
        base
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Receive engine configuration.
    #[serde(default)]
    pub receive: ReceiveConfig,
    /// Target memory layout. Missing keys take the defaults.
    pub platform: Option<PlatformConfig>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("ymboot.toml")) {
            debug!("Loaded local config from ymboot.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ymboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Effective platform layout.
    pub fn platform(&self) -> PlatformConfig {
        self.platform
            .clone()
            .unwrap_or_default()
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Port config
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }

        // Receive config
        let receive = other.receive;
        if receive.byte_timeout_ms.is_some() {
            self.receive.byte_timeout_ms = receive.byte_timeout_ms;
        }
        if receive.max_errors.is_some() {
            self.receive.max_errors = receive.max_errors;
        }
        if receive.retry.is_some() {
            self.receive.retry = receive.retry;
        }
        if receive.too_large.is_some() {
            self.receive.too_large = receive.too_large;
        }
        if receive.verify_crc.is_some() {
            self.receive.verify_crc = receive.verify_crc;
        }
        if receive.handshake_attempts.is_some() {
            self.receive.handshake_attempts = receive.handshake_attempts;
        }

        // Platform is replaced as a whole
        if other.platform.is_some() {
            self.platform = other.platform;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.receive.retry.is_none());
        assert_eq!(config.platform(), PlatformConfig::default());
    }

    #[test]
    fn test_empty_receive_config_keeps_library_defaults() {
        let applied = ReceiveConfig::default().apply(YmodemConfig::default());
        assert_eq!(applied.byte_timeout, Duration::from_millis(5000));
        assert_eq!(applied.max_errors, 5);
        assert_eq!(applied.retry, RetryPolicy::Bounded);
        assert_eq!(applied.too_large, TooLargePolicy::Abort);
        assert!(!applied.verify_crc);
        assert_eq!(applied.handshake_attempts, 0);
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_serial() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.port.connection.serial = Some("/dev/ttyACM0".to_string());
        other.receive.retry = Some(RetryPolicy::SingleShot);

        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.receive.retry, Some(RetryPolicy::SingleShot));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyACM0".to_string());
        base.port.connection.baud = Some(115200);
        base.receive.byte_timeout_ms = Some(30_000);

        let other = Config::default(); // all None
        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.port.connection.baud, Some(115200));
        assert_eq!(base.receive.byte_timeout_ms, Some(30_000));
    }

    #[test]
    fn test_config_merge_platform() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.platform = Some(PlatformConfig {
            flash_size: 512 * 1024,
            ..PlatformConfig::default()
        });
        base.merge(other);
        assert_eq!(base.platform().flash_size, 512 * 1024);
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port.connection]
serial = "/dev/ttyACM0"
baud = 921600

[receive]
byte_timeout_ms = 30000
max_errors = 10
retry = "single-shot"
too_large = "continue"
verify_crc = true
handshake_attempts = 20

[platform]
flash_size = 524288
firmware_offset = 0x10000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.port.connection.baud, Some(921600));

        let receive = config.receive.apply(YmodemConfig::default());
        assert_eq!(receive.byte_timeout, Duration::from_secs(30));
        assert_eq!(receive.max_errors, 10);
        assert_eq!(receive.retry, RetryPolicy::SingleShot);
        assert_eq!(receive.too_large, TooLargePolicy::Continue);
        assert!(receive.verify_crc);
        assert_eq!(receive.handshake_attempts, 20);

        let platform = config.platform();
        assert_eq!(platform.flash_size, 524288);
        assert_eq!(platform.firmware_offset, 0x10000);
        // Unset keys keep their defaults
        assert_eq!(platform.base_address, 0x0800_0000);
        assert_eq!(platform.vector_offset, 0xC000);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.port.connection.serial.is_none());
        assert!(config.platform.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_policy() {
        let result: Result<Config, _> = toml::from_str("[receive]\nretry = \"forever\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.port.connection.serial = Some("COM3".to_string());
        config.receive.too_large = Some(TooLargePolicy::Continue);
        config.platform = Some(PlatformConfig::default());

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.port.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(deserialized.receive.too_large, Some(TooLargePolicy::Continue));
        assert_eq!(deserialized.platform(), PlatformConfig::default());
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(&path, r#"
[port.connection]
serial = "/dev/ttyUSB1"
[receive]
retry = "bounded"
"#).unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.receive.retry, Some(RetryPolicy::Bounded));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        // Should return default
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path_shape() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("ymboot"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
