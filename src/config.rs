//! Client configuration
//!
//! Loaded from a TOML file; every section falls back to defaults that match
//! a DAQ firmware running on the local machine.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub receiver: ReceiverConfig,
    pub daq: DaqDefaults,
    pub logging: LoggingConfig,
}

/// How IQ frames reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataInterface {
    /// IQ frames over the firmware's TCP data server
    #[default]
    Ethernet,
    /// IQ frames through the firmware's shared memory buffers
    SharedMemory,
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Host running the DAQ firmware
    pub address: String,
    /// IQ data server port
    pub data_port: u16,
    /// Control interface port
    pub control_port: u16,
    /// `shared_memory` needs a segment handed to `AcquisitionClient::with_shared_memory`
    pub interface: DataInterface,
    /// Socket receive buffer size in bytes
    pub receive_buffer_size: usize,
    pub connect_timeout_ms: u64,
    /// Longest silence on the data connection before it is dropped
    pub read_timeout_ms: u64,
    /// Bound on waiting for a control acknowledgement
    pub ack_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            data_port: DEFAULT_DATA_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            interface: DataInterface::Ethernet,
            receive_buffer_size: RECEIVE_BUFFER_SIZE,
            connect_timeout_ms: 3000,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }
}

impl ReceiverConfig {
    pub fn data_addr(&self) -> Result<SocketAddr> {
        resolve(&self.address, self.data_port)
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        resolve(&self.address, self.control_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| Error::Config(format!("no address for {}:{}", host, port)))
}

/// Tuning restored on every (re)connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqDefaults {
    /// Center frequency in Hz
    pub center_freq_hz: u64,
    /// Receiver gain in tenths of dB, applied to all channels
    pub gain_tenths: u32,
    /// Start with automatic gain control instead of `gain_tenths`
    pub agc: bool,
}

impl Default for DaqDefaults {
    fn default() -> Self {
        Self {
            center_freq_hz: DEFAULT_CENTER_FREQ_HZ,
            gain_tenths: 0,
            agc: false,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Default location in the user's config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "daq-iq-client")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let receiver = &self.receiver;
        if receiver.data_port == 0 || receiver.control_port == 0 {
            return Err(Error::Config("ports must be non-zero".into()));
        }
        if receiver.connect_timeout_ms == 0
            || receiver.read_timeout_ms == 0
            || receiver.ack_timeout_ms == 0
        {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if receiver.receive_buffer_size == 0 {
            return Err(Error::Config("receive buffer size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [receiver]
            address = "192.168.1.20"
            interface = "shared_memory"

            [daq]
            center_freq_hz = 433000000
            "#,
        )
        .unwrap();

        assert_eq!(config.receiver.address, "192.168.1.20");
        assert_eq!(config.receiver.interface, DataInterface::SharedMemory);
        assert_eq!(config.receiver.data_port, DEFAULT_DATA_PORT);
        assert_eq!(config.daq.center_freq_hz, 433_000_000);
        assert!(!config.daq.agc);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.daq.agc = true;
        config.receiver.ack_timeout_ms = 250;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_saved_file_lists_only_used_settings() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(!text.contains("shmem"));
        assert!(text.contains("read_timeout_ms = 5000"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.receiver.ack_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_read_timeout() {
        let mut config = AppConfig::default();
        config.receiver.read_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_addresses_resolve() {
        let config = ReceiverConfig::default();
        assert_eq!(config.data_addr().unwrap().port(), DEFAULT_DATA_PORT);
        assert_eq!(config.control_addr().unwrap().port(), DEFAULT_CONTROL_PORT);
    }
}
