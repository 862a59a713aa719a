//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the ink-frame.toml file.
//! It provides a centralized way to configure the image server, setup portal, panel
//! wiring, refresh schedule, and identity/network probes.
//!
//! Every field has a default, so a partial file only needs the values it changes.

use crate::formats::WireFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "ink-frame.toml";

/// Application configuration loaded from ink-frame.toml
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Image server endpoint and protocol options
    pub server: ServerConfig,
    /// Setup portal shown while unconfigured
    pub portal: PortalConfig,
    /// Panel geometry and wiring
    pub display: DisplayConfig,
    /// Sleep and retry intervals
    pub schedule: ScheduleConfig,
    /// Which interfaces identify the device
    pub identity: IdentityConfig,
    /// Credential store and route table locations
    pub network: NetworkConfig,
}

/// Image server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Full endpoint URL; query parameters are appended per request.
    /// The default is the public zivyobraz.eu CDN.
    pub url: String,
    /// Firmware version reported to the server
    pub firmware: String,
    /// Request timeout in seconds (covers connect and body)
    pub timeout_secs: u64,
    /// Accepted payload encodings. `packed` only accepts the raw 1-bpp
    /// bitmap. The public CDN answers with BMP or the Z1/Z2/Z3 run-length
    /// formats, so pointing `url` at it needs `format = "auto"`.
    /// See `ink-frame.example.toml`.
    pub format: WireFormat,
}

/// Setup portal configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Where the operator registers the device
    pub url: String,
    /// Documentation address, also rendered as a QR code
    pub help_url: String,
}

/// Display configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// E-ink display width in pixels
    pub width: u32,
    /// E-ink display height in pixels
    pub height: u32,
    /// Colour capability reported to the server ("BW")
    pub color_type: String,
    /// GPIO/SPI wiring of the panel HAT
    pub hardware: HardwareConfig,
}

/// Panel wiring (BCM GPIO numbers)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub spi_device: String,
    pub gpio_chip: String,
    /// Data/Command select
    pub dc_pin: u32,
    /// Reset
    pub rst_pin: u32,
    /// Busy input
    pub busy_pin: u32,
}

/// Refresh schedule, all values in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval between successful refreshes
    pub refresh_secs: u64,
    /// Interval between probes while showing setup instructions
    pub config_recheck_secs: u64,
    /// First retry delay after a transient failure
    pub retry_base_secs: u64,
    /// Upper bound for retry delays
    pub retry_max_secs: u64,
    /// Lower clamp for server-directed intervals
    pub min_server_sleep_secs: u64,
    /// Upper clamp for server-directed intervals
    pub max_server_sleep_secs: u64,
}

/// Identity configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Candidate interfaces, most preferred first
    pub interfaces: Vec<String>,
    /// Where interface directories live
    pub sysfs_root: PathBuf,
}

/// Local network checks run before each fetch
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// wpa_supplicant.conf or a NetworkManager connections directory.
    /// When unset the credential check is skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    /// Kernel routing table consulted for a default route.
    /// When unset the route check is skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_table: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: "http://cdn.zivyobraz.eu/index.php".to_string(),
            firmware: "2.4".to_string(),
            timeout_secs: 30,
            format: WireFormat::Packed,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            url: "https://zivyobraz.eu".to_string(),
            help_url: "https://wiki.zivyobraz.eu".to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            width: 800,  // Waveshare 7.5" V2
            height: 480, // Waveshare 7.5" V2
            color_type: "BW".to_string(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        // Waveshare e-Paper HAT pinout
        HardwareConfig {
            spi_device: "/dev/spidev0.0".to_string(),
            gpio_chip: "/dev/gpiochip0".to_string(),
            dc_pin: 25,
            rst_pin: 17,
            busy_pin: 24,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            refresh_secs: 120,
            config_recheck_secs: 300,
            retry_base_secs: 30,
            retry_max_secs: 900,
            min_server_sleep_secs: 60,
            max_server_sleep_secs: 86_400,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            credentials_path: None,
            route_table: Some(PathBuf::from("/proc/net/route")),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            interfaces: vec!["wlan0".to_string()],
            sysfs_root: PathBuf::from("/sys/class/net"),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from ink-frame.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format in {}: {}", path.display(), e);
                    log::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "No config file at {}, using default configuration",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}
