//! Configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysguard_core::modules::softraid::{
    SoftRaidConfig, DEFAULT_HELPER_LIMIT, DEFAULT_SNAPSHOT_LIMIT,
};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Protocol listen address (e.g., "127.0.0.1:3112")
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Scan interval in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Software RAID module configuration
    #[serde(default)]
    pub softraid: SoftRaidSection,

    /// Load average module configuration
    #[serde(default)]
    pub loadavg: LoadAvgSection,
}

/// Software RAID module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftRaidSection {
    /// Whether the module is loaded
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Array list snapshot
    #[serde(default = "default_mdstat")]
    pub mdstat: PathBuf,

    /// Helper binary queried per array
    #[serde(default = "default_mdadm")]
    pub mdadm: PathBuf,

    /// Snapshot buffer size in bytes
    #[serde(default = "default_snapshot_buffer")]
    pub snapshot_buffer: usize,

    /// Helper output buffer size in bytes
    #[serde(default = "default_helper_buffer")]
    pub helper_buffer: usize,

    /// Kill the helper after this many milliseconds (unset waits forever)
    #[serde(default)]
    pub helper_timeout_ms: Option<u64>,
}

impl Default for SoftRaidSection {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            mdstat: default_mdstat(),
            mdadm: default_mdadm(),
            snapshot_buffer: default_snapshot_buffer(),
            helper_buffer: default_helper_buffer(),
            helper_timeout_ms: None,
        }
    }
}

impl SoftRaidSection {
    /// Module configuration for this section.
    pub fn module_config(&self) -> SoftRaidConfig {
        SoftRaidConfig {
            mdstat: self.mdstat.clone(),
            mdadm: self.mdadm.clone(),
            snapshot_limit: self.snapshot_buffer,
            helper_limit: self.helper_buffer,
            ..SoftRaidConfig::default()
        }
    }

    pub fn helper_timeout(&self) -> Option<Duration> {
        self.helper_timeout_ms.map(Duration::from_millis)
    }
}

/// Load average module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAvgSection {
    /// Whether the module is loaded
    #[serde(default = "default_enable")]
    pub enable: bool,
}

impl Default for LoadAvgSection {
    fn default() -> Self {
        Self {
            enable: default_enable(),
        }
    }
}

// Default value functions
fn default_listen() -> String {
    format!("127.0.0.1:{}", sysguard_core::DEFAULT_PORT)
}

fn default_interval() -> u64 {
    2000
}

fn default_enable() -> bool {
    true
}

fn default_mdstat() -> PathBuf {
    PathBuf::from("/proc/mdstat")
}

fn default_mdadm() -> PathBuf {
    PathBuf::from("/sbin/mdadm")
}

fn default_snapshot_buffer() -> usize {
    DEFAULT_SNAPSHOT_LIMIT
}

fn default_helper_buffer() -> usize {
    DEFAULT_HELPER_LIMIT
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Loads configuration, using defaults if the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Tick period between module updates.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval: default_interval(),
            softraid: SoftRaidSection::default(),
            loadavg: LoadAvgSection::default(),
        }
    }
}
