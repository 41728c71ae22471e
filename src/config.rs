use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::info;
use serde::Deserialize;

/// Runtime settings, loaded from `sensorlog.json` in the working directory.
/// A missing file means defaults; a malformed one aborts startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// "ble", "usb", or "sim" for the built-in simulated device.
    pub connection: String,
    pub device_to_open: String,
    /// Channel ids passed to the driver (1 = force, 2 = respiration rate).
    pub channels: Vec<u32>,
    pub read_interval_seconds: f64,
    pub auto_export_interval_minutes: f64,
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: "ble".to_owned(),
            device_to_open: "GDX-RB 0K2035X5".to_owned(),
            channels: vec![1, 2],
            read_interval_seconds: 0.1,
            auto_export_interval_minutes: 20.0,
            data_dir: "Data".to_owned(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no {} found, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("malformed config file {}", path.display()))?;
        config.validate()?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.read_interval_seconds > 0.0,
            "read_interval_seconds must be positive"
        );
        ensure!(
            self.auto_export_interval_minutes > 0.0,
            "auto_export_interval_minutes must be positive"
        );
        ensure!(!self.channels.is_empty(), "at least one channel is required");
        Ok(())
    }

    /// Acquisition period handed to the driver's `start`.
    pub fn read_period_ms(&self) -> u32 {
        (self.read_interval_seconds * 1000.0).round() as u32
    }
}
