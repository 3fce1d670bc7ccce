// src/config.rs
//! Configuration management

use crate::error::{Result, TrackerError};
use crate::monitor::GpsSource;
use crate::recorder::DEFAULT_FLUSH_INTERVAL_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub source_type: String, // "serial", "gpsd"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    /// Where track files go; empty means the per-user data directory
    pub storage_dir: String,
    pub save_interval_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            storage_dir: String::new(),
            save_interval_seconds: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from storage
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| TrackerError::Other(format!("Failed to read config file: {}", e)))?;

        Self::from_json(&contents)
    }

    /// Save configuration to storage
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrackerError::Other(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, contents)
            .map_err(|e| TrackerError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| TrackerError::Other(format!("Failed to parse config file: {}", e)))
    }

    /// Get config file path
    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join(".config").join("gps-tracker").join("config.json"))
    }

    fn home_dir() -> Result<PathBuf> {
        std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| TrackerError::Other("HOME environment variable not set".to_string()))
    }

    /// Directory track files are written to
    pub fn track_dir(&self) -> Result<PathBuf> {
        if !self.storage_dir.is_empty() {
            return Ok(PathBuf::from(&self.storage_dir));
        }

        let data_home = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => Self::home_dir()?.join(".local").join("share"),
        };

        Ok(data_home.join("gps-tracker").join("tracks"))
    }

    /// Build the GPS source described by this configuration
    pub fn gps_source(&self) -> Result<GpsSource> {
        match self.source_type.as_str() {
            "serial" => {
                let port = self
                    .serial_port
                    .clone()
                    .ok_or_else(|| TrackerError::Other("No serial port configured".to_string()))?;
                Ok(GpsSource::Serial {
                    port,
                    baudrate: self.serial_baudrate.unwrap_or(9600),
                })
            }
            "gpsd" => Ok(GpsSource::Gpsd {
                host: self.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: self.gpsd_port.unwrap_or(2947),
            }),
            other => Err(TrackerError::Other(format!("Unknown source type: {}", other))),
        }
    }

    /// Update storage path and flush interval
    pub fn update_settings(&mut self, storage_dir: String, save_interval_seconds: u64) {
        self.storage_dir = storage_dir;
        self.save_interval_seconds = save_interval_seconds;
    }

    /// Apply raw settings-form input.
    ///
    /// An empty path keeps the current directory and an interval that is not
    /// a number keeps the current interval.
    pub fn apply_settings_input(&mut self, path_input: &str, interval_input: &str) {
        let path = match path_input.trim() {
            "" => self.storage_dir.clone(),
            path => path.to_string(),
        };
        let interval = interval_input
            .trim()
            .parse::<u64>()
            .unwrap_or(self.save_interval_seconds);

        self.update_settings(path, interval);
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }
}
