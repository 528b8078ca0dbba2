//! Configuration management for Synth GW
//!
//! Handles loading and parsing of the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,
}

/// MIDI output device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Output device: `auto`, `port`, `console`, or `none`
    #[serde(default = "default_device")]
    pub device: String,

    /// Device configuration string; for port devices this is a port name
    /// substring or numeric index. May carry the legacy `delaysysex` token.
    #[serde(default)]
    pub conf: String,

    /// Pace sysex output for buffer-constrained synthesizers
    #[serde(default)]
    pub delay_sysex: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            conf: String::new(),
            delay_sysex: false,
        }
    }
}

/// Raw output capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// File the raw message bytes are appended to
    pub path: String,
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

impl MidiConfig {
    /// Fold the legacy `delaysysex` token embedded in the device
    /// configuration string into the `delay_sysex` flag.
    pub fn normalize(&mut self) {
        if let Some(pos) = self.conf.find("delaysysex") {
            self.conf.replace_range(pos..pos + "delaysysex".len(), "");
            self.conf = self.conf.trim().to_string();
            self.delay_sysex = true;
        }
    }
}

/// Load configuration from a YAML file.
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut config: AppConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.midi.normalize();
    Ok(config)
}
