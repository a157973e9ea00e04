//! Looper configuration
//!
//! Stored as TOML. The binary reads `taplooper.toml` from the working
//! directory unless `--config <path>` points elsewhere.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::SessionView;
use crate::audio::metronome::{MAX_BPM, MAX_COUNT_IN_BEATS, MIN_BPM, MetronomeSettings};
use crate::error::LooperError;

pub const DEFAULT_CONFIG_FILE: &str = "taplooper.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub devices: DeviceSettings,
    pub session: SessionSettings,
    pub metronome: MetronomeSettings,
}

/// Which devices to open and how much input to buffer between polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Input device name, default device when absent
    pub input: Option<String>,
    /// Output device name, default device when absent
    pub output: Option<String>,
    /// Capacity of the input transport ring, in seconds of audio
    pub input_ring_seconds: f32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            input_ring_seconds: 2.0,
        }
    }
}

/// Session values applied when the engine starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub bpm: u32,
    pub count_in_beats: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bpm: 120,
            count_in_beats: 4,
        }
    }
}

impl LooperConfig {
    /// Replace out-of-range values with their defaults, logging each one.
    pub fn validated(mut self) -> Self {
        let defaults = SessionSettings::default();
        if let Err(e) =
            LooperError::check_range("bpm", self.session.bpm as i64, MIN_BPM as i64, MAX_BPM as i64)
        {
            log::warn!("config: {}, using {}", e, defaults.bpm);
            self.session.bpm = defaults.bpm;
        }
        if let Err(e) = LooperError::check_range(
            "count_in_beats",
            self.session.count_in_beats as i64,
            0,
            MAX_COUNT_IN_BEATS as i64,
        ) {
            log::warn!("config: {}, using {}", e, defaults.count_in_beats);
            self.session.count_in_beats = defaults.count_in_beats;
        }
        self.metronome.volume = self.metronome.volume.clamp(0.0, 1.0);
        if self.devices.input_ring_seconds.is_nan() || self.devices.input_ring_seconds <= 0.0 {
            self.devices.input_ring_seconds = DeviceSettings::default().input_ring_seconds;
        }
        self
    }

    /// Copy the live tempo, count-in and metronome settings, keeping the
    /// device selection.
    pub fn update_from_session(&mut self, view: &SessionView) {
        self.session.bpm = view.bpm;
        self.session.count_in_beats = view.count_in_beats;
        self.metronome = view.metronome;
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults. An unreadable or invalid file logs a
/// warning and also yields the defaults.
pub fn load_config(path: &Path) -> LooperConfig {
    if !path.exists() {
        log::info!("load_config: {:?} not found, using defaults", path);
        return LooperConfig::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("load_config: loaded {:?}", path);
            config.validated()
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            LooperConfig::default()
        }
    }
}

fn read_config(path: &Path) -> Result<LooperConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

pub fn save_config(config: &LooperConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}
