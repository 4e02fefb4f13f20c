// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::kit::KitOptions;

const DEFAULT_AUDIO_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_INITIAL_POOL_SIZE: usize = 8;

/// The engine configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// The kit to load at startup.
    kit: Option<PathBuf>,
    /// The audio output device. Names starting with "mock" select the mock backend.
    audio_device: Option<String>,
    /// The MIDI input device. Names starting with "mock" select the mock device.
    midi_device: Option<String>,
    /// Frames at the end of each sample that are never played.
    sample_end_gap: u32,
    /// The maximum number of playing notes. Unlimited if unset.
    max_polyphony: Option<usize>,
    /// Notes allocated up front.
    initial_pool_size: usize,
    /// The most notes the pool will ever allocate. Unlimited if unset.
    max_pool_size: Option<usize>,
    /// Samples are converted to this rate when loaded.
    sample_rate: u32,
    /// Drop every submix assignment when loading kits.
    ignore_ports: bool,
    /// Truncate samples to this many frames when loading kits.
    max_samples: Option<usize>,
    /// Only load instruments in these submixes. "[main]" selects instruments
    /// without a submix.
    included_submixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            kit: None,
            audio_device: None,
            midi_device: None,
            sample_end_gap: 0,
            max_polyphony: None,
            initial_pool_size: DEFAULT_INITIAL_POOL_SIZE,
            max_pool_size: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            ignore_ports: false,
            max_samples: None,
            included_submixes: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads the config from a YAML file. `SDDM_`-prefixed environment
    /// variables override values from the file.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("SDDM").try_parsing(true))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()
    }

    /// Parses the config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()
    }

    fn validate(self) -> Result<EngineConfig, ConfigError> {
        if let Some(max_pool_size) = self.max_pool_size {
            if max_pool_size < self.initial_pool_size {
                return Err(ConfigError::Invalid(format!(
                    "max_pool_size ({}) is smaller than initial_pool_size ({})",
                    max_pool_size, self.initial_pool_size
                )));
            }
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn kit(&self) -> Option<&Path> {
        self.kit.as_deref()
    }

    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_AUDIO_DEVICE)
    }

    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    pub fn sample_end_gap(&self) -> u32 {
        self.sample_end_gap
    }

    pub fn max_polyphony(&self) -> Option<usize> {
        self.max_polyphony
    }

    pub fn initial_pool_size(&self) -> usize {
        self.initial_pool_size
    }

    pub fn max_pool_size(&self) -> Option<usize> {
        self.max_pool_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The options the kit loader should use.
    pub fn kit_options(&self) -> KitOptions {
        KitOptions {
            sample_rate: Some(self.sample_rate),
            max_samples: self.max_samples,
            ignore_ports: self.ignore_ports,
            included_submixes: self.included_submixes.clone(),
        }
    }

    pub fn with_audio_device(mut self, device: &str) -> Self {
        self.audio_device = Some(device.to_string());
        self
    }

    pub fn with_max_polyphony(mut self, max_polyphony: Option<usize>) -> Self {
        self.max_polyphony = max_polyphony;
        self
    }

    pub fn with_max_pool_size(mut self, max_pool_size: Option<usize>) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_initial_pool_size(mut self, initial_pool_size: usize) -> Self {
        self.initial_pool_size = initial_pool_size;
        self
    }

    pub fn with_sample_end_gap(mut self, sample_end_gap: u32) -> Self {
        self.sample_end_gap = sample_end_gap;
        self
    }
}
