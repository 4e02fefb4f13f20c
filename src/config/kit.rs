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

//! The YAML kit file format.
//!
//! ```yaml
//! name: rock
//! level: 90
//! instruments:
//!   - note: 36
//!     name: kick
//!     layers:
//!       - velocity: [0, 127]
//!         file: kick.wav
//!   - note: 42
//!     name: closed hat
//!     submix: hats
//!     victims: [46]
//!     layers:
//!       - velocity: [0, 127]
//!         file: hat-closed.wav
//! scenes:
//!   - name: quiet
//!     settings:
//!       - instrument: kick
//!         level: 50
//! selected_scene: quiet
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, span, warn, Level};

use crate::kit::{
    Drumkit, Instrument, InstrumentLayer, KitError, KitLoader, KitSaver, Sample,
    SampleLoadOptions, Scene, SceneSetting, MAX_MIDI_VALUE,
};

/// The name that selects instruments without a submix in `included_submixes`.
pub const MAIN_SUBMIX: &str = "[main]";

const DEFAULT_LEVEL: u32 = 100;

/// A kit as it appears on disk.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct KitFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    instruments: Vec<InstrumentEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scenes: Vec<SceneEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_scene: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct InstrumentEntry {
    note: u32,
    name: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    pan: i32,
    #[serde(default)]
    pitch: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    victims: Vec<u32>,
    #[serde(default)]
    layers: Vec<LayerEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct LayerEntry {
    velocity: [u32; 2],
    file: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SceneEntry {
    name: String,
    #[serde(default)]
    settings: Vec<SceneSettingEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SceneSettingEntry {
    instrument: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    pan: i32,
    #[serde(default)]
    pitch: i32,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    solo: bool,
}

/// A level of zero or less means full level.
fn normalize_level(level: i64) -> u32 {
    if level <= 0 {
        DEFAULT_LEVEL
    } else {
        u32::try_from(level).unwrap_or(u32::MAX)
    }
}

impl KitFile {
    /// Captures the given kit in its on-disk form.
    pub fn from_drumkit(kit: &Drumkit) -> KitFile {
        KitFile {
            name: kit.name().to_string(),
            level: i64::from(kit.level()),
            instruments: kit
                .all_instruments()
                .map(|instrument| InstrumentEntry {
                    note: u32::from(instrument.note()),
                    name: instrument.name().to_string(),
                    level: i64::from(instrument.level()),
                    pan: instrument.pan(),
                    pitch: instrument.pitch(),
                    submix: instrument.submix_name().map(str::to_string),
                    victims: instrument.victims().iter().map(|v| u32::from(*v)).collect(),
                    layers: instrument
                        .layers()
                        .iter()
                        .map(|layer| LayerEntry {
                            velocity: [
                                u32::from(layer.velocity_lo()),
                                u32::from(layer.velocity_hi()),
                            ],
                            file: layer.file().to_path_buf(),
                        })
                        .collect(),
                })
                .collect(),
            scenes: kit
                .scenes()
                .iter()
                .map(|scene| SceneEntry {
                    name: scene.name().to_string(),
                    settings: scene
                        .settings()
                        .iter()
                        .map(|s| SceneSettingEntry {
                            instrument: s.instrument.clone(),
                            level: i64::from(s.level),
                            pan: s.pan,
                            pitch: s.pitch,
                            mute: s.muted,
                            solo: s.soloed,
                        })
                        .collect(),
                })
                .collect(),
            selected_scene: kit.selected_scene().map(str::to_string),
        }
    }

    /// Checks everything that can be checked without touching sample files.
    fn validate(&self) -> Result<(), KitError> {
        for entry in &self.instruments {
            if entry.note > u32::from(MAX_MIDI_VALUE) {
                return Err(KitError::InvalidNote(entry.note));
            }
            if entry.name.trim().is_empty() {
                return Err(KitError::MissingName(entry.note as u8));
            }
            for layer in &entry.layers {
                let [lo, hi] = layer.velocity;
                if lo > hi || hi > u32::from(MAX_MIDI_VALUE) {
                    return Err(KitError::InvalidVelocityRange { lo, hi });
                }
            }
        }
        Ok(())
    }
}

/// Options applied while loading a kit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KitOptions {
    /// Samples are resampled to this rate.
    pub sample_rate: Option<u32>,
    /// Samples are truncated to this many frames.
    pub max_samples: Option<usize>,
    /// Drop every submix assignment.
    pub ignore_ports: bool,
    /// Only load instruments in these submixes. Empty loads everything.
    pub included_submixes: Vec<String>,
}

impl KitOptions {
    fn includes(&self, submix: Option<&str>) -> bool {
        if self.included_submixes.is_empty() {
            return true;
        }
        let submix = submix.unwrap_or(MAIN_SUBMIX);
        self.included_submixes.iter().any(|s| s == submix)
    }

    fn sample_options(&self) -> SampleLoadOptions {
        SampleLoadOptions {
            max_frames: self.max_samples,
            target_sample_rate: self.sample_rate,
        }
    }
}

type Progress = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Loads and saves kits in the YAML format.
#[derive(Default)]
pub struct YamlKit {
    options: KitOptions,
    progress: Option<Progress>,
}

impl YamlKit {
    pub fn new(options: KitOptions) -> YamlKit {
        YamlKit {
            options,
            progress: None,
        }
    }

    /// Sets a callback that receives a message for every sample file and
    /// instrument. Returning false aborts the load.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    fn report(&self, message: &str) -> bool {
        match &self.progress {
            Some(progress) => progress(message),
            None => true,
        }
    }

    /// Reads and parses a kit file without loading any samples.
    pub fn read(path: &Path) -> Result<KitFile, KitError> {
        let contents = fs::read_to_string(path).map_err(|source| KitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yml::from_str(&contents).map_err(|source| KitError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Populates the kit from a parsed file. Relative sample paths resolve
    /// against `base`.
    pub fn build(&self, file: &KitFile, base: &Path, kit: &mut Drumkit) -> Result<(), KitError> {
        file.validate()?;

        kit.set_name(&file.name);
        kit.set_level(normalize_level(file.level));

        let entries: Vec<&InstrumentEntry> = file
            .instruments
            .iter()
            .filter(|entry| self.options.includes(entry.submix.as_deref()))
            .collect();
        let known_notes: HashSet<u32> = entries.iter().map(|entry| entry.note).collect();

        let samples = self.decode_samples(&entries, base)?;

        for (entry, samples) in entries.iter().zip(samples) {
            if !self.report(&format!("Instrument {}", entry.name)) {
                return Err(KitError::Aborted);
            }

            let mut instrument = Instrument::new(&entry.name, entry.note as u8)
                .with_level(normalize_level(entry.level))
                .with_pan(entry.pan)
                .with_pitch(entry.pitch);

            if let Some(submix) = &entry.submix {
                if !self.options.ignore_ports {
                    let submix = kit.submix_or_insert(submix);
                    instrument = instrument.with_submix(&submix);
                }
            }

            for victim in &entry.victims {
                if known_notes.contains(victim) {
                    instrument = instrument.with_victim(*victim as u8);
                } else {
                    debug!(
                        instrument = entry.name,
                        victim, "Ignoring victim with no instrument"
                    );
                }
            }

            for (layer, sample) in entry.layers.iter().zip(samples) {
                let [lo, hi] = layer.velocity;
                let layer = match sample {
                    Some(sample) => InstrumentLayer::new(lo, hi, sample)?,
                    None => InstrumentLayer::unloaded(lo, hi, resolve(base, &layer.file))?,
                };
                instrument = instrument.with_layer(layer);
            }

            kit.add(entry.note as u8, instrument);
        }

        for entry in &file.scenes {
            let mut scene = Scene::new(
                &entry.name,
                entry
                    .settings
                    .iter()
                    .map(|s| SceneSetting {
                        instrument: s.instrument.clone(),
                        level: normalize_level(s.level),
                        pan: s.pan,
                        pitch: s.pitch,
                        muted: s.mute,
                        soloed: s.solo,
                    })
                    .collect(),
            );
            scene.reconcile(kit);
            kit.add_scene(scene);
        }

        kit.set_selected_scene(file.selected_scene.as_deref());
        if let Some(selected) = &file.selected_scene {
            if !kit.apply_scene(selected) {
                warn!(scene = selected, "Selected scene does not exist");
            }
        }

        Ok(())
    }

    /// Decodes every layer's sample in parallel. Layers whose file fails to
    /// decode come back as None.
    fn decode_samples(
        &self,
        entries: &[&InstrumentEntry],
        base: &Path,
    ) -> Result<Vec<Vec<Option<Sample>>>, KitError> {
        let aborted = AtomicBool::new(false);
        let sample_options = self.options.sample_options();

        let samples: Vec<Vec<Option<Sample>>> = entries
            .par_iter()
            .map(|entry| {
                entry
                    .layers
                    .iter()
                    .map(|layer| {
                        if aborted.load(Ordering::Relaxed) {
                            return None;
                        }
                        let path = resolve(base, &layer.file);
                        if !self.report(&format!("Sample {}", path.display())) {
                            aborted.store(true, Ordering::Relaxed);
                            return None;
                        }
                        match Sample::load(&path, sample_options) {
                            Ok(sample) => Some(sample),
                            Err(e) => {
                                warn!(
                                    instrument = entry.name,
                                    path = ?path,
                                    err = %e,
                                    "Unable to load sample, layer will be silent"
                                );
                                None
                            }
                        }
                    })
                    .collect()
            })
            .collect();

        if aborted.load(Ordering::Relaxed) {
            return Err(KitError::Aborted);
        }
        Ok(samples)
    }
}

fn resolve(base: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base.join(file)
    }
}

impl KitLoader for YamlKit {
    fn load_into(&self, path: &Path, kit: &mut Drumkit) -> Result<(), KitError> {
        let span = span!(Level::INFO, "load kit", path = ?path);
        let _enter = span.enter();

        let file = YamlKit::read(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.build(&file, base, kit)?;

        info!(
            kit = kit.name(),
            instruments = kit.instrument_count(),
            submixes = kit.submixes().count(),
            scenes = kit.scenes().len(),
            "Kit loaded"
        );
        Ok(())
    }
}

impl KitSaver for YamlKit {
    fn save(&self, path: &Path, kit: &Drumkit) -> Result<(), KitError> {
        let serialized =
            serde_yml::to_string(&KitFile::from_drumkit(kit)).map_err(KitError::Serialize)?;
        fs::write(path, serialized).map_err(|source| KitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(kit = kit.name(), path = ?path, "Kit saved");
        Ok(())
    }
}

impl fmt::Debug for YamlKit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YamlKit")
            .field("options", &self.options)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
