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

//! Scenes are named snapshots of per-instrument mixer settings.

use tracing::debug;

use super::drumkit::Drumkit;
use super::instrument::Instrument;

/// The mixer settings of a single instrument within a scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneSetting {
    pub instrument: String,
    pub level: u32,
    pub pan: i32,
    pub pitch: i32,
    pub muted: bool,
    pub soloed: bool,
}

impl SceneSetting {
    /// Captures the current settings of the given instrument.
    pub fn from_instrument(instrument: &Instrument) -> SceneSetting {
        SceneSetting {
            instrument: instrument.name().to_string(),
            level: instrument.level(),
            pan: instrument.pan(),
            pitch: instrument.pitch(),
            muted: instrument.is_muted(),
            soloed: instrument.is_soloed(),
        }
    }

    /// Writes this setting to the given instrument.
    pub fn apply(&self, instrument: &Instrument) {
        instrument.set_level(self.level);
        instrument.set_pan(self.pan);
        instrument.set_pitch(self.pitch);
        instrument.set_soloed(self.soloed);
        instrument.set_muted(self.muted);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scene {
    name: String,
    settings: Vec<SceneSetting>,
}

impl Scene {
    pub fn new(name: &str, settings: Vec<SceneSetting>) -> Scene {
        Scene {
            name: name.to_string(),
            settings,
        }
    }

    /// Captures the current settings of every instrument in the kit.
    pub fn from_drumkit(name: &str, kit: &Drumkit) -> Scene {
        Scene::new(
            name,
            kit.all_instruments()
                .map(|i| SceneSetting::from_instrument(i))
                .collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &[SceneSetting] {
        &self.settings
    }

    pub fn setting_for(&self, instrument: &str) -> Option<&SceneSetting> {
        self.settings.iter().find(|s| s.instrument == instrument)
    }

    /// Adds settings for any instrument in the kit the scene does not cover,
    /// using the instrument's current values, and drops settings for
    /// instruments the kit does not have.
    pub fn reconcile(&mut self, kit: &Drumkit) {
        self.settings
            .retain(|s| kit.find_instrument_by_name(&s.instrument).is_some());
        for instrument in kit.all_instruments() {
            if self.setting_for(instrument.name()).is_none() {
                self.settings.push(SceneSetting::from_instrument(instrument));
            }
        }
    }

    /// Applies every setting to the matching instrument in the kit.
    pub fn apply(&self, kit: &Drumkit) {
        debug!(scene = self.name, "Applying scene");
        for setting in &self.settings {
            if let Some(instrument) = kit.find_instrument_by_name(&setting.instrument) {
                setting.apply(instrument);
            }
        }
    }
}
