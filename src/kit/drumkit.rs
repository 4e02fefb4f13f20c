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
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::instrument::{Instrument, DEFAULT_LEVEL};
use super::scene::Scene;
use super::submix::Submix;

/// A set of instruments keyed by MIDI note, plus the submixes they route to.
pub struct Drumkit {
    name: String,
    level: AtomicU32,
    instruments: BTreeMap<u8, Arc<Instrument>>,
    submixes: BTreeMap<String, Arc<Submix>>,
    scenes: Vec<Scene>,
    selected_scene: Option<String>,
}

impl Drumkit {
    /// Creates a new, empty kit.
    pub fn new(name: &str) -> Drumkit {
        Drumkit {
            name: name.to_string(),
            level: AtomicU32::new(DEFAULT_LEVEL),
            instruments: BTreeMap::new(),
            submixes: BTreeMap::new(),
            scenes: Vec::new(),
            selected_scene: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// The master level of the kit, in percent.
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Relaxed);
    }

    /// The kit level as a gain factor. A level of zero means full level.
    pub fn gain(&self) -> f32 {
        match self.level() {
            0 => 1.0,
            level => level as f32 / 100.0,
        }
    }

    /// Adds an instrument under the given note, replacing any instrument
    /// already mapped there.
    pub fn add(&mut self, note: u8, mut instrument: Instrument) -> Arc<Instrument> {
        instrument.set_note(note);
        let instrument = Arc::new(instrument);
        if let Some(replaced) = self.instruments.insert(note, instrument.clone()) {
            debug!(
                note,
                replaced = replaced.name(),
                instrument = instrument.name(),
                "Replacing instrument"
            );
        }
        instrument
    }

    pub fn find_by_note(&self, note: u8) -> Option<&Arc<Instrument>> {
        self.instruments.get(&note)
    }

    pub fn find_instrument_by_name(&self, name: &str) -> Option<&Arc<Instrument>> {
        self.instruments.values().find(|i| i.name() == name)
    }

    /// All instruments ordered by note.
    pub fn all_instruments(&self) -> impl Iterator<Item = &Arc<Instrument>> {
        self.instruments.values()
    }

    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Whether any instrument in the kit is soloed.
    pub fn any_soloed(&self) -> bool {
        self.instruments.values().any(|i| i.is_soloed())
    }

    /// Adds a submix, replacing any submix with the same name.
    pub fn add_submix(&mut self, submix: Arc<Submix>) {
        self.submixes.insert(submix.name().to_string(), submix);
    }

    /// Finds the named submix, adding a new one if the kit has none. Either way
    /// the returned submix is no longer orphaned.
    pub fn submix_or_insert(&mut self, name: &str) -> Arc<Submix> {
        let submix = self
            .submixes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Submix::new(name)))
            .clone();
        submix.set_orphaned(false);
        submix
    }

    pub fn find_submix(&self, name: &str) -> Option<&Arc<Submix>> {
        self.submixes.get(name)
    }

    pub fn remove_submix(&mut self, name: &str) -> Option<Arc<Submix>> {
        self.submixes.remove(name)
    }

    pub fn submixes(&self) -> impl Iterator<Item = &Arc<Submix>> {
        self.submixes.values()
    }

    /// The port names of every submix in the kit.
    pub fn port_names(&self) -> Vec<String> {
        self.submixes
            .values()
            .flat_map(|s| s.port_names().iter().map(|p| p.to_string()))
            .collect()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn add_scene(&mut self, scene: Scene) {
        self.scenes.retain(|s| s.name() != scene.name());
        self.scenes.push(scene);
    }

    pub fn selected_scene(&self) -> Option<&str> {
        self.selected_scene.as_deref()
    }

    pub fn set_selected_scene(&mut self, scene: Option<&str>) {
        self.selected_scene = scene.map(str::to_string);
    }

    /// Applies the named scene's settings to the kit's instruments.
    pub fn apply_scene(&self, name: &str) -> bool {
        match self.scenes.iter().find(|s| s.name() == name) {
            Some(scene) => {
                scene.apply(self);
                true
            }
            None => false,
        }
    }
}

impl Default for Drumkit {
    fn default() -> Self {
        Drumkit::new("")
    }
}

impl fmt::Display for Drumkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (level {})", self.name, self.level())?;
        for instrument in self.instruments.values() {
            writeln!(f, "  {}", instrument)?;
            for layer in instrument.layers() {
                writeln!(
                    f,
                    "    {}-{}: {}{}",
                    layer.velocity_lo(),
                    layer.velocity_hi(),
                    layer.file().display(),
                    if layer.sample().is_some() {
                        ""
                    } else {
                        " (not loaded)"
                    }
                )?;
            }
        }
        for submix in self.submixes.values() {
            writeln!(f, "  submix {}", submix)?;
        }
        for scene in &self.scenes {
            writeln!(f, "  scene {}", scene.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Drumkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drumkit")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("instruments", &self.instruments.len())
            .field("submixes", &self.submixes.keys().collect::<Vec<_>>())
            .field("scenes", &self.scenes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sets_note_and_last_write_wins() {
        let mut kit = Drumkit::new("rock");
        kit.add(36, Instrument::new("kick", 0));
        kit.add(36, Instrument::new("kick 2", 0));

        assert_eq!(kit.instrument_count(), 1);
        let kick = kit.find_by_note(36).unwrap();
        assert_eq!(kick.name(), "kick 2");
        assert_eq!(kick.note(), 36);
        assert!(kit.find_by_note(38).is_none());
    }

    #[test]
    fn test_find_instrument_by_name() {
        let mut kit = Drumkit::new("rock");
        kit.add(36, Instrument::new("kick", 36));
        kit.add(38, Instrument::new("snare", 38));

        assert_eq!(kit.find_instrument_by_name("snare").unwrap().note(), 38);
        assert!(kit.find_instrument_by_name("cowbell").is_none());
        assert_eq!(
            kit.all_instruments().map(|i| i.note()).collect::<Vec<_>>(),
            vec![36, 38]
        );
    }

    #[test]
    fn test_submix_or_insert_reuses_and_clears_orphaned() {
        let mut kit = Drumkit::new("rock");
        let carried = Arc::new(Submix::new("toms"));
        carried.set_orphaned(true);
        kit.add_submix(carried.clone());

        let found = kit.submix_or_insert("toms");
        assert!(Arc::ptr_eq(&found, &carried));
        assert!(!carried.is_orphaned());

        let created = kit.submix_or_insert("cymbals");
        assert!(!created.is_orphaned());
        assert_eq!(kit.submixes().count(), 2);
    }

    #[test]
    fn test_port_names_and_remove_submix() {
        let mut kit = Drumkit::new("rock");
        kit.submix_or_insert("toms");
        kit.submix_or_insert("cymbals");

        assert_eq!(
            kit.port_names(),
            vec!["cymbals_L", "cymbals_R", "toms_L", "toms_R"]
        );

        let removed = kit.remove_submix("toms").unwrap();
        assert_eq!(removed.name(), "toms");
        assert!(kit.find_submix("toms").is_none());
        assert_eq!(kit.port_names(), vec!["cymbals_L", "cymbals_R"]);
    }

    #[test]
    fn test_gain_treats_zero_as_full_level() {
        let kit = Drumkit::new("rock");
        assert_eq!(kit.gain(), 1.0);
        kit.set_level(0);
        assert_eq!(kit.gain(), 1.0);
        kit.set_level(50);
        assert_eq!(kit.gain(), 0.5);
    }

    #[test]
    fn test_any_soloed() {
        let mut kit = Drumkit::new("rock");
        let snare = kit.add(38, Instrument::new("snare", 38));
        assert!(!kit.any_soloed());
        snare.set_soloed(true);
        assert!(kit.any_soloed());
    }
}
