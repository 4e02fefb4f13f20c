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

//! The drum kit data model: samples, instruments, submixes, scenes and notes.

use std::path::Path;

mod drumkit;
mod error;
mod instrument;
mod note;
mod sample;
mod scene;
mod submix;

pub use drumkit::Drumkit;
pub use error::{KitError, SampleError};
pub use instrument::{Instrument, InstrumentLayer};
pub use note::Note;
pub use sample::{Sample, SampleLoadOptions};
pub use scene::{Scene, SceneSetting};
pub use submix::Submix;

/// The highest MIDI note or velocity value.
pub const MAX_MIDI_VALUE: u8 = 127;

/// Populates a drum kit from a description on disk.
///
/// The kit handed to the loader may already contain submixes carried over from
/// the kit being replaced. A loader that reuses one of those submixes must clear
/// its orphaned flag.
pub trait KitLoader: Send + Sync {
    /// Loads the kit at the given path into the given kit.
    fn load_into(&self, path: &Path, kit: &mut Drumkit) -> Result<(), KitError>;

    /// Loads the kit at the given path into a fresh kit.
    fn load(&self, path: &Path) -> Result<Drumkit, KitError> {
        let mut kit = Drumkit::default();
        self.load_into(path, &mut kit)?;
        Ok(kit)
    }
}

impl<F> KitLoader for F
where
    F: Fn(&Path, &mut Drumkit) -> Result<(), KitError> + Send + Sync,
{
    fn load_into(&self, path: &Path, kit: &mut Drumkit) -> Result<(), KitError> {
        self(path, kit)
    }
}

/// Writes a drum kit description to disk.
pub trait KitSaver {
    /// Saves the given kit to the given path.
    fn save(&self, path: &Path, kit: &Drumkit) -> Result<(), KitError>;
}
