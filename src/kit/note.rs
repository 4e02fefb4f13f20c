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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::instrument::Instrument;

static NEXT_NOTE_ID: AtomicU64 = AtomicU64::new(1);

/// A single playback of one instrument layer. Notes are pooled and reused, so
/// the instrument reference is weak and a note never keeps its instrument
/// alive. While a note references an instrument, the engine owns it through
/// the active kit or its orphans, so the strong reference the audio thread
/// takes while mixing is never the last one.
pub struct Note {
    id: u64,
    instrument: Weak<Instrument>,
    layer: usize,
    velocity: u8,
    number: u8,
    finished: bool,
    cancelled: bool,
    pub(crate) sample_position: f32,
}

impl Note {
    /// Creates a new, unbound note.
    pub fn new() -> Note {
        Note {
            id: NEXT_NOTE_ID.fetch_add(1, Ordering::Relaxed),
            instrument: Weak::new(),
            layer: 0,
            velocity: 0,
            number: 0,
            finished: false,
            cancelled: false,
            sample_position: 0.0,
        }
    }

    /// Binds the note to an instrument layer and resets its playback state.
    pub fn bind(&mut self, instrument: &Arc<Instrument>, layer: usize, velocity: u8) {
        self.instrument = Arc::downgrade(instrument);
        self.layer = layer;
        self.velocity = velocity;
        self.number = instrument.note();
        self.finished = false;
        self.cancelled = false;
        self.sample_position = 0.0;
    }

    /// The pool identity of this note. Stable across reuse.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn instrument(&self) -> Option<Arc<Instrument>> {
        self.instrument.upgrade()
    }

    /// Whether this note plays the given instrument.
    pub fn is_for(&self, instrument: &Arc<Instrument>) -> bool {
        std::ptr::eq(self.instrument.as_ptr(), Arc::as_ptr(instrument))
    }

    pub(crate) fn instrument_ptr(&self) -> *const Instrument {
        self.instrument.as_ptr()
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// The MIDI note number that triggered this note.
    pub fn number(&self) -> u8 {
        self.number
    }

    /// The fractional frame position within the layer's sample.
    pub fn sample_position(&self) -> f32 {
        self.sample_position
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Marks the note finished and clears its instrument's meters.
    pub fn finish(&mut self) {
        self.finished = true;
        if let Some(instrument) = self.instrument.upgrade() {
            instrument.reset_meters();
        }
    }

    /// Finishes the note early.
    pub fn cancel(&mut self) {
        self.finish();
        self.cancelled = true;
    }
}

impl Default for Note {
    fn default() -> Self {
        Note::new()
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("id", &self.id)
            .field("number", &self.number)
            .field("velocity", &self.velocity)
            .field("layer", &self.layer)
            .field("sample_position", &self.sample_position)
            .field("finished", &self.finished)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Note::new();
        let b = Note::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_bind_resets_state() {
        let instrument = Arc::new(Instrument::new("snare", 38));
        let mut note = Note::new();
        note.sample_position = 12.5;
        note.cancel();

        note.bind(&instrument, 2, 90);
        assert!(!note.is_finished());
        assert!(!note.is_cancelled());
        assert_eq!(note.sample_position(), 0.0);
        assert_eq!(note.layer(), 2);
        assert_eq!(note.velocity(), 90);
        assert_eq!(note.number(), 38);
        assert!(note.is_for(&instrument));
    }

    #[test]
    fn test_cancel_finishes_and_clears_meters() {
        let instrument = Arc::new(Instrument::new("snare", 38));
        instrument.raise_meters(80.0, 80.0);

        let mut note = Note::new();
        note.bind(&instrument, 0, 100);
        note.cancel();

        assert!(note.is_finished());
        assert!(note.is_cancelled());
        assert_eq!(instrument.meters(), (0.0, 0.0));
    }

    #[test]
    fn test_note_does_not_own_instrument() {
        let instrument = Arc::new(Instrument::new("snare", 38));
        let other = Arc::new(Instrument::new("kick", 36));
        let mut note = Note::new();
        note.bind(&instrument, 0, 100);
        assert!(!note.is_for(&other));

        drop(instrument);
        assert!(note.instrument().is_none());
        // Finishing a note whose instrument is gone is harmless.
        note.finish();
        assert!(note.is_finished());
    }
}
