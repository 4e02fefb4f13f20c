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

//! The note pool and its three queues.
//!
//! Every note the engine has ever allocated lives in exactly one of
//! `available`, `pending` or `playing`. Notes move between the queues by value,
//! so a note cannot be in two places at once.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::kit::{Instrument, Note, Submix};

/// A snapshot of the queue sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteCounts {
    pub available: usize,
    pub pending: usize,
    pub playing: usize,
    /// Every note ever allocated. Always the sum of the three queues.
    pub allocated: usize,
}

pub(super) struct NoteQueues {
    available: VecDeque<Note>,
    pending: VecDeque<Note>,
    playing: VecDeque<Note>,
    allocated: usize,
    max_pool_size: Option<usize>,
}

impl NoteQueues {
    /// Creates the queues with `initial_size` notes ready for use.
    pub(super) fn new(initial_size: usize, max_pool_size: Option<usize>) -> NoteQueues {
        let initial_size = max_pool_size.map_or(initial_size, |max| initial_size.min(max));
        NoteQueues {
            available: (0..initial_size).map(|_| Note::new()).collect(),
            pending: VecDeque::with_capacity(initial_size),
            playing: VecDeque::with_capacity(initial_size),
            allocated: initial_size,
            max_pool_size,
        }
    }

    /// Takes the least recently released note, allocating a new one if none
    /// are available. Returns None only when the pool is capped and exhausted.
    pub(super) fn acquire(&mut self) -> Option<Note> {
        if let Some(note) = self.available.pop_back() {
            return Some(note);
        }
        if self
            .max_pool_size
            .is_some_and(|max| self.allocated >= max)
        {
            return None;
        }
        self.allocated += 1;
        Some(Note::new())
    }

    pub(super) fn enqueue(&mut self, note: Note) {
        self.pending.push_front(note);
    }

    /// Moves at most one pending note to playing.
    pub(super) fn promote_one(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(note) => {
                self.playing.push_front(note);
                true
            }
            None => false,
        }
    }

    /// Finishes every playing note past the limit. Newer notes sit at the
    /// front, so the oldest go first. Returns the number of notes finished.
    pub(super) fn enforce_polyphony(&mut self, max_polyphony: Option<usize>) -> usize {
        let Some(max) = max_polyphony else {
            return 0;
        };
        let mut finished = 0;
        for note in self.playing.iter_mut().skip(max) {
            if !note.is_finished() {
                note.finish();
                finished += 1;
            }
        }
        finished
    }

    /// Returns finished notes from pending and playing to the available queue.
    pub(super) fn release_finished(&mut self) -> usize {
        release(&mut self.pending, &mut self.available) + release(&mut self.playing, &mut self.available)
    }

    /// Cancels every pending or playing note of the given instrument.
    pub(super) fn cancel_for(&mut self, instrument: &Arc<Instrument>) -> usize {
        let mut cancelled = 0;
        for note in self.pending.iter_mut().chain(self.playing.iter_mut()) {
            if !note.is_finished() && note.is_for(instrument) {
                note.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    fn live(&self) -> impl Iterator<Item = &Note> {
        self.pending
            .iter()
            .chain(self.playing.iter())
            .filter(|note| !note.is_finished())
    }

    /// Whether a pending or playing note still plays the given instrument.
    pub(super) fn references(&self, instrument: &Arc<Instrument>) -> bool {
        self.live()
            .any(|note| std::ptr::eq(note.instrument_ptr(), Arc::as_ptr(instrument)))
    }

    /// Whether a pending or playing note's instrument routes to the given submix.
    pub(super) fn references_submix(&self, submix: &Arc<Submix>) -> bool {
        let submix = Arc::downgrade(submix);
        self.live()
            .filter_map(Note::instrument)
            .any(|instrument| instrument.routes_to(&submix))
    }

    pub(super) fn playing(&self) -> &VecDeque<Note> {
        &self.playing
    }

    pub(super) fn playing_mut(&mut self) -> &mut VecDeque<Note> {
        &mut self.playing
    }

    /// Whether any playing note has not yet finished.
    pub(super) fn is_playing(&self) -> bool {
        self.playing.iter().any(|note| !note.is_finished())
    }

    pub(super) fn counts(&self) -> NoteCounts {
        NoteCounts {
            available: self.available.len(),
            pending: self.pending.len(),
            playing: self.playing.len(),
            allocated: self.allocated,
        }
    }

    pub(super) fn set_max_pool_size(&mut self, max_pool_size: Option<usize>) {
        self.max_pool_size = max_pool_size;
    }
}

/// Moves finished notes from `from` to the front of `to`, keeping the order of
/// the rest. Does not allocate.
fn release(from: &mut VecDeque<Note>, to: &mut VecDeque<Note>) -> usize {
    let mut released = 0;
    let mut i = 0;
    while i < from.len() {
        if from[i].is_finished() {
            if let Some(note) = from.remove(i) {
                to.push_front(note);
                released += 1;
            }
        } else {
            i += 1;
        }
    }
    released
}
