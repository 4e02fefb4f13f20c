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
use std::sync::Arc;

use super::pool::NoteQueues;
use crate::kit::{Instrument, Submix};

/// Instruments and submixes that left the active kit but may still be
/// referenced by notes. The engine owns them until nothing plays them.
#[derive(Debug, Default)]
pub(super) struct Orphans {
    instruments: Vec<Arc<Instrument>>,
    submixes: Vec<Arc<Submix>>,
}

impl Orphans {
    pub(super) fn adopt_instrument(&mut self, instrument: &Arc<Instrument>) {
        if !self.instruments.iter().any(|i| Arc::ptr_eq(i, instrument)) {
            self.instruments.push(instrument.clone());
        }
    }

    pub(super) fn adopt_submix(&mut self, submix: Arc<Submix>) {
        if !self.submixes.iter().any(|s| Arc::ptr_eq(s, &submix)) {
            self.submixes.push(submix);
        }
    }

    /// Forgets submixes that a kit has taken back.
    pub(super) fn forget_reused_submixes(&mut self) {
        self.submixes.retain(|s| s.is_orphaned());
    }

    pub(super) fn submixes(&self) -> &[Arc<Submix>] {
        &self.submixes
    }

    pub(super) fn counts(&self) -> (usize, usize) {
        (self.instruments.len(), self.submixes.len())
    }

    /// Removes every orphan that no pending or playing note references and
    /// hands them back so the caller can release them outside of any lock.
    pub(super) fn reclaim(&mut self, queues: &NoteQueues) -> Reclaimed {
        let (kept, instruments): (Vec<_>, Vec<_>) = self
            .instruments
            .drain(..)
            .partition(|instrument| queues.references(instrument));
        self.instruments = kept;

        let (kept, submixes): (Vec<_>, Vec<_>) = self
            .submixes
            .drain(..)
            .partition(|submix| !submix.is_orphaned() || queues.references_submix(submix));
        self.submixes = kept;

        Reclaimed {
            instruments,
            submixes,
        }
    }
}

/// Orphans released by a reclaim pass.
#[derive(Debug, Default)]
pub(super) struct Reclaimed {
    pub instruments: Vec<Arc<Instrument>>,
    pub submixes: Vec<Arc<Submix>>,
}

impl Reclaimed {
    pub(super) fn is_empty(&self) -> bool {
        self.instruments.is_empty() && self.submixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclaim_keeps_referenced() {
        let toms = Arc::new(Submix::new("toms"));
        toms.set_orphaned(true);
        let cymbals = Arc::new(Submix::new("cymbals"));
        cymbals.set_orphaned(true);

        let tom = Arc::new(Instrument::new("tom", 45).with_submix(&toms));
        let crash = Arc::new(Instrument::new("crash", 49).with_submix(&cymbals));

        let mut queues = NoteQueues::new(2, None);
        let mut note = queues.acquire().unwrap();
        note.bind(&tom, 0, 100);
        queues.enqueue(note);

        let mut orphans = Orphans::default();
        orphans.adopt_instrument(&tom);
        orphans.adopt_instrument(&crash);
        orphans.adopt_instrument(&crash);
        orphans.adopt_submix(toms.clone());
        orphans.adopt_submix(cymbals.clone());
        assert_eq!(orphans.counts(), (2, 2));

        let reclaimed = orphans.reclaim(&queues);
        assert_eq!(reclaimed.instruments.len(), 1);
        assert!(Arc::ptr_eq(&reclaimed.instruments[0], &crash));
        assert_eq!(reclaimed.submixes.len(), 1);
        assert!(Arc::ptr_eq(&reclaimed.submixes[0], &cymbals));
        assert_eq!(orphans.counts(), (1, 1));
    }

    #[test]
    fn test_forget_reused_submixes() {
        let toms = Arc::new(Submix::new("toms"));
        toms.set_orphaned(true);
        let mut orphans = Orphans::default();
        orphans.adopt_submix(toms.clone());

        toms.set_orphaned(false);
        orphans.forget_reused_submixes();
        assert_eq!(orphans.counts(), (0, 0));
        assert!(Reclaimed::default().is_empty());
    }
}
