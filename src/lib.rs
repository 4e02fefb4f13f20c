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

//! A sample-based drum machine engine for live performance.
//!
//! MIDI triggers arrive on an intake thread, are turned into notes against the
//! active drum kit, and are mixed into stereo buffers on the audio thread. Kits
//! can be swapped while notes from the previous kit are still ringing out.

pub mod audio;
pub mod config;
pub mod engine;
pub mod kit;
pub mod midi;
pub mod trigger;

#[cfg(test)]
mod testutil;
