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

//! Instruments and their velocity layers.
//!
//! The structural parts of an instrument (name, note, layers, victims, submix)
//! are fixed once the instrument is shared. The performance parameters (level,
//! pan, pitch, mute/solo and the volume meters) are atomics so the UI and the
//! audio thread can touch them without taking a lock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use super::error::KitError;
use super::sample::Sample;
use super::submix::Submix;
use super::MAX_MIDI_VALUE;

const MUTED: u8 = 0b001;
const SOLOED: u8 = 0b010;
const AUTO_MUTED: u8 = 0b100;

/// The default level of an instrument, in percent.
pub const DEFAULT_LEVEL: u32 = 100;

/// Pan is clamped to this magnitude.
const MAX_PAN: i32 = 100;

/// Pitch below this would stop the playback position from advancing.
const MIN_PITCH: i32 = -99;

/// A sample bound to a velocity range.
#[derive(Clone)]
pub struct InstrumentLayer {
    velocity_lo: u8,
    velocity_hi: u8,
    file: PathBuf,
    sample: Option<Sample>,
}

impl InstrumentLayer {
    /// Creates a new layer for the given velocity range and sample.
    pub fn new(velocity_lo: u32, velocity_hi: u32, sample: Sample) -> Result<Self, KitError> {
        let file = sample.path().to_path_buf();
        let mut layer = InstrumentLayer::unloaded(velocity_lo, velocity_hi, file)?;
        layer.sample = Some(sample);
        Ok(layer)
    }

    /// Creates a layer whose sample could not be decoded. Triggers that select
    /// it produce no sound.
    pub fn unloaded(
        velocity_lo: u32,
        velocity_hi: u32,
        file: impl Into<PathBuf>,
    ) -> Result<Self, KitError> {
        if velocity_lo > velocity_hi || velocity_hi > u32::from(MAX_MIDI_VALUE) {
            return Err(KitError::InvalidVelocityRange {
                lo: velocity_lo,
                hi: velocity_hi,
            });
        }

        Ok(InstrumentLayer {
            velocity_lo: velocity_lo as u8,
            velocity_hi: velocity_hi as u8,
            file: file.into(),
            sample: None,
        })
    }

    pub fn velocity_lo(&self) -> u8 {
        self.velocity_lo
    }

    pub fn velocity_hi(&self) -> u8 {
        self.velocity_hi
    }

    /// Whether the velocity falls in this layer's inclusive range.
    pub fn contains(&self, velocity: u8) -> bool {
        self.velocity_lo <= velocity && velocity <= self.velocity_hi
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn sample(&self) -> Option<&Sample> {
        self.sample.as_ref()
    }
}

impl fmt::Debug for InstrumentLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentLayer")
            .field("velocity", &(self.velocity_lo..=self.velocity_hi))
            .field("file", &self.file)
            .field("loaded", &self.sample.is_some())
            .finish()
    }
}

/// A playable voice in a kit, triggered by a single MIDI note.
pub struct Instrument {
    name: String,
    note: u8,
    level: AtomicU32,
    pan: AtomicI32,
    pitch: AtomicI32,
    flags: AtomicU8,
    meter_l: AtomicU32,
    meter_r: AtomicU32,
    submix_name: Option<String>,
    submix: Weak<Submix>,
    victims: Vec<u8>,
    layers: Vec<InstrumentLayer>,
}

impl Instrument {
    /// Creates a new instrument at full level, centered, with no layers.
    pub fn new(name: &str, note: u8) -> Instrument {
        Instrument {
            name: name.to_string(),
            note,
            level: AtomicU32::new(DEFAULT_LEVEL),
            pan: AtomicI32::new(0),
            pitch: AtomicI32::new(0),
            flags: AtomicU8::new(0),
            meter_l: AtomicU32::new(0),
            meter_r: AtomicU32::new(0),
            submix_name: None,
            submix: Weak::new(),
            victims: Vec::new(),
            layers: Vec::new(),
        }
    }

    pub fn with_level(self, level: u32) -> Self {
        self.set_level(level);
        self
    }

    pub fn with_pan(self, pan: i32) -> Self {
        self.set_pan(pan);
        self
    }

    pub fn with_pitch(self, pitch: i32) -> Self {
        self.set_pitch(pitch);
        self
    }

    /// Routes this instrument to the given submix. The instrument does not keep
    /// the submix alive.
    pub fn with_submix(mut self, submix: &Arc<Submix>) -> Self {
        self.submix_name = Some(submix.name().to_string());
        self.submix = Arc::downgrade(submix);
        self
    }

    /// Adds a note number whose sounding notes are cancelled when this
    /// instrument is triggered.
    pub fn with_victim(mut self, note: u8) -> Self {
        if !self.victims.contains(&note) {
            self.victims.push(note);
        }
        self
    }

    pub fn with_layer(mut self, layer: InstrumentLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The MIDI note that triggers this instrument.
    pub fn note(&self) -> u8 {
        self.note
    }

    pub(super) fn set_note(&mut self, note: u8) {
        self.note = note;
    }

    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Relaxed);
    }

    pub fn pan(&self) -> i32 {
        self.pan.load(Ordering::Relaxed)
    }

    /// Sets the pan, clamped to -100 (left) through 100 (right).
    pub fn set_pan(&self, pan: i32) {
        self.pan.store(pan.clamp(-MAX_PAN, MAX_PAN), Ordering::Relaxed);
    }

    pub fn pitch(&self) -> i32 {
        self.pitch.load(Ordering::Relaxed)
    }

    /// Sets the pitch offset in percent of the original playback speed.
    pub fn set_pitch(&self, pitch: i32) {
        self.pitch.store(pitch.max(MIN_PITCH), Ordering::Relaxed);
    }

    /// How far the playback position advances per output frame.
    pub fn step(&self) -> f32 {
        1.0 + self.pitch() as f32 / 100.0
    }

    pub fn is_muted(&self) -> bool {
        self.flags.load(Ordering::Acquire) & MUTED != 0
    }

    /// Mutes the instrument. Muting clears solo.
    pub fn set_muted(&self, muted: bool) {
        if muted {
            self.update_flags(|flags| (flags | MUTED) & !SOLOED);
        } else {
            self.flags.fetch_and(!MUTED, Ordering::AcqRel);
        }
    }

    pub fn is_soloed(&self) -> bool {
        self.flags.load(Ordering::Acquire) & SOLOED != 0
    }

    /// Solos the instrument. Soloing clears mute.
    pub fn set_soloed(&self, soloed: bool) {
        if soloed {
            self.update_flags(|flags| (flags | SOLOED) & !MUTED);
        } else {
            self.flags.fetch_and(!SOLOED, Ordering::AcqRel);
        }
    }

    /// Auto-mute is set by the engine's host rather than the performer.
    pub fn is_auto_muted(&self) -> bool {
        self.flags.load(Ordering::Acquire) & AUTO_MUTED != 0
    }

    pub fn set_auto_muted(&self, auto_muted: bool) {
        if auto_muted {
            self.flags.fetch_or(AUTO_MUTED, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!AUTO_MUTED, Ordering::AcqRel);
        }
    }

    fn update_flags(&self, f: impl Fn(u8) -> u8) {
        // The closure never returns None, so this cannot fail.
        let _ = self
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| Some(f(flags)));
    }

    /// The last metered peak of each channel, in percent.
    pub fn meters(&self) -> (f32, f32) {
        (
            f32::from_bits(self.meter_l.load(Ordering::Relaxed)),
            f32::from_bits(self.meter_r.load(Ordering::Relaxed)),
        )
    }

    /// Raises each meter to the given peak if it is at least the stored value.
    pub fn raise_meters(&self, left: f32, right: f32) {
        raise(&self.meter_l, left);
        raise(&self.meter_r, right);
    }

    pub fn reset_meters(&self) {
        self.meter_l.store(0f32.to_bits(), Ordering::Relaxed);
        self.meter_r.store(0f32.to_bits(), Ordering::Relaxed);
    }

    /// The name of the submix this instrument routes to, if any.
    pub fn submix_name(&self) -> Option<&str> {
        self.submix_name.as_deref()
    }

    /// Instruments outside a submix play on the main bus.
    pub fn in_submix(&self) -> bool {
        self.submix_name.is_some()
    }

    pub fn submix(&self) -> Option<Arc<Submix>> {
        self.submix.upgrade()
    }

    /// Whether this instrument routes to the given submix.
    pub fn routes_to(&self, submix: &Weak<Submix>) -> bool {
        self.in_submix() && Weak::ptr_eq(&self.submix, submix)
    }

    pub(crate) fn submix_ref(&self) -> &Weak<Submix> {
        &self.submix
    }

    pub fn victims(&self) -> &[u8] {
        &self.victims
    }

    pub fn layers(&self) -> &[InstrumentLayer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&InstrumentLayer> {
        self.layers.get(index)
    }

    /// Finds the first layer whose velocity range contains the velocity.
    pub fn find_layer_by_velocity(&self, velocity: u8) -> Option<(usize, &InstrumentLayer)> {
        self.layers
            .iter()
            .enumerate()
            .find(|(_, layer)| layer.contains(velocity))
    }
}

fn raise(meter: &AtomicU32, value: f32) {
    let _ = meter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        (value >= f32::from_bits(bits)).then(|| value.to_bits())
    });
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (note {}, level {}, pan {}, pitch {}",
            self.name,
            self.note,
            self.level(),
            self.pan(),
            self.pitch()
        )?;
        if let Some(submix) = &self.submix_name {
            write!(f, ", submix {}", submix)?;
        }
        if self.is_muted() {
            write!(f, ", muted")?;
        }
        if self.is_soloed() {
            write!(f, ", soloed")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("note", &self.note)
            .field("level", &self.level())
            .field("pan", &self.pan())
            .field("pitch", &self.pitch())
            .field("submix", &self.submix_name)
            .field("victims", &self.victims)
            .field("layers", &self.layers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(lo: u32, hi: u32) -> InstrumentLayer {
        InstrumentLayer::new(lo, hi, Sample::from_mono("x.wav", 44100, vec![0.0; 4])).unwrap()
    }

    #[test]
    fn test_mute_and_solo_are_exclusive() {
        let instrument = Instrument::new("snare", 38);

        instrument.set_muted(true);
        assert!(instrument.is_muted());
        instrument.set_soloed(true);
        assert!(instrument.is_soloed());
        assert!(!instrument.is_muted());

        instrument.set_muted(true);
        assert!(instrument.is_muted());
        assert!(!instrument.is_soloed());

        instrument.set_muted(false);
        assert!(!instrument.is_muted());
        assert!(!instrument.is_soloed());
    }

    #[test]
    fn test_auto_mute_is_independent() {
        let instrument = Instrument::new("snare", 38);
        instrument.set_auto_muted(true);
        instrument.set_soloed(true);
        assert!(instrument.is_auto_muted());
        assert!(instrument.is_soloed());
        instrument.set_auto_muted(false);
        assert!(!instrument.is_auto_muted());
        assert!(instrument.is_soloed());
    }

    #[test]
    fn test_find_layer_by_velocity_first_match() {
        let instrument = Instrument::new("kick", 36)
            .with_layer(layer(0, 63))
            .with_layer(layer(50, 127));

        assert_eq!(instrument.find_layer_by_velocity(10).map(|(i, _)| i), Some(0));
        assert_eq!(instrument.find_layer_by_velocity(55).map(|(i, _)| i), Some(0));
        assert_eq!(instrument.find_layer_by_velocity(64).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_find_layer_by_velocity_gap() {
        let instrument = Instrument::new("kick", 36).with_layer(layer(100, 127));
        assert!(instrument.find_layer_by_velocity(99).is_none());
        assert!(instrument.find_layer_by_velocity(127).is_some());
    }

    #[test]
    fn test_invalid_velocity_range() {
        assert!(matches!(
            InstrumentLayer::unloaded(90, 10, "x.wav"),
            Err(KitError::InvalidVelocityRange { lo: 90, hi: 10 })
        ));
        assert!(InstrumentLayer::unloaded(0, 128, "x.wav").is_err());
        assert!(InstrumentLayer::unloaded(0, 127, "x.wav").is_ok());
    }

    #[test]
    fn test_pan_and_pitch_clamped() {
        let instrument = Instrument::new("hat", 42).with_pan(250).with_pitch(-500);
        assert_eq!(instrument.pan(), 100);
        assert_eq!(instrument.pitch(), -99);
        assert!(instrument.step() > 0.0);

        instrument.set_pan(-101);
        assert_eq!(instrument.pan(), -100);
    }

    #[test]
    fn test_meters_only_rise() {
        let instrument = Instrument::new("tom", 45);
        instrument.raise_meters(50.0, 20.0);
        instrument.raise_meters(40.0, 30.0);
        assert_eq!(instrument.meters(), (50.0, 30.0));

        instrument.reset_meters();
        assert_eq!(instrument.meters(), (0.0, 0.0));
    }

    #[test]
    fn test_submix_routing() {
        let submix = Arc::new(Submix::new("toms"));
        let other = Arc::new(Submix::new("cymbals"));
        let instrument = Instrument::new("tom", 45).with_submix(&submix);

        assert!(instrument.in_submix());
        assert_eq!(instrument.submix_name(), Some("toms"));
        assert!(instrument.routes_to(&Arc::downgrade(&submix)));
        assert!(!instrument.routes_to(&Arc::downgrade(&other)));

        // The instrument does not own its submix.
        drop(submix);
        assert!(instrument.submix().is_none());
        assert!(instrument.in_submix());
    }

    #[test]
    fn test_victims_deduplicated() {
        let instrument = Instrument::new("closed hat", 42)
            .with_victim(46)
            .with_victim(46)
            .with_victim(44);
        assert_eq!(instrument.victims(), &[46, 44]);
    }
}
