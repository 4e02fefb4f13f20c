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

//! Trigger events and their fan-out to listeners.

use std::fmt;
use std::sync::Arc;

use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::MidiMessage;
use parking_lot::RwLock;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Unknown,
    NoteOn,
    NoteOff,
    PolyphonicKeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchWheel,
    SystemExclusive,
    QuarterFrame,
    SongPosition,
    Start,
    Continue,
    Stop,
}

/// A decoded trigger. Fields that do not apply to the kind are zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    /// The MIDI channel, 1-16, or 0 for system messages.
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    /// Controller value, program, pitch bend (centered on 0) or song position.
    pub value: i32,
}

impl TriggerEvent {
    fn new(kind: TriggerKind) -> TriggerEvent {
        TriggerEvent {
            kind,
            channel: 0,
            note: 0,
            velocity: 0,
            value: 0,
        }
    }

    /// A note-on on the given 1-indexed channel.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> TriggerEvent {
        TriggerEvent {
            kind: TriggerKind::NoteOn,
            channel,
            note,
            velocity,
            value: 0,
        }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> TriggerEvent {
        TriggerEvent {
            kind: TriggerKind::NoteOff,
            ..TriggerEvent::note_on(channel, note, velocity)
        }
    }

    /// Parses a raw MIDI message.
    pub fn parse(raw: &[u8]) -> Result<TriggerEvent, midly::Error> {
        Ok(TriggerEvent::from(LiveEvent::parse(raw)?))
    }
}

impl From<LiveEvent<'_>> for TriggerEvent {
    fn from(event: LiveEvent<'_>) -> Self {
        match event {
            LiveEvent::Midi { channel, message } => {
                let channel = channel.as_int() + 1;
                let (kind, note, velocity, value) = match message {
                    MidiMessage::NoteOn { key, vel } => {
                        (TriggerKind::NoteOn, key.as_int(), vel.as_int(), 0)
                    }
                    MidiMessage::NoteOff { key, vel } => {
                        (TriggerKind::NoteOff, key.as_int(), vel.as_int(), 0)
                    }
                    MidiMessage::Aftertouch { key, vel } => (
                        TriggerKind::PolyphonicKeyPressure,
                        key.as_int(),
                        vel.as_int(),
                        0,
                    ),
                    MidiMessage::Controller { controller, value } => (
                        TriggerKind::ControlChange,
                        controller.as_int(),
                        0,
                        i32::from(value.as_int()),
                    ),
                    MidiMessage::ProgramChange { program } => (
                        TriggerKind::ProgramChange,
                        0,
                        0,
                        i32::from(program.as_int()),
                    ),
                    MidiMessage::ChannelAftertouch { vel } => {
                        (TriggerKind::ChannelPressure, 0, vel.as_int(), 0)
                    }
                    MidiMessage::PitchBend { bend } => {
                        (TriggerKind::PitchWheel, 0, 0, i32::from(bend.as_int()))
                    }
                };
                TriggerEvent {
                    kind,
                    channel,
                    note,
                    velocity,
                    value,
                }
            }
            LiveEvent::Common(SystemCommon::SysEx(_)) => {
                TriggerEvent::new(TriggerKind::SystemExclusive)
            }
            LiveEvent::Common(SystemCommon::MidiTimeCodeQuarterFrame(..)) => {
                TriggerEvent::new(TriggerKind::QuarterFrame)
            }
            LiveEvent::Common(SystemCommon::SongPosition(position)) => TriggerEvent {
                value: i32::from(position.as_int()),
                ..TriggerEvent::new(TriggerKind::SongPosition)
            },
            LiveEvent::Realtime(SystemRealtime::Start) => TriggerEvent::new(TriggerKind::Start),
            LiveEvent::Realtime(SystemRealtime::Continue) => {
                TriggerEvent::new(TriggerKind::Continue)
            }
            LiveEvent::Realtime(SystemRealtime::Stop) => TriggerEvent::new(TriggerKind::Stop),
            _ => TriggerEvent::new(TriggerKind::Unknown),
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::NoteOn | TriggerKind::NoteOff | TriggerKind::PolyphonicKeyPressure => {
                write!(
                    f,
                    "{:?} channel={} note={} velocity={}",
                    self.kind, self.channel, self.note, self.velocity
                )
            }
            TriggerKind::ControlChange => write!(
                f,
                "{:?} channel={} controller={} value={}",
                self.kind, self.channel, self.note, self.value
            ),
            TriggerKind::ProgramChange | TriggerKind::PitchWheel => {
                write!(
                    f,
                    "{:?} channel={} value={}",
                    self.kind, self.channel, self.value
                )
            }
            TriggerKind::ChannelPressure => write!(
                f,
                "{:?} channel={} pressure={}",
                self.kind, self.channel, self.velocity
            ),
            TriggerKind::SongPosition => write!(f, "{:?} position={}", self.kind, self.value),
            _ => write!(f, "{:?}", self.kind),
        }
    }
}

/// Receives trigger events. Called on the trigger intake thread.
pub trait TriggerListener: Send + Sync {
    fn on_trigger(&self, event: &TriggerEvent);
}

/// Fans trigger events out to every registered listener in registration order.
#[derive(Default)]
pub struct TriggerRouter {
    listeners: RwLock<Vec<Arc<dyn TriggerListener>>>,
}

impl TriggerRouter {
    pub fn new() -> TriggerRouter {
        TriggerRouter::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn dispatch(&self, event: &TriggerEvent) {
        for listener in self.listeners.read().iter() {
            listener.on_trigger(event);
        }
    }
}

/// Logs struck notes and pitch wheel movement. Everything else is logged at
/// debug level.
#[derive(Default)]
pub struct MidiDumper;

impl TriggerListener for MidiDumper {
    fn on_trigger(&self, event: &TriggerEvent) {
        match event.kind {
            TriggerKind::NoteOn if event.velocity > 0 => info!(event = %event, "Trigger"),
            TriggerKind::PitchWheel => info!(event = %event, "Trigger"),
            _ => debug!(event = %event, "Trigger"),
        }
    }
}
