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

//! The playback engine.
//!
//! Three threads meet here: the trigger intake thread queues notes, the audio
//! thread mixes them, and a control thread swaps kits. Two locks guard the
//! shared state and are always taken in the same order:
//!
//! 1. the note lock, over the note queues and the active kit;
//! 2. the orphan lock, over instruments and submixes that left the active kit
//!    while notes still played them.
//!
//! The backend is never called while either lock is held, since backends call
//! back into the engine from their own locked sections.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, span, trace, warn, Level};

use crate::audio::{
    AudioBackend, AudioError, AudioListener, BufferRequest, BufferResponse, LEFT_PORT_NAME,
    RIGHT_PORT_NAME,
};
use crate::config::EngineConfig;
use crate::kit::{Drumkit, KitError, KitLoader, Note, Submix};
use crate::trigger::{TriggerEvent, TriggerKind, TriggerListener};

mod mix;
mod orphans;
mod pool;

pub use pool::NoteCounts;

use mix::MixParams;
use orphans::Orphans;
use pool::NoteQueues;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unable to load kit {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: KitError,
    },

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Receives the playing notes after every mixed buffer. Called on the audio
/// thread with the note lock held, so implementations must return quickly.
pub trait NoteQueueListener: Send + Sync {
    fn note_queue_update(&self, playing: &VecDeque<Note>);
}

/// Everything guarded by the note lock.
struct NoteState {
    kit: Arc<Drumkit>,
    queues: NoteQueues,
    sample_end_gap: u32,
    max_polyphony: Option<usize>,
    /// Whether any instrument was soloed when this cycle's requests were made.
    solo_active: bool,
}

impl NoteState {
    /// Queues a note for the instrument at the given note number. Returns the
    /// queued note's id.
    fn note_on(&mut self, number: u8, velocity: u8) -> Option<u64> {
        let Some(instrument) = self.kit.find_by_note(number).cloned() else {
            trace!(note = number, "No instrument for note");
            return None;
        };

        for victim in instrument.victims() {
            if let Some(victim) = self.kit.find_by_note(*victim) {
                let cancelled = self.queues.cancel_for(victim);
                if cancelled > 0 {
                    debug!(
                        instrument = instrument.name(),
                        victim = victim.name(),
                        cancelled,
                        "Choked victim notes"
                    );
                }
            }
        }

        let Some((layer, _)) = instrument
            .find_layer_by_velocity(velocity)
            .filter(|(_, layer)| layer.sample().is_some())
        else {
            debug!(
                instrument = instrument.name(),
                velocity, "No playable layer for velocity"
            );
            return None;
        };

        let Some(mut note) = self.queues.acquire() else {
            warn!(
                instrument = instrument.name(),
                "Note pool exhausted, dropping trigger"
            );
            return None;
        };
        note.bind(&instrument, layer, velocity);
        let id = note.id();
        self.queues.enqueue(note);
        Some(id)
    }
}

/// The playback engine.
pub struct Engine {
    backend: Arc<dyn AudioBackend>,
    state: Mutex<NoteState>,
    orphans: Mutex<Orphans>,
    /// Held for the whole of a kit swap. Reclaim skips its pass while a swap
    /// is running rather than wait.
    swap: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn NoteQueueListener>>>,
    main_ports: [Arc<str>; 2],
}

impl Engine {
    /// Creates a new engine with an empty kit.
    pub fn new(backend: Arc<dyn AudioBackend>, config: &EngineConfig) -> Engine {
        Engine {
            backend,
            state: Mutex::new(NoteState {
                kit: Arc::new(Drumkit::default()),
                queues: NoteQueues::new(config.initial_pool_size(), config.max_pool_size()),
                sample_end_gap: config.sample_end_gap(),
                max_polyphony: config.max_polyphony(),
                solo_active: false,
            }),
            orphans: Mutex::new(Orphans::default()),
            swap: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            main_ports: [Arc::from(LEFT_PORT_NAME), Arc::from(RIGHT_PORT_NAME)],
        }
    }

    /// Starts the backend driving this engine.
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        info!(backend = %self.backend, "Starting engine");
        self.backend.start(self.clone())?;
        Ok(())
    }

    pub fn stop(&self) {
        info!(backend = %self.backend, "Stopping engine");
        self.backend.stop();
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    /// The active kit.
    pub fn drumkit(&self) -> Arc<Drumkit> {
        self.state.lock().kit.clone()
    }

    pub fn add_note_queue_listener(&self, listener: Arc<dyn NoteQueueListener>) {
        self.listeners.write().push(listener);
    }

    pub fn sample_end_gap(&self) -> u32 {
        self.state.lock().sample_end_gap
    }

    pub fn set_sample_end_gap(&self, sample_end_gap: u32) {
        self.state.lock().sample_end_gap = sample_end_gap;
    }

    pub fn max_polyphony(&self) -> Option<usize> {
        self.state.lock().max_polyphony
    }

    pub fn set_max_polyphony(&self, max_polyphony: Option<usize>) {
        self.state.lock().max_polyphony = max_polyphony;
    }

    pub fn set_max_pool_size(&self, max_pool_size: Option<usize>) {
        self.state.lock().queues.set_max_pool_size(max_pool_size);
    }

    pub fn note_counts(&self) -> NoteCounts {
        self.state.lock().queues.counts()
    }

    /// The number of orphaned instruments and submixes still held.
    pub fn orphan_counts(&self) -> (usize, usize) {
        self.orphans.lock().counts()
    }

    /// Triggers the instrument at the given note number. Velocity 0 does
    /// nothing. Returns whether a note was queued.
    pub fn note_on(&self, number: u8, velocity: u8) -> bool {
        if velocity == 0 {
            return false;
        }
        let queued = self.state.lock().note_on(number, velocity);
        if let Some(id) = queued {
            trace!(note = number, velocity, id, "Queued note");
        }
        self.reclaim_orphans();
        queued.is_some()
    }

    /// Replaces the active kit with the one at the given path. Notes still
    /// playing from the old kit ring out on its instruments and submixes. If
    /// loading fails, the active kit is untouched.
    pub fn load_kit(&self, loader: &dyn KitLoader, path: &Path) -> Result<(), EngineError> {
        let span = span!(Level::INFO, "load kit", path = ?path);
        let _enter = span.enter();
        let _swap = self.swap.lock();

        let active = self.drumkit();
        let previously_orphaned: Vec<Arc<Submix>> = self.orphans.lock().submixes().to_vec();

        // Every submix starts orphaned. The loader clears the flag on any it
        // reuses.
        let mut kit = Drumkit::default();
        for submix in active.submixes().chain(previously_orphaned.iter()) {
            submix.set_orphaned(true);
            kit.add_submix(submix.clone());
        }

        if let Err(source) = loader.load_into(path, &mut kit) {
            for submix in active.submixes() {
                submix.set_orphaned(false);
            }
            for submix in &previously_orphaned {
                submix.set_orphaned(true);
            }
            error!(path = ?path, err = %source, "Unable to load kit, keeping active kit");
            return Err(EngineError::Load {
                path: path.to_path_buf(),
                source,
            });
        }
        drop(active);

        self.ensure_ports(&kit);

        let old = {
            let mut state = self.state.lock();
            let mut orphans = self.orphans.lock();

            for instrument in state.kit.all_instruments() {
                orphans.adopt_instrument(instrument);
            }
            let orphaned: Vec<String> = kit
                .submixes()
                .filter(|s| s.is_orphaned())
                .map(|s| s.name().to_string())
                .collect();
            for name in orphaned {
                if let Some(submix) = kit.remove_submix(&name) {
                    orphans.adopt_submix(submix);
                }
            }
            orphans.forget_reused_submixes();

            std::mem::replace(&mut state.kit, Arc::new(kit))
        };
        drop(old);

        self.reclaim();

        let kit = self.drumkit();
        let (orphaned_instruments, orphaned_submixes) = self.orphan_counts();
        info!(
            kit = kit.name(),
            instruments = kit.instrument_count(),
            submixes = kit.submixes().count(),
            orphaned_instruments,
            orphaned_submixes,
            "Kit swapped"
        );
        Ok(())
    }

    /// Registers the port pairs of every live submix in the kit, connecting
    /// newly registered pairs to the main outputs if the submix asks for it.
    fn ensure_ports(&self, kit: &Drumkit) {
        for submix in kit.submixes().filter(|s| !s.is_orphaned()) {
            let [left, right] = submix.port_names();
            let mut registered = false;
            for port in [left, right] {
                if self.backend.has_registered_port(port) {
                    continue;
                }
                match self.backend.register_port(port) {
                    Ok(()) => registered = true,
                    Err(e) => error!(
                        submix = submix.name(),
                        port = &**port,
                        err = %e,
                        "Unable to register port"
                    ),
                }
            }
            if registered && submix.auto_connect() {
                if let Err(e) = self.backend.connect_main_stereo_out(left, right) {
                    warn!(
                        submix = submix.name(),
                        err = %e,
                        "Unable to connect submix to main outputs"
                    );
                }
            }
        }
    }

    /// Releases every orphan no note references any more. Skipped while a kit
    /// swap is in progress.
    pub fn reclaim_orphans(&self) {
        if let Some(_swap) = self.swap.try_lock() {
            self.reclaim();
        }
    }

    fn notify(&self, playing: &VecDeque<Note>) {
        for listener in self.listeners.read().iter() {
            listener.note_queue_update(playing);
        }
    }

    /// Must be called with the swap lock held.
    fn reclaim(&self) {
        let reclaimed = {
            let state = self.state.lock();
            let mut orphans = self.orphans.lock();
            orphans.reclaim(&state.queues)
        };
        if reclaimed.is_empty() {
            return;
        }

        for submix in &reclaimed.submixes {
            for port in submix.port_names() {
                if let Err(e) = self.backend.unregister_port(port) {
                    warn!(
                        submix = submix.name(),
                        port = &**port,
                        err = %e,
                        "Unable to unregister port"
                    );
                }
            }
        }
        debug!(
            instruments = reclaimed.instruments.len(),
            submixes = reclaimed.submixes.len(),
            "Reclaimed orphans"
        );
    }
}

impl AudioListener for Engine {
    fn buffer_requests(&self) -> Vec<BufferRequest> {
        let mut state = self.state.lock();
        let NoteState {
            kit,
            queues,
            max_polyphony,
            solo_active,
            ..
        } = &mut *state;

        queues.promote_one();
        queues.enforce_polyphony(*max_polyphony);

        let mut requests: Vec<BufferRequest> = Vec::new();
        let mut any_soloed = kit.any_soloed();
        for note in queues.playing_mut().iter_mut() {
            if note.is_finished() {
                continue;
            }
            let Some(instrument) = note.instrument() else {
                note.cancel();
                continue;
            };
            any_soloed |= instrument.is_soloed();
            if !instrument.in_submix() {
                continue;
            }
            match instrument.submix() {
                Some(submix) => {
                    if !requests.iter().any(|r| r.is_for(&submix)) {
                        requests.push(BufferRequest::submix(&submix));
                    }
                }
                None => note.cancel(),
            }
        }
        *solo_active = any_soloed;

        if queues.is_playing() {
            requests.push(BufferRequest::main(self.main_ports.clone()));
        } else if queues.release_finished() > 0 {
            self.notify(queues.playing());
        }
        requests
    }

    fn play(&self, response: &mut BufferResponse<'_>) {
        let mut state = self.state.lock();
        let params = MixParams {
            kit_gain: state.kit.gain(),
            sample_end_gap: state.sample_end_gap,
            solo_active: state.solo_active,
        };

        for note in state.queues.playing_mut().iter_mut() {
            mix::mix_note(note, response, params);
        }
        state.queues.release_finished();
        self.notify(state.queues.playing());
    }
}

impl TriggerListener for Engine {
    fn on_trigger(&self, event: &TriggerEvent) {
        if event.kind == TriggerKind::NoteOn {
            self.note_on(event.note, event.velocity);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.to_string())
            .field("notes", &self.note_counts())
            .field("orphans", &self.orphan_counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::mock;
    use crate::kit::{Instrument, InstrumentLayer, Sample};

    fn loader<F>(build: F) -> impl KitLoader
    where
        F: Fn(&mut Drumkit) + Send + Sync,
    {
        move |_: &Path, kit: &mut Drumkit| -> Result<(), KitError> {
            build(kit);
            Ok(())
        }
    }

    fn layer(data: Vec<f32>) -> InstrumentLayer {
        InstrumentLayer::new(0, 127, Sample::from_mono("test.wav", 44100, data)).unwrap()
    }

    fn engine(config: EngineConfig) -> (Arc<mock::Backend>, Engine) {
        let backend = Arc::new(mock::Backend::new("mock", 44100));
        let engine = Engine::new(backend.clone(), &config);
        (backend, engine)
    }

    #[test]
    fn test_velocity_zero_is_ignored() {
        let (_, engine) = engine(EngineConfig::default());
        engine
            .load_kit(
                &loader(|kit| {
                    kit.add(36, Instrument::new("kick", 36).with_layer(layer(vec![1.0; 4])));
                }),
                Path::new("kit"),
            )
            .unwrap();

        assert!(!engine.note_on(36, 0));
        engine.on_trigger(&TriggerEvent::note_off(10, 36, 64));
        assert_eq!(engine.note_counts().pending, 0);

        assert!(engine.note_on(36, 100));
        assert_eq!(engine.note_counts().pending, 1);
    }

    #[test]
    fn test_unknown_note_and_velocity_gap() {
        let (_, engine) = engine(EngineConfig::default());
        engine
            .load_kit(
                &loader(|kit| {
                    kit.add(
                        36,
                        Instrument::new("kick", 36).with_layer(
                            InstrumentLayer::new(
                                100,
                                127,
                                Sample::from_mono("k.wav", 44100, vec![1.0]),
                            )
                            .unwrap(),
                        ),
                    );
                    kit.add(
                        37,
                        Instrument::new("rim", 37)
                            .with_layer(InstrumentLayer::unloaded(0, 127, "rim.wav").unwrap()),
                    );
                }),
                Path::new("kit"),
            )
            .unwrap();

        assert!(!engine.note_on(40, 100));
        assert!(!engine.note_on(36, 99));
        assert!(!engine.note_on(37, 99));
        assert!(engine.note_on(36, 100));
        assert_eq!(engine.note_counts().pending, 1);
    }

    #[test]
    fn test_no_requests_when_silent() {
        let (_, engine) = engine(EngineConfig::default());
        assert!(engine.buffer_requests().is_empty());
    }

    #[test]
    fn test_requests_per_submix_plus_main() {
        let (backend, engine) = engine(EngineConfig::default());
        engine
            .load_kit(
                &loader(|kit| {
                    let toms = kit.submix_or_insert("toms");
                    kit.add(
                        45,
                        Instrument::new("tom 1", 45)
                            .with_submix(&toms)
                            .with_layer(layer(vec![0.5; 64])),
                    );
                    kit.add(
                        47,
                        Instrument::new("tom 2", 47)
                            .with_submix(&toms)
                            .with_layer(layer(vec![0.5; 64])),
                    );
                }),
                Path::new("kit"),
            )
            .unwrap();
        assert!(backend.has_registered_port("toms_L"));
        assert_eq!(
            backend.connections(),
            vec![("toms_L".to_string(), "toms_R".to_string())]
        );

        engine.note_on(45, 100);
        engine.note_on(47, 100);
        engine.buffer_requests();
        let requests = engine.buffer_requests();

        let ports: Vec<&str> = requests.iter().map(|r| &*r.port_names()[0]).collect();
        assert_eq!(ports, vec!["toms_L", "left"]);
    }

    #[test]
    fn test_queue_listener_sees_playing_notes() {
        struct Count(Mutex<Vec<usize>>);
        impl NoteQueueListener for Count {
            fn note_queue_update(&self, playing: &VecDeque<Note>) {
                self.0.lock().push(playing.len());
            }
        }

        let (backend, engine) = engine(EngineConfig::default());
        let engine = Arc::new(engine);
        let count = Arc::new(Count(Mutex::new(Vec::new())));
        engine.add_note_queue_listener(count.clone());
        engine
            .load_kit(
                &loader(|kit| {
                    kit.add(36, Instrument::new("kick", 36).with_layer(layer(vec![1.0; 6])));
                }),
                Path::new("kit"),
            )
            .unwrap();
        engine.start().unwrap();

        engine.note_on(36, 100);
        assert!(backend.cycle(4));
        assert!(backend.cycle(4));
        assert_eq!(*count.0.lock(), vec![1, 0]);
    }

    #[test]
    fn test_load_failure_keeps_active_kit() {
        let (backend, engine) = engine(EngineConfig::default());
        engine
            .load_kit(
                &loader(|kit| {
                    kit.set_name("first");
                    let toms = kit.submix_or_insert("toms");
                    kit.add(45, Instrument::new("tom", 45).with_submix(&toms));
                }),
                Path::new("first"),
            )
            .unwrap();

        let failing = |_: &Path, kit: &mut Drumkit| -> Result<(), KitError> {
            kit.submix_or_insert("toms");
            Err(KitError::Aborted)
        };
        let result = engine.load_kit(&failing, Path::new("second"));
        assert!(matches!(
            result,
            Err(EngineError::Load {
                source: KitError::Aborted,
                ..
            })
        ));

        let kit = engine.drumkit();
        assert_eq!(kit.name(), "first");
        assert!(!kit.find_submix("toms").unwrap().is_orphaned());
        assert!(backend.has_registered_port("toms_R"));
        assert_eq!(engine.orphan_counts(), (0, 0));
    }
}
