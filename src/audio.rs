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

//! The boundary between the engine and an audio backend.
//!
//! Every processing cycle the backend asks its listener which named port pairs
//! it wants filled, zeroes those buffers, and hands each pair back to the
//! listener to mix into.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::config::EngineConfig;
use crate::kit::Submix;

pub mod cpal;
pub mod mock;
mod thread_priority;

/// The left port of the main stereo bus.
pub const LEFT_PORT_NAME: &str = "left";
/// The right port of the main stereo bus.
pub const RIGHT_PORT_NAME: &str = "right";

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("port {0} is not registered")]
    UnknownPort(String),

    #[error("no audio device found with name {0}")]
    NoDevice(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unable to build output stream: {0}")]
    BuildStream(#[from] ::cpal::BuildStreamError),

    #[error("unable to start output stream: {0}")]
    PlayStream(#[from] ::cpal::PlayStreamError),

    #[error("unable to get default output config: {0}")]
    DefaultConfig(#[from] ::cpal::DefaultStreamConfigError),

    #[error("unable to list devices: {0}")]
    Devices(#[from] ::cpal::DevicesError),

    #[error("unable to get device name: {0}")]
    DeviceName(#[from] ::cpal::DeviceNameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where a requested buffer pair ends up.
#[derive(Clone, Debug)]
pub enum Destination {
    /// The main stereo bus.
    Main,
    /// The given submix's port pair.
    Submix(Weak<Submix>),
}

/// A request from the listener for one stereo pair of port buffers.
#[derive(Clone, Debug)]
pub struct BufferRequest {
    destination: Destination,
    port_names: [Arc<str>; 2],
}

impl BufferRequest {
    /// A request for the main stereo bus.
    pub fn main(port_names: [Arc<str>; 2]) -> BufferRequest {
        BufferRequest {
            destination: Destination::Main,
            port_names,
        }
    }

    /// A request for the given submix's ports.
    pub fn submix(submix: &Arc<Submix>) -> BufferRequest {
        BufferRequest {
            destination: Destination::Submix(Arc::downgrade(submix)),
            port_names: submix.port_names().clone(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The left and right port names.
    pub fn port_names(&self) -> &[Arc<str>; 2] {
        &self.port_names
    }

    pub fn is_for(&self, submix: &Arc<Submix>) -> bool {
        match &self.destination {
            Destination::Main => false,
            Destination::Submix(weak) => std::ptr::eq(weak.as_ptr(), Arc::as_ptr(submix)),
        }
    }
}

/// A filled-in request: zeroed port buffers the listener mixes into.
pub struct BufferResponse<'a> {
    request: &'a BufferRequest,
    pub left: &'a mut [f32],
    pub right: &'a mut [f32],
}

impl<'a> BufferResponse<'a> {
    pub fn new(request: &'a BufferRequest, left: &'a mut [f32], right: &'a mut [f32]) -> Self {
        BufferResponse {
            request,
            left,
            right,
        }
    }

    pub fn request(&self) -> &BufferRequest {
        self.request
    }

    /// The number of frames in each buffer.
    pub fn frames(&self) -> usize {
        self.left.len().min(self.right.len())
    }
}

/// Produces audio for a backend.
pub trait AudioListener: Send + Sync {
    /// Called at the start of each cycle, returns the buffers to fill.
    fn buffer_requests(&self) -> Vec<BufferRequest>;

    /// Mixes into one requested pair. Called once per request in order.
    fn play(&self, response: &mut BufferResponse<'_>);
}

/// An audio output that exposes named ports.
pub trait AudioBackend: fmt::Display + Send + Sync {
    /// The output sample rate.
    fn sample_rate(&self) -> u32;

    /// Registers a named output port.
    fn register_port(&self, name: &str) -> Result<(), AudioError>;

    /// Removes a named output port.
    fn unregister_port(&self, name: &str) -> Result<(), AudioError>;

    fn has_registered_port(&self, name: &str) -> bool;

    /// Sums the given pair of ports into the main stereo outputs.
    fn connect_main_stereo_out(&self, left: &str, right: &str) -> Result<(), AudioError>;

    /// Starts driving the listener.
    fn start(&self, listener: Arc<dyn AudioListener>) -> Result<(), AudioError>;

    /// Stops driving the listener.
    fn stop(&self);
}

/// Owned per-port buffers that a backend fills once per cycle.
#[derive(Default)]
pub struct PortBuffers {
    buffers: HashMap<String, Vec<f32>>,
    /// Stands in for requested ports that are not registered.
    scratch: [Vec<f32>; 2],
}

impl PortBuffers {
    /// Creates port buffers holding the main stereo ports.
    pub fn new() -> PortBuffers {
        let mut buffers = PortBuffers::default();
        buffers.register(LEFT_PORT_NAME);
        buffers.register(RIGHT_PORT_NAME);
        buffers
    }

    pub fn register(&mut self, name: &str) {
        self.buffers.entry(name.to_string()).or_default();
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.buffers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.buffers.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    /// Runs one cycle: zeroes every port, asks the listener what it wants, and
    /// hands it each requested pair. A port that is not registered is replaced
    /// by a scratch buffer that is thrown away, so notes routed there still
    /// advance.
    pub fn process(&mut self, listener: &dyn AudioListener, frames: usize) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
            buffer.resize(frames, 0.0);
        }

        let requests = listener.buffer_requests();
        for request in &requests {
            let [left_name, right_name] = request.port_names();
            let (left_key, mut left) = self.take_port(left_name, 0, frames);
            let (right_key, mut right) = self.take_port(right_name, 1, frames);

            listener.play(&mut BufferResponse::new(request, &mut left, &mut right));

            self.restore_port(left_key, left, 0);
            self.restore_port(right_key, right, 1);
        }
    }

    fn take_port(
        &mut self,
        name: &str,
        scratch: usize,
        frames: usize,
    ) -> (Option<String>, Vec<f32>) {
        if let Some((key, buffer)) = self.buffers.remove_entry(name) {
            return (Some(key), buffer);
        }

        trace!(port = name, "Requested port is not registered");
        let mut buffer = std::mem::take(&mut self.scratch[scratch]);
        buffer.clear();
        buffer.resize(frames, 0.0);
        (None, buffer)
    }

    fn restore_port(&mut self, key: Option<String>, buffer: Vec<f32>, scratch: usize) {
        match key {
            Some(key) => {
                self.buffers.insert(key, buffer);
            }
            None => self.scratch[scratch] = buffer,
        }
    }
}

/// Lists the names of the available output devices.
pub fn list_devices() -> Result<Vec<String>, AudioError> {
    cpal::Backend::list()
}

/// Gets the audio backend named by the config. Names starting with "mock" get
/// an in-memory backend.
pub fn get_backend(config: &EngineConfig) -> Result<Arc<dyn AudioBackend>, AudioError> {
    let device = config.audio_device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Backend::new(device, config.sample_rate())));
    }

    Ok(Arc::new(cpal::Backend::get(device, config.sample_rate())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    /// Records the left port of every pair it is given and fills the pair.
    struct Recorder {
        requests: Vec<BufferRequest>,
        played: Mutex<Vec<String>>,
    }

    impl AudioListener for Recorder {
        fn buffer_requests(&self) -> Vec<BufferRequest> {
            self.requests.clone()
        }

        fn play(&self, response: &mut BufferResponse<'_>) {
            self.played
                .lock()
                .push(response.request().port_names()[0].to_string());
            response.left.fill(0.5);
            response.right.fill(-0.5);
        }
    }

    fn main_ports() -> [Arc<str>; 2] {
        [Arc::from(LEFT_PORT_NAME), Arc::from(RIGHT_PORT_NAME)]
    }

    #[test]
    fn test_process_fills_requested_ports() {
        let submix = Arc::new(Submix::new("toms"));
        let mut buffers = PortBuffers::new();
        buffers.register("toms_L");
        buffers.register("toms_R");

        let recorder = Recorder {
            requests: vec![BufferRequest::submix(&submix), BufferRequest::main(main_ports())],
            played: Mutex::new(Vec::new()),
        };
        buffers.process(&recorder, 4);

        assert_eq!(*recorder.played.lock(), vec!["toms_L", "left"]);
        assert_eq!(buffers.get("toms_L").unwrap(), &[0.5; 4]);
        assert_eq!(buffers.get("right").unwrap(), &[-0.5; 4]);
    }

    #[test]
    fn test_process_plays_unregistered_ports_into_scratch() {
        let submix = Arc::new(Submix::new("toms"));
        let mut buffers = PortBuffers::new();
        buffers.register("toms_L");

        let recorder = Recorder {
            requests: vec![BufferRequest::submix(&submix)],
            played: Mutex::new(Vec::new()),
        };
        buffers.process(&recorder, 4);

        assert_eq!(*recorder.played.lock(), vec!["toms_L"]);
        assert_eq!(buffers.get("toms_L").unwrap(), &[0.5; 4]);
        // The missing port's output goes nowhere.
        assert!(!buffers.contains("toms_R"));
        assert_eq!(buffers.names().count(), 3);
        assert_eq!(buffers.get("right").unwrap(), &[0.0; 4]);

        buffers.unregister("toms_L");
        buffers.process(&recorder, 2);
        assert_eq!(recorder.played.lock().len(), 2);
    }

    #[test]
    fn test_process_zeroes_between_cycles() {
        let mut buffers = PortBuffers::new();
        let recorder = Recorder {
            requests: vec![BufferRequest::main(main_ports())],
            played: Mutex::new(Vec::new()),
        };
        buffers.process(&recorder, 2);

        let silent = Recorder {
            requests: Vec::new(),
            played: Mutex::new(Vec::new()),
        };
        buffers.process(&silent, 3);
        assert_eq!(buffers.get("left").unwrap(), &[0.0; 3]);
    }

    #[test]
    fn test_request_is_for() {
        let toms = Arc::new(Submix::new("toms"));
        let cymbals = Arc::new(Submix::new("cymbals"));
        let request = BufferRequest::submix(&toms);
        assert!(request.is_for(&toms));
        assert!(!request.is_for(&cymbals));
        assert!(!BufferRequest::main(main_ports()).is_for(&toms));
    }
}
