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
use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AudioBackend, AudioError, AudioListener, PortBuffers};

/// An in-memory backend. Cycles are driven by the caller rather than a device
/// clock, and every port's last buffer can be inspected.
pub struct Backend {
    name: String,
    sample_rate: u32,
    ports: Mutex<PortBuffers>,
    connections: Mutex<Vec<(String, String)>>,
    listener: Mutex<Option<Weak<dyn AudioListener>>>,
}

impl Backend {
    /// Gets the given mock backend.
    pub fn new(name: &str, sample_rate: u32) -> Backend {
        Backend {
            name: name.to_string(),
            sample_rate,
            ports: Mutex::new(PortBuffers::new()),
            connections: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        }
    }

    /// Runs one cycle against the given listener.
    pub fn process(&self, listener: &dyn AudioListener, frames: usize) {
        self.ports.lock().process(listener, frames);
    }

    /// Runs one cycle against the started listener. Returns false if there is
    /// no live listener.
    pub fn cycle(&self, frames: usize) -> bool {
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        match listener {
            Some(listener) => {
                self.process(listener.as_ref(), frames);
                true
            }
            None => false,
        }
    }

    /// The contents of the given port after the last cycle.
    pub fn output(&self, port: &str) -> Option<Vec<f32>> {
        self.ports.lock().get(port).map(<[f32]>::to_vec)
    }

    /// The port pairs connected to the main outputs.
    pub fn connections(&self) -> Vec<(String, String)> {
        self.connections.lock().clone()
    }

    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ports.lock().names().map(str::to_string).collect();
        names.sort();
        names
    }
}

impl AudioBackend for Backend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn register_port(&self, name: &str) -> Result<(), AudioError> {
        debug!(device = self.name, port = name, "Registering port");
        self.ports.lock().register(name);
        Ok(())
    }

    fn unregister_port(&self, name: &str) -> Result<(), AudioError> {
        debug!(device = self.name, port = name, "Unregistering port");
        if !self.ports.lock().unregister(name) {
            return Err(AudioError::UnknownPort(name.to_string()));
        }
        self.connections
            .lock()
            .retain(|(left, right)| left != name && right != name);
        Ok(())
    }

    fn has_registered_port(&self, name: &str) -> bool {
        self.ports.lock().contains(name)
    }

    fn connect_main_stereo_out(&self, left: &str, right: &str) -> Result<(), AudioError> {
        let ports = self.ports.lock();
        for port in [left, right] {
            if !ports.contains(port) {
                return Err(AudioError::UnknownPort(port.to_string()));
            }
        }
        self.connections
            .lock()
            .push((left.to_string(), right.to_string()));
        Ok(())
    }

    fn start(&self, listener: Arc<dyn AudioListener>) -> Result<(), AudioError> {
        info!(device = self.name, "Starting mock backend");
        *self.listener.lock() = Some(Arc::downgrade(&listener));
        Ok(())
    }

    fn stop(&self) {
        *self.listener.lock() = None;
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_connect() {
        let backend = Backend::new("mock", 44100);
        assert!(backend.has_registered_port("left"));
        assert!(!backend.has_registered_port("toms_L"));

        backend.register_port("toms_L").unwrap();
        backend.register_port("toms_R").unwrap();
        backend.connect_main_stereo_out("toms_L", "toms_R").unwrap();
        assert_eq!(
            backend.connections(),
            vec![("toms_L".to_string(), "toms_R".to_string())]
        );

        backend.unregister_port("toms_L").unwrap();
        assert!(backend.connections().is_empty());
        assert!(backend.unregister_port("toms_L").is_err());
    }

    #[test]
    fn test_connect_unknown_port() {
        let backend = Backend::new("mock", 44100);
        assert!(matches!(
            backend.connect_main_stereo_out("a", "b"),
            Err(AudioError::UnknownPort(_))
        ));
    }

    #[test]
    fn test_cycle_without_listener() {
        let backend = Backend::new("mock", 44100);
        assert!(!backend.cycle(16));
    }
}
