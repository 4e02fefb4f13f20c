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
use std::{error::Error, fmt};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::trigger::TriggerEvent;

/// A MIDI input whose events are injected by the caller.
pub struct Device {
    name: String,
    sender: Mutex<Option<Sender<TriggerEvent>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Mutex::new(None),
        }
    }

    /// Parses the raw message and sends it on as if it came from hardware.
    /// Returns false if the device is not being watched or the message could
    /// not be parsed.
    pub fn mock_event(&self, raw: &[u8]) -> bool {
        let event = match TriggerEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(err = %e, "Ignoring unparseable MIDI message");
                return false;
            }
        };

        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<TriggerEvent>) -> Result<(), Box<dyn Error>> {
        let mut current = self.sender.lock();
        if current.is_some() {
            return Err("Already watching events.".into());
        }
        info!(device = self.name, "Watching mock MIDI events.");
        *current = Some(sender);
        Ok(())
    }

    fn stop_watch_events(&self) {
        self.sender.lock().take();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
