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
use std::{error::Error, fmt, io, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::trigger::{TriggerEvent, TriggerRouter};

mod midir;
pub mod mock;

pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<TriggerEvent>) -> Result<(), Box<dyn Error>>;

    /// Stops watching events.
    fn stop_watch_events(&self);
}

pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

/// The trigger intake thread. Devices send decoded events into its channel and
/// the thread dispatches them, one at a time, to the router.
pub struct TriggerIntake {
    sender: Sender<TriggerEvent>,
    thread: thread::JoinHandle<()>,
}

impl TriggerIntake {
    /// Starts the intake thread.
    pub fn start(router: Arc<TriggerRouter>) -> Result<TriggerIntake, io::Error> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("trigger-intake".to_string())
            .spawn(move || run_intake(receiver, router))?;

        Ok(TriggerIntake { sender, thread })
    }

    /// A sender feeding the intake thread.
    pub fn sender(&self) -> Sender<TriggerEvent> {
        self.sender.clone()
    }

    /// Closes this handle's sender and waits for the thread to drain. Every other
    /// sender (for example, a watching device) must be dropped first.
    pub fn join(self) {
        drop(self.sender);
        if self.thread.join().is_err() {
            tracing::error!("Trigger intake thread panicked");
        }
    }
}

fn run_intake(receiver: Receiver<TriggerEvent>, router: Arc<TriggerRouter>) {
    info!("Trigger intake started");
    for event in receiver.iter() {
        debug!(event = %event, "Dispatching trigger");
        router.dispatch(&event);
    }
    info!("Trigger intake stopped");
}
