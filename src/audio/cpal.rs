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

//! A cpal output device presented as a set of named ports.
//!
//! The main stereo ports map to the first two device channels. Every other port
//! takes the next free channel, and ports connected to the main outputs are also
//! summed into the first two channels.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use super::thread_priority::AudioThreadPriority;
use super::{AudioBackend, AudioError, AudioListener, PortBuffers};
use super::{LEFT_PORT_NAME, RIGHT_PORT_NAME};

/// Port buffers plus the mapping of ports onto device channels.
struct Routing {
    ports: PortBuffers,
    channel_count: usize,
    channels: HashMap<String, usize>,
    free_channels: Vec<usize>,
    main_mix: Vec<(String, String)>,
}

impl Routing {
    fn new(channel_count: u16) -> Routing {
        let channel_count = usize::from(channel_count).max(1);
        let mut channels = HashMap::new();
        channels.insert(LEFT_PORT_NAME.to_string(), 0);
        channels.insert(RIGHT_PORT_NAME.to_string(), 1.min(channel_count - 1));

        Routing {
            ports: PortBuffers::new(),
            channel_count,
            channels,
            // Reversed so that pop hands out the lowest channel first.
            free_channels: (2..channel_count).rev().collect(),
            main_mix: Vec::new(),
        }
    }

    fn register(&mut self, name: &str) {
        if self.ports.contains(name) {
            return;
        }
        self.ports.register(name);
        match self.free_channels.pop() {
            Some(channel) => {
                debug!(port = name, channel, "Assigned device channel to port");
                self.channels.insert(name.to_string(), channel);
            }
            None => {
                debug!(port = name, "No free device channel for port");
            }
        }
    }

    fn unregister(&mut self, name: &str) -> bool {
        if !self.ports.unregister(name) {
            return false;
        }
        if let Some(channel) = self.channels.remove(name) {
            self.free_channels.push(channel);
            self.free_channels.sort_unstable_by(|a, b| b.cmp(a));
        }
        self.main_mix
            .retain(|(left, right)| left != name && right != name);
        true
    }

    /// Runs one cycle and interleaves the result into `out`.
    fn render(&mut self, listener: &dyn AudioListener, frames: usize, out: &mut Vec<f32>) {
        let channel_count = self.channel_count;
        self.ports.process(listener, frames);

        out.clear();
        out.resize(frames * channel_count, 0.0);

        for (port, &channel) in &self.channels {
            if let Some(buffer) = self.ports.get(port) {
                mix_into(out, buffer, channel, channel_count);
            }
        }
        for (left, right) in &self.main_mix {
            if let Some(buffer) = self.ports.get(left) {
                mix_into(out, buffer, 0, channel_count);
            }
            if let Some(buffer) = self.ports.get(right) {
                mix_into(out, buffer, 1.min(channel_count - 1), channel_count);
            }
        }
    }
}

fn mix_into(out: &mut [f32], buffer: &[f32], channel: usize, channel_count: usize) {
    for (frame, sample) in out.chunks_exact_mut(channel_count).zip(buffer) {
        frame[channel] += sample;
    }
}

pub struct Backend {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The number of output channels used.
    channel_count: u16,
    sample_rate: u32,
    routing: Arc<Mutex<Routing>>,
    running: Arc<AtomicBool>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Backend {
    /// Lists the names of cpal output devices.
    pub fn list() -> Result<Vec<String>, AudioError> {
        let mut names: Vec<String> = Backend::list_cpal_devices()?
            .into_iter()
            .map(|(host_id, device, channels)| {
                let name = device.name().unwrap_or_else(|_| "unknown".to_string());
                format!("{} (Channels={}) ({})", name, channels, host_id.name())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn list_cpal_devices() -> Result<Vec<(cpal::HostId, cpal::Device, u16)>, AudioError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = %e, host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = %e,
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = configs.map(|c| c.channels()).max().unwrap_or(0);
                if max_channels > 0 {
                    devices.push((host_id, device, max_channels));
                }
            }
        }

        Ok(devices)
    }

    /// Gets the named cpal device. "default" picks the default output device.
    pub fn get(name: &str, sample_rate: u32) -> Result<Backend, AudioError> {
        let (host_id, device) = if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::NoDevice(name.to_string()))?;
            (host.id(), device)
        } else {
            let mut found = None;
            for (host_id, device, _) in Backend::list_cpal_devices()? {
                if device.name()?.trim() == name {
                    found = Some((host_id, device));
                    break;
                }
            }
            found.ok_or_else(|| AudioError::NoDevice(name.to_string()))?
        };

        let channel_count = device.default_output_config()?.channels();
        info!(
            device = name,
            host = host_id.name(),
            channels = channel_count,
            sample_rate,
            "Opened audio device"
        );

        Ok(Backend {
            name: device.name()?,
            host_id,
            device,
            channel_count,
            sample_rate,
            routing: Arc::new(Mutex::new(Routing::new(channel_count))),
            running: Arc::new(AtomicBool::new(false)),
            output_thread: Mutex::new(None),
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    routing: Arc<Mutex<Routing>>,
    listener: Arc<dyn AudioListener>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channel_count = usize::from(config.channels).max(1);
    let mut scratch: Vec<f32> = Vec::new();
    let mut priority = AudioThreadPriority::from_env();

    Ok(device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            priority.apply();
            let frames = data.len() / channel_count;
            routing
                .lock()
                .render(listener.as_ref(), frames, &mut scratch);
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(*src);
            }
        },
        |err| error!(err = %err, "Output stream error"),
        None,
    )?)
}

impl AudioBackend for Backend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn register_port(&self, name: &str) -> Result<(), AudioError> {
        self.routing.lock().register(name);
        Ok(())
    }

    fn unregister_port(&self, name: &str) -> Result<(), AudioError> {
        if self.routing.lock().unregister(name) {
            Ok(())
        } else {
            Err(AudioError::UnknownPort(name.to_string()))
        }
    }

    fn has_registered_port(&self, name: &str) -> bool {
        self.routing.lock().ports.contains(name)
    }

    fn connect_main_stereo_out(&self, left: &str, right: &str) -> Result<(), AudioError> {
        let mut routing = self.routing.lock();
        for port in [left, right] {
            if !routing.ports.contains(port) {
                return Err(AudioError::UnknownPort(port.to_string()));
            }
        }
        routing.main_mix.push((left.to_string(), right.to_string()));
        Ok(())
    }

    fn start(&self, listener: Arc<dyn AudioListener>) -> Result<(), AudioError> {
        let span = span!(Level::INFO, "start (cpal)");
        let _enter = span.enter();

        let mut output_thread = self.output_thread.lock();
        if output_thread.is_some() {
            warn!(device = self.name, "Output stream already started");
            return Ok(());
        }

        let supported = self.device.default_output_config()?;
        let sample_format = supported.sample_format();
        let config = cpal::StreamConfig {
            channels: self.channel_count,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let device = self.device.clone();
        let routing = self.routing.clone();
        let running = self.running.clone();
        running.store(true, Ordering::Release);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

        // The stream is created and kept on its own thread.
        *output_thread = Some(thread::spawn(move || {
            let stream = match sample_format {
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, routing, listener),
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, routing, listener),
                cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, routing, listener),
                cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, routing, listener),
                other => Err(AudioError::Device(format!(
                    "unsupported sample format {:?}",
                    other
                ))),
            };
            let stream = match stream.and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            let _ = started_tx.send(Ok(()));
            info!("Output stream started");

            while running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(100));
            }
            drop(stream);
            info!("Output stream stopped");
        }));

        match started_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(AudioError::Device(
                "output thread exited before starting".to_string(),
            )),
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.output_thread.lock().take() {
            if thread.join().is_err() {
                error!(device = self.name, "Output thread panicked");
            }
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.channel_count,
            self.host_id.name()
        )
    }
}
