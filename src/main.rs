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
use std::error::Error;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sddm::audio;
use sddm::config::{EngineConfig, KitOptions, YamlKit};
use sddm::engine::Engine;
use sddm::kit::KitLoader;
use sddm::midi::{self, TriggerIntake};
use sddm::trigger::{MidiDumper, TriggerRouter};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sample-based drum machine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the drum machine. Reads commands from stdin: reload, status, quit.
    Start {
        /// The path to the engine config.
        config_path: String,
    },
    /// Loads a kit and prints it.
    Kit {
        /// The path to the kit file.
        path: String,
        /// Resample every sample to this rate.
        #[arg[short, long]]
        sample_rate: Option<u32>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Logs every trigger received from the given MIDI device.
    Dump {
        /// The MIDI device name.
        device_name: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path } => {
            start(Path::new(&config_path))?;
        }
        Commands::Kit { path, sample_rate } => {
            let loader = YamlKit::new(KitOptions {
                sample_rate,
                ..Default::default()
            });
            let kit = loader.load(&PathBuf::from(path))?;
            print!("{}", kit);
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Dump { device_name } => {
            let device = midi::get_device(&device_name)?;
            let router = Arc::new(TriggerRouter::new());
            router.add_listener(Arc::new(MidiDumper));
            let intake = TriggerIntake::start(router)?;
            device.watch_events(intake.sender())?;

            println!("Dumping triggers from {}, press Ctrl-D to stop.", device);
            for line in io::stdin().lock().lines() {
                line?;
            }

            device.stop_watch_events();
            intake.join();
        }
    }

    Ok(())
}

/// Runs the engine until stdin closes or a quit command arrives.
fn start(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::deserialize(config_path)?;
    let backend = audio::get_backend(&config)?;
    let engine = Arc::new(Engine::new(backend, &config));
    let loader = YamlKit::new(config.kit_options());

    if let Some(kit) = config.kit() {
        engine.load_kit(&loader, kit)?;
    } else {
        warn!("No kit configured, starting with an empty kit");
    }
    engine.start()?;

    let router = Arc::new(TriggerRouter::new());
    router.add_listener(engine.clone());
    let intake = TriggerIntake::start(router)?;
    let device = match config.midi_device() {
        Some(name) => {
            let device = midi::get_device(name)?;
            device.watch_events(intake.sender())?;
            Some(device)
        }
        None => {
            warn!("No MIDI device configured, no triggers will be received");
            None
        }
    };

    let kit = engine.drumkit();
    info!(kit = kit.name(), "Drum machine started");
    drop(kit);
    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "reload" => match config.kit() {
                Some(kit) => {
                    if let Err(e) = engine.load_kit(&loader, kit) {
                        warn!(err = %e, "Reload failed");
                    }
                }
                None => warn!("No kit configured"),
            },
            "status" => {
                let counts = engine.note_counts();
                let (instruments, submixes) = engine.orphan_counts();
                println!(
                    "kit={} available={} pending={} playing={} allocated={} orphaned_instruments={} orphaned_submixes={}",
                    engine.drumkit().name(),
                    counts.available,
                    counts.pending,
                    counts.playing,
                    counts.allocated,
                    instruments,
                    submixes
                );
            }
            "quit" => break,
            "" => {}
            other => println!("Unknown command {}", other),
        }
    }

    if let Some(device) = device {
        device.stop_watch_events();
    }
    intake.join();
    engine.stop();
    info!("Drum machine stopped");
    Ok(())
}
