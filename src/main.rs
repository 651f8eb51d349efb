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
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use polymix::config::Session;
use polymix::sink::{self, Sink, WavSink};
use polymix::source::BufferFillPool;
use polymix::Mixer;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A fixed voice pool PCM mixer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Renders a session into a WAV file.
    Render {
        /// The path to the session file.
        session_path: String,
        /// The WAV file to write.
        output_path: String,
        /// How much audio to render, e.g. 30s. Required if any voice loops.
        #[arg[short, long]]
        duration: Option<String>,
    },
    /// Plays a session through an audio output device.
    Play {
        /// The path to the session file.
        session_path: String,
        /// The device name to play through. Defaults to the system default.
        #[arg[short = 'D', long]]
        device_name: Option<String>,
        /// How long to play, e.g. 30s. Looping sessions play until interrupted
        /// if unset.
        #[arg[short, long]]
        duration: Option<String>,
    },
    /// Lists the available audio output devices.
    Devices {},
}

/// Loads a session and starts its voices on a new mixer.
fn start_session(session_path: &str) -> Result<(Session, Arc<Mixer>), Box<dyn Error>> {
    let session = Session::deserialize(Path::new(session_path))?;
    let mixer = Arc::new(Mixer::new(session.mixer())?);
    let pool = Arc::new(BufferFillPool::new(session.mixer().buffer_threads())?);
    session.start(&mixer, &pool)?;
    Ok((session, mixer))
}

fn parse_duration(duration: Option<String>) -> Result<Option<Duration>, Box<dyn Error>> {
    match duration {
        Some(duration) => Ok(Some(DurationString::from_string(duration)?.into())),
        None => Ok(None),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            session_path,
            output_path,
            duration,
        } => {
            let limit = parse_duration(duration)?;
            let (session, mixer) = start_session(&session_path)?;
            if limit.is_none() && session.has_looping_voices() {
                mixer.deinit();
                return Err("the session loops, so a render needs --duration".into());
            }

            let sink = WavSink::new(&output_path);
            let report = sink.run(mixer.clone(), limit)?;
            mixer.deinit();
            println!(
                "Rendered {} frames ({} buffers) to {} in {:?}.",
                report.frames, report.buffers, output_path, report.elapsed
            );
        }
        Commands::Play {
            session_path,
            device_name,
            duration,
        } => {
            let limit = parse_duration(duration)?;
            let device = sink::get_device(device_name.as_deref())?;
            let (_session, mixer) = start_session(&session_path)?;

            println!("Playing through {}.", device);
            let report = device.run(mixer.clone(), limit)?;
            mixer.deinit();
            println!(
                "Played {} buffers with {} underruns ({} held off) in {:?}.",
                report.buffers,
                report.underruns,
                mixer.stats().held_off,
                report.elapsed
            );
        }
        Commands::Devices {} => {
            let devices = sink::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
    }

    Ok(())
}
