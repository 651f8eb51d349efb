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
use std::{error::Error, fmt, sync::Arc, time::Duration};

use crate::mixer::Mixer;

pub mod cpal;
pub mod wav;

pub use wav::WavSink;

/// What a sink did during one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    /// Output buffers drained from the mixer.
    pub buffers: u64,
    /// Frames written to the output.
    pub frames: u64,
    /// Times the sink had to pad with silence or retry because no buffer
    /// was ready.
    pub underruns: u64,
    /// Wall clock time the run took.
    pub elapsed: Duration,
}

/// A consumer of mixed buffers. Sinks call `Mixer::fill_next_buffer` at
/// their own cadence and drain what it returns.
pub trait Sink: fmt::Display + Send + Sync {
    /// Drains the mixer until it goes silent or `limit` of audio has been
    /// played.
    fn run(&self, mixer: Arc<Mixer>, limit: Option<Duration>)
        -> Result<SinkReport, Box<dyn Error>>;
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Sink>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the output device with the given name, or the default device.
pub fn get_device(name: Option<&str>) -> Result<Arc<dyn Sink>, Box<dyn Error>> {
    Ok(Arc::new(cpal::Device::get(name)?))
}
