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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{error, info, span, Level};

use super::{Sink, SinkReport};
use crate::format::PcmFormat;
use crate::mixer::{decode_sample, Mixer, MixerState};

/// How often the controlling thread checks for the end of playback.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A cpal output device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

#[derive(Default)]
struct StreamStats {
    buffers: AtomicU64,
    frames: AtomicU64,
    underruns: AtomicU64,
}

/// Moves mixed buffers into cpal's callback buffers. Lives inside the output
/// callback; the staging buffer is allocated once up front.
struct Feeder {
    mixer: Arc<Mixer>,
    format: PcmFormat,
    /// One mixer buffer converted to f32.
    staging: Vec<f32>,
    offset: usize,
    len: usize,
    /// The mixer went silent or was deinitialized; nothing more to play.
    finished: bool,
    stats: Arc<StreamStats>,
    done: Sender<()>,
}

impl Feeder {
    fn new(mixer: Arc<Mixer>, stats: Arc<StreamStats>, done: Sender<()>) -> Feeder {
        let format = mixer.format();
        let samples = mixer.frames_per_buffer() * usize::from(format.channel_count);
        Feeder {
            mixer,
            format,
            staging: vec![0.0; samples],
            offset: 0,
            len: 0,
            finished: false,
            stats,
            done,
        }
    }

    fn fill<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut written = 0;
        while written < data.len() {
            if self.offset == self.len && !self.refill() {
                break;
            }
            let count = (self.len - self.offset).min(data.len() - written);
            let staged = &self.staging[self.offset..self.offset + count];
            for (out, sample) in data[written..written + count].iter_mut().zip(staged) {
                *out = T::from_sample(*sample);
            }
            written += count;
            self.offset += count;
        }

        if written < data.len() {
            data[written..].fill(T::EQUILIBRIUM);
            if !self.finished {
                self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.finished && self.offset == self.len {
            let _ = self.done.try_send(());
        }
    }

    /// Stages the next mixer buffer. Returns false if none is available.
    fn refill(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let drain = match self.mixer.fill_next_buffer() {
            Ok(Some(drain)) => drain,
            Ok(None) => return false,
            Err(_) => {
                self.finished = true;
                return false;
            }
        };

        let sample_width = self.format.bytes_per_sample();
        let mut len = 0;
        for (sample, staged) in drain
            .chunks_exact(sample_width)
            .zip(self.staging.iter_mut())
        {
            *staged = decode_sample(self.format, sample) as f32 / 32768.0;
            len += 1;
        }
        drain.release();

        self.offset = 0;
        self.len = len;
        self.stats.buffers.fetch_add(1, Ordering::Relaxed);
        self.stats
            .frames
            .fetch_add(self.mixer.frames_per_buffer() as u64, Ordering::Relaxed);
        if self.mixer.state() == MixerState::Silent {
            self.finished = true;
        }
        true
    }
}

impl Device {
    /// Lists cpal devices and produces the Sink trait.
    pub fn list() -> Result<Vec<Box<dyn Sink>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn Sink> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the cpal device with the given name, or the default output
    /// device of the default host.
    pub fn get(name: Option<&str>) -> Result<Device, Box<dyn Error>> {
        match name {
            Some(name) => Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name).into()),
            None => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or("no default output device")?;
                Ok(Device {
                    name: device.name()?,
                    max_channels: device.default_output_config()?.channels(),
                    host_id: host.id(),
                    device,
                })
            }
        }
    }

    fn build_stream<T>(
        &self,
        config: &cpal::StreamConfig,
        mut feeder: Feeder,
    ) -> Result<cpal::Stream, Box<dyn Error>>
    where
        T: SizedSample + FromSample<f32>,
    {
        Ok(self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| feeder.fill(data),
            |err| error!(err = %err, "CPAL output stream error"),
            None,
        )?)
    }
}

impl Sink for Device {
    fn run(
        &self,
        mixer: Arc<Mixer>,
        limit: Option<Duration>,
    ) -> Result<SinkReport, Box<dyn Error>> {
        let span = span!(Level::INFO, "play (cpal)");
        let _enter = span.enter();

        let format = mixer.format();
        if self.max_channels < format.channel_count {
            return Err(format!(
                "{} channels requested, audio device {} only has {}",
                format.channel_count, self.name, self.max_channels
            )
            .into());
        }

        let sample_format = self.device.default_output_config()?.sample_format();
        let config = cpal::StreamConfig {
            channels: format.channel_count,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stats = Arc::new(StreamStats::default());
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let feeder = Feeder::new(mixer.clone(), stats.clone(), done_tx);
        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&config, feeder)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&config, feeder)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&config, feeder)?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>(&config, feeder)?,
            cpal::SampleFormat::U8 => self.build_stream::<u8>(&config, feeder)?,
            cpal::SampleFormat::I8 => self.build_stream::<i8>(&config, feeder)?,
            other => return Err(format!("unsupported device sample format {}", other).into()),
        };

        info!(
            device = self.name,
            format = %format,
            stream_format = %sample_format,
            limit = ?limit,
            "Playing mix."
        );

        let start = Instant::now();
        stream.play()?;
        loop {
            match done_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if limit.is_some_and(|limit| start.elapsed() >= limit) {
                break;
            }
        }
        drop(stream);

        let report = SinkReport {
            buffers: stats.buffers.load(Ordering::Relaxed),
            frames: stats.frames.load(Ordering::Relaxed),
            underruns: stats.underruns.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        };
        info!(
            device = self.name,
            buffers = report.buffers,
            underruns = report.underruns,
            elapsed = ?report.elapsed,
            "Playback finished."
        );
        Ok(report)
    }
}
