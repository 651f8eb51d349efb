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
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{info, span, Level};

use super::{Sink, SinkReport};
use crate::mixer::{decode_sample, Mixer, MixerState};

/// Renders the mix into a WAV file as fast as the mixer can produce it.
pub struct WavSink {
    path: PathBuf,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> WavSink {
        WavSink { path: path.into() }
    }
}

impl fmt::Display for WavSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WAV file {}", self.path.display())
    }
}

impl Sink for WavSink {
    fn run(
        &self,
        mixer: Arc<Mixer>,
        limit: Option<Duration>,
    ) -> Result<SinkReport, Box<dyn Error>> {
        let span = span!(Level::INFO, "render (wav)");
        let _enter = span.enter();

        let format = mixer.format();
        let spec = WavSpec {
            channels: format.channel_count,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&self.path, spec)?;
        info!(path = ?self.path, format = %format, limit = ?limit, "Rendering mix.");

        let limit_frames = limit.map(|limit| format.duration_to_frames(limit));
        let frame_width = format.frame_width();
        let sample_width = format.bytes_per_sample();
        let start = Instant::now();
        let mut report = SinkReport::default();

        loop {
            let remaining = limit_frames.map(|limit| limit.saturating_sub(report.frames));
            if remaining == Some(0) {
                break;
            }

            let Some(drain) = mixer.fill_next_buffer()? else {
                report.underruns += 1;
                thread::yield_now();
                continue;
            };

            let frames = remaining.map_or(mixer.frames_per_buffer(), |remaining| {
                mixer.frames_per_buffer().min(remaining as usize)
            });
            for sample in drain[..frames * frame_width].chunks_exact(sample_width) {
                let value = decode_sample(format, sample);
                if format.bits_per_sample == 8 {
                    writer.write_sample((value >> 8) as i8)?;
                } else {
                    writer.write_sample(value as i16)?;
                }
            }
            drain.release();

            report.buffers += 1;
            report.frames += frames as u64;
            if mixer.state() == MixerState::Silent {
                break;
            }
        }

        writer.finalize()?;
        report.elapsed = start.elapsed();
        info!(
            path = ?self.path,
            buffers = report.buffers,
            frames = report.frames,
            elapsed = ?report.elapsed,
            "Render finished."
        );
        Ok(report)
    }
}
