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
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use hound::WavReader;
use tracing::{debug, info};

use super::error::SampleSourceError;
use super::memory::MemorySampleSource;
use super::traits::{SampleSource, SourceRead};
use crate::format::PcmFormat;

/// Loads a whole WAV file into memory.
///
/// 8 and 16-bit integer files keep their depth (8-bit WAV data is read as
/// signed). 24/32-bit integer and 32-bit float files are converted to signed
/// 16-bit here so the fill path never has to.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<MemorySampleSource, SampleSourceError> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    info!(
        path = ?path,
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        "Loading WAV into memory"
    );

    let source = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => {
            let samples = reader.samples::<i8>().collect::<Result<Vec<_>, _>>()?;
            MemorySampleSource::from_i8(&samples, spec.channels, spec.sample_rate)
        }
        (hound::SampleFormat::Int, 16) => {
            let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            MemorySampleSource::from_i16(&samples, spec.channels, spec.sample_rate)
        }
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let shift = bits - 16;
            let samples = reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| (s >> shift) as i16))
                .collect::<Result<Vec<_>, _>>()?;
            MemorySampleSource::from_i16(&samples, spec.channels, spec.sample_rate)
        }
        (hound::SampleFormat::Float, 32) => {
            let samples = reader
                .samples::<f32>()
                .map(|sample| sample.map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16))
                .collect::<Result<Vec<_>, _>>()?;
            MemorySampleSource::from_i16(&samples, spec.channels, spec.sample_rate)
        }
        (format, bits) => {
            return Err(SampleSourceError::UnsupportedFormat(format!(
                "{:?} {}-bit WAV",
                format, bits
            )))
        }
    };

    debug!(
        path = ?path,
        frames = source.frames(),
        memory_kb = source.memory_size() / 1024,
        "WAV loaded"
    );
    Ok(source)
}

/// A sample source that streams an 8 or 16-bit integer WAV file from disk.
///
/// Reads hit the file system, so this must be wrapped in a
/// `BufferedSampleSource` before a voice plays it.
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    format: PcmFormat,
    total_frames: usize,
    position: usize,
}

impl WavFileSource {
    /// Opens a WAV file for streaming.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SampleSourceError> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int
            || !matches!(spec.bits_per_sample, 8 | 16)
        {
            return Err(SampleSourceError::UnsupportedFormat(format!(
                "streaming needs 8 or 16-bit integer WAV, got {:?} {}-bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }

        Ok(Self {
            total_frames: reader.duration() as usize,
            format: PcmFormat::new(spec.sample_rate, spec.channels, spec.bits_per_sample, true),
            reader,
            position: 0,
        })
    }
}

impl SampleSource for WavFileSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(
        &mut self,
        output: &mut [u8],
        max_frames: usize,
    ) -> Result<SourceRead, SampleSourceError> {
        let channels = usize::from(self.format.channel_count);
        let frames = max_frames.min(output.len() / self.format.frame_width());
        let mut written = 0;

        if self.format.bits_per_sample == 8 {
            for sample in self.reader.samples::<i8>().take(frames * channels) {
                output[written] = sample? as u8;
                written += 1;
            }
        } else {
            for sample in self.reader.samples::<i16>().take(frames * channels) {
                output[written * 2..written * 2 + 2].copy_from_slice(&sample?.to_le_bytes());
                written += 1;
            }
        }

        let frames_read = written / channels;
        self.position += frames_read;
        Ok(SourceRead {
            frames: frames_read,
            exhausted: self.position >= self.total_frames || frames_read < frames,
        })
    }

    fn seek_start(&mut self) -> Result<(), SampleSourceError> {
        self.reader.seek(0)?;
        self.position = 0;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.format.frames_to_duration(self.total_frames as u64))
    }
}
