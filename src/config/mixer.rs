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
use serde::Deserialize;

use crate::format::PcmFormat;

const DEFAULT_VOICE_COUNT: usize = 2;
const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_CHANNEL_COUNT: u16 = 2;
const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
const DEFAULT_SAMPLES_SIGNED: bool = true;
const DEFAULT_SAMPLE_RATE: u32 = 8000;
const DEFAULT_BUFFER_THREADS: usize = 2;

/// A YAML representation of the mixer configuration. Every field is optional.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct MixerConfig {
    /// Number of voices in the pool (default: 2).
    voice_count: Option<usize>,

    /// Byte size of each output buffer (default: 1024).
    buffer_size: Option<usize>,

    /// Output channels, 1 or 2 (default: 2).
    channel_count: Option<u16>,

    /// Output bit depth, 8 or 16 (default: 16).
    bits_per_sample: Option<u16>,

    /// Whether output samples are signed (default: true).
    samples_signed: Option<bool>,

    /// Output sample rate in Hz (default: 8000).
    sample_rate: Option<u32>,

    /// Number of worker threads prefetching streamed voices.
    /// Defaults to a small fixed value; must be >= 1.
    buffer_threads: Option<usize>,
}

impl MixerConfig {
    /// New will create a new mixer configuration.
    pub fn new(
        voice_count: usize,
        buffer_size: usize,
        channel_count: u16,
        bits_per_sample: u16,
        samples_signed: bool,
        sample_rate: u32,
    ) -> MixerConfig {
        MixerConfig {
            voice_count: Some(voice_count),
            buffer_size: Some(buffer_size),
            channel_count: Some(channel_count),
            bits_per_sample: Some(bits_per_sample),
            samples_signed: Some(samples_signed),
            sample_rate: Some(sample_rate),
            buffer_threads: None,
        }
    }

    /// Returns the number of voices.
    pub fn voice_count(&self) -> usize {
        self.voice_count.unwrap_or(DEFAULT_VOICE_COUNT)
    }

    /// Returns the output buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE)
    }

    pub fn samples_signed(&self) -> bool {
        self.samples_signed.unwrap_or(DEFAULT_SAMPLES_SIGNED)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the number of worker threads used for streamed voices.
    pub fn buffer_threads(&self) -> usize {
        self.buffer_threads.unwrap_or(DEFAULT_BUFFER_THREADS).max(1)
    }

    /// Returns the output PCM format.
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(
            self.sample_rate(),
            self.channel_count(),
            self.bits_per_sample(),
            self.samples_signed(),
        )
    }
}
