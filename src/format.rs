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

use std::{fmt, time::Duration};

/// The widest frame the mixer accepts from a source: 16-bit stereo.
pub const MAX_FRAME_WIDTH: usize = 4;

/// Raw interleaved PCM layout: sample rate, channels, bit depth and signedness.
/// 16-bit samples are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channel_count: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Samples are signed (true) or offset by half-scale (false)
    pub signed: bool,
}

impl PcmFormat {
    /// Creates a new PcmFormat
    pub const fn new(
        sample_rate: u32,
        channel_count: u16,
        bits_per_sample: u16,
        signed: bool,
    ) -> Self {
        PcmFormat {
            sample_rate,
            channel_count,
            bits_per_sample,
            signed,
        }
    }

    /// Signed 16-bit PCM, the layout most decoders produce.
    pub const fn s16(sample_rate: u32, channel_count: u16) -> Self {
        PcmFormat::new(sample_rate, channel_count, 16, true)
    }

    /// Unsigned 8-bit PCM, the layout of 8-bit WAV files.
    pub const fn u8(sample_rate: u32, channel_count: u16) -> Self {
        PcmFormat::new(sample_rate, channel_count, 8, false)
    }

    /// Bytes occupied by a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub fn frame_width(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channel_count)
    }

    /// True if the mixer can decode this layout: mono or stereo, 8 or 16 bits.
    pub fn is_mixable(&self) -> bool {
        matches!(self.channel_count, 1 | 2) && matches!(self.bits_per_sample, 8 | 16)
    }

    /// Fills `buffer` with this format's zero-equivalent value. Unsigned formats
    /// are silent at half-scale rather than at zero.
    pub fn fill_silence(&self, buffer: &mut [u8]) {
        match (self.bits_per_sample, self.signed) {
            (8, false) => buffer.fill(0x80),
            (16, false) => {
                for sample in buffer.chunks_exact_mut(2) {
                    sample.copy_from_slice(&0x8000u16.to_le_bytes());
                }
            }
            _ => buffer.fill(0),
        }
    }

    /// Converts a frame count into playback time at this format's rate.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Converts playback time into a frame count at this format's rate.
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * f64::from(self.sample_rate)).round() as u64
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.channel_count {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            n => format!("{}ch", n),
        };
        write!(
            f,
            "{}Hz {}{} {}",
            self.sample_rate,
            if self.signed { "s" } else { "u" },
            self.bits_per_sample,
            layout
        )
    }
}
