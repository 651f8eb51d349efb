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
// Mixing arithmetic for one tick. Every source sample is decoded to a signed
// i32 at 16-bit scale, summed, saturated to the i16 range and then encoded to
// the mixer's output depth and signedness.
use crate::format::{PcmFormat, MAX_FRAME_WIDTH};

/// Decodes one little-endian sample to 16-bit scale.
type DecodeFn = fn(&[u8]) -> i32;

/// Encodes one saturated 16-bit scale sample into the output layout.
type EncodeFn = fn(i32, &mut [u8]);

fn decode_s8(bytes: &[u8]) -> i32 {
    i32::from(bytes[0] as i8) << 8
}

fn decode_u8(bytes: &[u8]) -> i32 {
    (i32::from(bytes[0]) - 128) << 8
}

fn decode_s16(bytes: &[u8]) -> i32 {
    i32::from(i16::from_le_bytes([bytes[0], bytes[1]]))
}

fn decode_u16(bytes: &[u8]) -> i32 {
    i32::from(u16::from_le_bytes([bytes[0], bytes[1]])) - 32768
}

fn encode_s8(value: i32, out: &mut [u8]) {
    out[0] = (value >> 8) as i8 as u8;
}

fn encode_u8(value: i32, out: &mut [u8]) {
    out[0] = ((value >> 8) + 128) as u8;
}

fn encode_s16(value: i32, out: &mut [u8]) {
    out.copy_from_slice(&(value as i16).to_le_bytes());
}

fn encode_u16(value: i32, out: &mut [u8]) {
    out.copy_from_slice(&((value + 32768) as u16).to_le_bytes());
}

fn decoder_for(format: PcmFormat) -> DecodeFn {
    match (format.bits_per_sample, format.signed) {
        (8, true) => decode_s8,
        (8, false) => decode_u8,
        (_, true) => decode_s16,
        (_, false) => decode_u16,
    }
}

fn encoder_for(format: PcmFormat) -> EncodeFn {
    match (format.bits_per_sample, format.signed) {
        (8, true) => encode_s8,
        (8, false) => encode_u8,
        (_, true) => encode_s16,
        (_, false) => encode_u16,
    }
}

/// Decodes a single sample in `format` to the mixer's signed 16-bit scale.
/// 8-bit samples are shifted up by 8 bits, unsigned samples are re-centred
/// around zero.
pub fn decode_sample(format: PcmFormat, bytes: &[u8]) -> i32 {
    decoder_for(format)(bytes)
}

/// The accumulation buffer for one mix tick.
///
/// All storage is allocated up front. `clear`, `accumulate` and
/// `write_output` never allocate.
pub struct MixBus {
    format: PcmFormat,
    frames: usize,
    /// Interleaved sums at 16-bit scale, `frames * channel_count` entries.
    accumulator: Vec<i32>,
    /// Raw PCM a voice writes in its own format before it is accumulated.
    scratch: Vec<u8>,
}

impl MixBus {
    /// Creates a bus for `frames` frames of `format` output.
    pub fn new(format: PcmFormat, frames: usize) -> MixBus {
        MixBus {
            format,
            frames,
            accumulator: vec![0; frames * usize::from(format.channel_count)],
            scratch: vec![0; frames * MAX_FRAME_WIDTH],
        }
    }

    /// Frames mixed per tick.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Resets the accumulator to silence.
    pub fn clear(&mut self) {
        self.accumulator.fill(0);
    }

    /// Space for a voice to write one tick of its native PCM into.
    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// Adds `frames` frames of `format` PCM from the scratch space to the
    /// accumulator. Mono input on a stereo bus is duplicated to both channels.
    /// Frames past `frames` contribute nothing.
    pub fn accumulate(&mut self, format: PcmFormat, frames: usize) {
        let decode = decoder_for(format);
        let sample_width = format.bytes_per_sample();
        let frame_width = format.frame_width();
        let out_channels = usize::from(self.format.channel_count);
        let duplicate = format.channel_count < self.format.channel_count;
        let frames = frames.min(self.frames);

        let input = self.scratch[..frames * frame_width].chunks_exact(frame_width);
        let output = self.accumulator.chunks_exact_mut(out_channels);
        for (frame, sums) in input.zip(output) {
            if duplicate {
                let value = decode(&frame[..sample_width]);
                sums.iter_mut().for_each(|sum| *sum += value);
            } else {
                for (sample, sum) in frame.chunks_exact(sample_width).zip(sums.iter_mut()) {
                    *sum += decode(sample);
                }
            }
        }
    }

    /// Saturates the accumulated sums and encodes them into `output`, which
    /// must hold `frames` frames of the bus format.
    pub fn write_output(&self, output: &mut [u8]) {
        let encode = encoder_for(self.format);
        let sample_width = self.format.bytes_per_sample();
        for (sum, out) in self
            .accumulator
            .iter()
            .zip(output.chunks_exact_mut(sample_width))
        {
            encode((*sum).clamp(i32::from(i16::MIN), i32::from(i16::MAX)), out);
        }
    }

    /// Frees the bus storage. The bus mixes nothing afterwards.
    pub(crate) fn release(&mut self) {
        self.frames = 0;
        self.accumulator = Vec::new();
        self.scratch = Vec::new();
    }
}
