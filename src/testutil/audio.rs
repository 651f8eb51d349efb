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
use std::{error::Error, fs::File, io::BufWriter, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};

fn write_wav<S: hound::Sample + Copy>(
    path: &Path,
    spec: WavSpec,
    samples: &[S],
) -> Result<(), Box<dyn Error>> {
    let mut writer = WavWriter::new(BufWriter::new(File::create(path)?), spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes interleaved signed 16-bit samples to a WAV file.
pub fn write_wav_i16(
    path: &Path,
    channels: u16,
    sample_rate: u32,
    samples: &[i16],
) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    write_wav(path, spec, samples)
}

/// Writes interleaved 8-bit samples to a WAV file. hound stores them unsigned.
pub fn write_wav_i8(
    path: &Path,
    channels: u16,
    sample_rate: u32,
    samples: &[i8],
) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 8,
        sample_format: SampleFormat::Int,
    };
    write_wav(path, spec, samples)
}

/// Writes interleaved 32-bit float samples to a WAV file.
pub fn write_wav_f32(
    path: &Path,
    channels: u16,
    sample_rate: u32,
    samples: &[f32],
) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    write_wav(path, spec, samples)
}

/// Decodes little-endian 16-bit PCM bytes.
pub fn decode_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Audio test utilities for generating test signals and validating results
pub mod audio_test_utils {
    use std::f32::consts::PI;

    /// Generates `frames` samples of a sine wave at `amplitude`.
    pub fn sine_i16(frequency: f32, sample_rate: u32, frames: usize, amplitude: i16) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (f32::from(amplitude) * (2.0 * PI * frequency * t).sin()).round() as i16
            })
            .collect()
    }

    /// Calculate RMS (Root Mean Square) of a signal
    pub fn calculate_rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = samples.iter().map(|&x| f64::from(x).powi(2)).sum();
        (sum_squares / samples.len() as f64).sqrt()
    }
}
