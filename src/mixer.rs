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
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MixerConfig;
use crate::error::MixerError;
use crate::format::PcmFormat;
use crate::source::SampleSource;

mod bus;
mod pool;
#[cfg(test)]
mod tests;
mod voice;

pub use bus::{decode_sample, MixBus};
pub use pool::{BufferState, Drain, Fill, OutputBufferPool};
pub use voice::{Chunk, Voice, VoiceState};

/// The largest voice pool a mixer supports.
pub const MAX_VOICES: usize = 255;

/// Whether the mixer is producing anything but silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    /// No voice is playing.
    Silent,
    /// At least one voice is playing, or a play happened since the last tick.
    Mixing,
}

impl fmt::Display for MixerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerState::Silent => f.write_str("silent"),
            MixerState::Mixing => f.write_str("mixing"),
        }
    }
}

/// Counters for the fill path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStats {
    /// Buffers produced.
    pub ticks: u64,
    /// Fill attempts that found the fill target still held by the consumer.
    pub held_off: u64,
}

/// State shared by the mixer and its voices.
pub(crate) struct Shared {
    pub(crate) format: PcmFormat,
    deinitialized: AtomicBool,
    mixing: AtomicBool,
    /// Sources finished in the producer context, dropped by the control context.
    pub(crate) retired_tx: Sender<Box<dyn SampleSource>>,
    retired_rx: Receiver<Box<dyn SampleSource>>,
}

impl Shared {
    pub(crate) fn is_deinitialized(&self) -> bool {
        self.deinitialized.load(Ordering::Acquire)
    }

    pub(crate) fn check_alive(&self) -> Result<(), MixerError> {
        if self.is_deinitialized() {
            return Err(MixerError::UseAfterDeinit);
        }
        Ok(())
    }

    /// True if a source in `format` can play on this mixer: same rate, 8 or
    /// 16 bits, and mono or the mixer's channel count.
    pub(crate) fn accepts(&self, format: PcmFormat) -> bool {
        format.is_mixable()
            && format.sample_rate == self.format.sample_rate
            && format.channel_count <= self.format.channel_count
    }

    pub(crate) fn set_mixing(&self) {
        self.mixing.store(true, Ordering::Release);
    }

    /// Drops retired sources. Returns how many were dropped.
    pub(crate) fn reclaim(&self) -> usize {
        self.retired_rx.try_iter().count()
    }
}

/// State only the producer touches, serialized by the producer mutex.
struct Producer {
    bus: MixBus,
    /// Index of the buffer the next tick fills.
    next: usize,
}

/// A fixed pool of voices mixed into double-buffered PCM output.
///
/// Voices are started and stopped from any thread. One producer (a sink)
/// calls `fill_next_buffer` at the buffer-period cadence and drains the
/// returned buffer.
pub struct Mixer {
    shared: Arc<Shared>,
    voices: Box<[Voice]>,
    producer: Mutex<Producer>,
    pool: OutputBufferPool,
    frames_per_buffer: usize,
    ticks: AtomicU64,
    held_off: AtomicU64,
}

impl Mixer {
    /// Creates a mixer, allocating its voices, mix bus and both output
    /// buffers. Fails with `InvalidConfiguration` if any parameter is out of
    /// range.
    pub fn new(config: &MixerConfig) -> Result<Mixer, MixerError> {
        let voice_count = config.voice_count();
        let format = config.format();
        let buffer_size = config.buffer_size();

        if voice_count == 0 || voice_count > MAX_VOICES {
            return Err(MixerError::InvalidConfiguration(format!(
                "voice count must be between 1 and {}, got {}",
                MAX_VOICES, voice_count
            )));
        }
        if !matches!(format.channel_count, 1 | 2) {
            return Err(MixerError::InvalidConfiguration(format!(
                "channel count must be 1 or 2, got {}",
                format.channel_count
            )));
        }
        if format.sample_rate == 0 {
            return Err(MixerError::InvalidConfiguration(
                "sample rate must be at least 1Hz".into(),
            ));
        }
        if !matches!(format.bits_per_sample, 8 | 16) {
            return Err(MixerError::InvalidConfiguration(format!(
                "bits per sample must be 8 or 16, got {}",
                format.bits_per_sample
            )));
        }
        let frame_width = format.frame_width();
        if buffer_size == 0 || buffer_size % frame_width != 0 {
            return Err(MixerError::InvalidConfiguration(format!(
                "buffer size {} is not a positive multiple of the {} byte frame",
                buffer_size, frame_width
            )));
        }

        let frames_per_buffer = buffer_size / frame_width;
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(voice_count * 2);
        let shared = Arc::new(Shared {
            format,
            deinitialized: AtomicBool::new(false),
            mixing: AtomicBool::new(false),
            retired_tx,
            retired_rx,
        });
        let voices = (0..voice_count)
            .map(|index| Voice::new(index, shared.clone()))
            .collect();

        info!(
            voices = voice_count,
            format = %format,
            buffer_size,
            frames_per_buffer,
            "Mixer created"
        );

        Ok(Mixer {
            shared,
            voices,
            producer: Mutex::new(Producer {
                bus: MixBus::new(format, frames_per_buffer),
                next: 0,
            }),
            pool: OutputBufferPool::new(buffer_size),
            frames_per_buffer,
            ticks: AtomicU64::new(0),
            held_off: AtomicU64::new(0),
        })
    }

    /// Returns the voice at `index`.
    pub fn voice(&self, index: usize) -> Result<&Voice, MixerError> {
        self.shared.check_alive()?;
        self.voices.get(index).ok_or(MixerError::IndexError {
            index,
            voice_count: self.voices.len(),
        })
    }

    /// Iterates the voice pool in index order.
    ///
    /// Like `state` and `stats` this is inspection only and keeps working
    /// after `deinit`, when every voice is idle. Anything that changes a
    /// voice still fails with `UseAfterDeinit`.
    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    /// True if any voice is playing.
    pub fn is_playing(&self) -> Result<bool, MixerError> {
        self.shared.check_alive()?;
        Ok(self.voices.iter().any(Voice::is_playing))
    }

    /// Returns whether the mixer is producing anything but silence.
    pub fn state(&self) -> MixerState {
        if self.shared.mixing.load(Ordering::Acquire) || self.voices.iter().any(Voice::is_playing)
        {
            MixerState::Mixing
        } else {
            MixerState::Silent
        }
    }

    /// Returns the fill path counters.
    pub fn stats(&self) -> MixerStats {
        MixerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            held_off: self.held_off.load(Ordering::Relaxed),
        }
    }

    /// Mixes one buffer of every playing voice and hands it to the caller.
    ///
    /// Returns `Ok(None)` without advancing any voice if the consumer still
    /// holds the buffer this tick would fill. Never allocates, logs or drops
    /// a source.
    pub fn fill_next_buffer(&self) -> Result<Option<Drain<'_>>, MixerError> {
        self.shared.check_alive()?;
        let mut producer = self.producer.lock();
        // deinit may have run while this thread waited for the lock.
        self.shared.check_alive()?;

        let Some(mut fill) = self.pool.begin_fill(producer.next) else {
            self.held_off.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let frames = self.frames_per_buffer;
        let Producer { bus, next } = &mut *producer;
        bus.clear();
        let mut playing = false;
        for voice in self.voices.iter() {
            if let Some(chunk) = voice.next_chunk(bus.scratch_mut(), frames)? {
                bus.accumulate(chunk.format, chunk.frames);
            }
            playing |= voice.is_playing();
        }
        bus.write_output(fill.as_mut_slice());

        *next ^= 1;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if !playing {
            self.shared.mixing.store(false, Ordering::Release);
        }
        Ok(Some(fill.publish()))
    }

    /// Finalizes stops the producer has not yet seen and drops sources that
    /// finished in the producer context. Returns how many sources were
    /// dropped. play, stop and deinit also drop retired sources.
    pub fn reclaim(&self) -> usize {
        let settled = self.voices.iter().filter(|voice| voice.settle()).count();
        settled + self.shared.reclaim()
    }

    /// Stops every voice and frees the mix bus and every output buffer the
    /// consumer does not hold. Later calls fail with `UseAfterDeinit`.
    /// Idempotent.
    pub fn deinit(&self) {
        if self.shared.deinitialized.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut sources = 0;
        for voice in self.voices.iter() {
            if voice.halt().is_some() {
                sources += 1;
            }
        }
        sources += self.shared.reclaim();

        self.producer.lock().bus.release();
        self.pool.release();
        self.shared.mixing.store(false, Ordering::Release);

        info!(
            sources,
            ticks = self.ticks.load(Ordering::Relaxed),
            held_off = self.held_off.load(Ordering::Relaxed),
            "Mixer deinitialized"
        );
    }

    /// True once `deinit` has run.
    pub fn is_deinitialized(&self) -> bool {
        self.shared.is_deinitialized()
    }

    /// The output format.
    pub fn format(&self) -> PcmFormat {
        self.shared.format
    }

    /// Byte size of each output buffer.
    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    /// Frames in each output buffer.
    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    /// Number of voices in the pool.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.shared.format.sample_rate
    }

    /// Playback time covered by one output buffer.
    pub fn buffer_period(&self) -> Duration {
        self.shared
            .format
            .frames_to_duration(self.frames_per_buffer as u64)
    }

    /// Returns the state of output buffer `index` (0 or 1).
    pub fn buffer_state(&self, index: usize) -> BufferState {
        self.pool.state(index)
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("format", &self.shared.format)
            .field("buffer_size", &self.pool.buffer_size())
            .field("voices", &self.voices)
            .field("deinitialized", &self.is_deinitialized())
            .finish()
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.deinit();
        debug!("Mixer dropped");
    }
}
