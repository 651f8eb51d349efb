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
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::Shared;
use crate::error::MixerError;
use crate::format::PcmFormat;
use crate::source::SampleSource;

const IDLE: u8 = 0;
const PLAYING: u8 = 1;
const STOPPING: u8 = 2;
const DONE: u8 = 3;

/// Playback state of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Playing,
    /// A stop was requested while the producer was rendering this voice.
    Stopping,
    Done,
}

impl From<u8> for VoiceState {
    fn from(value: u8) -> Self {
        match value {
            PLAYING => VoiceState::Playing,
            STOPPING => VoiceState::Stopping,
            DONE => VoiceState::Done,
            _ => VoiceState::Idle,
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceState::Idle => "idle",
            VoiceState::Playing => "playing",
            VoiceState::Stopping => "stopping",
            VoiceState::Done => "done",
        };
        f.write_str(name)
    }
}

/// One chunk pulled from a voice's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Frames written, in the source's format.
    pub frames: usize,
    /// The source ended within this chunk and the voice is now Done.
    pub finished: bool,
    /// Format of the written frames.
    pub format: PcmFormat,
}

/// Fields the producer reads once per tick. Guarded by the voice mutex.
struct Slot {
    source: Option<Box<dyn SampleSource>>,
    looping: bool,
}

/// One playback slot in the mixer's fixed voice pool.
pub struct Voice {
    index: usize,
    state: AtomicU8,
    slot: Mutex<Slot>,
    /// Frames rendered since the last play.
    position: AtomicU64,
    /// Times the source wrapped since the last play.
    loops: AtomicU32,
    shared: Arc<Shared>,
}

impl Voice {
    pub(super) fn new(index: usize, shared: Arc<Shared>) -> Voice {
        Voice {
            index,
            state: AtomicU8::new(IDLE),
            slot: Mutex::new(Slot {
                source: None,
                looping: false,
            }),
            position: AtomicU64::new(0),
            loops: AtomicU32::new(0),
            shared,
        }
    }

    /// The voice's index in the mixer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Starts playing `source` from its first frame, replacing whatever was
    /// playing before.
    ///
    /// The source must share the mixer's sample rate, be 8 or 16-bit and have
    /// no more channels than the mixer. Anything else is a `FormatMismatch`
    /// and leaves the voice untouched.
    pub fn play(&self, mut source: Box<dyn SampleSource>, looping: bool) -> Result<(), MixerError> {
        self.shared.check_alive()?;
        self.shared.reclaim();

        let found = source.format();
        if !self.shared.accepts(found) {
            warn!(
                voice = self.index,
                found = %found,
                expected = %self.shared.format,
                "Rejecting source with incompatible format"
            );
            return Err(MixerError::FormatMismatch {
                found,
                expected: self.shared.format,
            });
        }
        source.set_looping(looping);
        source.seek_start()?;

        let previous = {
            let mut slot = self.slot.lock();
            if self.shared.is_deinitialized() {
                return Err(MixerError::UseAfterDeinit);
            }
            let previous = slot.source.replace(source);
            slot.looping = looping;
            self.position.store(0, Ordering::Relaxed);
            self.loops.store(0, Ordering::Relaxed);
            self.state.store(PLAYING, Ordering::Release);
            previous
        };
        self.shared.set_mixing();
        drop(previous);

        debug!(voice = self.index, looping, format = %found, "Voice playing");
        Ok(())
    }

    /// Stops the voice if it is playing. The voice contributes nothing from
    /// the next tick on. A no-op on an idle or finished voice.
    pub fn stop(&self) -> Result<(), MixerError> {
        self.shared.check_alive()?;
        self.shared.reclaim();

        // A repeated stop retries finalizing one the producer has not seen yet.
        match self
            .state
            .compare_exchange(PLAYING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(STOPPING) => {}
            Err(_) => return Ok(()),
        }

        // If the producer is rendering this voice it finalizes the stop itself.
        self.settle();

        debug!(voice = self.index, "Voice stopped");
        Ok(())
    }

    /// Finalizes a pending stop unless the producer holds the voice. Returns
    /// true if a source was dropped.
    pub(super) fn settle(&self) -> bool {
        if self.state.load(Ordering::Acquire) != STOPPING {
            return false;
        }
        let Some(mut slot) = self.slot.try_lock() else {
            return false;
        };
        let source = self.finish_stop(&mut slot);
        drop(slot);
        source.is_some()
    }

    /// True if the voice is playing.
    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) == PLAYING
    }

    /// Returns the voice state.
    pub fn state(&self) -> VoiceState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Frames rendered since the last play.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Number of times a looping source wrapped since the last play.
    pub fn loops(&self) -> u32 {
        self.loops.load(Ordering::Relaxed)
    }

    /// Pulls up to `frame_count` frames of the source's own format into
    /// `output`, advancing the cursor. Returns None if the voice is not
    /// playing.
    ///
    /// A looping source that runs out is rewound and the request keeps
    /// filling from its start. A non-looping source that runs out returns
    /// what it had with `finished` set, and the voice becomes Done. A read
    /// error also finishes the voice. If the source has nothing buffered yet
    /// the chunk is short.
    ///
    /// This runs in the producer context: it never allocates or drops a
    /// source.
    pub fn next_chunk(
        &self,
        output: &mut [u8],
        frame_count: usize,
    ) -> Result<Option<Chunk>, MixerError> {
        self.shared.check_alive()?;

        let mut slot = self.slot.lock();
        match self.state.load(Ordering::Acquire) {
            PLAYING => {}
            STOPPING => {
                if let Some(source) = self.finish_stop(&mut slot) {
                    self.retire(&mut slot, source);
                }
                return Ok(None);
            }
            _ => return Ok(None),
        }

        let looping = slot.looping;
        let Some(source) = slot.source.as_mut() else {
            return Ok(None);
        };
        let format = source.format();
        let width = format.frame_width();
        let frame_count = frame_count.min(output.len() / width);

        let mut frames = 0;
        let mut finished = false;
        let mut rewound = false;
        while frames < frame_count {
            let read = match source.read(&mut output[frames * width..], frame_count - frames) {
                Ok(read) => read,
                Err(_) => {
                    finished = true;
                    break;
                }
            };
            frames += read.frames;
            if read.frames > 0 {
                rewound = false;
            }

            if !read.exhausted {
                if read.frames == 0 {
                    // Nothing buffered yet.
                    break;
                }
                continue;
            }
            // An empty source would loop forever.
            if !looping || rewound {
                finished = true;
                break;
            }
            if source.seek_start().is_err() {
                finished = true;
                break;
            }
            self.loops.fetch_add(1, Ordering::Relaxed);
            rewound = true;
        }
        self.position.fetch_add(frames as u64, Ordering::Relaxed);

        if finished {
            let source = if self
                .state
                .compare_exchange(PLAYING, DONE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.source.take()
            } else {
                self.finish_stop(&mut slot)
            };
            if let Some(source) = source {
                self.retire(&mut slot, source);
            }
        } else if self.state.load(Ordering::Acquire) == STOPPING {
            if let Some(source) = self.finish_stop(&mut slot) {
                self.retire(&mut slot, source);
            }
        }

        Ok(Some(Chunk {
            frames,
            finished,
            format,
        }))
    }

    /// Moves a stopping voice to Idle and takes its source.
    fn finish_stop(&self, slot: &mut Slot) -> Option<Box<dyn SampleSource>> {
        self.state
            .compare_exchange(STOPPING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .and_then(|_| slot.source.take())
    }

    /// Hands a source taken in the producer context to the control context
    /// for dropping. If the retirement queue is full it stays in the slot
    /// until the next play or deinit.
    fn retire(&self, slot: &mut Slot, source: Box<dyn SampleSource>) {
        if let Err(e) = self.shared.retired_tx.try_send(source) {
            slot.source = Some(e.into_inner());
        }
    }

    /// Silences the voice and takes its source. Used by deinit.
    pub(super) fn halt(&self) -> Option<Box<dyn SampleSource>> {
        let mut slot = self.slot.lock();
        self.state.store(IDLE, Ordering::Release);
        slot.source.take()
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("position", &self.position())
            .field("loops", &self.loops())
            .finish()
    }
}
