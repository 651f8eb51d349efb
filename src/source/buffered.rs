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
// Buffered SampleSource for disk-backed voices. Prefetches PCM on a shared
// Rayon thread pool into a ring buffer so the mixer's fill path only copies
// bytes: no decoding, no I/O and no allocation.
//

use std::cmp;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rayon::ThreadPoolBuilder;
use tracing::{debug, error};

use super::error::SampleSourceError;
use super::traits::{SampleSource, SourceRead};
use crate::format::PcmFormat;

/// Upper bound on queued refill requests. Each buffer has at most one queued
/// or running request at a time.
const MAX_PENDING_REFILLS: usize = 256;

/// Shared pool used by BufferedSampleSource instances to prefill and refill
/// their rings. Refill requests travel over a bounded channel so that asking
/// for a refill from the fill path never allocates.
pub struct BufferFillPool {
    pool: rayon::ThreadPool,
    requests: Sender<Arc<Ring>>,
}

impl BufferFillPool {
    /// Creates a new pool with the given number of worker threads.
    pub fn new(num_threads: usize) -> Result<Self, SampleSourceError> {
        let threads = num_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("polymix-buffer-fill-{i}"))
            .build()
            .map_err(|e| SampleSourceError::Prefetch(e.to_string()))?;

        let (requests, receiver) = crossbeam_channel::bounded(MAX_PENDING_REFILLS);
        for _ in 0..threads {
            let receiver: Receiver<Arc<Ring>> = receiver.clone();
            // Workers exit once the pool (and with it the last sender) is dropped.
            pool.spawn(move || {
                while let Ok(ring) = receiver.recv() {
                    ring.fill();
                }
            });
        }

        debug!(threads, "Buffer fill pool started");
        Ok(Self { pool, requests })
    }

    /// Returns the number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn request(&self, ring: Arc<Ring>) -> bool {
        self.requests.try_send(ring).is_ok()
    }
}

struct RingState {
    /// Interleaved frames in the wrapped source's format.
    data: Vec<u8>,
    /// Next frame index to read.
    read_index: usize,
    /// Next frame index to write.
    write_index: usize,
    /// Number of valid frames currently buffered.
    len_frames: usize,
    /// Frames pushed and popped since the last hard rewind.
    total_written: u64,
    total_read: u64,
    /// Values of `total_written` at which a pass of the wrapped source ended.
    /// Preallocated: every buffered pass holds at least one frame.
    boundaries: VecDeque<u64>,
    /// Frames pushed since the wrapped source last started a pass.
    pass_frames: u64,
    /// The owner rewinds at every end of stream, so keep reading across it.
    looping: bool,
    /// The next read must seek the wrapped source to its start after a wrap.
    wrap_pending: bool,
    /// True when the wrapped source is exhausted (EOF or error).
    finished: bool,
    /// True when the wrapped source failed; a looping owner cannot revive it.
    failed: bool,
    /// True while a refill request is queued or running.
    refill_queued: bool,
    /// The next refill must seek the wrapped source to its start first.
    rewind_pending: bool,
    /// Bumped on every hard rewind; batches read for an older generation are
    /// dropped.
    generation: u64,
    /// The owning BufferedSampleSource has been dropped.
    closed: bool,
}

impl RingState {
    fn new(capacity_frames: usize, frame_width: usize) -> RingState {
        RingState {
            data: vec![0; capacity_frames * frame_width],
            read_index: 0,
            write_index: 0,
            len_frames: 0,
            total_written: 0,
            total_read: 0,
            boundaries: VecDeque::with_capacity(capacity_frames + 1),
            pass_frames: 0,
            looping: false,
            wrap_pending: false,
            finished: false,
            failed: false,
            refill_queued: true,
            rewind_pending: false,
            generation: 0,
            closed: false,
        }
    }

    fn push(&mut self, bytes: &[u8], frames: usize, width: usize, capacity: usize) {
        let first = frames.min(capacity - self.write_index);
        let start = self.write_index * width;
        self.data[start..start + first * width].copy_from_slice(&bytes[..first * width]);
        let rest = frames - first;
        self.data[..rest * width].copy_from_slice(&bytes[first * width..frames * width]);

        self.write_index = (self.write_index + frames) % capacity;
        self.len_frames += frames;
        self.total_written += frames as u64;
        self.pass_frames += frames as u64;
    }

    fn pop(&mut self, output: &mut [u8], frames: usize, width: usize, capacity: usize) -> usize {
        let frames = frames.min(self.len_frames);
        let first = frames.min(capacity - self.read_index);
        let start = self.read_index * width;
        output[..first * width].copy_from_slice(&self.data[start..start + first * width]);
        let rest = frames - first;
        output[first * width..frames * width].copy_from_slice(&self.data[..rest * width]);

        self.read_index = (self.read_index + frames) % capacity;
        self.len_frames -= frames;
        self.total_read += frames as u64;
        frames
    }

    /// Frames the reader may take before it reaches the end of the current
    /// pass, if that end is buffered.
    fn frames_to_boundary(&self) -> Option<usize> {
        self.boundaries
            .front()
            .map(|&end| (end - self.total_read) as usize)
    }

    fn at_boundary(&self) -> bool {
        self.frames_to_boundary() == Some(0)
    }

    /// Marks the end of a pass of the wrapped source. A looping ring keeps
    /// reading from the start unless the pass was empty.
    fn end_pass(&mut self) {
        if self.looping && self.pass_frames > 0 {
            self.boundaries.push_back(self.total_written);
            self.pass_frames = 0;
            self.wrap_pending = true;
        } else {
            self.finished = true;
        }
    }

    fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
        self.len_frames = 0;
        self.total_written = 0;
        self.total_read = 0;
        self.boundaries.clear();
        self.pass_frames = 0;
        self.wrap_pending = false;
        self.finished = false;
        self.failed = false;
    }
}

struct Ring {
    inner: Mutex<Box<dyn SampleSource>>,
    state: Mutex<RingState>,
    ready: Condvar,
    frame_width: usize,
    capacity_frames: usize,
}

impl Ring {
    /// Runs on a pool worker: tops the ring up until it is full, the wrapped
    /// source is exhausted or the owner goes away.
    fn fill(&self) {
        let mut batch = vec![0u8; self.capacity_frames * self.frame_width];

        loop {
            let (frames_to_fill, generation, rewind) = {
                let mut state = self.state.lock();
                let space = self.capacity_frames - state.len_frames;
                if state.closed || (!state.rewind_pending && (state.finished || space == 0)) {
                    state.refill_queued = false;
                    self.ready.notify_all();
                    return;
                }
                let rewind = std::mem::take(&mut state.rewind_pending)
                    | std::mem::take(&mut state.wrap_pending);
                (space, state.generation, rewind)
            };

            // Only the inner source is locked while decoding.
            let result = {
                let mut inner = self.inner.lock();
                let rewound = if rewind { inner.seek_start() } else { Ok(()) };
                rewound.and_then(|_| inner.read(&mut batch, frames_to_fill))
            };

            let mut state = self.state.lock();
            if state.generation != generation {
                continue;
            }
            match result {
                Ok(read) => {
                    state.push(&batch, read.frames, self.frame_width, self.capacity_frames);
                    if read.exhausted {
                        state.end_pass();
                    } else if read.frames == 0 {
                        state.finished = true;
                    }
                }
                Err(e) => {
                    error!(err = %e, "Prefetch read failed, ending stream");
                    state.finished = true;
                    state.failed = true;
                }
            }
            self.ready.notify_all();
        }
    }
}

/// Buffered wrapper for any SampleSource. The fill path only reads from the
/// ring; all reading of the wrapped source runs on BufferFillPool workers.
///
/// Once marked as looping the workers read straight through the end of the
/// wrapped source, so a rewind at a loop point only moves past the buffered
/// end of the pass. Any other rewind empties the ring.
pub struct BufferedSampleSource {
    ring: Arc<Ring>,
    pool: Arc<BufferFillPool>,
    format: PcmFormat,
    duration: Option<Duration>,
    refill_threshold_frames: usize,
    /// No frames have been read since construction or the last rewind.
    at_start: bool,
}

impl BufferedSampleSource {
    /// Creates a new buffered wrapper around an existing SampleSource.
    ///
    /// - `device_buffer_frames`: frames the mixer pulls per tick.
    /// - Ring capacity is 4x `device_buffer_frames`.
    /// - Blocks until at least `device_buffer_frames` frames are buffered or
    ///   the source finishes, so call this from the control context.
    pub fn new(
        inner: Box<dyn SampleSource>,
        pool: Arc<BufferFillPool>,
        device_buffer_frames: usize,
    ) -> Result<Self, SampleSourceError> {
        let format = inner.format();
        let frame_width = format.frame_width();
        if frame_width == 0 {
            return Err(SampleSourceError::UnsupportedFormat(format.to_string()));
        }

        let capacity_frames = cmp::max(device_buffer_frames * 4, 1);
        let warmup_min_frames = device_buffer_frames.clamp(1, capacity_frames);
        let duration = inner.duration();

        let ring = Arc::new(Ring {
            inner: Mutex::new(inner),
            state: Mutex::new(RingState::new(capacity_frames, frame_width)),
            ready: Condvar::new(),
            frame_width,
            capacity_frames,
        });

        if !pool.request(ring.clone()) {
            return Err(SampleSourceError::Prefetch("fill queue is full".into()));
        }

        {
            let mut state = ring.state.lock();
            while !state.finished && state.len_frames < warmup_min_frames {
                ring.ready.wait(&mut state);
            }
        }

        Ok(Self {
            ring,
            pool,
            format,
            duration,
            refill_threshold_frames: capacity_frames / 2,
            at_start: true,
        })
    }

    /// Returns the number of frames currently buffered.
    pub fn buffered_frames(&self) -> usize {
        self.ring.state.lock().len_frames
    }

    /// Queues a refill unless one is already queued. Returns false if the
    /// fill queue is full.
    fn request_refill(&self, state: &mut RingState) -> bool {
        if state.refill_queued {
            return true;
        }
        state.refill_queued = self.pool.request(self.ring.clone());
        state.refill_queued
    }
}

impl SampleSource for BufferedSampleSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(
        &mut self,
        output: &mut [u8],
        max_frames: usize,
    ) -> Result<SourceRead, SampleSourceError> {
        let width = self.ring.frame_width;
        let mut frames = max_frames.min(output.len() / width);

        let (read, exhausted) = {
            let mut state = self.ring.state.lock();
            if let Some(remaining) = state.frames_to_boundary() {
                frames = frames.min(remaining);
            }
            let read = state.pop(output, frames, width, self.ring.capacity_frames);
            let exhausted = state.at_boundary()
                || (state.finished && state.len_frames == 0 && !state.rewind_pending);

            // An empty ring that is not finished is an underrun: report a
            // short read and let the caller pad with silence.
            if !state.finished && state.len_frames <= self.refill_threshold_frames {
                self.request_refill(&mut state);
            }
            (read, exhausted)
        };

        if read > 0 {
            self.at_start = false;
        }

        Ok(SourceRead {
            frames: read,
            exhausted,
        })
    }

    fn seek_start(&mut self) -> Result<(), SampleSourceError> {
        if self.at_start {
            return Ok(());
        }

        let mut state = self.ring.state.lock();
        if state.at_boundary() {
            // The next pass is already buffered behind the loop point.
            state.boundaries.pop_front();
        } else {
            state.generation += 1;
            state.clear();
            state.rewind_pending = true;
            if !self.request_refill(&mut state) {
                return Err(SampleSourceError::Prefetch("fill queue is full".into()));
            }
        }
        drop(state);

        self.at_start = true;
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        let mut state = self.ring.state.lock();
        if state.looping == looping {
            return;
        }
        state.looping = looping;

        // A source shorter than the ring was read to its end during warmup.
        if looping && state.finished && !state.failed && state.pass_frames > 0 {
            state.finished = false;
            state.end_pass();
            self.request_refill(&mut state);
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl Drop for BufferedSampleSource {
    fn drop(&mut self) {
        self.ring.state.lock().closed = true;
    }
}
