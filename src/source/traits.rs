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
use std::time::Duration;

use super::error::SampleSourceError;
use crate::format::PcmFormat;

/// The outcome of a single `SampleSource::read` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceRead {
    /// Frames written to the output buffer.
    pub frames: usize,
    /// True once the source has nothing left to give until it is seeked back
    /// to the start.
    pub exhausted: bool,
}

/// A producer of raw interleaved PCM chunks in its own declared format.
///
/// Voices call `read` from the real-time fill path, so implementations the
/// mixer reads directly must not block on I/O. Wrap anything disk-backed in a
/// `BufferedSampleSource`.
pub trait SampleSource: Send {
    /// The layout of the bytes this source writes.
    fn format(&self) -> PcmFormat;

    /// Reads up to `max_frames` frames into `output`, which holds raw PCM in
    /// `format()`. Fewer frames are written if `output` is too small.
    /// Returns the number of frames written and whether the source is exhausted.
    fn read(
        &mut self,
        output: &mut [u8],
        max_frames: usize,
    ) -> Result<SourceRead, SampleSourceError>;

    /// Rewinds the source to its first frame.
    fn seek_start(&mut self) -> Result<(), SampleSourceError>;

    /// Tells the source its owner rewinds it every time it is exhausted.
    /// Prefetching sources use this to buffer across the loop point.
    fn set_looping(&mut self, _looping: bool) {}

    /// Get the duration of this source (if known)
    fn duration(&self) -> Option<Duration> {
        None
    }
}

/// Blanket implementation for Box<dyn SampleSource>
/// This allows Box<dyn SampleSource> to be used directly with generic functions
/// that require S: SampleSource.
impl SampleSource for Box<dyn SampleSource> {
    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn read(
        &mut self,
        output: &mut [u8],
        max_frames: usize,
    ) -> Result<SourceRead, SampleSourceError> {
        (**self).read(output, max_frames)
    }

    fn seek_start(&mut self) -> Result<(), SampleSourceError> {
        (**self).seek_start()
    }

    fn set_looping(&mut self, looping: bool) {
        (**self).set_looping(looping)
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }
}
