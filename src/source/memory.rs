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
use std::sync::Arc;
use std::time::Duration;

use super::error::SampleSourceError;
use super::traits::{SampleSource, SourceRead};
use crate::format::PcmFormat;

/// A sample source that plays interleaved PCM held in memory.
///
/// The PCM bytes live behind an Arc, so cloning a source is cheap and several
/// voices can play the same data with independent positions.
#[derive(Clone)]
pub struct MemorySampleSource {
    data: Arc<[u8]>,
    format: PcmFormat,
    /// Total frames in `data`; a trailing partial frame is ignored.
    frames: usize,
    /// Current position in frames
    position: usize,
}

impl MemorySampleSource {
    /// Creates a new memory source over raw PCM bytes in `format`.
    pub fn new(data: impl Into<Arc<[u8]>>, format: PcmFormat) -> Self {
        let data = data.into();
        let width = format.frame_width();
        let frames = if width > 0 { data.len() / width } else { 0 };
        Self {
            data,
            format,
            frames,
            position: 0,
        }
    }

    /// Creates a signed 16-bit source from interleaved samples.
    pub fn from_i16(samples: &[i16], channel_count: u16, sample_rate: u32) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, PcmFormat::s16(sample_rate, channel_count))
    }

    /// Creates an unsigned 8-bit source from interleaved samples.
    pub fn from_u8(samples: &[u8], channel_count: u16, sample_rate: u32) -> Self {
        Self::new(samples.to_vec(), PcmFormat::u8(sample_rate, channel_count))
    }

    /// Creates a signed 8-bit source from interleaved samples.
    pub fn from_i8(samples: &[i8], channel_count: u16, sample_rate: u32) -> Self {
        let data: Vec<u8> = samples.iter().map(|&s| s as u8).collect();
        Self::new(data, PcmFormat::new(sample_rate, channel_count, 8, true))
    }

    /// Returns a new source over the same data, positioned at the start.
    pub fn rewound(&self) -> Self {
        Self {
            data: self.data.clone(),
            format: self.format,
            frames: self.frames,
            position: 0,
        }
    }

    /// Returns the total number of frames
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Returns the current position in frames.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }
}

impl SampleSource for MemorySampleSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(
        &mut self,
        output: &mut [u8],
        max_frames: usize,
    ) -> Result<SourceRead, SampleSourceError> {
        let width = self.format.frame_width();
        if width == 0 {
            return Err(SampleSourceError::UnsupportedFormat(self.format.to_string()));
        }

        let available = self.frames.saturating_sub(self.position);
        let to_copy = available.min(max_frames).min(output.len() / width);
        if to_copy > 0 {
            let start = self.position * width;
            let end = start + to_copy * width;
            output[..to_copy * width].copy_from_slice(&self.data[start..end]);
            self.position += to_copy;
        }

        Ok(SourceRead {
            frames: to_copy,
            exhausted: self.position >= self.frames,
        })
    }

    fn seek_start(&mut self) -> Result<(), SampleSourceError> {
        self.position = 0;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.format.frames_to_duration(self.frames as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_chunks_and_reports_exhaustion() {
        let mut source = MemorySampleSource::from_i16(&[1, 2, 3, 4, 5], 1, 8000);
        let mut buffer = [0u8; 8];

        let read = source.read(&mut buffer, 2).unwrap();
        assert_eq!(read, SourceRead { frames: 2, exhausted: false });
        assert_eq!(&buffer[..4], &[1, 0, 2, 0]);

        let read = source.read(&mut buffer, 2).unwrap();
        assert_eq!(read, SourceRead { frames: 2, exhausted: false });

        // The last frame exhausts the source on the same call.
        let read = source.read(&mut buffer, 2).unwrap();
        assert_eq!(read, SourceRead { frames: 1, exhausted: true });
        assert_eq!(&buffer[..2], &[5, 0]);

        let read = source.read(&mut buffer, 2).unwrap();
        assert_eq!(read, SourceRead { frames: 0, exhausted: true });
    }

    #[test]
    fn test_read_is_limited_by_output_size() {
        let mut source = MemorySampleSource::from_i16(&[1, 2, 3, 4], 2, 8000);
        let mut buffer = [0u8; 4];

        let read = source.read(&mut buffer, 10).unwrap();
        assert_eq!(read.frames, 1);
        assert_eq!(source.position(), 1);
    }

    #[test]
    fn test_seek_start_rewinds() {
        let mut source = MemorySampleSource::from_u8(&[10, 20, 30], 1, 8000);
        let mut buffer = [0u8; 3];
        source.read(&mut buffer, 3).unwrap();
        assert_eq!(source.position(), 3);

        source.seek_start().unwrap();
        assert_eq!(source.position(), 0);
        let read = source.read(&mut buffer, 1).unwrap();
        assert_eq!(read.frames, 1);
        assert_eq!(buffer[0], 10);
    }

    #[test]
    fn test_trailing_partial_frame_is_ignored() {
        let source = MemorySampleSource::new(vec![0u8; 7], PcmFormat::s16(8000, 2));
        assert_eq!(source.frames(), 1);
        assert_eq!(source.memory_size(), 7);
    }

    #[test]
    fn test_clones_share_data_but_not_position() {
        let mut first = MemorySampleSource::from_i8(&[1, 2, 3, 4], 1, 8000);
        let mut buffer = [0u8; 4];
        first.read(&mut buffer, 3).unwrap();

        let second = first.rewound();
        assert_eq!(first.position(), 3);
        assert_eq!(second.position(), 0);
        assert_eq!(second.frames(), 4);
    }

    #[test]
    fn test_duration() {
        let source = MemorySampleSource::from_i16(&vec![0; 8000], 2, 8000);
        assert_eq!(source.duration(), Some(Duration::from_millis(500)));
    }
}
