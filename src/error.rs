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
use crate::format::PcmFormat;
use crate::source::SampleSourceError;

/// Errors reported to the control context by mixer and voice operations.
/// The real-time fill path only ever sees `UseAfterDeinit`.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("Invalid mixer configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Source format {found} is incompatible with mixer format {expected}")]
    FormatMismatch {
        found: PcmFormat,
        expected: PcmFormat,
    },

    #[error("Voice index {index} out of range (voice count {voice_count})")]
    IndexError { index: usize, voice_count: usize },

    #[error("Mixer has been deinitialized")]
    UseAfterDeinit,

    #[error("Sample source error: {0}")]
    Source(#[from] SampleSourceError),
}
