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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, File};
use serde::Deserialize;
use tracing::info;

use super::error::ConfigError;
use super::mixer::MixerConfig;
use crate::mixer::Mixer;
use crate::source::{
    load_wav, BufferFillPool, BufferedSampleSource, SampleSource, WavFileSource,
};

/// Assigns a WAV file to a voice.
#[derive(Deserialize, Clone, Debug)]
pub struct VoiceAssignment {
    /// The WAV file. Relative paths resolve against the session file.
    file: PathBuf,

    /// The voice index to play the file on.
    voice: usize,

    /// Loop the file until stopped (default: false).
    #[serde(rename = "loop")]
    looping: Option<bool>,

    /// Stream the file from disk instead of loading it (default: false).
    streamed: Option<bool>,
}

impl VoiceAssignment {
    /// New will create a new voice assignment.
    pub fn new(file: impl Into<PathBuf>, voice: usize, looping: bool, streamed: bool) -> Self {
        VoiceAssignment {
            file: file.into(),
            voice,
            looping: Some(looping),
            streamed: Some(streamed),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn voice(&self) -> usize {
        self.voice
    }

    pub fn looping(&self) -> bool {
        self.looping.unwrap_or(false)
    }

    pub fn streamed(&self) -> bool {
        self.streamed.unwrap_or(false)
    }
}

/// A YAML session: mixer parameters plus the files each voice plays.
#[derive(Deserialize, Clone, Debug)]
pub struct Session {
    #[serde(default)]
    mixer: MixerConfig,

    #[serde(default)]
    voices: Vec<VoiceAssignment>,

    /// Directory relative voice files resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Session {
    /// Loads a session from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Session, ConfigError> {
        let mut session: Session = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        session.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(session)
    }

    /// Creates a session in code. Relative voice files resolve against
    /// `base_dir`.
    pub fn new(mixer: MixerConfig, voices: Vec<VoiceAssignment>, base_dir: &Path) -> Session {
        Session {
            mixer,
            voices,
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn mixer(&self) -> &MixerConfig {
        &self.mixer
    }

    pub fn voices(&self) -> &[VoiceAssignment] {
        &self.voices
    }

    /// True if any voice loops, i.e. the session never ends on its own.
    pub fn has_looping_voices(&self) -> bool {
        self.voices.iter().any(VoiceAssignment::looping)
    }

    /// Returns the path of an assignment's file.
    pub fn resolve(&self, assignment: &VoiceAssignment) -> PathBuf {
        if assignment.file.is_absolute() {
            assignment.file.clone()
        } else {
            self.base_dir.join(&assignment.file)
        }
    }

    /// Loads every assigned file and starts it on its voice. All voice
    /// indices are checked before anything plays.
    pub fn start(&self, mixer: &Mixer, pool: &Arc<BufferFillPool>) -> Result<(), Box<dyn Error>> {
        for assignment in &self.voices {
            if assignment.voice >= mixer.voice_count() {
                return Err(ConfigError::InvalidVoice {
                    file: assignment.file.display().to_string(),
                    voice: assignment.voice,
                    voice_count: mixer.voice_count(),
                }
                .into());
            }
        }

        for assignment in &self.voices {
            let path = self.resolve(assignment);
            let source: Box<dyn SampleSource> = if assignment.streamed() {
                Box::new(BufferedSampleSource::new(
                    Box::new(WavFileSource::open(&path)?),
                    pool.clone(),
                    mixer.frames_per_buffer(),
                )?)
            } else {
                Box::new(load_wav(&path)?)
            };

            mixer
                .voice(assignment.voice)?
                .play(source, assignment.looping())?;
            info!(
                file = ?path,
                voice = assignment.voice,
                looping = assignment.looping(),
                streamed = assignment.streamed(),
                "Voice started"
            );
        }
        Ok(())
    }
}
