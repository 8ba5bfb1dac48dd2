use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};

/// The two independent synthesis + playback lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Lane {
    /// Primary narration
    #[strum(serialize = "lecture")]
    Lecture,
    /// Prompts and short answers spoken over a paused lecture
    #[strum(serialize = "interjection")]
    Interjection,
}

/// Turn-taking state owned by the interaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InteractionState {
    Idle,
    Lecturing,
    QuestionPending,
    WaitingForUserInput,
    ProcessingUserInput,
}

/// Encoding of synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioFormat {
    /// Raw 16-bit little-endian mono PCM
    Pcm,
    Wav,
    Mp3,
}

/// Owned audio attached to a sentence after synthesis.
///
/// Cloning is cheap: the bytes are shared, and are released once the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    bytes: Arc<[u8]>,
    format: AudioFormat,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(bytes: impl Into<Arc<[u8]>>, format: AudioFormat, sample_rate: u32) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            sample_rate,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length of a PCM buffer. `None` for compressed formats.
    pub fn duration(&self) -> Option<Duration> {
        match self.format {
            AudioFormat::Pcm if self.sample_rate > 0 => {
                let samples = self.bytes.len() / 2;
                Some(Duration::from_secs_f64(
                    samples as f64 / self.sample_rate as f64,
                ))
            }
            _ => None,
        }
    }

    /// Decode 16-bit little-endian PCM into f32 samples in [-1.0, 1.0]
    pub fn pcm_samples(&self) -> Vec<f32> {
        self.bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32)
            .collect()
    }
}

/// One speakable sentence. `audio` is attached only by the synthesis pipeline.
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    pub index: u64,
    pub text: String,
    pub audio: Option<AudioBuffer>,
}

impl SentenceUnit {
    pub fn new(index: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: AudioBuffer) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// An AI-posed quiz awaiting the listener's answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizContext {
    pub active: bool,
    pub question_text: String,
}

impl QuizContext {
    pub fn activate(&mut self, question: impl Into<String>) {
        self.active = true;
        self.question_text = question.into();
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.question_text.clear();
    }
}
