pub mod audio_sink;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod interaction;
pub mod lane;
pub mod language;
pub mod llm;
pub mod segmenter;
pub mod transcript;
pub mod tts;
pub mod types;

pub use error::{LectureError, Result};
