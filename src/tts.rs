use crate::config::{ApiConfig, SpeechSettings};
use crate::types::{AudioBuffer, AudioFormat};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    #[error("Synthesis timed out after {0:?}")]
    Timeout(Duration),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// One sentence worth of speech to synthesize
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub format: AudioFormat,
    pub speed: f32,
    pub model: String,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, settings: &SpeechSettings) -> Self {
        Self {
            text: text.into(),
            voice_id: settings.voice_id.clone(),
            format: settings.format,
            speed: settings.speed,
            model: settings.model.clone(),
        }
    }
}

/// Text-to-speech provider
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, TtsError>;
}

/// Client for an OpenAI-compatible `/audio/speech` endpoint
pub struct OpenAiTts {
    client: Client,
    api_key: String,
    base_url: String,
    sample_rate: u32,
}

impl OpenAiTts {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Result<Self, TtsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TtsError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sample_rate: SpeechSettings::default().sample_rate,
        })
    }

    pub fn from_config(config: &ApiConfig, settings: &SpeechSettings) -> Result<Self, TtsError> {
        Ok(Self::new(config.api_key().to_string(), config.base_url.clone())?
            .with_sample_rate(settings.sample_rate))
    }

    /// Sample rate the provider uses for raw PCM responses
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    fn response_format(format: AudioFormat) -> &'static str {
        match format {
            AudioFormat::Pcm => "pcm",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Check the payload before it is handed to a sink
    fn validate_audio(&self, bytes: &[u8], format: AudioFormat) -> Result<(), TtsError> {
        if bytes.is_empty() {
            return Err(TtsError::InvalidAudio("provider returned no audio".to_string()));
        }
        if format == AudioFormat::Pcm && bytes.len() % 2 != 0 {
            return Err(TtsError::InvalidAudio(format!(
                "16-bit PCM payload has odd length {}",
                bytes.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, TtsError> {
        let url = format!("{}/audio/speech", self.base_url);

        let payload = json!({
            "model": request.model,
            "input": request.text,
            "voice": request.voice_id,
            "response_format": Self::response_format(request.format),
            "speed": request.speed,
        });

        log::debug!(
            "🔊 Synthesizing {} chars with voice {}",
            request.text.len(),
            request.voice_id
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TtsError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let bytes = response.bytes().await?;
        self.validate_audio(&bytes, request.format)?;

        Ok(AudioBuffer::new(bytes.to_vec(), request.format, self.sample_rate))
    }
}
