use crate::types::AudioFormat;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
    #[error("Failed to read session file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid session file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid session setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Credentials for the dialogue engine and speech provider
#[derive(Debug)]
pub struct ApiConfig {
    pub api_key: SecretBox<String>,
    pub assistant_id: SecretBox<String>,
    pub base_url: String,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env is fine outside development
        dotenvy::dotenv().ok();

        let api_key = Self::load_secret("OPENAI_API_KEY", "OpenAI")?;
        let assistant_id = Self::load_secret("OPENAI_ASSISTANT_ID", "Assistant")?;
        let base_url = match env::var("OPENAI_BASE_URL") {
            Ok(url) => Self::validate_base_url(&url)?,
            Err(_) => DEFAULT_API_BASE_URL.to_string(),
        };

        Ok(Self {
            api_key,
            assistant_id,
            base_url,
        })
    }

    fn load_secret(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let value =
            env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;
        let value = value.trim().to_string();

        if value.is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: format!("{} cannot be empty", env_var),
            });
        }

        Self::validate_key_format(&value, service_name)?;

        Ok(SecretBox::new(Box::new(value)))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        let prefix = match service {
            "OpenAI" => "sk-",
            "Assistant" => "asst_",
            _ => return Ok(()),
        };
        if !key.starts_with(prefix) {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: format!("{} values should start with '{}'", service, prefix),
            });
        }
        Ok(())
    }

    fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|e| ConfigError::InvalidSetting {
            field: "OPENAI_BASE_URL",
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidSetting {
                field: "OPENAI_BASE_URL",
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(trimmed.to_string())
    }

    /// API key, only for building request headers
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    pub fn assistant_id(&self) -> &str {
        self.assistant_id.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("🔑 Loaded API configuration ({})", config.base_url);
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=...", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Voice parameters sent with every synthesis request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechSettings {
    pub model: String,
    pub voice_id: String,
    pub format: AudioFormat,
    pub speed: f32,
    /// Sample rate of PCM audio returned by the provider
    pub sample_rate: u32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice_id: "alloy".to_string(),
            format: AudioFormat::Pcm,
            speed: 1.0,
            sample_rate: 24_000,
        }
    }
}

impl SpeechSettings {
    pub const MIN_SPEED: f32 = 0.25;
    pub const MAX_SPEED: f32 = 4.0;
}

/// Timing and capacity knobs for one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on synthesized units waiting to play, per lane
    pub max_playback_queue_size: usize,
    pub synthesis_timeout_ms: u64,
    pub playback_timeout_ms: u64,
    /// Wait for a spoken prompt before arming capture anyway
    pub prompt_playback_timeout_ms: u64,
    /// Pause between the end of prompt audio and arming capture
    pub capture_enable_delay_ms: u64,
    pub speech: SpeechSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_playback_queue_size: 3,
            synthesis_timeout_ms: 20_000,
            playback_timeout_ms: 60_000,
            prompt_playback_timeout_ms: 15_000,
            capture_enable_delay_ms: 400,
            speech: SpeechSettings::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.normalize()?;
        log::info!("⚙️ Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Reject unusable values and clamp the speaking speed into range
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.max_playback_queue_size == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_playback_queue_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.speech.voice_id.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                field: "speech.voice_id",
                reason: "cannot be empty".to_string(),
            });
        }

        let speed = self.speech.speed;
        if !speed.is_finite() {
            self.speech.speed = 1.0;
        } else {
            self.speech.speed = speed.clamp(SpeechSettings::MIN_SPEED, SpeechSettings::MAX_SPEED);
        }
        if self.speech.speed != speed {
            log::warn!(
                "Speech speed {} out of range, using {}",
                speed,
                self.speech.speed
            );
        }
        Ok(())
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_timeout_ms)
    }

    pub fn prompt_playback_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_playback_timeout_ms)
    }

    pub fn capture_enable_delay(&self) -> Duration {
        Duration::from_millis(self.capture_enable_delay_ms)
    }
}
