//! # Configuration Management
//!
//! Loads application configuration from multiple sources, highest priority
//! last:
//! 1. Default values (built into the code)
//! 2. TOML configuration file (config.toml, optional)
//! 3. Environment variables with the APP_ prefix
//! 4. Deployment-style environment variables (HOST, PORT, SILENCE_MS,
//!    TRANSCRIPTION_MODEL, TRANSCRIPTION_LANGUAGE, SPEECH_ENDPOINT,
//!    SPEECH_API_KEY)
//!
//! The silence timeout and the provider model/language can also be changed
//! at runtime through the config endpoint; `update_from_json` applies
//! partial updates and re-validates.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
}

/// Server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address or hostname to bind to ("127.0.0.1" for development,
    /// "0.0.0.0" to accept connections from anywhere).
    pub host: String,
    pub port: u16,
}

/// External speech-to-text provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Full URL of the provider's recognize endpoint.
    pub endpoint: String,

    /// Recognition model identifier handed to the provider.
    pub model: String,

    /// Language code handed to the provider (BCP-47, e.g. "en-US").
    pub language: String,

    /// Optional API key, appended as a query parameter when present. Never
    /// echoed back by the config endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Ingest pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate assumed when a caller does not declare one.
    pub default_sample_rate: u32,

    /// Silence duration after which a talking session is finalized.
    pub silence_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            transcription: TranscriptionConfig {
                endpoint: "https://speech.googleapis.com/v1/speech:recognize".to_string(),
                model: "latest_long".to_string(),
                language: "en-US".to_string(),
                api_key: None,
            },
            audio: AudioConfig {
                default_sample_rate: 16_000,
                silence_timeout_ms: 1200,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms and the documented tuning knobs use flat
        // environment variable names; map them onto their config paths
        // explicitly.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(silence) = env::var("SILENCE_MS") {
            settings = settings.set_override("audio.silence_timeout_ms", silence)?;
        }
        if let Ok(model) = env::var("TRANSCRIPTION_MODEL") {
            settings = settings.set_override("transcription.model", model)?;
        }
        if let Ok(language) = env::var("TRANSCRIPTION_LANGUAGE") {
            settings = settings.set_override("transcription.language", language)?;
        }
        if let Ok(endpoint) = env::var("SPEECH_ENDPOINT") {
            settings = settings.set_override("transcription.endpoint", endpoint)?;
        }
        if let Ok(key) = env::var("SPEECH_API_KEY") {
            settings = settings.set_override("transcription.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve traffic.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.transcription.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription endpoint cannot be empty"));
        }

        if self.audio.default_sample_rate == 0 {
            return Err(anyhow::anyhow!("Default sample rate must be greater than 0"));
        }

        if self.audio.silence_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Silence timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON document, touching only the
    /// fields that are present, then re-validate.
    ///
    /// Runtime-tunable fields: `transcription.model`,
    /// `transcription.language`, `audio.silence_timeout_ms`,
    /// `audio.default_sample_rate`. The bind address and provider endpoint
    /// require a restart.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(transcription) = partial.get("transcription") {
            if let Some(model) = transcription.get("model").and_then(|v| v.as_str()) {
                self.transcription.model = model.to_string();
            }
            if let Some(language) = transcription.get("language").and_then(|v| v.as_str()) {
                self.transcription.language = language.to_string();
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(silence) = audio.get("silence_timeout_ms").and_then(|v| v.as_u64()) {
                self.audio.silence_timeout_ms = silence;
            }
            if let Some(rate) = audio.get("default_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.default_sample_rate = rate as u32;
            }
        }

        self.validate()?;
        Ok(())
    }
}
