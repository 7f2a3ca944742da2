use gemini_realtime::{
    GEMINI_LIVE_URL, ResponseModality, SessionConfig, config::setup_from_model,
};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub client_name: String,
    pub endpoint: String,
    pub gemini_api_key: SecretString,
    pub model: String,
    pub response_modality: ResponseModality,
    pub system_prompt: Option<String>,
    pub audio_out: Option<PathBuf>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let endpoint =
            std::env::var("GEMINI_LIVE_URL").unwrap_or_else(|_| GEMINI_LIVE_URL.to_string());
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "GEMINI_LIVE_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// address", endpoint),
            ));
        }

        let client_name =
            std::env::var("CLIENT_NAME").unwrap_or_else(|_| "gemini-live".to_string());
        let model = std::env::var("LIVE_MODEL")
            .unwrap_or_else(|_| "models/gemini-2.0-flash-exp".to_string());

        let modality_str =
            std::env::var("RESPONSE_MODALITY").unwrap_or_else(|_| "audio".to_string());
        let response_modality = match modality_str.to_lowercase().as_str() {
            "audio" => ResponseModality::Audio,
            "text" => ResponseModality::Text,
            other => {
                return Err(ConfigError::InvalidValue(
                    "RESPONSE_MODALITY".to_string(),
                    format!("'{}' is not one of audio, text", other),
                ));
            }
        };

        let system_prompt = std::env::var("SYSTEM_PROMPT").ok().filter(|s| !s.is_empty());
        let audio_out = std::env::var("AUDIO_OUT").ok().map(PathBuf::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            client_name,
            endpoint,
            gemini_api_key,
            model,
            response_modality,
            system_prompt,
            audio_out,
            log_level,
        })
    }

    /// Builds the session the live client connects with.
    pub fn session(&self) -> SessionConfig {
        let setup = setup_from_model(
            &self.model,
            &[self.response_modality],
            self.system_prompt.as_deref(),
        );
        SessionConfig::with_api_key(
            self.client_name.clone(),
            &self.endpoint,
            &self.gemini_api_key,
            setup,
        )
    }
}
