//! Session and reconnect configuration for a [`crate::LiveClient`].

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::time::Duration;

/// The Gemini Live bidirectional endpoint, without credentials.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Everything needed to (re)establish a live session.
///
/// The endpoint usually embeds an access credential, so it is held as a
/// secret and never shows up in `Debug` output or logs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    name: String,
    endpoint: SecretString,
    setup: Value,
}

impl SessionConfig {
    /// Creates a session from a fully formed endpoint.
    ///
    /// # Arguments
    ///
    /// * `name` - A human-readable client name, used in logs.
    /// * `endpoint` - The `ws://` or `wss://` address, including any credential.
    /// * `setup` - The setup blob sent as the first message on every connection.
    pub fn new(name: impl Into<String>, endpoint: SecretString, setup: Value) -> Self {
        Self {
            name: name.into(),
            endpoint,
            setup,
        }
    }

    /// Creates a session whose endpoint is `base_url` with the API key appended as `?key=`.
    pub fn with_api_key(
        name: impl Into<String>,
        base_url: &str,
        api_key: &SecretString,
        setup: Value,
    ) -> Self {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let endpoint = format!("{base_url}{separator}key={}", api_key.expose_secret());
        Self::new(name, SecretString::from(endpoint), setup)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &SecretString {
        &self.endpoint
    }

    pub fn setup(&self) -> &Value {
        &self.setup
    }
}

/// Output modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
}

impl ResponseModality {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Audio => "AUDIO",
        }
    }
}

/// Builds a Gemini setup blob for `model`.
///
/// The client treats the result as opaque; this only saves callers from
/// spelling out the common fields by hand.
pub fn setup_from_model(
    model: &str,
    modalities: &[ResponseModality],
    system_instruction: Option<&str>,
) -> Value {
    let mut setup = json!({
        "model": model,
        "generationConfig": {
            "responseModalities": modalities.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        },
    });
    if let Some(text) = system_instruction {
        setup["systemInstruction"] = json!({ "parts": [{ "text": text }] });
    }
    setup
}

/// Bounded exponential backoff for reconnecting after an abnormal closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnects attempted before giving up until the next manual `connect()`.
    pub max_attempts: u32,
    /// Delay before the first reconnect; doubles for each later attempt.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(Duration::MAX)
    }
}
