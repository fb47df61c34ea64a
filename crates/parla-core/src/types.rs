//! Shared types for the parla speech session.
//!
//! Kept free of tokio, reqwest and rodio so front ends can depend on the
//! state snapshot and config without pulling in the engine.

use serde::{Deserialize, Serialize};

use crate::audio::OutputFormat;
use crate::recent::{RecentPhrases, DEFAULT_RECENT_CAPACITY};

// ─── Provider defaults ─────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// Multilingual synthesis model.
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

pub const DEFAULT_PREVIEW_TEXT: &str = "Hello! This is a quick preview of my voice.";

/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

// ─── Voices ────────────────────────────────────────────────────────────────

/// A selectable provider voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The stock multilingual voices.
pub fn default_voices() -> Vec<Voice> {
    [
        ("JBFqnCBsd6RMkjVDRZzb", "Default (Multilingual)"),
        ("EXAVITQu4vr4xnSDxMaL", "Rachel (Multilingual, English, Hindi)"),
        ("MF3mGyEYCl7XYWbV9V6O", "Domi (Multilingual, Hindi, English, French)"),
        ("TxGEqnHWrfWFTfGW9XjX", "Bella (Multilingual, Hindi, English, Spanish)"),
        ("ErXwobaYiN019PkySvjV", "Antoni (Multilingual, Hindi, English, German)"),
        ("VR6AewLTigWG4xSOukaG", "Elli (Multilingual, Hindi, English, Italian)"),
    ]
    .into_iter()
    .map(|(id, name)| Voice::new(id, name))
    .collect()
}

/// Example phrases offered by "randomize text".
pub fn default_example_phrases() -> Vec<String> {
    [
        "The quick brown fox jumps over the lazy dog.",
        "Good morning! I hope you have a wonderful day.",
        "नमस्ते, आप कैसे हैं?",
        "Bonjour, je suis ravie de vous rencontrer.",
        "¿Dónde está la estación de tren más cercana?",
        "Guten Tag, wie geht es Ihnen heute?",
        "La vita è bella quando si viaggia.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ─── Session config ────────────────────────────────────────────────────────

/// Everything the session controller needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Provider credential. `None` makes every conversion fail fast.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_id: String,
    pub output_format: OutputFormat,
    pub voices: Vec<Voice>,
    pub example_phrases: Vec<String>,
    pub preview_text: String,
    pub recent_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            model_id: DEFAULT_MODEL_ID.into(),
            output_format: OutputFormat::default(),
            voices: default_voices(),
            example_phrases: default_example_phrases(),
            preview_text: DEFAULT_PREVIEW_TEXT.into(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Blank keys count as missing.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn voice(&self, id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn default_voice_id(&self) -> String {
        self.voices.first().map(|v| v.id.clone()).unwrap_or_default()
    }
}

// ─── Session state ─────────────────────────────────────────────────────────

/// Observable session snapshot, rendered by the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub current_text: String,
    pub selected_voice_id: String,
    pub is_request_in_flight: bool,
    pub last_error: Option<String>,
    pub current_audio_url: Option<String>,
    pub is_playing: bool,
    pub recent_phrases: RecentPhrases,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            current_text: String::new(),
            selected_voice_id: config.default_voice_id(),
            is_request_in_flight: false,
            last_error: None,
            current_audio_url: None,
            is_playing: false,
            recent_phrases: RecentPhrases::new(config.recent_capacity),
        }
    }
}
