//! TOML configuration file loading
//!
//! Supports `~/.config/narrator/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NarratorConfigFile {
    /// Remote speech service connection
    #[serde(default)]
    pub service: ServiceFileConfig,

    /// Synthesis voice parameters
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Presentation playback tuning
    #[serde(default)]
    pub presentation: PresentationFileConfig,

    /// Voice chat settings
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Remote service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServiceFileConfig {
    /// Base URL (e.g. "http://127.0.0.1:8000")
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Attempts per request, including the first
    pub max_retries: Option<u32>,

    /// Base delay between retries in milliseconds
    pub retry_delay_ms: Option<u64>,
}

/// Voice parameters sent with each synthesis request
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub voice: Option<String>,
    pub language: Option<String>,
    pub speed: Option<f32>,
    pub pitch: Option<f32>,
    pub tts_model: Option<String>,
}

/// Presentation playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PresentationFileConfig {
    /// Nodes synthesized ahead of playback
    pub lookahead: Option<usize>,

    /// Pause between nodes in milliseconds
    pub inter_node_delay_ms: Option<u64>,

    /// Seconds before an unresolved synthesis request is abandoned
    pub synthesis_timeout_secs: Option<u64>,

    /// Interval for re-checking a node's audio in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Spacing between requests issued together in milliseconds
    pub request_stagger_ms: Option<u64>,
}

/// Voice chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    pub llm_model: Option<String>,
    pub system_prompt: Option<String>,
    pub enable_text_output: Option<bool>,
    pub auto_play_audio: Option<bool>,
    pub poll_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NarratorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NarratorConfigFile {
    let Some(path) = config_file_path() else {
        return NarratorConfigFile::default();
    };

    if !path.exists() {
        return NarratorConfigFile::default();
    }

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Read and parse failures are logged and yield the defaults.
pub fn load_config_file_from(path: &Path) -> NarratorConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                NarratorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NarratorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/narrator/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("narrator").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let file: NarratorConfigFile = toml::from_str(
            r#"
            [service]
            base_url = "https://speech.example"

            [presentation]
            lookahead = 5
            "#,
        )
        .unwrap();

        assert_eq!(file.service.base_url.as_deref(), Some("https://speech.example"));
        assert_eq!(file.presentation.lookahead, Some(5));
        assert!(file.chat.llm_model.is_none());
        assert!(file.speech.voice.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let file = load_config_file_from(Path::new("/nonexistent/narrator/config.toml"));
        assert!(file.service.base_url.is_none());
    }
}
