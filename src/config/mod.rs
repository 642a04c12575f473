//! Configuration management for narrator
//!
//! Layers, lowest priority first: built-in defaults, the TOML file, then
//! `NARRATOR_*` environment variables. CLI flags are applied by the binary.

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use crate::api::{ChatOptions, RetryPolicy, VoiceParams};
use crate::{Error, Result};

use file::NarratorConfigFile;

/// Default speech service address
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Narrator configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Remote speech service
    pub service: ServiceConfig,

    /// Voice parameters for synthesis
    pub speech: VoiceParams,

    /// Presentation playback tuning
    pub presentation: PresentationConfig,

    /// Voice chat settings
    pub chat: ChatConfig,
}

/// Remote speech service connection
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL without trailing slash
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Presentation playback tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationConfig {
    /// Synthesis requests kept in flight ahead of playback
    pub lookahead: usize,

    /// Pause between the end of one node and the start of the next
    pub inter_node_delay: Duration,

    /// How long a node's synthesis may stay unresolved
    pub synthesis_timeout: Duration,

    /// Interval for re-checking whether a node's audio has arrived
    pub poll_interval: Duration,

    /// Spacing between requests issued in one batch
    pub request_stagger: Duration,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            lookahead: 3,
            inter_node_delay: Duration::from_millis(500),
            synthesis_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            request_stagger: Duration::from_millis(100),
        }
    }
}

/// Voice chat settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Model and prompt sent with each utterance
    pub options: ChatOptions,

    /// Forward recognition and reply text
    pub enable_text_output: bool,

    /// Play reply audio as it arrives
    pub auto_play_audio: bool,

    /// Interval for polling a buffered response
    pub poll_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            options: ChatOptions::default(),
            enable_text_output: true,
            auto_play_audio: true,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment overrides
    ///
    /// `env` looks up a variable by name; malformed numeric values are
    /// logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn resolve(fc: NarratorConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: fc
                .service
                .max_retries
                .unwrap_or(defaults.service.retry.max_attempts),
            base_delay: fc
                .service
                .retry_delay_ms
                .map_or(defaults.service.retry.base_delay, Duration::from_millis),
            ..defaults.service.retry
        };

        let service = ServiceConfig {
            base_url: env("NARRATOR_BASE_URL")
                .or(fc.service.base_url)
                .unwrap_or(defaults.service.base_url)
                .trim_end_matches('/')
                .to_string(),
            timeout: parse_env(&env, "NARRATOR_TIMEOUT_SECS")
                .or(fc.service.timeout_secs)
                .map_or(defaults.service.timeout, Duration::from_secs),
            retry,
        };

        let speech = VoiceParams {
            voice: env("NARRATOR_TTS_VOICE")
                .or(fc.speech.voice)
                .unwrap_or(defaults.speech.voice),
            language: env("NARRATOR_TTS_LANGUAGE")
                .or(fc.speech.language)
                .unwrap_or(defaults.speech.language),
            speed: fc.speech.speed.unwrap_or(defaults.speech.speed),
            pitch: fc.speech.pitch.unwrap_or(defaults.speech.pitch),
            tts_model: env("NARRATOR_TTS_MODEL").or(fc.speech.tts_model),
        };

        let pc = fc.presentation;
        let pd = defaults.presentation;
        let presentation = PresentationConfig {
            lookahead: parse_env(&env, "NARRATOR_LOOKAHEAD")
                .or(pc.lookahead)
                .unwrap_or(pd.lookahead),
            inter_node_delay: pc
                .inter_node_delay_ms
                .map_or(pd.inter_node_delay, Duration::from_millis),
            synthesis_timeout: pc
                .synthesis_timeout_secs
                .map_or(pd.synthesis_timeout, Duration::from_secs),
            poll_interval: pc
                .poll_interval_ms
                .map_or(pd.poll_interval, Duration::from_millis),
            request_stagger: pc
                .request_stagger_ms
                .map_or(pd.request_stagger, Duration::from_millis),
        };

        let cc = fc.chat;
        let cd = defaults.chat;
        let chat = ChatConfig {
            options: ChatOptions {
                llm_model: env("NARRATOR_LLM_MODEL")
                    .or(cc.llm_model)
                    .unwrap_or(cd.options.llm_model),
                system_prompt: env("NARRATOR_SYSTEM_PROMPT").or(cc.system_prompt),
            },
            enable_text_output: cc.enable_text_output.unwrap_or(cd.enable_text_output),
            auto_play_audio: cc.auto_play_audio.unwrap_or(cd.auto_play_audio),
            poll_interval: cc
                .poll_interval_ms
                .map_or(cd.poll_interval, Duration::from_millis),
        };

        let config = Self {
            service,
            speech,
            presentation,
            chat,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipelines rely on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation
    pub fn validate(&self) -> Result<()> {
        if self.service.base_url.is_empty() {
            return Err(Error::Config("service base_url must not be empty".to_string()));
        }
        if self.presentation.lookahead == 0 {
            return Err(Error::Config("presentation lookahead must be at least 1".to_string()));
        }
        if self.presentation.poll_interval.is_zero() || self.chat.poll_interval.is_zero() {
            return Err(Error::Config("poll intervals must be non-zero".to_string()));
        }
        if self.speech.speed <= 0.0 {
            return Err(Error::Config("speech speed must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::resolve(NarratorConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.service.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.speech.voice, "default");
        assert_eq!(config.speech.language, "zh-CN");
        assert_eq!(config.presentation, PresentationConfig::default());
        assert_eq!(config.chat.options.llm_model, "gpt-3.5-turbo");
        assert_eq!(config.service.retry.max_attempts, 3);
    }

    #[test]
    fn env_overrides_file() {
        let fc: NarratorConfigFile = toml::from_str(
            r#"
            [service]
            base_url = "http://file.example/"

            [presentation]
            lookahead = 2
            inter_node_delay_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            fc,
            env_from(&[
                ("NARRATOR_BASE_URL", "http://env.example"),
                ("NARRATOR_LOOKAHEAD", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.service.base_url, "http://env.example");
        assert_eq!(config.presentation.lookahead, 5);
        assert_eq!(config.presentation.inter_node_delay, Duration::from_millis(250));
    }

    #[test]
    fn file_base_url_loses_trailing_slash() {
        let fc: NarratorConfigFile =
            toml::from_str("[service]\nbase_url = \"http://file.example/\"").unwrap();
        let config = Config::resolve(fc, env_from(&[])).unwrap();
        assert_eq!(config.service.base_url, "http://file.example");
    }

    #[test]
    fn malformed_env_number_is_ignored() {
        let config = Config::resolve(
            NarratorConfigFile::default(),
            env_from(&[("NARRATOR_LOOKAHEAD", "many")]),
        )
        .unwrap();
        assert_eq!(config.presentation.lookahead, 3);
    }

    #[test]
    fn zero_lookahead_is_rejected() {
        let result = Config::resolve(
            NarratorConfigFile::default(),
            env_from(&[("NARRATOR_LOOKAHEAD", "0")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
