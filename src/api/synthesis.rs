//! Speech synthesis over the remote speech service

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::retry::{RetryPolicy, send_with_retry};
use crate::audio::wav::{self, WavData};
use crate::{Error, Result};

/// Sample rate assumed for raw PCM responses that do not declare one
pub const DEFAULT_PCM_RATE: u32 = 16_000;

/// Voice parameters sent with every synthesis request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceParams {
    pub voice: String,
    pub language: String,
    pub speed: f32,
    pub pitch: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            language: "zh-CN".to_string(),
            speed: 1.0,
            pitch: 1.0,
            tts_model: None,
        }
    }
}

/// Encoding of synthesized audio bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// RIFF/WAVE container
    Wav,
    /// Headerless mono 16-bit little-endian PCM
    Pcm16 {
        /// Frames per second
        sample_rate: u32,
    },
    /// MPEG layer III
    Mp3,
}

impl AudioFormat {
    /// Interpret the service's `format` field
    ///
    /// Unknown names fall back to WAV.
    #[must_use]
    pub fn from_service(name: &str, sample_rate: Option<u32>) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "wav" | "wave" | "" => Self::Wav,
            "pcm" | "pcm_16" | "pcm16" => Self::Pcm16 {
                sample_rate: sample_rate.filter(|&r| r > 0).unwrap_or(DEFAULT_PCM_RATE),
            },
            "mp3" | "mpeg" => Self::Mp3,
            other => {
                tracing::warn!(format = other, "unknown audio format, decoding as wav");
                Self::Wav
            }
        }
    }
}

/// Audio returned by a synthesizer
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Encoded audio
    pub audio: Vec<u8>,
    /// How `audio` is encoded
    pub format: AudioFormat,
    /// Request id echoed by the service, when it sends one
    pub request_id: Option<String>,
}

impl SynthesisOutput {
    /// Decode the audio bytes into samples
    ///
    /// # Errors
    ///
    /// Returns error if the bytes do not match the declared format
    pub fn decode(&self) -> Result<WavData> {
        if self.audio.is_empty() {
            return Err(Error::EmptyPayload);
        }
        match self.format {
            AudioFormat::Wav => wav::decode(&self.audio),
            AudioFormat::Pcm16 { sample_rate } => Ok(wav::decode_pcm16(&self.audio, sample_rate)),
            AudioFormat::Mp3 => decode_mp3(&self.audio),
        }
    }
}

/// Turns text into audio
///
/// Implementations are fire-and-forget from the caller's perspective: each
/// call is awaited on its own task and may complete in any order.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// `request_id` is a client-generated id the service may echo back.
    ///
    /// # Errors
    ///
    /// Returns error if the service fails or rejects the request
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        request_id: &str,
    ) -> Result<SynthesisOutput>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(flatten)]
    voice: &'a VoiceParams,
    request_id: &'a str,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    duration: Option<f32>,
    #[serde(default)]
    sample_rate: Option<u32>,
}

/// Synthesizer backed by the speech service's HTTP API
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpSynthesizer {
    /// Create a client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("speech service base URL is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            retry,
        })
    }

    /// Service base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the service health endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable or unhealthy
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = format!("{}/api/health", self.base_url);
        let response = send_with_retry(&self.retry, "health check", || self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// List the voices the service offers
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn voices(&self) -> Result<serde_json::Value> {
        let url = format!("{}/api/speech/voices", self.base_url);
        let response = send_with_retry(&self.retry, "list voices", || self.client.get(&url)).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        request_id: &str,
    ) -> Result<SynthesisOutput> {
        if text.trim().is_empty() {
            return Err(Error::Tts("text to synthesize is empty".to_string()));
        }

        let url = format!("{}/api/speech/synthesize", self.base_url);
        let request = SynthesisRequest {
            text,
            voice,
            request_id,
        };

        tracing::debug!(
            request_id,
            chars = text.chars().count(),
            voice = %voice.voice,
            "starting synthesis"
        );

        let response = send_with_retry(&self.retry, "speech synthesis", || {
            self.client.post(&url).json(&request)
        })
        .await?;

        let result: SynthesisResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse synthesis response");
            e
        })?;

        if !result.success {
            let message = result.message.unwrap_or_else(|| "synthesis failed".to_string());
            return Err(Error::Tts(message));
        }

        let encoded = result.audio_data.unwrap_or_default();
        if encoded.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let audio = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        let format = AudioFormat::from_service(
            result.format.as_deref().unwrap_or_default(),
            result.sample_rate,
        );

        tracing::info!(
            request_id = result.request_id.as_deref().unwrap_or(request_id),
            bytes = audio.len(),
            duration = result.duration.unwrap_or_default(),
            ?format,
            "synthesis complete"
        );

        Ok(SynthesisOutput {
            audio,
            format,
            request_id: result.request_id.filter(|id| !id.is_empty()),
        })
    }
}

/// Decode MP3 audio into interleaved samples
fn decode_mp3(data: &[u8]) -> Result<WavData> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if channels == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                    channels = u16::try_from(frame.channels).unwrap_or(1);
                }
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 stream held no frames".to_string()));
    }

    Ok(WavData {
        samples,
        sample_rate,
        channels,
        bits_per_sample: 16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_are_case_insensitive() {
        assert_eq!(AudioFormat::from_service("WAV", None), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_service("mp3", None), AudioFormat::Mp3);
        assert_eq!(
            AudioFormat::from_service("PCM_16", Some(22_050)),
            AudioFormat::Pcm16 { sample_rate: 22_050 }
        );
    }

    #[test]
    fn pcm_defaults_to_16k() {
        assert_eq!(
            AudioFormat::from_service("pcm", Some(0)),
            AudioFormat::Pcm16 {
                sample_rate: DEFAULT_PCM_RATE
            }
        );
    }

    #[test]
    fn unknown_format_falls_back_to_wav() {
        assert_eq!(AudioFormat::from_service("ogg", None), AudioFormat::Wav);
    }

    #[test]
    fn request_flattens_voice_params() {
        let voice = VoiceParams::default();
        let body = serde_json::to_value(SynthesisRequest {
            text: "hello",
            voice: &voice,
            request_id: "abc",
        })
        .unwrap();

        assert_eq!(body["text"], "hello");
        assert_eq!(body["voice"], "default");
        assert_eq!(body["language"], "zh-CN");
        assert_eq!(body["request_id"], "abc");
        assert!(body.get("tts_model").is_none());
    }

    #[test]
    fn decodes_wav_output() {
        let audio = wav::encode(&[0.5, -0.5], 8000, 1).unwrap();
        let output = SynthesisOutput {
            audio,
            format: AudioFormat::Wav,
            request_id: None,
        };
        let decoded = output.decode().unwrap();
        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples.len(), 2);
    }

    #[test]
    fn empty_output_is_rejected() {
        let output = SynthesisOutput {
            audio: Vec::new(),
            format: AudioFormat::Wav,
            request_id: None,
        };
        assert!(matches!(output.decode(), Err(Error::EmptyPayload)));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let result = HttpSynthesizer::new("/", Duration::from_secs(1), RetryPolicy::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
