//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use narrator::api::{AudioFormat, SynthesisOutput};
use narrator::audio::wav;
use narrator::{AudioSink, ContentNode, SpeechSynthesizer, VoiceParams};

/// Sample rate of generated test clips
pub const CLIP_RATE: u32 = 8_000;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// A mono 16-bit WAV clip of `duration`
pub fn wav_clip(duration: Duration) -> Vec<u8> {
    let samples = sine(220.0, duration.as_secs_f32(), CLIP_RATE);
    wav::encode(&samples, CLIP_RATE, 1).expect("failed to encode test clip")
}

/// Presentation nodes with the given texts, in order
pub fn nodes(texts: &[&str]) -> Vec<ContentNode> {
    texts
        .iter()
        .zip(0_i64..)
        .map(|(text, sequence_index)| ContentNode {
            sequence_index,
            text: (*text).to_string(),
            image_ref: None,
        })
        .collect()
}

/// Synthesizer that answers after a fixed latency with a fixed-length clip
pub struct FakeSynthesizer {
    latency: Duration,
    clip: Duration,
    echo_ids: bool,
    never: HashSet<String>,
    failing: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn new(latency: Duration, clip: Duration) -> Self {
        Self {
            latency,
            clip,
            echo_ids: false,
            never: HashSet::new(),
            failing: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Echo the request id back like the real service
    #[must_use]
    pub fn echoing_ids(mut self) -> Self {
        self.echo_ids = true;
        self
    }

    /// Never answer requests for `text`
    #[must_use]
    pub fn never_answering(mut self, text: &str) -> Self {
        self.never.insert(text.to_string());
        self
    }

    /// Reject requests for `text` straight away
    #[must_use]
    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Texts requested so far, in request order
    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceParams,
        request_id: &str,
    ) -> narrator::Result<SynthesisOutput> {
        self.requests.lock().unwrap().push(text.to_string());

        if self.failing.contains(text) {
            return Err(narrator::Error::Tts(format!("voice unavailable for {text:?}")));
        }
        if self.never.contains(text) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;

        Ok(SynthesisOutput {
            audio: wav_clip(self.clip),
            format: AudioFormat::Wav,
            request_id: self.echo_ids.then(|| request_id.to_string()),
        })
    }
}

/// What a [`RecordingSink`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Play { samples: usize },
    Pause,
    Resume,
    Stop,
}

/// Sink that records every call
#[derive(Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Sample counts of every clip played, in order
    pub fn played(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Play { samples } => Some(samples),
                _ => None,
            })
            .collect()
    }
}

impl AudioSink for RecordingSink {
    fn play(&mut self, samples: Arc<[f32]>, _: u32, _: u16) -> narrator::Result<()> {
        self.calls.lock().unwrap().push(SinkCall::Play {
            samples: samples.len(),
        });
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().push(SinkCall::Pause);
    }

    fn resume(&mut self) {
        self.calls.lock().unwrap().push(SinkCall::Resume);
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(SinkCall::Stop);
    }
}

// -- Voice chat responses ---

/// One newline-terminated record
pub fn record(json: &serde_json::Value) -> String {
    format!("{json}\n")
}

/// An audio record carrying a WAV clip of `duration`
pub fn audio_record(duration: Duration, segment_id: u64) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(wav_clip(duration));
    record(&serde_json::json!({
        "type": "audio",
        "audio": payload,
        "segment_id": segment_id,
    }))
}

/// A complete reply: recognition, two text deltas, two audio segments, done
pub fn sample_reply() -> Vec<u8> {
    let mut body = String::new();
    body.push_str(&record(&serde_json::json!({"type": "recognition", "text": "what is on the slide"})));
    body.push_str(&record(&serde_json::json!({"type": "text", "text": "It shows "})));
    body.push_str(&audio_record(Duration::from_millis(750), 0));
    body.push_str(&record(&serde_json::json!({"type": "text", "text": "the roadmap."})));
    body.push_str(&audio_record(Duration::from_millis(500), 1));
    body.push_str(&record(&serde_json::json!({
        "type": "done",
        "request_id": "req-42",
        "elapsed_seconds": 1.5,
    })));
    body.into_bytes()
}
