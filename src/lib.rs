//! Narrator - narrated presentations and streaming voice chat
//!
//! This library drives a remote speech service from two pipelines:
//! - Presentations: synthesis is prefetched a few nodes ahead of playback
//!   so narration runs continuously from node to node
//! - Voice chat: a recorded utterance is uploaded and the reply is played
//!   and shown while it is still streaming in
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │    PresentationSequencer     │   │       VoiceChatSession       │
//! │  PrefetchScheduler │ Queue   │   │  StreamIngestor │ Queue      │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                │        OutputDevice (one lease)  │
//! ┌──────────────▼──────────────────────────────────▼───────────────┐
//! │                        Speech service                          │
//! │        /api/speech/synthesize  │  /api/chat/voice/stream       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod presentation;
pub mod runtime;
pub mod stream;

pub use api::{HttpSynthesizer, SpeechSynthesizer, VoiceChatClient, VoiceParams};
pub use audio::{AudioAsset, AudioSink, OutputDevice, PlaybackQueue};
pub use config::Config;
pub use error::{Error, Result};
pub use presentation::{
    ContentNode, Document, PresentationEvent, PresentationHandle, PresentationSequencer,
    PresentationState, PrefetchScheduler,
};
pub use runtime::{AudioOutput, ChatTransport, Runtime};
pub use stream::{ChatUpdate, StreamEvent, StreamIngestor, VoiceChatSession};
