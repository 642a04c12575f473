//! Clients for the remote speech service
//!
//! Synthesis requests, the streaming voice chat upload, and the retry
//! policy both share.

pub mod retry;
pub mod synthesis;
pub mod voice_chat;

pub use retry::RetryPolicy;
pub use synthesis::{AudioFormat, HttpSynthesizer, SpeechSynthesizer, SynthesisOutput, VoiceParams};
pub use voice_chat::{ChatOptions, ChatStream, VoiceChatClient};
