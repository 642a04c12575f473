//! Streaming voice chat ingestion
//!
//! Splits a growing response body into newline-delimited records, decodes
//! them, and dispatches text and audio while the response is still arriving.

mod buffer;
pub mod events;
pub mod ingestor;
mod session;

pub use buffer::StreamBuffer;
pub use events::StreamEvent;
pub use ingestor::{
    ChatUpdate, IngestOptions, IngestOutcome, PolledSource, RECOGNITION_PREFIX, ResponseBuffer,
    StreamIngestor,
};
pub use session::{ChatSource, VoiceChatSession};
