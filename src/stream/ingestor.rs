//! Incremental ingestion of a voice chat response
//!
//! Records are dispatched as soon as their delimiter arrives, so reply text
//! reaches the caller and audio starts playing while the service is still
//! producing the rest of the response.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use super::buffer::StreamBuffer;
use super::events::StreamEvent;
use crate::api::ChatStream;
use crate::audio::queue::sleep_until;
use crate::audio::{AudioAsset, AudioSink, PlaybackQueue, wav};
use crate::{Error, Result};

/// Prefix that marks the transcript of the user's own utterance
pub const RECOGNITION_PREFIX: &str = "You: ";

/// Update forwarded to the caller while a reply streams in
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    /// Text to display; recognition text carries [`RECOGNITION_PREFIX`]
    Text(String),
    /// An audio segment was decoded
    Audio {
        /// Segment position within the reply
        segment: usize,
        /// Playback length
        duration: Duration,
    },
    /// A service-reported or local failure
    Error(String),
    /// The service finished the reply; queued audio may still be playing
    Completed {
        request_id: Option<String>,
        elapsed: Option<Duration>,
    },
}

/// What ended an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The response ended and all queued audio played
    Finished,
    /// The transport failed before the response ended
    Failed,
    /// A stop was requested
    Stopped,
}

/// Feature toggles for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Forward recognition and reply text
    pub enable_text_output: bool,
    /// Enqueue decoded audio for playback
    pub auto_play_audio: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            enable_text_output: true,
            auto_play_audio: true,
        }
    }
}

/// A response body exposed as a cumulative buffer that is polled
pub trait PolledSource: Send + Sync {
    /// Whether the response has been fully received
    fn is_complete(&self) -> bool;

    /// Bytes received after `offset`
    fn bytes_since(&self, offset: usize) -> Vec<u8>;

    /// Transport failure, if one occurred
    fn failure(&self) -> Option<String>;

    /// Abandon whatever transfer is still feeding this source
    fn cancel(&self) {}
}

/// Turns response bytes into dispatched events and queued audio
pub struct StreamIngestor<S> {
    buffer: StreamBuffer,
    queue: PlaybackQueue<S>,
    updates: mpsc::UnboundedSender<ChatUpdate>,
    options: IngestOptions,
    segments: usize,
    completed: bool,
}

impl<S: AudioSink> StreamIngestor<S> {
    /// Create an ingestor that plays audio through `sink`
    pub fn new(sink: S, updates: mpsc::UnboundedSender<ChatUpdate>, options: IngestOptions) -> Self {
        Self {
            buffer: StreamBuffer::new(),
            queue: PlaybackQueue::new(sink),
            updates,
            options,
            segments: 0,
            completed: false,
        }
    }

    /// Feed newly received bytes, dispatching every completed record
    pub fn ingest(&mut self, bytes: &[u8]) {
        for record in self.buffer.extend(bytes) {
            self.dispatch_record(&record);
        }
    }

    /// Process the trailing fragment after the response ended
    pub fn finish(&mut self) {
        if let Some(record) = self.buffer.finish() {
            tracing::debug!(bytes = record.len(), "processing unterminated final record");
            self.dispatch_record(&record);
        }
    }

    /// Abandon the response after a transport failure
    ///
    /// The trailing fragment is discarded and queued audio released.
    pub fn fail(&mut self, error: &str) {
        tracing::error!(error, received = self.buffer.consumed(), "voice chat stream failed");
        self.send(ChatUpdate::Error(format!("stream failed: {error}")));
        self.buffer = StreamBuffer::new();
        self.queue.clear();
    }

    /// Stop playback and drop queued audio
    pub fn stop(&mut self) -> usize {
        let dropped = self.queue.clear();
        tracing::debug!(dropped, "voice chat playback stopped");
        dropped
    }

    /// Dispatch one decoded event
    pub fn dispatch(&mut self, event: StreamEvent) {
        tracing::trace!(kind = event.kind(), "dispatching stream event");

        match event {
            StreamEvent::Recognition { text } => {
                tracing::debug!(text = %text, "recognized speech");
                if self.options.enable_text_output {
                    self.send(ChatUpdate::Text(format!("{RECOGNITION_PREFIX}{text}")));
                }
            }
            StreamEvent::TextDelta { text } => {
                if self.options.enable_text_output {
                    self.send(ChatUpdate::Text(text));
                }
            }
            StreamEvent::AudioSegment { audio, segment_id } => {
                let segment = segment_id
                    .and_then(|id| usize::try_from(id).ok())
                    .unwrap_or(self.segments);
                self.segments += 1;

                match self.decode_audio(segment, &audio) {
                    Ok(asset) => self.accept_audio(asset),
                    Err(Error::EmptyPayload) => {
                        tracing::debug!(segment, "audio record without payload");
                    }
                    Err(e) => {
                        tracing::warn!(segment, error = %e, "dropping undecodable audio segment");
                        self.send(ChatUpdate::Error(format!("audio segment {segment}: {e}")));
                    }
                }
            }
            StreamEvent::Error { message } => {
                tracing::warn!(message = %message, "service reported an error");
                self.send(ChatUpdate::Error(message));
            }
            StreamEvent::Done {
                request_id,
                elapsed_seconds,
            } => {
                self.completed = true;
                let elapsed = elapsed_seconds
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(Duration::from_secs_f64);
                tracing::info!(?request_id, ?elapsed, "voice chat reply complete");
                self.send(ChatUpdate::Completed {
                    request_id,
                    elapsed,
                });
            }
            StreamEvent::Unknown => {
                tracing::debug!("ignoring record of unknown type");
            }
        }
    }

    /// Whether a `done` record has been seen
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Bytes received so far
    #[must_use]
    pub const fn received(&self) -> usize {
        self.buffer.consumed()
    }

    /// The local playback queue
    #[must_use]
    pub const fn queue(&self) -> &PlaybackQueue<S> {
        &self.queue
    }

    /// Mutable access to the local playback queue
    pub const fn queue_mut(&mut self) -> &mut PlaybackQueue<S> {
        &mut self.queue
    }

    /// Ingest a pushed chunk stream until it ends and its audio has played
    pub async fn run_stream<St, B, E>(
        &mut self,
        stream: St,
        stop: &mut watch::Receiver<bool>,
    ) -> IngestOutcome
    where
        St: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut ended = false;

        loop {
            if ended && !self.queue.is_busy() {
                return IngestOutcome::Finished;
            }
            let deadline = self.queue.finish_deadline();

            tokio::select! {
                biased;
                () = stop_requested(stop) => {
                    self.stop();
                    return IngestOutcome::Stopped;
                }
                chunk = stream.next(), if !ended => match chunk {
                    Some(Ok(bytes)) => self.ingest(bytes.as_ref()),
                    Some(Err(e)) => {
                        self.fail(&e.to_string());
                        return IngestOutcome::Failed;
                    }
                    None => {
                        self.finish();
                        ended = true;
                    }
                },
                () = sleep_until(deadline) => {
                    self.queue.on_playback_finished();
                }
            }
        }
    }

    /// Ingest a cumulative source by polling it every `interval`
    pub async fn run_polled<P: PolledSource + ?Sized>(
        &mut self,
        source: &P,
        interval: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> IngestOutcome {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ended = false;

        loop {
            if ended && !self.queue.is_busy() {
                return IngestOutcome::Finished;
            }
            let deadline = self.queue.finish_deadline();

            tokio::select! {
                biased;
                () = stop_requested(stop) => {
                    self.stop();
                    return IngestOutcome::Stopped;
                }
                _ = ticker.tick(), if !ended => {
                    // Failure and completion are read before the bytes so
                    // everything that arrived ahead of them is ingested
                    let failure = source.failure();
                    let complete = source.is_complete();
                    let fresh = source.bytes_since(self.buffer.consumed());
                    if !fresh.is_empty() {
                        self.ingest(&fresh);
                    }
                    if let Some(error) = failure {
                        self.fail(&error);
                        return IngestOutcome::Failed;
                    }
                    if complete {
                        self.finish();
                        ended = true;
                    }
                }
                () = sleep_until(deadline) => {
                    self.queue.on_playback_finished();
                }
            }
        }
    }

    fn dispatch_record(&mut self, record: &str) {
        match StreamEvent::decode(record) {
            Ok(event) => self.dispatch(event),
            Err(e) => {
                tracing::warn!(error = %e, bytes = record.len(), "dropping undecodable record");
            }
        }
    }

    fn decode_audio(&self, segment: usize, payload: &str) -> Result<AudioAsset> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        let wav = wav::decode(&bytes)?;
        Ok(AudioAsset::from_wav(segment, wav))
    }

    fn accept_audio(&mut self, asset: AudioAsset) {
        let segment = asset.node_index;
        let duration = asset.duration();
        tracing::debug!(segment, duration_ms = duration.as_millis(), "audio segment decoded");

        if self.options.auto_play_audio {
            self.queue.enqueue(asset);
        }
        self.send(ChatUpdate::Audio { segment, duration });
    }

    fn send(&self, update: ChatUpdate) {
        if self.updates.send(update).is_err() {
            tracing::trace!("chat update receiver dropped");
        }
    }
}

/// Resolve once `stop` flips to true; never if its sender is gone
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Default)]
struct ResponseState {
    bytes: Vec<u8>,
    complete: bool,
    failure: Option<String>,
}

/// In-memory [`PolledSource`] that a download task appends to
#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer {
    state: Arc<Mutex<ResponseState>>,
    filler: Option<AbortHandle>,
}

impl ResponseBuffer {
    /// Create an empty, incomplete buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task that drains `stream` into a new buffer
    #[must_use]
    pub fn fill_from(mut stream: ChatStream) -> Self {
        let mut buffer = Self::new();
        let writer = buffer.clone();

        let filler = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => writer.push(&bytes),
                    Err(e) => {
                        writer.fail(e.to_string());
                        return;
                    }
                }
            }
            writer.complete();
        });

        buffer.filler = Some(filler.abort_handle());
        buffer
    }

    /// Whether the download task started by [`Self::fill_from`] is still running
    #[must_use]
    pub fn is_filling(&self) -> bool {
        self.filler.as_ref().is_some_and(|filler| !filler.is_finished())
    }

    /// Append received bytes
    pub fn push(&self, bytes: &[u8]) {
        self.lock().bytes.extend_from_slice(bytes);
    }

    /// Mark the response fully received
    pub fn complete(&self) {
        self.lock().complete = true;
    }

    /// Record a transport failure
    pub fn fail(&self, error: impl Into<String>) {
        self.lock().failure = Some(error.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PolledSource for ResponseBuffer {
    fn is_complete(&self) -> bool {
        self.lock().complete
    }

    fn bytes_since(&self, offset: usize) -> Vec<u8> {
        self.lock().bytes.get(offset..).map(<[u8]>::to_vec).unwrap_or_default()
    }

    fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    fn cancel(&self) {
        if let Some(filler) = self.filler.as_ref().filter(|filler| !filler.is_finished()) {
            tracing::debug!(received = self.lock().bytes.len(), "abandoning response download");
            filler.abort();
        }
    }
}
