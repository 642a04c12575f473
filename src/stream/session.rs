//! One voice chat exchange running on its own task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::ingestor::{
    ChatUpdate, IngestOptions, IngestOutcome, PolledSource, StreamIngestor, stop_requested,
};
use crate::api::ChatStream;
use crate::audio::OutputDevice;
use crate::{Error, Result};

/// Where the reply bytes come from
pub enum ChatSource {
    /// Chunks pushed by the transport
    Stream(ChatStream),
    /// A cumulative buffer polled at an interval
    Polled {
        source: Arc<dyn PolledSource>,
        interval: Duration,
    },
}

impl ChatSource {
    fn polled(&self) -> Option<Arc<dyn PolledSource>> {
        match self {
            Self::Stream(_) => None,
            Self::Polled { source, .. } => Some(Arc::clone(source)),
        }
    }
}

/// Cancels a polled source's transfer when the session task ends
struct TransferGuard(Option<Arc<dyn PolledSource>>);

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if let Some(source) = &self.0 {
            source.cancel();
        }
    }
}

/// A running voice chat reply
///
/// Waits for the shared output device, then ingests the reply and plays its
/// audio. Updates arrive on the receiver returned by [`VoiceChatSession::start`].
pub struct VoiceChatSession {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<IngestOutcome>,
}

impl VoiceChatSession {
    /// Spawn a session over `source`
    #[must_use]
    pub fn start(
        device: OutputDevice,
        source: ChatSource,
        options: IngestOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ChatUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let _transfer = TransferGuard(source.polled());

            let lease = tokio::select! {
                biased;
                () = stop_requested(&mut stop_rx) => {
                    tracing::debug!("voice chat stopped while waiting for audio output");
                    return IngestOutcome::Stopped;
                }
                lease = device.lease() => lease,
            };

            let mut ingestor = StreamIngestor::new(lease, updates_tx, options);
            let outcome = match source {
                ChatSource::Stream(stream) => ingestor.run_stream(stream, &mut stop_rx).await,
                ChatSource::Polled { source, interval } => {
                    ingestor
                        .run_polled(source.as_ref(), interval, &mut stop_rx)
                        .await
                }
            };

            tracing::info!(
                ?outcome,
                bytes = ingestor.received(),
                segments_played = ingestor.queue().finished_count(),
                "voice chat session ended"
            );
            outcome
        });

        (Self { stop_tx, task }, updates_rx)
    }

    /// Stop ingestion and playback; safe to call repeatedly
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            tracing::debug!("voice chat stop requested");
        }
    }

    /// Whether the session task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end
    ///
    /// # Errors
    ///
    /// Returns error if the session task panicked
    pub async fn wait(self) -> Result<IngestOutcome> {
        self.task
            .await
            .map_err(|e| Error::Session(format!("voice chat task failed: {e}")))
    }
}
