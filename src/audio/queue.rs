//! Sequential playback queue
//!
//! One "now playing" slot plus a FIFO of pending clips. The queue never
//! interrupts the current clip on enqueue, so clips play strictly in arrival
//! order without overlap. It does not own a timer: the owning task waits for
//! [`PlaybackQueue::finish_deadline`] and then calls
//! [`PlaybackQueue::on_playback_finished`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::{AudioAsset, AudioSink};

/// Playback queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing playing, nothing pending
    Idle,
    /// Current clip is audible
    Playing,
    /// Current clip is suspended
    Paused,
}

/// Plays assets one at a time through a sink
pub struct PlaybackQueue<S> {
    sink: S,
    state: PlaybackState,
    current: Option<AudioAsset>,
    pending: VecDeque<AudioAsset>,
    /// When the current clip last started or resumed
    resumed_at: Option<Instant>,
    /// Portion of the current clip played before the last pause
    played: Duration,
    finished: u64,
}

impl<S: AudioSink> PlaybackQueue<S> {
    /// Create an idle queue over `sink`
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: PlaybackState::Idle,
            current: None,
            pending: VecDeque::new(),
            resumed_at: None,
            played: Duration::ZERO,
            finished: 0,
        }
    }

    /// Append an asset; starts it immediately if the queue is idle
    pub fn enqueue(&mut self, asset: AudioAsset) {
        tracing::debug!(
            node = asset.node_index,
            duration_ms = asset.duration().as_millis(),
            pending = self.pending.len(),
            "enqueue audio"
        );
        self.pending.push_back(asset);

        if self.state == PlaybackState::Idle {
            self.promote_next();
        }
    }

    /// Mark the current asset finished and start the next one
    ///
    /// Returns the finished asset, or `None` if nothing was playing.
    pub fn on_playback_finished(&mut self) -> Option<AudioAsset> {
        let finished = self.current.take()?;
        self.finished += 1;
        tracing::debug!(node = finished.node_index, "playback finished");

        let was_paused = self.state == PlaybackState::Paused;
        self.promote_next();

        if was_paused && self.current.is_some() {
            self.sink.pause();
            self.resumed_at = None;
            self.state = PlaybackState::Paused;
        }

        Some(finished)
    }

    /// Suspend the current asset; no-op unless playing
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if let Some(resumed_at) = self.resumed_at.take() {
            self.played += resumed_at.elapsed();
        }
        self.sink.pause();
        self.state = PlaybackState::Paused;
    }

    /// Continue a paused asset; no-op unless paused
    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        self.sink.resume();
        self.resumed_at = Some(Instant::now());
        self.state = PlaybackState::Playing;
    }

    /// Stop the current asset and drop everything pending
    ///
    /// Returns how many assets were discarded.
    pub fn clear(&mut self) -> usize {
        let mut dropped = self.pending.len();
        self.pending.clear();

        if self.current.take().is_some() {
            dropped += 1;
            self.sink.stop();
        }

        self.state = PlaybackState::Idle;
        self.resumed_at = None;
        self.played = Duration::ZERO;
        dropped
    }

    /// Whether an asset is playing or paused
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Asset in the "now playing" slot
    #[must_use]
    pub const fn current(&self) -> Option<&AudioAsset> {
        self.current.as_ref()
    }

    /// Number of assets waiting behind the current one
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of assets that have finished playing
    #[must_use]
    pub const fn finished_count(&self) -> u64 {
        self.finished
    }

    /// Unplayed time left in the current asset
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let current = self.current.as_ref()?;
        let mut played = self.played;
        if let Some(resumed_at) = self.resumed_at {
            played += resumed_at.elapsed();
        }
        Some(current.duration().saturating_sub(played))
    }

    /// Instant at which the current asset ends, while playing
    #[must_use]
    pub fn finish_deadline(&self) -> Option<Instant> {
        let resumed_at = self.resumed_at?;
        let current = self.current.as_ref()?;
        Some(resumed_at + current.duration().saturating_sub(self.played))
    }

    /// Play everything queued to the end
    pub async fn play_to_end(&mut self) {
        while let Some(deadline) = self.finish_deadline() {
            tokio::time::sleep_until(deadline).await;
            self.on_playback_finished();
        }
    }

    /// Borrow the sink
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    fn promote_next(&mut self) {
        self.played = Duration::ZERO;

        let Some(next) = self.pending.pop_front() else {
            self.resumed_at = None;
            self.state = PlaybackState::Idle;
            return;
        };

        if let Err(e) = self
            .sink
            .play(next.samples.clone(), next.sample_rate, next.channels)
        {
            // The clip keeps its slot so the timeline stays intact
            tracing::warn!(node = next.node_index, error = %e, "audio sink rejected clip");
        }

        self.resumed_at = Some(Instant::now());
        self.current = Some(next);
        self.state = PlaybackState::Playing;
    }
}

/// Sleep until `deadline`, or forever if there is none
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
