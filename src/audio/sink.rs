//! Audio output sinks and the shared output device
//!
//! Pipelines never hold a sink directly. They lease it from an
//! [`OutputDevice`], which admits one holder at a time.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{Error, Result};

/// Destination for decoded audio
///
/// `play` starts output and returns immediately. Completion is not signalled
/// by the sink: the owning queue knows each clip's duration and finishes it
/// on a timer.
pub trait AudioSink: Send {
    /// Start playing `samples`, replacing anything currently playing
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the stream
    fn play(&mut self, samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Result<()>;

    /// Suspend output, keeping position
    fn pause(&mut self);

    /// Continue paused output
    fn resume(&mut self);

    /// Stop output and release the current clip
    fn stop(&mut self);
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn play(&mut self, samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Result<()> {
        (**self).play(samples, sample_rate, channels)
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn stop(&mut self) {
        (**self).stop();
    }
}

/// Sink that discards audio (headless runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Result<()> {
        tracing::trace!(samples = samples.len(), sample_rate, channels, "discarding audio");
        Ok(())
    }

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn stop(&mut self) {}
}

/// The single audio output shared by all pipelines
#[derive(Clone)]
pub struct OutputDevice {
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
}

impl std::fmt::Debug for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDevice")
            .field("leased", &self.is_leased())
            .finish()
    }
}

impl OutputDevice {
    /// Wrap a sink as the shared output device
    #[must_use]
    pub fn new(sink: impl AudioSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Take the device if no other pipeline holds it
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceBusy`] if the device is leased
    pub fn try_lease(&self) -> Result<OutputLease> {
        let guard = Arc::clone(&self.sink)
            .try_lock_owned()
            .map_err(|_| Error::DeviceBusy)?;
        Ok(OutputLease { guard })
    }

    /// Wait until the device is free, then take it
    pub async fn lease(&self) -> OutputLease {
        let guard = Arc::clone(&self.sink).lock_owned().await;
        OutputLease { guard }
    }

    /// Whether some pipeline currently holds the device
    #[must_use]
    pub fn is_leased(&self) -> bool {
        self.sink.try_lock().is_err()
    }
}

/// Exclusive access to the output device; stops output when dropped
pub struct OutputLease {
    guard: OwnedMutexGuard<Box<dyn AudioSink>>,
}

impl std::fmt::Debug for OutputLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLease").finish_non_exhaustive()
    }
}

impl AudioSink for OutputLease {
    fn play(&mut self, samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Result<()> {
        self.guard.play(samples, sample_rate, channels)
    }

    fn pause(&mut self) {
        self.guard.pause();
    }

    fn resume(&mut self) {
        self.guard.resume();
    }

    fn stop(&mut self) {
        self.guard.stop();
    }
}

impl Drop for OutputLease {
    fn drop(&mut self) {
        self.guard.stop();
    }
}
