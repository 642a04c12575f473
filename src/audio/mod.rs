//! Audio primitives
//!
//! WAV coding, the sequential playback queue, and output sinks shared by the
//! presentation and voice chat pipelines.

mod playback;
pub mod queue;
pub mod sink;
pub mod wav;

use std::sync::Arc;
use std::time::Duration;

pub use playback::SpeakerSink;
pub use queue::{PlaybackQueue, PlaybackState};
pub use sink::{AudioSink, NullSink, OutputDevice, OutputLease};
pub use wav::WavData;

/// A decoded clip ready for playback
///
/// `node_index` is the presentation node the clip belongs to; on the voice
/// chat path it holds the segment position within the reply.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    /// Owning node (or segment) index
    pub node_index: usize,
    /// Interleaved samples in `[-1.0, 1.0]`
    pub samples: Arc<[f32]>,
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl AudioAsset {
    /// Wrap decoded WAV data as an asset for `node_index`
    #[must_use]
    pub fn from_wav(node_index: usize, wav: WavData) -> Self {
        Self {
            node_index,
            samples: wav.samples.into(),
            sample_rate: wav.sample_rate,
            channels: wav.channels,
        }
    }

    /// Playback length derived from frame count and sample rate
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / usize::from(self.channels);
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Number of interleaved samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the asset holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_counts_frames() {
        let asset = AudioAsset {
            node_index: 0,
            samples: vec![0.0; 48_000].into(),
            sample_rate: 24_000,
            channels: 2,
        };
        assert_eq!(asset.duration(), Duration::from_secs(1));
    }

    #[test]
    fn degenerate_format_has_no_duration() {
        let asset = AudioAsset {
            node_index: 0,
            samples: vec![0.0; 10].into(),
            sample_rate: 0,
            channels: 1,
        };
        assert_eq!(asset.duration(), Duration::ZERO);
    }
}
