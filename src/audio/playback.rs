//! Audio playback to speakers
//!
//! cpal streams are not `Send` on every platform, so the device and the live
//! stream are owned by a dedicated thread. [`SpeakerSink`] only forwards
//! commands to it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::AudioSink;
use crate::{Error, Result};

enum Command {
    Play {
        samples: Arc<[f32]>,
        sample_rate: u32,
        channels: u16,
    },
    Pause,
    Resume,
    Stop,
    Shutdown,
}

/// Plays audio on the default output device
pub struct SpeakerSink {
    tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name("narrator-audio".to_string())
            .spawn(move || match Speaker::open() {
                Ok(speaker) => {
                    let _ = ready_tx.send(Ok(()));
                    speaker.run(&rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread exited during startup".to_string()))??;

        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::warn!("audio thread is gone; dropping command");
        }
    }
}

impl AudioSink for SpeakerSink {
    fn play(&mut self, samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Result<()> {
        self.tx
            .send(Command::Play {
                samples,
                sample_rate,
                channels,
            })
            .map_err(|_| Error::Audio("audio thread is gone".to_string()))
    }

    fn pause(&mut self) {
        self.send(Command::Pause);
    }

    fn resume(&mut self) {
        self.send(Command::Resume);
    }

    fn stop(&mut self) {
        self.send(Command::Stop);
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Device state owned by the audio thread
struct Speaker {
    device: Device,
    stream: Option<Stream>,
}

impl Speaker {
    fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            device,
            stream: None,
        })
    }

    fn run(mut self, rx: &mpsc::Receiver<Command>) {
        while let Ok(command) = rx.recv() {
            match command {
                Command::Play {
                    samples,
                    sample_rate,
                    channels,
                } => {
                    self.stream = None;
                    match self.start(&samples, sample_rate, channels) {
                        Ok(stream) => self.stream = Some(stream),
                        Err(e) => tracing::error!(error = %e, "failed to start playback"),
                    }
                }
                Command::Pause => {
                    if let Some(stream) = &self.stream {
                        if let Err(e) = stream.pause() {
                            tracing::warn!(error = %e, "failed to pause playback");
                        }
                    }
                }
                Command::Resume => {
                    if let Some(stream) = &self.stream {
                        if let Err(e) = stream.play() {
                            tracing::warn!(error = %e, "failed to resume playback");
                        }
                    }
                }
                Command::Stop => {
                    if self.stream.take().is_some() {
                        tracing::debug!("playback stopped");
                    }
                }
                Command::Shutdown => break,
            }
        }
    }

    /// Pick a stream config for the clip, preferring its native rate
    fn config_for(&self, sample_rate: u32, channels: u16) -> Result<StreamConfig> {
        let native = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(|c| c.channels().abs_diff(channels));

        if let Some(range) = native {
            return Ok(range.with_sample_rate(SampleRate(sample_rate)).config());
        }

        // Fallback: device default, resampled below
        self.device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Audio(e.to_string()))
    }

    fn start(&self, samples: &[f32], sample_rate: u32, channels: u16) -> Result<Stream> {
        let config = self.config_for(sample_rate, channels)?;
        let frames = Arc::new(adapt(samples, sample_rate, channels, &config)?);
        let out_channels = usize::from(config.channels);
        let position = Arc::new(AtomicUsize::new(0));

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = position.load(Ordering::Relaxed);
                    for (i, out) in data.iter_mut().enumerate() {
                        *out = frames.get(start + i).copied().unwrap_or(0.0);
                    }
                    position.store(start + data.len(), Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            samples = samples.len(),
            sample_rate,
            channels,
            device_rate = config.sample_rate.0,
            device_channels = out_channels,
            "playback started"
        );

        Ok(stream)
    }
}

/// Convert a clip to the device's rate and channel layout
fn adapt(samples: &[f32], sample_rate: u32, channels: u16, config: &StreamConfig) -> Result<Vec<f32>> {
    let device_rate = config.sample_rate.0;
    let out_channels = usize::from(config.channels);

    if channels == config.channels && sample_rate == device_rate {
        return Ok(samples.to_vec());
    }

    let mono = downmix(samples, usize::from(channels.max(1)));
    let mono = if sample_rate == device_rate {
        mono
    } else {
        resample(&mono, sample_rate, device_rate)?
    };

    Ok(mono
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, out_channels))
        .collect())
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Resample mono audio using rubato
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(expected + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        // Pad the tail so the final partial chunk is not lost
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn resample_scales_length() {
        let input = vec![0.0; 16_000];
        let output = resample(&input, 16_000, 48_000).unwrap();
        assert_eq!(output.len(), 48_000);
    }

    #[test]
    fn adapt_fans_mono_out_to_device_channels() {
        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(8000),
            buffer_size: cpal::BufferSize::Default,
        };
        let out = adapt(&[0.25, -0.25], 8000, 1, &config).unwrap();
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }
}
