//! WAV container encoding and decoding
//!
//! Encoding produces the canonical 44-byte header followed by
//! little-endian 16-bit PCM. Decoding goes through hound, which walks the
//! RIFF chunk list so extended `fmt ` blocks and extra chunks (`LIST`,
//! `fact`, ...) before `data` are tolerated.

use std::borrow::Cow;
use std::io::Cursor;

use crate::{Error, Result};

/// Size of the canonical PCM header written by [`encode`]
pub const HEADER_LEN: usize = 44;

/// Full-scale value for 16-bit quantization
const I16_SCALE: f32 = 32768.0;

/// Full-scale value for 8-bit samples once hound has re-centered them
const I8_SCALE: f32 = 128.0;

/// Decoded audio with its format metadata
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    /// Interleaved samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bit depth declared by the container
    pub bits_per_sample: u16,
}

/// Encode samples into a 16-bit PCM WAV container
///
/// Samples outside `[-1.0, 1.0]` are clamped.
///
/// # Errors
///
/// Returns error if `channels` or `sample_rate` is zero, or the data does
/// not fit the 32-bit size fields
pub fn encode(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    if channels == 0 || sample_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot encode {channels} channel(s) at {sample_rate} Hz"
        )));
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN.saturating_add(samples.len().saturating_mul(2))));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(quantize(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV container into samples and format metadata
///
/// A `data` chunk that claims more bytes than are present is read up to
/// the last whole sample.
///
/// # Errors
///
/// Returns [`Error::MalformedContainer`] if the buffer is shorter than a
/// header, is not RIFF/WAVE, or lacks `fmt `/`data` chunks, and
/// [`Error::UnsupportedDepth`] for encodings other than 8 or 16-bit PCM
#[allow(clippy::cast_precision_loss)]
pub fn decode(bytes: &[u8]) -> Result<WavData> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::MalformedContainer(format!(
            "{} bytes is shorter than a WAV header",
            bytes.len()
        )));
    }

    let bytes = fit_data_size(bytes);
    let mut reader = hound::WavReader::new(Cursor::new(bytes.as_ref())).map_err(|e| {
        match declared_depth(&bytes) {
            Some(bits) if bits != 8 && bits != 16 => Error::UnsupportedDepth(bits),
            _ => Error::MalformedContainer(e.to_string()),
        }
    })?;

    let spec = reader.spec();
    let scale = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => I16_SCALE,
        (hound::SampleFormat::Int, 8) => I8_SCALE,
        (_, bits) => return Err(Error::UnsupportedDepth(bits)),
    };

    // A short read past the last whole sample ends the clip
    let samples = reader
        .samples::<i32>()
        .map_while(std::result::Result::ok)
        .map(|sample| sample as f32 / scale)
        .collect();

    Ok(WavData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    })
}

/// Decode headerless little-endian 16-bit mono PCM
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> WavData {
    WavData {
        samples: bytes
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / I16_SCALE)
            .collect(),
        sample_rate,
        channels: 1,
        bits_per_sample: 16,
    }
}

/// Shrink an overstated `data` size in a canonical header to whole frames
///
/// Streaming writers emit the header before the length is known and leave
/// the size at its maximum, which hound rejects.
fn fit_data_size(bytes: &[u8]) -> Cow<'_, [u8]> {
    if &bytes[36..40] != b"data" {
        return Cow::Borrowed(bytes);
    }

    let available = bytes.len() - HEADER_LEN;
    if read_u32(bytes, 40) as usize <= available {
        return Cow::Borrowed(bytes);
    }

    let block_align = usize::from(read_u16(bytes, 32)).max(1);
    let Ok(fitted) = u32::try_from(available - available % block_align) else {
        return Cow::Borrowed(bytes);
    };

    let mut owned = bytes.to_vec();
    owned[40..44].copy_from_slice(&fitted.to_le_bytes());
    Cow::Owned(owned)
}

/// Bit depth from a leading `fmt ` chunk
fn declared_depth(bytes: &[u8]) -> Option<u16> {
    (&bytes[12..16] == b"fmt ").then(|| read_u16(bytes, 34))
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE)
        .round()
        .clamp(-32768.0, 32767.0) as i16
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 0.05).sin() * 0.8)
            .collect()
    }

    /// Build a container with an extended fmt chunk and a LIST chunk before data
    fn extended_container(bits: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&18u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&22050u32.to_le_bytes());
        out.extend_from_slice(&(22050u32 * 2 * u32::from(bits / 8)).to_le_bytes());
        out.extend_from_slice(&(2 * (bits / 8)).to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(b"INFOab");
        out.extend_from_slice(b"data");
        out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn header_layout_is_canonical() {
        let wav = encode(&[0.0; 10], 16000, 1).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + 20);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(read_u32(&wav, 4), 36 + 20);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(read_u32(&wav, 16), 16);
        assert_eq!(read_u16(&wav, 20), 1);
        assert_eq!(read_u16(&wav, 22), 1);
        assert_eq!(read_u32(&wav, 24), 16000);
        assert_eq!(read_u32(&wav, 28), 32000);
        assert_eq!(read_u16(&wav, 32), 2);
        assert_eq!(read_u16(&wav, 34), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(read_u32(&wav, 40), 20);
    }

    #[test]
    fn roundtrip_within_quantization() {
        let samples = sine(500);
        let decoded = decode(&encode(&samples, 24000, 2).unwrap()).unwrap();

        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.bits_per_sample, 16);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn roundtrip_at_full_scale() {
        let samples = [1.0, -1.0, 0.5, -0.5, 0.0];
        let decoded = decode(&encode(&samples, 8000, 1).unwrap()).unwrap();

        for (a, b) in samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn encode_clamps_out_of_range() {
        let decoded = decode(&encode(&[3.0, -7.5], 8000, 1).unwrap()).unwrap();
        assert!((decoded.samples[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
        assert!((decoded.samples[1] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn encode_rejects_zero_channels() {
        assert!(matches!(encode(&[0.0], 8000, 0), Err(Error::Audio(_))));
    }

    #[test]
    fn short_buffers_are_malformed() {
        for len in 0..HEADER_LEN {
            let bytes = vec![0u8; len];
            assert!(
                matches!(decode(&bytes), Err(Error::MalformedContainer(_))),
                "len {len}"
            );
        }
    }

    #[test]
    fn missing_data_chunk_is_malformed() {
        let mut wav = encode(&[0.1; 8], 8000, 1).unwrap();
        wav[36..40].copy_from_slice(b"junk");
        assert!(matches!(decode(&wav), Err(Error::MalformedContainer(_))));
    }

    #[test]
    fn non_riff_is_malformed() {
        let mut wav = encode(&[0.1; 8], 8000, 1).unwrap();
        wav[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(decode(&wav), Err(Error::MalformedContainer(_))));
    }

    #[test]
    fn unsupported_depth_is_reported() {
        let wav = extended_container(24, &[0u8; 12]);
        assert!(matches!(decode(&wav), Err(Error::UnsupportedDepth(24))));
    }

    #[test]
    fn data_chunk_found_after_extra_chunks() {
        let pcm: Vec<u8> = [1000i16, -1000, 2000, -2000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let decoded = decode(&extended_container(16, &pcm)).unwrap();

        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.samples.len(), 4);
        assert!((decoded.samples[0] - 1000.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn eight_bit_is_centered() {
        let decoded = decode(&extended_container(8, &[128, 255, 0, 64])).unwrap();
        assert_eq!(decoded.samples, vec![0.0, 127.0 / 128.0, -1.0, -0.5]);
    }

    #[test]
    fn oversized_data_length_is_truncated() {
        let mut wav = encode(&[0.25; 4], 8000, 1).unwrap();
        wav[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
        let decoded = decode(&wav).unwrap();
        assert_eq!(decoded.samples.len(), 4);
    }

    #[test]
    fn unset_size_with_trailing_byte_keeps_whole_samples() {
        let mut wav = encode(&[0.25; 4], 8000, 2).unwrap();
        wav[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
        wav.extend_from_slice(&[0x11, 0x22, 0x33]);

        let decoded = decode(&wav).unwrap();
        assert_eq!(decoded.samples.len(), 4);
        assert_eq!(decoded.channels, 2);
    }

    #[test]
    fn float_samples_are_unsupported() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..8 {
                writer.write_sample(0.5f32).unwrap();
            }
            writer.finalize().unwrap();
        }

        assert!(matches!(
            decode(&cursor.into_inner()),
            Err(Error::UnsupportedDepth(32))
        ));
    }

    #[test]
    fn raw_pcm_ignores_trailing_byte() {
        let decoded = decode_pcm16(&[0x00, 0x40, 0x00, 0xC0, 0x7F], 16000);
        assert_eq!(decoded.samples, vec![0.5, -0.5]);
        assert_eq!(decoded.channels, 1);
    }
}
