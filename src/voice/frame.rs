//! Raw PCM frames and sample conversions

use std::time::Duration;

use crate::{Error, Result};

/// Bit depth of every stream the assistant opens (linear16)
pub const BITS_PER_SAMPLE: u16 = 16;

/// Format shared by every frame of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Signed 16-bit little-endian PCM
    #[must_use]
    pub const fn linear16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: BITS_PER_SAMPLE,
        }
    }

    /// Bytes for one sample of one channel
    #[must_use]
    pub const fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Bytes needed for `samples` samples per channel
    #[must_use]
    pub const fn frame_bytes(&self, samples: usize) -> usize {
        samples * self.channels as usize * self.bytes_per_sample()
    }

    /// Samples per channel covering `duration`, rounded to the nearest sample
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn samples_for(&self, duration: Duration) -> usize {
        (f64::from(self.sample_rate) * duration.as_secs_f64()).round() as usize
    }
}

/// Fixed-size buffer of raw PCM tagged with its stream format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    format: AudioFormat,
    data: Vec<u8>,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the frame into interleaved i16 samples
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        pcm16_to_samples(&self.data)
    }
}

/// Decode little-endian linear16 bytes; a trailing odd byte is ignored
#[must_use]
pub fn pcm16_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Encode i16 samples as little-endian linear16 bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert an i16 sample to f32 in [-1.0, 1.0)
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encode mono i16 samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_samples_for_native_rates() {
        let chunk = Duration::from_millis(50);
        assert_eq!(AudioFormat::linear16(48000, 1).samples_for(chunk), 2400);
        assert_eq!(AudioFormat::linear16(44100, 1).samples_for(chunk), 2205);
        assert_eq!(AudioFormat::linear16(16000, 1).samples_for(chunk), 800);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(AudioFormat::linear16(16000, 1).frame_bytes(512), 1024);
        assert_eq!(AudioFormat::linear16(16000, 2).frame_bytes(512), 2048);
    }

    #[test]
    fn test_pcm16_decoding_is_little_endian() {
        let samples = pcm16_to_samples(&[0x01, 0x02, 0xff, 0x7f, 0x09]);
        assert_eq!(samples, vec![0x0201, i16::MAX]);
        assert_eq!(samples_to_pcm16(&samples), vec![0x01, 0x02, 0xff, 0x7f]);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_samples_to_wav_header() {
        let wav = samples_to_wav(&[0, 1000, -1000, 0], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 8);
    }
}
