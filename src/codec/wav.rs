//! WAV container framing for raw PCM.
//!
//! Canonical 44-byte header:
//! ```text
//! "RIFF" <riff size: u32> "WAVE"
//! "fmt " <16: u32> <format 1: u16> <channels: u16> <rate: u32>
//!        <byte rate: u32> <block align: u16> <bits: u16>
//! "data" <data size: u32> <samples...>
//! ```
//! All integers are Little Endian. Every size and rate field is derived from
//! [`WavSpec`] and the data length.

use bytes::{BufMut, BytesMut};

use super::{DEVICE_SAMPLE_RATE, UPSTREAM_SAMPLE_RATE};

/// Size of the canonical header.
pub const WAV_HEADER_SIZE: usize = 44;

const PCM_FORMAT: u16 = 1;
const FMT_CHUNK_SIZE: u32 = 16;

/// PCM parameters of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// Mono 16-bit at the device rate (16 kHz).
    pub const fn device() -> Self {
        Self {
            sample_rate: DEVICE_SAMPLE_RATE,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Mono 16-bit at the upstream rate (24 kHz).
    pub const fn upstream() -> Self {
        Self {
            sample_rate: UPSTREAM_SAMPLE_RATE,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Bytes per sample frame (all channels).
    #[inline]
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Bytes per second of audio.
    #[inline]
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }
}

/// Build the 44-byte header for `data_len` bytes of PCM.
pub fn wav_header(spec: &WavSpec, data_len: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut buf = BytesMut::with_capacity(WAV_HEADER_SIZE);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(data_len.saturating_add(WAV_HEADER_SIZE as u32 - 8));
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(FMT_CHUNK_SIZE);
    buf.put_u16_le(PCM_FORMAT);
    buf.put_u16_le(spec.channels);
    buf.put_u32_le(spec.sample_rate);
    buf.put_u32_le(spec.byte_rate());
    buf.put_u16_le(spec.block_align());
    buf.put_u16_le(spec.bits_per_sample);
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);

    let mut header = [0u8; WAV_HEADER_SIZE];
    header.copy_from_slice(&buf);
    header
}

/// Encode 16-bit samples as a complete WAV file.
pub fn encode_wav(spec: &WavSpec, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(WAV_HEADER_SIZE + samples.len() * 2);
    out.extend_from_slice(&wav_header(spec, data_len));
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(buf: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_header_fields_device_spec() {
        let header = wav_header(&WavSpec::device(), 3200);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, 4), 3200 + 36);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 1);
        assert_eq!(u32_at(&header, 24), 16_000);
        assert_eq!(u32_at(&header, 28), 32_000);
        assert_eq!(u16_at(&header, 32), 2);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, 40), 3200);
    }

    #[test]
    fn test_header_fields_are_derived() {
        let spec = WavSpec {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
        };
        let header = wav_header(&spec, 0);
        assert_eq!(u32_at(&header, 28), 192_000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u32_at(&header, 4), 36);
    }

    #[test]
    fn test_encode_wav() {
        let wav = encode_wav(&WavSpec::upstream(), &[1, -1, 0x1234]);
        assert_eq!(wav.len(), WAV_HEADER_SIZE + 6);
        assert_eq!(u32_at(&wav, 24), 24_000);
        assert_eq!(u32_at(&wav, 40), 6);
        assert_eq!(&wav[44..], &[0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]);
    }
}
