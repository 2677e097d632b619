//! Stand-in voice codecs for unit tests.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{DecoderFactory, EncoderFactory, VoiceDecoder, VoiceEncoder};
use crate::error::{LinkError, Result};

/// Reads little-endian i16 samples straight out of the packet; rejects
/// odd-length packets.
pub(crate) struct RawPcmDecoder;

impl VoiceDecoder for RawPcmDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        if packet.len() % 2 != 0 {
            return Err(LinkError::Codec("odd length".into()));
        }
        Ok(packet
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// Emits `[first sample LE][frame length LE]`; fails on a frame starting
/// with `i16::MIN`.
pub(crate) struct SummaryEncoder;

impl VoiceEncoder for SummaryEncoder {
    fn encode(&mut self, frame: &[i16]) -> Result<Bytes> {
        let first = frame.first().copied().unwrap_or_default();
        if first == i16::MIN {
            return Err(LinkError::Codec("marker".into()));
        }
        let mut out = first.to_le_bytes().to_vec();
        out.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        Ok(Bytes::from(out))
    }
}

pub(crate) fn fake_decoder_factory() -> DecoderFactory {
    Arc::new(|| Ok(Box::new(RawPcmDecoder) as Box<dyn VoiceDecoder>))
}

pub(crate) fn fake_encoder_factory() -> EncoderFactory {
    Arc::new(|| Ok(Box::new(SummaryEncoder) as Box<dyn VoiceEncoder>))
}
