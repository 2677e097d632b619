//! libopus sessions for the device link.
//!
//! Both directions run mono at 16 kHz. The decoder never requests forward
//! error correction; the encoder uses the "audio" application profile and
//! 60 ms frames.

use std::sync::Arc;

use bytes::Bytes;
use opus::{Application, Channels, Decoder, Encoder};

use super::{
    DecoderFactory, EncoderFactory, VoiceDecoder, VoiceEncoder, DEVICE_SAMPLE_RATE, FRAME_SAMPLES,
};
use crate::error::{LinkError, Result};

/// Largest packet libopus produces for one frame.
const MAX_PACKET_SIZE: usize = 4000;

/// 120 ms at 16 kHz, the longest duration a single packet may carry.
const MAX_DECODED_SAMPLES: usize = 1920;

fn codec_error(e: opus::Error) -> LinkError {
    LinkError::Codec(e.to_string())
}

/// Stateful Opus decoder (mono, 16 kHz, no FEC).
pub struct OpusVoiceDecoder {
    inner: Decoder,
    pcm: Vec<i16>,
}

impl OpusVoiceDecoder {
    pub fn new() -> Result<Self> {
        let inner = Decoder::new(DEVICE_SAMPLE_RATE, Channels::Mono).map_err(codec_error)?;
        Ok(Self {
            inner,
            pcm: vec![0; MAX_DECODED_SAMPLES],
        })
    }
}

impl VoiceDecoder for OpusVoiceDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        let samples = self
            .inner
            .decode(packet, &mut self.pcm, false)
            .map_err(codec_error)?;
        Ok(self.pcm[..samples].to_vec())
    }
}

/// Stateful Opus encoder (mono, 16 kHz, 60 ms frames, audio profile).
pub struct OpusVoiceEncoder {
    inner: Encoder,
    packet: Vec<u8>,
}

impl OpusVoiceEncoder {
    pub fn new() -> Result<Self> {
        let inner = Encoder::new(DEVICE_SAMPLE_RATE, Channels::Mono, Application::Audio)
            .map_err(codec_error)?;
        Ok(Self {
            inner,
            packet: vec![0; MAX_PACKET_SIZE],
        })
    }
}

impl VoiceEncoder for OpusVoiceEncoder {
    fn encode(&mut self, frame: &[i16]) -> Result<Bytes> {
        if frame.len() != FRAME_SAMPLES {
            return Err(LinkError::Codec(format!(
                "frame has {} samples, expected {}",
                frame.len(),
                FRAME_SAMPLES
            )));
        }
        let len = self
            .inner
            .encode(frame, &mut self.packet)
            .map_err(codec_error)?;
        Ok(Bytes::copy_from_slice(&self.packet[..len]))
    }
}

/// Factory producing [`OpusVoiceDecoder`] sessions.
pub fn opus_decoder_factory() -> DecoderFactory {
    Arc::new(|| Ok(Box::new(OpusVoiceDecoder::new()?) as Box<dyn VoiceDecoder>))
}

/// Factory producing [`OpusVoiceEncoder`] sessions.
pub fn opus_encoder_factory() -> EncoderFactory {
    Arc::new(|| Ok(Box::new(OpusVoiceEncoder::new()?) as Box<dyn VoiceEncoder>))
}
