//! Codec module - the lossy audio transform chain.
//!
//! Two independent directions, each owning its own codec session:
//!
//! ```text
//! inbound:  Opus packet ─► VoiceDecoder (16 kHz) ─► upsample ─► PCM @ 24 kHz
//! outbound: PCM @ 24 kHz ─► downsample ─► 60 ms frames ─► VoiceEncoder ─► Opus packet
//! ```
//!
//! - [`resample`] - deterministic linear-interpolation rate conversion
//! - [`wav`] - WAV container framing for persisted artifacts
//! - [`InboundPipeline`] / [`OutboundPipeline`] - the two chains
//! - [`OpusVoiceDecoder`] / [`OpusVoiceEncoder`] (feature `opus`) - libopus sessions
//!
//! # Example
//!
//! ```
//! use wearlink::codec::upsample_16k_to_24k;
//!
//! assert_eq!(upsample_16k_to_24k(&[0, 1000]), vec![0, 667, 1000]);
//! ```

#[cfg(feature = "opus")]
mod libopus;
mod pipeline;
mod resample;
pub mod wav;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

#[cfg(feature = "opus")]
pub use libopus::{opus_decoder_factory, opus_encoder_factory, OpusVoiceDecoder, OpusVoiceEncoder};
pub use pipeline::{InboundPipeline, OutboundPipeline};
pub use resample::{downsample_24k_to_16k, resample, upsample_16k_to_24k};
pub use wav::{encode_wav, wav_header, WavSpec};

/// Sample rate spoken by the device (Opus on the radio link).
pub const DEVICE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate expected by upstream consumers.
pub const UPSTREAM_SAMPLE_RATE: u32 = 24_000;

/// Duration of one outbound Opus frame.
pub const FRAME_DURATION_MS: u32 = 60;

/// Samples per outbound frame at the device rate (16 kHz * 60 ms).
pub const FRAME_SAMPLES: usize = (DEVICE_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

/// Decodes one packet into device-rate PCM.
///
/// Implementations are stateful; one instance serves one link session.
pub trait VoiceDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>>;
}

/// Encodes exactly [`FRAME_SAMPLES`] device-rate samples into one packet.
pub trait VoiceEncoder: Send {
    fn encode(&mut self, frame: &[i16]) -> Result<Bytes>;
}

/// Creates a fresh decoder session per attached link.
pub type DecoderFactory = Arc<dyn Fn() -> Result<Box<dyn VoiceDecoder>> + Send + Sync>;

/// Creates a fresh encoder session per outbound stream.
pub type EncoderFactory = Arc<dyn Fn() -> Result<Box<dyn VoiceEncoder>> + Send + Sync>;
