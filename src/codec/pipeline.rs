//! Inbound and outbound transform chains.
//!
//! A codec failure on one packet or frame is logged and skipped; it never
//! poisons the pipeline for the packets that follow.

use bytes::Bytes;

use super::resample::{downsample_24k_to_16k, upsample_16k_to_24k};
use super::{VoiceDecoder, VoiceEncoder, FRAME_SAMPLES};

/// Opus packet → PCM16 @ 16 kHz → PCM16 @ 24 kHz.
pub struct InboundPipeline {
    decoder: Box<dyn VoiceDecoder>,
    failures: u64,
}

impl InboundPipeline {
    pub fn new(decoder: Box<dyn VoiceDecoder>) -> Self {
        Self {
            decoder,
            failures: 0,
        }
    }

    /// Decode and upsample one packet.
    ///
    /// Returns `None` when the packet fails to decode or decodes to nothing.
    pub fn push_packet(&mut self, packet: &[u8]) -> Option<Vec<i16>> {
        match self.decoder.decode(packet) {
            Ok(pcm) if pcm.is_empty() => None,
            Ok(pcm) => Some(upsample_16k_to_24k(&pcm)),
            Err(e) => {
                self.failures += 1;
                tracing::warn!("Dropping undecodable packet ({} bytes): {}", packet.len(), e);
                None
            }
        }
    }

    /// Number of packets that failed to decode.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// PCM16 @ 24 kHz → PCM16 @ 16 kHz → 60 ms frames → Opus packets.
///
/// Samples that do not fill a frame are carried over to the next call;
/// [`finish`](Self::finish) zero-pads and encodes the remainder.
pub struct OutboundPipeline {
    encoder: Box<dyn VoiceEncoder>,
    pending: Vec<i16>,
    failures: u64,
}

impl OutboundPipeline {
    pub fn new(encoder: Box<dyn VoiceEncoder>) -> Self {
        Self {
            encoder,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            failures: 0,
        }
    }

    /// Feed one chunk of 24 kHz PCM; returns the packets for every frame
    /// completed by it.
    pub fn push_pcm24(&mut self, chunk: &[i16]) -> Vec<Bytes> {
        self.pending.extend(downsample_24k_to_16k(chunk));

        let mut packets = Vec::with_capacity(self.pending.len() / FRAME_SAMPLES);
        let mut consumed = 0;
        while self.pending.len() - consumed >= FRAME_SAMPLES {
            let frame = &self.pending[consumed..consumed + FRAME_SAMPLES];
            consumed += FRAME_SAMPLES;
            if let Some(packet) = Self::encode_frame(&mut self.encoder, &mut self.failures, frame) {
                packets.push(packet);
            }
        }
        self.pending.drain(..consumed);
        packets
    }

    /// Zero-pad and encode the trailing partial frame, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(FRAME_SAMPLES, 0);
        let frame = std::mem::take(&mut self.pending);
        Self::encode_frame(&mut self.encoder, &mut self.failures, &frame)
    }

    /// Samples waiting for a full frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Number of frames that failed to encode.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn encode_frame(
        encoder: &mut Box<dyn VoiceEncoder>,
        failures: &mut u64,
        frame: &[i16],
    ) -> Option<Bytes> {
        match encoder.encode(frame) {
            Ok(packet) => Some(packet),
            Err(e) => {
                *failures += 1;
                tracing::warn!("Dropping frame that failed to encode: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RawPcmDecoder, SummaryEncoder};

    #[test]
    fn test_inbound_upsamples_decoded_pcm() {
        let mut pipeline = InboundPipeline::new(Box::new(RawPcmDecoder));
        let packet = [0x00, 0x00, 0xE8, 0x03]; // [0, 1000]
        assert_eq!(pipeline.push_packet(&packet), Some(vec![0, 667, 1000]));
    }

    #[test]
    fn test_inbound_failure_does_not_block_next_packet() {
        let mut pipeline = InboundPipeline::new(Box::new(RawPcmDecoder));
        assert_eq!(pipeline.push_packet(&[0x01]), None);
        assert_eq!(pipeline.failures(), 1);
        assert!(pipeline.push_packet(&[0x01, 0x00]).is_some());
    }

    #[test]
    fn test_inbound_empty_decode_yields_nothing() {
        let mut pipeline = InboundPipeline::new(Box::new(RawPcmDecoder));
        assert_eq!(pipeline.push_packet(&[]), None);
        assert_eq!(pipeline.failures(), 0);
    }

    #[test]
    fn test_outbound_frames_and_carry_over() {
        let mut pipeline = OutboundPipeline::new(Box::new(SummaryEncoder));

        // 1440 samples at 24 kHz = 960 at 16 kHz = exactly one frame.
        let packets = pipeline.push_pcm24(&[7; 1440]);
        assert_eq!(packets.len(), 1);
        assert_eq!(pipeline.pending_samples(), 0);

        // Half a frame is held back.
        assert!(pipeline.push_pcm24(&[5; 720]).is_empty());
        assert_eq!(pipeline.pending_samples(), 480);

        // The rest completes it.
        let packets = pipeline.push_pcm24(&[5; 720]);
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..2], &5i16.to_le_bytes());
    }

    #[test]
    fn test_outbound_finish_pads_partial_frame() {
        let mut pipeline = OutboundPipeline::new(Box::new(SummaryEncoder));
        assert!(pipeline.push_pcm24(&[3; 300]).is_empty());

        let packet = pipeline.finish().unwrap();
        assert_eq!(&packet[..], &[3, 0, 0xC0, 0x03]); // first sample 3, length 960
        assert_eq!(pipeline.pending_samples(), 0);
        assert!(pipeline.finish().is_none());
    }

    #[test]
    fn test_outbound_encode_failure_skips_frame() {
        let mut pipeline = OutboundPipeline::new(Box::new(SummaryEncoder));
        let mut chunk = vec![i16::MIN; 1440];
        chunk.extend(vec![9; 1440]);

        let packets = pipeline.push_pcm24(&chunk);
        assert_eq!(packets.len(), 1);
        assert_eq!(pipeline.failures(), 1);
    }
}
