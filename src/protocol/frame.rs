//! Frame type and encoders for the audio characteristics.
//!
//! # Example
//!
//! ```
//! use wearlink::protocol::{encode_audio_frame, decode_notification, Frame};
//!
//! let bytes = encode_audio_frame(&[0xAA, 0xBB, 0xCC]);
//! assert_eq!(&bytes[..], &[0x01, 0x00, 0x03, 0x00, 0xAA, 0xBB, 0xCC]);
//!
//! let frames = decode_notification(&bytes);
//! assert_eq!(frames, vec![Frame::Audio(bytes.slice(4..))]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    AUDIO_HEADER_SIZE, AUDIO_ID, CHUNK_HEADER_SIZE, EOF_ID, MAX_AUDIO_PAYLOAD, PAUSE_ID,
    RESUME_ID,
};

/// One identifier-tagged unit of the audio wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opus packet.
    Audio(Bytes),
    /// Device asks the host to stop sending.
    Pause,
    /// Device allows the host to send again.
    Resume,
    /// End of utterance.
    Eof,
}

impl Frame {
    /// Wire identifier of this frame.
    pub fn identifier(&self) -> u16 {
        match self {
            Frame::Audio(_) => AUDIO_ID,
            Frame::Pause => PAUSE_ID,
            Frame::Resume => RESUME_ID,
            Frame::Eof => EOF_ID,
        }
    }

    /// Encode this frame for the wire.
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Audio(payload) => encode_audio_frame(payload),
            Frame::Pause => encode_control_frame(ControlKind::Pause),
            Frame::Resume => encode_control_frame(ControlKind::Resume),
            Frame::Eof => encode_control_frame(ControlKind::Eof),
        }
    }
}

/// Payload-less frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Pause,
    Resume,
    Eof,
}

impl ControlKind {
    /// Wire identifier of this control frame.
    #[inline]
    pub fn identifier(self) -> u16 {
        match self {
            ControlKind::Pause => PAUSE_ID,
            ControlKind::Resume => RESUME_ID,
            ControlKind::Eof => EOF_ID,
        }
    }

    /// Map an identifier back to a control kind.
    #[inline]
    pub fn from_identifier(id: u16) -> Option<Self> {
        match id {
            PAUSE_ID => Some(ControlKind::Pause),
            RESUME_ID => Some(ControlKind::Resume),
            EOF_ID => Some(ControlKind::Eof),
            _ => None,
        }
    }
}

/// Encode an Opus packet as `[0x0001 LE][len LE][payload]`.
///
/// Packets longer than `u16::MAX` cannot be described by the length field
/// and are truncated; Opus packets are bounded well below that.
pub fn encode_audio_frame(payload: &[u8]) -> Bytes {
    let len = payload.len().min(MAX_AUDIO_PAYLOAD);
    let mut buf = BytesMut::with_capacity(AUDIO_HEADER_SIZE + len);
    buf.put_u16_le(AUDIO_ID);
    buf.put_u16_le(len as u16);
    buf.put_slice(&payload[..len]);
    buf.freeze()
}

/// Encode a PAUSE, RESUME or EOF frame (two bytes, no payload).
pub fn encode_control_frame(kind: ControlKind) -> Bytes {
    Bytes::copy_from_slice(&kind.identifier().to_le_bytes())
}

/// Encode the sequence header that prefixes a file chunk.
#[inline]
pub fn encode_file_chunk_header(sequence: u16) -> [u8; CHUNK_HEADER_SIZE] {
    sequence.to_le_bytes()
}

/// A sequence-numbered chunk received on the file-data characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub sequence: u16,
    pub data: Bytes,
}

impl FileChunk {
    /// Decode `[sequence:u16 LE][data]`.
    ///
    /// Returns `None` for notifications shorter than the header. A header
    /// with no data is a valid (empty) chunk.
    pub fn decode(notification: &Bytes) -> Option<Self> {
        if notification.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        let sequence = u16::from_le_bytes([notification[0], notification[1]]);
        Some(Self {
            sequence,
            data: notification.slice(CHUNK_HEADER_SIZE..),
        })
    }

    /// Encode back to the notification layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + self.data.len());
        buf.put_slice(&encode_file_chunk_header(self.sequence));
        buf.put_slice(&self.data);
        buf.freeze()
    }
}
