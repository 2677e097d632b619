//! Wire format constants for the audio and file characteristics.
//!
//! Audio notifications carry zero or more concatenated frames:
//! ```text
//! AUDIO:   ┌──────────┬──────────┬─────────────────┐
//!          │ 0x0001   │ Length   │ Opus packet     │
//!          │ u16 LE   │ u16 LE   │ Length bytes    │
//!          └──────────┴──────────┴─────────────────┘
//! PAUSE:   ┌──────────┐
//! RESUME:  │ 0xFFFE / 0xFFFD / 0xFFFC             (no payload)
//! EOF:     └──────────┘
//! ```
//!
//! File-data notifications are a single chunk:
//! ```text
//! ┌──────────┬───────────────┐
//! │ Sequence │ Chunk bytes   │
//! │ u16 LE   │ rest of value │
//! └──────────┴───────────────┘
//! ```
//!
//! All audio/file-data integers are Little Endian. The file-control
//! characteristic uses Big Endian (see [`super::file_control`]).

/// Identifier of an audio frame carrying a length-prefixed Opus packet.
pub const AUDIO_ID: u16 = 0x0001;

/// Identifier of the flow-control PAUSE frame (device → host).
pub const PAUSE_ID: u16 = 0xFFFE;

/// Identifier of the flow-control RESUME frame (device → host).
pub const RESUME_ID: u16 = 0xFFFD;

/// Identifier of the end-of-utterance frame (both directions).
pub const EOF_ID: u16 = 0xFFFC;

/// Size of a frame identifier.
pub const IDENTIFIER_SIZE: usize = 2;

/// Size of the AUDIO length field.
pub const LENGTH_SIZE: usize = 2;

/// Size of the AUDIO frame header (identifier + length).
pub const AUDIO_HEADER_SIZE: usize = IDENTIFIER_SIZE + LENGTH_SIZE;

/// Size of the file chunk sequence header.
pub const CHUNK_HEADER_SIZE: usize = 2;

/// Largest Opus packet an AUDIO frame can describe.
pub const MAX_AUDIO_PAYLOAD: usize = u16::MAX as usize;

/// Read a little-endian u16 at `offset`.
///
/// Returns `None` if fewer than two bytes remain.
#[inline]
pub fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u16 at `offset`.
#[inline]
pub fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32 at `offset`.
#[inline]
pub fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
