//! Notification decoder for the audio characteristic.
//!
//! A radio notification carries zero or more concatenated frames. Frames
//! never span two notifications, so the decoder keeps no state between
//! calls: whatever cannot be decoded at the end of a notification is
//! dropped.
//!
//! Recovery rules:
//! - Unknown identifier: skip two bytes and continue, so a single corrupted
//!   frame does not desynchronise the rest of the notification.
//! - AUDIO frame whose declared length exceeds the remaining bytes: stop and
//!   return the frames decoded so far.
//! - A trailing single byte is ignored.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use wearlink::protocol::{decode_notification, Frame};
//!
//! let frames = decode_notification(&Bytes::from_static(&[0xFE, 0xFF, 0xFC, 0xFF]));
//! assert_eq!(frames, vec![Frame::Pause, Frame::Eof]);
//! ```

use bytes::Bytes;

use super::frame::{ControlKind, Frame};
use super::wire_format::{read_u16_le, AUDIO_HEADER_SIZE, AUDIO_ID, IDENTIFIER_SIZE};

/// Counters describing what the decoder had to discard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Number of unknown identifiers skipped.
    pub skipped_identifiers: usize,
    /// Whether decoding stopped on a truncated AUDIO frame.
    pub truncated: bool,
}

impl DecodeStats {
    /// True when nothing had to be discarded.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.skipped_identifiers == 0 && !self.truncated
    }
}

/// Iterator over the frames of one notification.
pub struct NotificationDecoder<'a> {
    data: &'a Bytes,
    offset: usize,
    stats: DecodeStats,
    done: bool,
}

impl<'a> NotificationDecoder<'a> {
    /// Start decoding a notification.
    pub fn new(data: &'a Bytes) -> Self {
        Self {
            data,
            offset: 0,
            stats: DecodeStats::default(),
            done: false,
        }
    }

    /// Discard counters accumulated so far.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

impl Iterator for NotificationDecoder<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while !self.done {
            let Some(id) = read_u16_le(self.data, self.offset) else {
                self.done = true;
                return None;
            };

            if let Some(kind) = ControlKind::from_identifier(id) {
                self.offset += IDENTIFIER_SIZE;
                return Some(match kind {
                    ControlKind::Pause => Frame::Pause,
                    ControlKind::Resume => Frame::Resume,
                    ControlKind::Eof => Frame::Eof,
                });
            }

            if id == AUDIO_ID {
                let Some(len) = read_u16_le(self.data, self.offset + IDENTIFIER_SIZE) else {
                    self.stats.truncated = true;
                    self.done = true;
                    return None;
                };
                let start = self.offset + AUDIO_HEADER_SIZE;
                let end = start + len as usize;
                if end > self.data.len() {
                    self.stats.truncated = true;
                    self.done = true;
                    return None;
                }
                self.offset = end;
                return Some(Frame::Audio(self.data.slice(start..end)));
            }

            // Unknown identifier: resynchronise on the next pair of bytes.
            self.stats.skipped_identifiers += 1;
            self.offset += IDENTIFIER_SIZE;
        }
        None
    }
}

/// Decode every frame of a notification.
pub fn decode_notification(data: &Bytes) -> Vec<Frame> {
    decode_notification_with_stats(data).0
}

/// Decode every frame of a notification and report what was discarded.
pub fn decode_notification_with_stats(data: &Bytes) -> (Vec<Frame>, DecodeStats) {
    let mut decoder = NotificationDecoder::new(data);
    let frames: Vec<Frame> = decoder.by_ref().collect();
    (frames, decoder.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_audio_frame;

    fn decode(raw: &'static [u8]) -> Vec<Frame> {
        decode_notification(&Bytes::from_static(raw))
    }

    #[test]
    fn test_single_audio_frame() {
        let frames = decode(&[0x01, 0x00, 0x03, 0x00, 0xAA, 0xBB, 0xCC]);
        assert_eq!(frames, vec![Frame::Audio(Bytes::from_static(&[0xAA, 0xBB, 0xCC]))]);
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(decode(&[0xFE, 0xFF]), vec![Frame::Pause]);
        assert_eq!(decode(&[0xFD, 0xFF]), vec![Frame::Resume]);
        assert_eq!(decode(&[0xFC, 0xFF]), vec![Frame::Eof]);
    }

    #[test]
    fn test_empty_notification() {
        assert!(decode(&[]).is_empty());
        assert!(decode(&[0x01]).is_empty());
    }

    #[test]
    fn test_concatenated_frames() {
        let mut raw = encode_audio_frame(b"one").to_vec();
        raw.extend_from_slice(&[0xFE, 0xFF]);
        raw.extend_from_slice(&encode_audio_frame(b"two"));
        raw.extend_from_slice(&[0xFC, 0xFF]);

        let frames = decode_notification(&Bytes::from(raw));
        assert_eq!(
            frames,
            vec![
                Frame::Audio(Bytes::from_static(b"one")),
                Frame::Pause,
                Frame::Audio(Bytes::from_static(b"two")),
                Frame::Eof,
            ]
        );
    }

    #[test]
    fn test_truncated_audio_keeps_earlier_frames() {
        // PAUSE, then an AUDIO frame declaring 5 bytes but carrying 2.
        let (frames, stats) = decode_notification_with_stats(&Bytes::from_static(&[
            0xFE, 0xFF, 0x01, 0x00, 0x05, 0x00, 0x11, 0x22,
        ]));
        assert_eq!(frames, vec![Frame::Pause]);
        assert!(stats.truncated);
    }

    #[test]
    fn test_audio_missing_length_field() {
        let (frames, stats) =
            decode_notification_with_stats(&Bytes::from_static(&[0x01, 0x00, 0x05]));
        assert!(frames.is_empty());
        assert!(stats.truncated);
    }

    #[test]
    fn test_unknown_identifier_is_skipped() {
        let (frames, stats) = decode_notification_with_stats(&Bytes::from_static(&[
            0x34, 0x12, 0xFC, 0xFF,
        ]));
        assert_eq!(frames, vec![Frame::Eof]);
        assert_eq!(stats.skipped_identifiers, 1);
    }

    #[test]
    fn test_zero_length_audio_frame() {
        let frames = decode(&[0x01, 0x00, 0x00, 0x00, 0xFD, 0xFF]);
        assert_eq!(frames, vec![Frame::Audio(Bytes::new()), Frame::Resume]);
    }

    #[test]
    fn test_audio_payload_is_zero_copy() {
        let raw = Bytes::from_static(&[0x01, 0x00, 0x02, 0x00, 0x10, 0x20]);
        let frames = decode_notification(&raw);
        match &frames[0] {
            Frame::Audio(payload) => assert_eq!(payload.as_ptr(), raw[4..].as_ptr()),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_clean_stats() {
        let (_, stats) = decode_notification_with_stats(&Bytes::from_static(&[0xFC, 0xFF]));
        assert!(stats.is_clean());
    }
}
