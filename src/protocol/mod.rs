//! Protocol module - wire formats of every characteristic.
//!
//! This module implements the binary protocol spoken with the device:
//! - Audio frames (AUDIO / PAUSE / RESUME / EOF) and the notification decoder
//! - Sequence-numbered file chunks
//! - File-control opcodes and the directory listing format
//! - Telemetry values (battery, clock, device name)

mod decoder;
mod frame;
pub mod file_control;
pub mod telemetry;
mod wire_format;

pub use decoder::{
    decode_notification, decode_notification_with_stats, DecodeStats, NotificationDecoder,
};
pub use frame::{
    encode_audio_frame, encode_control_frame, encode_file_chunk_header, ControlKind, FileChunk,
    Frame,
};
pub use wire_format::{
    AUDIO_HEADER_SIZE, AUDIO_ID, CHUNK_HEADER_SIZE, EOF_ID, IDENTIFIER_SIZE, PAUSE_ID, RESUME_ID,
};
