//! Opcode-prefixed messages on the file-control characteristic.
//!
//! Requests are written, responses are read back from the same
//! characteristic (polling, not notification).
//!
//! ```text
//! LIST_FILES:       [0x03][path bytes][0x00]      (path optional)
//! START_SEND_FILE:  [0x01][path bytes][0x00]
//!
//! LIST_RESPONSE:    [0x02][count: u16 BE] { [nameLen: u8][name][size: u32 BE][isDir: u8] } * count
//! TRANSFER_COMPLETE [0x04]
//! TRANSFER_ERROR    [0x05]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{read_u16_be, read_u32_be};
use crate::file::FileEntry;

/// Opcodes understood by the device's file service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    StartSendFile = 0x01,
    ListResponse = 0x02,
    ListFiles = 0x03,
    TransferComplete = 0x04,
    TransferError = 0x05,
}

impl Opcode {
    /// Map a wire byte back to an opcode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::StartSendFile),
            0x02 => Some(Opcode::ListResponse),
            0x03 => Some(Opcode::ListFiles),
            0x04 => Some(Opcode::TransferComplete),
            0x05 => Some(Opcode::TransferError),
            _ => None,
        }
    }
}

/// State of a transfer as reported by a control read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Complete,
    Failed,
    /// Anything else, including an empty read.
    Pending,
}

impl ControlStatus {
    /// Interpret a control characteristic read during a transfer.
    pub fn from_response(response: &[u8]) -> Self {
        match response.first().copied().and_then(Opcode::from_byte) {
            Some(Opcode::TransferComplete) => ControlStatus::Complete,
            Some(Opcode::TransferError) => ControlStatus::Failed,
            _ => ControlStatus::Pending,
        }
    }
}

fn encode_with_path(opcode: Opcode, path: Option<&str>) -> Bytes {
    let path_len = path.map_or(0, |p| p.len() + 1);
    let mut buf = BytesMut::with_capacity(1 + path_len);
    buf.put_u8(opcode as u8);
    if let Some(path) = path {
        buf.put_slice(path.as_bytes());
        buf.put_u8(0);
    }
    buf.freeze()
}

/// Encode a LIST_FILES request. An empty path is sent as no path.
pub fn encode_list_files(path: Option<&str>) -> Bytes {
    encode_with_path(Opcode::ListFiles, path.filter(|p| !p.is_empty()))
}

/// Encode a START_SEND_FILE request for `path`.
pub fn encode_start_send_file(path: &str) -> Bytes {
    encode_with_path(Opcode::StartSendFile, Some(path))
}

/// Parse a LIST_RESPONSE.
///
/// Returns an empty list when the opcode is wrong or the header is short.
/// A truncated or malformed entry stops parsing; entries parsed before it
/// are returned.
pub fn parse_list_response(response: &[u8]) -> Vec<FileEntry> {
    if response.first().copied() != Some(Opcode::ListResponse as u8) {
        return Vec::new();
    }
    let Some(count) = read_u16_be(response, 1) else {
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(count as usize);
    let mut offset = 3;

    for _ in 0..count {
        let Some(&name_len) = response.get(offset) else {
            break;
        };
        let name_start = offset + 1;
        let name_end = name_start + name_len as usize;
        let Some(name_bytes) = response.get(name_start..name_end) else {
            break;
        };
        let Ok(name) = std::str::from_utf8(name_bytes) else {
            break;
        };
        let Some(size) = read_u32_be(response, name_end) else {
            break;
        };
        let Some(&is_directory) = response.get(name_end + 4) else {
            break;
        };

        entries.push(FileEntry::listed(name, size as u64, is_directory != 0));
        offset = name_end + 5;
    }

    entries
}

/// Encode a LIST_RESPONSE. Used by the in-memory radio and tests.
pub fn encode_list_response(entries: &[FileEntry]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(Opcode::ListResponse as u8);
    buf.put_u16(entries.len() as u16);
    for entry in entries {
        let name = entry.name.as_bytes();
        let name = &name[..name.len().min(u8::MAX as usize)];
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf.put_u32(entry.size as u32);
        buf.put_u8(u8::from(entry.is_directory));
    }
    buf.freeze()
}
