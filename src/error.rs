//! Error types for wearlink.

use thiserror::Error;
use uuid::Uuid;

use crate::transport::CharacteristicRole;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error while persisting artifacts or loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transient radio failure (scan, connect, read or write).
    #[error("Radio error: {0}")]
    Radio(String),

    /// No link is currently bound.
    #[error("Not connected")]
    NotConnected,

    /// The well-known service was not advertised by the device.
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    /// A characteristic required for the operation is not bound.
    #[error("Characteristic {0} not bound")]
    MissingCharacteristic(CharacteristicRole),

    /// Audio codec failure.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Malformed data received from the device.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// File transfer failure.
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// The component has been disposed.
    #[error("Disposed")]
    Disposed,
}

/// Failure of a single file pull.
///
/// No partial file is ever written when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Another transfer session is already open on this link.
    #[error("a file transfer is already in progress")]
    AlreadyActive,

    /// The device answered with TRANSFER_ERROR.
    #[error("device reported a transfer error")]
    DeviceReported,

    /// Polling gave up without completion and without any chunk.
    #[error("transfer timed out without receiving data")]
    TimedOut,

    /// Reassembly found a hole in the sequence numbers.
    #[error("missing chunk with sequence {sequence}")]
    MissingChunk {
        /// First sequence number absent from the session.
        sequence: u16,
    },

    /// Reassembly was attempted with no chunks at all.
    #[error("no chunks received")]
    Empty,

    /// The control request could not be written.
    #[error("request failed: {0}")]
    Request(String),

    /// The reassembled file could not be written to local storage.
    #[error("failed to persist file: {0}")]
    Persist(String),
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
