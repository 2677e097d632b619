//! File module - pulling files off the device.
//!
//! - [`FileTransport`] - LIST_FILES / START_SEND_FILE over the file-control
//!   characteristic and chunk collection from file-out
//! - [`TransferSession`] - the sequence map of the single open transfer
//! - [`FileStore`] - local persistence of pulled files and WAV artifacts

mod session;
mod store;
mod transport;

use std::path::PathBuf;

pub use session::TransferSession;
pub use store::FileStore;
pub use transport::FileTransport;

/// A file on the device, or a pulled copy of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    /// Set once the file has been persisted locally.
    pub local_path: Option<PathBuf>,
}

impl FileEntry {
    /// An entry from a directory listing.
    pub fn listed(name: impl Into<String>, size: u64, is_directory: bool) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory,
            local_path: None,
        }
    }

    /// A file pulled and written to `path`.
    pub fn persisted(name: impl Into<String>, size: u64, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
            local_path: Some(path),
        }
    }
}
