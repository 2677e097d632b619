//! # wearlink
//!
//! Host-side link engine for a BLE voice wearable.
//!
//! The crate turns a GATT link into two logical channels:
//!
//! - **Audio**: Opus packets framed with a two-byte little-endian identifier,
//!   decoded and resampled to 24 kHz PCM inbound; PCM encoded, batched to the
//!   MTU and paced by a 20 ms drain loop outbound.
//! - **Files**: a control characteristic to list and request files, chunked
//!   file data reassembled by sequence number.
//!
//! A connection manager keeps one device bound and reconnects after link loss.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────── ConnectionManager ────────────┐
//!            │ scan / connect / bind / reconnect         │
//!            └──────────────┬────────────────────────────┘
//!                           │ LinkSlot (watch)
//!      ┌────────────────────┼───────────────────┬──────────────┐
//!      ▼                    ▼                   ▼              ▼
//! AudioTransport ──► PacketQueue ──► drain  FileTransport  DeviceControls
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use wearlink::Client;
//!
//! #[tokio::main]
//! async fn main() -> wearlink::Result<()> {
//!     let client = Client::builder().with_btle().await?.build()?;
//!     client.start().await?;
//!
//!     for entry in client.files().list_files(None).await {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod file;
pub mod flow;
pub mod protocol;
pub mod queue;
pub mod transport;

mod client;

#[cfg(test)]
mod test_support;

pub use client::{Client, ClientBuilder};
pub use config::LinkConfig;
pub use connection::ConnectionState;
pub use error::{LinkError, Result, TransferError};
pub use file::FileEntry;
