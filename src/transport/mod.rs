//! Transport module - the radio abstraction.
//!
//! Everything above this module talks to the wearable through the [`Radio`]
//! trait and the [`Link`] handle the connection manager publishes once the
//! service has been discovered and its characteristics bound.
//!
//! Provides:
//! - [`btle`] (feature `btle`) - a `Radio` over the platform BLE stack via btleplug
//! - [`memory`] - a scripted in-memory `Radio` for tests and simulations
//!
//! Characteristic roles, named from the device's point of view:
//!
//! ```text
//! role          direction                payload
//! audio-out     notify                   Frame-encoded
//! audio-in      write without response   Frame-encoded
//! battery       read                     [voltageHi][voltageLo][percent][charging]
//! clock         read / write             7 or 9 bytes
//! haptic        write                    [effect id]
//! device-name   read / write             UTF-8, <= 19 bytes
//! file-out      notify                   [seq: u16 LE][data]
//! file-in       write without response   raw bytes
//! file-control  read / write             opcode-prefixed
//! ```

#[cfg(feature = "btle")]
pub mod btle;
mod link;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::Result;

pub use link::{current_link, Link, LinkSlot};

/// Opaque identifier of a remote device, stable for the lifetime of the radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The nine characteristics of the wearable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicRole {
    AudioOut,
    AudioIn,
    Battery,
    Clock,
    Haptic,
    DeviceName,
    FileOut,
    FileIn,
    FileControl,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 9] = [
        CharacteristicRole::AudioOut,
        CharacteristicRole::AudioIn,
        CharacteristicRole::Battery,
        CharacteristicRole::Clock,
        CharacteristicRole::Haptic,
        CharacteristicRole::DeviceName,
        CharacteristicRole::FileOut,
        CharacteristicRole::FileIn,
        CharacteristicRole::FileControl,
    ];

    /// Roles without which a connection attempt is abandoned.
    pub const MANDATORY: [CharacteristicRole; 2] =
        [CharacteristicRole::AudioIn, CharacteristicRole::AudioOut];

    pub fn name(&self) -> &'static str {
        match self {
            CharacteristicRole::AudioOut => "audio-out",
            CharacteristicRole::AudioIn => "audio-in",
            CharacteristicRole::Battery => "battery",
            CharacteristicRole::Clock => "clock",
            CharacteristicRole::Haptic => "haptic",
            CharacteristicRole::DeviceName => "device-name",
            CharacteristicRole::FileOut => "file-out",
            CharacteristicRole::FileIn => "file-in",
            CharacteristicRole::FileControl => "file-control",
        }
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a write waits for the remote acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// A discovered GATT service and the UUIDs of its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Asynchronous notifications from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A device advertising the scanned service was seen.
    Discovered(DeviceId),
    /// The link to a device dropped.
    Disconnected(DeviceId),
    /// The OS handed back a connection it kept alive on our behalf.
    Restored(DeviceId),
    /// The negotiated ATT MTU changed.
    MtuChanged(DeviceId, u16),
}

/// Central-role radio operations needed by the link engine.
///
/// All operations are addressed by [`DeviceId`] and characteristic UUID;
/// binding UUIDs to roles is the connection manager's job.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Devices the OS already holds a connection to that expose `service`.
    async fn connected_devices(&self, service: Uuid) -> Result<Vec<DeviceId>>;

    /// Start scanning for advertisements of `service`.
    ///
    /// Hits are reported as [`RadioEvent::Discovered`].
    async fn start_scan(&self, service: Uuid) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, device: &DeviceId) -> Result<()>;

    async fn disconnect(&self, device: &DeviceId) -> Result<()>;

    async fn discover_services(&self, device: &DeviceId) -> Result<Vec<GattService>>;

    async fn read(&self, device: &DeviceId, characteristic: Uuid) -> Result<Bytes>;

    async fn write(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<()>;

    /// Enable notifications; the receiver ends when the link drops.
    async fn subscribe(&self, device: &DeviceId, characteristic: Uuid)
        -> Result<mpsc::Receiver<Bytes>>;

    /// Current negotiated ATT MTU, when the stack exposes it.
    async fn mtu(&self, device: &DeviceId) -> Option<u16>;

    /// Subscribe to radio events. Every call returns an independent receiver.
    fn events(&self) -> broadcast::Receiver<RadioEvent>;
}
