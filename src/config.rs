//! Link configuration.
//!
//! All timings are stored as integer milliseconds so that the configuration
//! round-trips through JSON without a duration format. Every field has a
//! default; a JSON document only needs the keys it overrides.
//!
//! ```
//! use wearlink::config::LinkConfig;
//!
//! let config = LinkConfig::from_json_str(r#"{ "queue": { "drain_period_ms": 10 } }"#).unwrap();
//! assert_eq!(config.queue.drain_period_ms, 10);
//! assert_eq!(config.queue.write_gap_ms, 5);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::transport::CharacteristicRole;

/// Default drain tick.
pub const DEFAULT_DRAIN_PERIOD_MS: u64 = 20;

/// Default delay between two radio writes within one drain pass.
pub const DEFAULT_WRITE_GAP_MS: u64 = 5;

/// Default wait between LIST_FILES and reading the response.
pub const DEFAULT_LIST_DELAY_MS: u64 = 100;

/// Default file-control poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default number of polls before a transfer is considered stalled (~30 s).
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 150;

/// Default pause before a failed connection attempt rescans.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Default capacity of the PCM and EOF broadcast channels.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// UUIDs of the well-known service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLayout {
    pub service: Uuid,
    pub audio_out: Uuid,
    pub audio_in: Uuid,
    pub battery: Uuid,
    pub clock: Uuid,
    pub haptic: Uuid,
    pub device_name: Uuid,
    pub file_out: Uuid,
    pub file_in: Uuid,
    pub file_control: Uuid,
}

impl ServiceLayout {
    /// UUID bound to `role`.
    pub fn uuid_for(&self, role: CharacteristicRole) -> Uuid {
        match role {
            CharacteristicRole::AudioOut => self.audio_out,
            CharacteristicRole::AudioIn => self.audio_in,
            CharacteristicRole::Battery => self.battery,
            CharacteristicRole::Clock => self.clock,
            CharacteristicRole::Haptic => self.haptic,
            CharacteristicRole::DeviceName => self.device_name,
            CharacteristicRole::FileOut => self.file_out,
            CharacteristicRole::FileIn => self.file_in,
            CharacteristicRole::FileControl => self.file_control,
        }
    }

    /// Role of a characteristic UUID, if it belongs to this layout.
    pub fn role_of(&self, uuid: Uuid) -> Option<CharacteristicRole> {
        CharacteristicRole::ALL
            .iter()
            .copied()
            .find(|role| self.uuid_for(*role) == uuid)
    }
}

impl Default for ServiceLayout {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x19b1_0000_e8f2_537e_4f6c_d104_768a_1214),
            audio_out: Uuid::from_u128(0x19b1_0001_e8f2_537e_4f6c_d104_768a_1214),
            audio_in: Uuid::from_u128(0x19b1_0002_e8f2_537e_4f6c_d104_768a_1214),
            battery: Uuid::from_u128(0x19b1_0003_e8f2_537e_4f6c_d104_768a_1214),
            clock: Uuid::from_u128(0x19b1_0004_e8f2_537e_4f6c_d104_768a_1214),
            haptic: Uuid::from_u128(0x19b1_0005_e8f2_537e_4f6c_d104_768a_1214),
            device_name: Uuid::from_u128(0x19b1_0006_e8f2_537e_4f6c_d104_768a_1214),
            file_out: Uuid::from_u128(0x19b1_0007_e8f2_537e_4f6c_d104_768a_1214),
            file_in: Uuid::from_u128(0x19b1_0008_e8f2_537e_4f6c_d104_768a_1214),
            file_control: Uuid::from_u128(0x19b1_0009_e8f2_537e_4f6c_d104_768a_1214),
        }
    }
}

/// Outbound packet queue timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub drain_period_ms: u64,
    pub write_gap_ms: u64,
    /// Promote the pending batch on a tick that finds the send queue empty.
    pub idle_flush: bool,
}

impl QueueConfig {
    #[inline]
    pub fn drain_period(&self) -> Duration {
        Duration::from_millis(self.drain_period_ms.max(1))
    }

    #[inline]
    pub fn write_gap(&self) -> Duration {
        Duration::from_millis(self.write_gap_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_period_ms: DEFAULT_DRAIN_PERIOD_MS,
            write_gap_ms: DEFAULT_WRITE_GAP_MS,
            idle_flush: true,
        }
    }
}

/// File-control timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub list_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl FileConfig {
    #[inline]
    pub fn list_delay(&self) -> Duration {
        Duration::from_millis(self.list_delay_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            list_delay_ms: DEFAULT_LIST_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Complete configuration of a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub service: ServiceLayout,
    pub queue: QueueConfig,
    pub file: FileConfig,
    pub reconnect_delay_ms: u64,
    /// Directory receiving pulled files and WAV artifacts.
    pub storage_dir: PathBuf,
    pub broadcast_capacity: usize,
}

impl LinkConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[inline]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service: ServiceLayout::default(),
            queue: QueueConfig::default(),
            file: FileConfig::default(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            storage_dir: std::env::temp_dir().join("wearlink"),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}
