//! Telemetry and control characteristics.
//!
//! Every operation resolves failures to a sentinel (`None` / `false`) and
//! logs the cause; callers only see whether it worked.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::telemetry::{
    decode_device_name, encode_device_name, BatteryStatus, DeviceClock,
};
use crate::transport::{current_link, CharacteristicRole, Link, LinkSlot};

/// Battery, clock, haptic and name access on the current link.
#[derive(Clone)]
pub struct DeviceControls {
    links: LinkSlot,
}

impl DeviceControls {
    pub fn new(links: LinkSlot) -> Self {
        Self { links }
    }

    fn link_with(&self, role: CharacteristicRole) -> Option<Link> {
        let link = current_link(&self.links)?;
        if link.has(role) {
            Some(link)
        } else {
            tracing::debug!("Device has no {} characteristic", role);
            None
        }
    }

    async fn read(&self, role: CharacteristicRole) -> Option<bytes::Bytes> {
        let link = self.link_with(role)?;
        match link.read(role).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Reading {} failed: {}", role, e);
                None
            }
        }
    }

    async fn write(&self, role: CharacteristicRole, value: Vec<u8>) -> bool {
        let Some(link) = self.link_with(role) else {
            return false;
        };
        match link.write(role, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Writing {} failed: {}", role, e);
                false
            }
        }
    }

    pub async fn read_battery(&self) -> Option<BatteryStatus> {
        let raw = self.read(CharacteristicRole::Battery).await?;
        let status = BatteryStatus::parse(&raw);
        if status.is_none() {
            tracing::warn!("Malformed battery value ({} bytes)", raw.len());
        }
        status
    }

    pub async fn read_clock(&self) -> Option<DeviceClock> {
        let raw = self.read(CharacteristicRole::Clock).await?;
        let clock = DeviceClock::decode(&raw);
        if clock.is_none() {
            tracing::warn!("Malformed clock value ({} bytes)", raw.len());
        }
        clock
    }

    pub async fn set_clock(&self, clock: &DeviceClock) -> bool {
        self.write(CharacteristicRole::Clock, clock.encode()).await
    }

    /// Set the device clock to the host's current time.
    pub async fn sync_clock(&self, utc_offset_minutes: i32) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        match DeviceClock::from_unix(now, utc_offset_minutes) {
            Some(clock) => self.set_clock(&clock).await,
            None => {
                tracing::warn!("Host time {} is outside the device clock range", now);
                false
            }
        }
    }

    /// Play a haptic effect.
    pub async fn trigger_haptic(&self, effect: u8) -> bool {
        self.write(CharacteristicRole::Haptic, vec![effect]).await
    }

    pub async fn read_device_name(&self) -> Option<String> {
        let raw = self.read(CharacteristicRole::DeviceName).await?;
        Some(decode_device_name(&raw))
    }

    /// Rename the device; names longer than 19 bytes are truncated.
    pub async fn set_device_name(&self, name: &str) -> bool {
        self.write(CharacteristicRole::DeviceName, encode_device_name(name))
            .await
    }
}
