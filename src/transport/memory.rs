//! Scripted in-memory radio.
//!
//! [`MemoryRadio`] behaves like a single-adapter BLE central talking to
//! devices that all expose the same service. Tests script it from the
//! outside: advertise devices, queue read responses, push notifications,
//! drop links, and inspect every write that reached the "air".
//!
//! ```
//! use wearlink::config::ServiceLayout;
//! use wearlink::transport::memory::MemoryRadio;
//! use wearlink::transport::DeviceId;
//!
//! let layout = ServiceLayout::default();
//! let radio = MemoryRadio::new(&layout);
//! radio.advertise(DeviceId::new("pendant"));
//! radio.push_read(layout.battery, vec![0x0F, 0xA0, 80, 0]);
//! assert_eq!(radio.scan_starts(), 0);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use super::{DeviceId, GattService, Radio, RadioEvent, WriteKind};
use crate::config::ServiceLayout;
use crate::error::{LinkError, Result};
use crate::transport::CharacteristicRole;

const EVENT_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 256;

/// A write observed by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub device: DeviceId,
    pub characteristic: Uuid,
    pub data: Bytes,
    pub kind: WriteKind,
    pub at: Instant,
}

#[derive(Default)]
struct MemoryState {
    services: Vec<GattService>,
    advertised: Vec<DeviceId>,
    os_connected: Vec<DeviceId>,
    connected: HashSet<DeviceId>,
    scanning: bool,
    scan_starts: usize,
    connect_attempts: usize,
    connect_failures: u32,
    fail_writes: bool,
    reads: HashMap<Uuid, VecDeque<Bytes>>,
    read_defaults: HashMap<Uuid, Bytes>,
    writes: Vec<RecordedWrite>,
    subscribers: HashMap<(DeviceId, Uuid), mpsc::Sender<Bytes>>,
    mtu: Option<u16>,
}

/// In-memory [`Radio`] implementation.
pub struct MemoryRadio {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<RadioEvent>,
}

impl MemoryRadio {
    /// A radio whose devices expose every characteristic of `layout`.
    pub fn new(layout: &ServiceLayout) -> Self {
        let service = GattService {
            uuid: layout.service,
            characteristics: CharacteristicRole::ALL
                .iter()
                .map(|role| layout.uuid_for(*role))
                .collect(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState {
                services: vec![service],
                ..MemoryState::default()
            }),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RadioEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn ensure_connected(state: &MemoryState, device: &DeviceId) -> Result<()> {
        if state.connected.contains(device) {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    // ---- scripting ----

    /// Replace the advertised GATT table.
    pub fn set_services(&self, services: Vec<GattService>) {
        self.state().services = services;
    }

    /// Remove one characteristic from every service.
    pub fn remove_characteristic(&self, uuid: Uuid) {
        for service in &mut self.state().services {
            service.characteristics.retain(|c| *c != uuid);
        }
    }

    /// Make `device` advertise; reported at once if a scan is running.
    pub fn advertise(&self, device: DeviceId) {
        let scanning = {
            let mut state = self.state();
            state.advertised.push(device.clone());
            state.scanning
        };
        if scanning {
            self.emit(RadioEvent::Discovered(device));
        }
    }

    /// Pretend the OS already holds a connection to `device`.
    pub fn add_os_connected(&self, device: DeviceId) {
        let mut state = self.state();
        state.connected.insert(device.clone());
        state.os_connected.push(device);
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().connect_failures = count;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Queue a one-shot read response for `characteristic`.
    pub fn push_read(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        self.state()
            .reads
            .entry(characteristic)
            .or_default()
            .push_back(value.into());
    }

    /// Value returned once the one-shot responses are used up.
    pub fn set_read(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        self.state()
            .read_defaults
            .insert(characteristic, value.into());
    }

    /// Deliver a notification to every subscriber of `characteristic`.
    ///
    /// Returns `false` when nobody is subscribed.
    pub fn notify(&self, characteristic: Uuid, value: impl Into<Bytes>) -> bool {
        let value = value.into();
        let state = self.state();
        let mut delivered = false;
        for ((_, uuid), tx) in state.subscribers.iter() {
            if *uuid == characteristic && tx.try_send(value.clone()).is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    /// Drop the link from the device side.
    pub fn drop_connection(&self, device: &DeviceId) {
        {
            let mut state = self.state();
            state.connected.remove(device);
            state.subscribers.retain(|(d, _), _| d != device);
        }
        self.emit(RadioEvent::Disconnected(device.clone()));
    }

    /// Report an OS-restored connection.
    pub fn restore(&self, device: DeviceId) {
        self.state().connected.insert(device.clone());
        self.emit(RadioEvent::Restored(device));
    }

    /// Change the negotiated MTU and report it.
    pub fn set_mtu(&self, device: &DeviceId, mtu: u16) {
        self.state().mtu = Some(mtu);
        self.emit(RadioEvent::MtuChanged(device.clone(), mtu));
    }

    /// Set the MTU reported by [`Radio::mtu`] without emitting an event.
    pub fn set_initial_mtu(&self, mtu: u16) {
        self.state().mtu = Some(mtu);
    }

    // ---- inspection ----

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<RecordedWrite> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.characteristic == characteristic)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.state().connected.contains(device)
    }

    pub fn subscriber_count(&self, characteristic: Uuid) -> usize {
        self.state()
            .subscribers
            .iter()
            .filter(|((_, uuid), tx)| *uuid == characteristic && !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl Radio for MemoryRadio {
    async fn connected_devices(&self, service: Uuid) -> Result<Vec<DeviceId>> {
        let state = self.state();
        if !state.services.iter().any(|s| s.uuid == service) {
            return Ok(Vec::new());
        }
        Ok(state
            .os_connected
            .iter()
            .filter(|d| state.connected.contains(*d))
            .cloned()
            .collect())
    }

    async fn start_scan(&self, _service: Uuid) -> Result<()> {
        let advertised = {
            let mut state = self.state();
            state.scanning = true;
            state.scan_starts += 1;
            state.advertised.clone()
        };
        for device in advertised {
            self.emit(RadioEvent::Discovered(device));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.state().scanning = false;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(LinkError::Radio(format!("connection to {} refused", device)));
        }
        state.connected.insert(device.clone());
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let was_connected = {
            let mut state = self.state();
            state.subscribers.retain(|(d, _), _| d != device);
            state.connected.remove(device)
        };
        if was_connected {
            self.emit(RadioEvent::Disconnected(device.clone()));
        }
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<Vec<GattService>> {
        let state = self.state();
        Self::ensure_connected(&state, device)?;
        Ok(state.services.clone())
    }

    async fn read(&self, device: &DeviceId, characteristic: Uuid) -> Result<Bytes> {
        let mut state = self.state();
        Self::ensure_connected(&state, device)?;
        if let Some(value) = state
            .reads
            .get_mut(&characteristic)
            .and_then(VecDeque::pop_front)
        {
            return Ok(value);
        }
        state
            .read_defaults
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| LinkError::Radio(format!("no value for {}", characteristic)))
    }

    async fn write(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<()> {
        let mut state = self.state();
        Self::ensure_connected(&state, device)?;
        if state.fail_writes {
            return Err(LinkError::Radio("write rejected".into()));
        }
        state.writes.push(RecordedWrite {
            device: device.clone(),
            characteristic,
            data,
            kind,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Bytes>> {
        let mut state = self.state();
        Self::ensure_connected(&state, device)?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        state.subscribers.insert((device.clone(), characteristic), tx);
        Ok(rx)
    }

    async fn mtu(&self, _device: &DeviceId) -> Option<u16> {
        self.state().mtu
    }

    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio() -> (ServiceLayout, MemoryRadio) {
        let layout = ServiceLayout::default();
        let radio = MemoryRadio::new(&layout);
        (layout, radio)
    }

    #[tokio::test]
    async fn test_scan_reports_advertised_devices() {
        let (layout, radio) = radio();
        let mut events = radio.events();
        radio.advertise(DeviceId::new("a"));
        radio.start_scan(layout.service).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            RadioEvent::Discovered(DeviceId::new("a"))
        );

        radio.advertise(DeviceId::new("b"));
        assert_eq!(
            events.recv().await.unwrap(),
            RadioEvent::Discovered(DeviceId::new("b"))
        );
        assert_eq!(radio.scan_starts(), 1);
    }

    #[tokio::test]
    async fn test_reads_pop_then_fall_back() {
        let (layout, radio) = radio();
        let dev = DeviceId::new("a");
        radio.connect(&dev).await.unwrap();
        radio.push_read(layout.clock, vec![1u8]);
        radio.set_read(layout.clock, vec![2u8]);

        assert_eq!(&radio.read(&dev, layout.clock).await.unwrap()[..], &[1]);
        assert_eq!(&radio.read(&dev, layout.clock).await.unwrap()[..], &[2]);
        assert_eq!(&radio.read(&dev, layout.clock).await.unwrap()[..], &[2]);
        assert!(radio.read(&dev, layout.battery).await.is_err());
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let (layout, radio) = radio();
        let dev = DeviceId::new("a");
        let err = radio
            .write(&dev, layout.audio_in, Bytes::new(), WriteKind::WithoutResponse)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_drop_connection_ends_subscriptions() {
        let (layout, radio) = radio();
        let dev = DeviceId::new("a");
        radio.connect(&dev).await.unwrap();
        let mut rx = radio.subscribe(&dev, layout.audio_out).await.unwrap();
        assert!(radio.notify(layout.audio_out, vec![9u8]));
        assert_eq!(&rx.recv().await.unwrap()[..], &[9]);

        let mut events = radio.events();
        radio.drop_connection(&dev);
        assert!(rx.recv().await.is_none());
        assert_eq!(events.recv().await.unwrap(), RadioEvent::Disconnected(dev.clone()));
        assert!(!radio.is_connected(&dev));
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let (_layout, radio) = radio();
        let dev = DeviceId::new("a");
        radio.fail_next_connects(1);
        assert!(radio.connect(&dev).await.is_err());
        assert!(radio.connect(&dev).await.is_ok());
        assert_eq!(radio.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_connected_devices_filters_by_service() {
        let (layout, radio) = radio();
        radio.add_os_connected(DeviceId::new("a"));
        assert_eq!(
            radio.connected_devices(layout.service).await.unwrap(),
            vec![DeviceId::new("a")]
        );
        assert!(radio
            .connected_devices(Uuid::from_u128(1))
            .await
            .unwrap()
            .is_empty());
    }
}
