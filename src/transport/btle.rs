//! [`Radio`] over the platform BLE stack (BlueZ, Core Bluetooth, WinRT)
//! via btleplug.
//!
//! btleplug reports adapter activity as a single stream of `CentralEvent`s;
//! a pump task translates the ones the link engine cares about into
//! [`RadioEvent`]s. Notifications arrive on one stream per peripheral and are
//! fanned out to one channel per subscribed characteristic.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wearlink::transport::btle::BtleRadio;
//!
//! let radio = Arc::new(BtleRadio::new().await?);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{DeviceId, GattService, Radio, RadioEvent, WriteKind};
use crate::error::{LinkError, Result};

const EVENT_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 256;

fn radio_err(context: &str, e: btleplug::Error) -> LinkError {
    LinkError::Radio(format!("{}: {}", context, e))
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(format!("{:?}", id))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    peripherals: Mutex<HashMap<DeviceId, Peripheral>>,
    /// Service filter of the running scan; `None` when not scanning.
    scan_service: Mutex<Option<Uuid>>,
    /// Devices reported as discovered during the running scan.
    reported: Mutex<HashSet<DeviceId>>,
    /// Devices we connected ourselves; any other connection is a restore.
    initiated: Mutex<HashSet<DeviceId>>,
}

/// btleplug-backed radio bound to one adapter.
pub struct BtleRadio {
    adapter: Adapter,
    shared: Arc<Shared>,
    events: broadcast::Sender<RadioEvent>,
    pump: JoinHandle<()>,
}

impl BtleRadio {
    /// Use the first adapter of the platform manager.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| radio_err("Failed to create BLE manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| radio_err("Failed to list BLE adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Radio("No Bluetooth adapter found".into()))?;
        Self::with_adapter(adapter).await
    }

    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let stream = adapter
            .events()
            .await
            .map_err(|e| radio_err("Failed to subscribe to adapter events", e))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared::default());

        let pump = tokio::spawn(event_pump(
            stream,
            adapter.clone(),
            shared.clone(),
            events.clone(),
        ));

        tracing::info!("BLE radio initialized");
        Ok(Self {
            adapter,
            shared,
            events,
            pump,
        })
    }

    async fn peripheral(&self, device: &DeviceId) -> Result<Peripheral> {
        if let Some(p) = lock(&self.shared.peripherals).get(device) {
            return Ok(p.clone());
        }
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| radio_err("Failed to list peripherals", e))?;
        let found = peripherals
            .into_iter()
            .find(|p| device_id(&p.id()) == *device)
            .ok_or(LinkError::NotConnected)?;
        lock(&self.shared.peripherals).insert(device.clone(), found.clone());
        Ok(found)
    }

    async fn characteristic(&self, device: &DeviceId, uuid: Uuid) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(device).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| LinkError::Radio(format!("characteristic {} not discovered", uuid)))?;
        Ok((peripheral, characteristic))
    }
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn advertises(peripheral: &Peripheral, service: Uuid) -> bool {
    match peripheral.properties().await {
        Ok(Some(props)) => props.services.contains(&service),
        _ => false,
    }
}

async fn event_pump(
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    adapter: Adapter,
    shared: Arc<Shared>,
    events: broadcast::Sender<RadioEvent>,
) {
    while let Some(event) = stream.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                let Some(service) = *lock(&shared.scan_service) else {
                    continue;
                };
                let device = device_id(&id);
                if lock(&shared.reported).contains(&device) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if !advertises(&peripheral, service).await {
                    continue;
                }
                lock(&shared.peripherals).insert(device.clone(), peripheral);
                lock(&shared.reported).insert(device.clone());
                tracing::debug!(%device, "Discovered advertising device");
                let _ = events.send(RadioEvent::Discovered(device));
            }
            CentralEvent::DeviceConnected(id) => {
                let device = device_id(&id);
                if !lock(&shared.initiated).contains(&device) {
                    if let Ok(peripheral) = adapter.peripheral(&id).await {
                        lock(&shared.peripherals).insert(device.clone(), peripheral);
                    }
                    tracing::info!(%device, "Connection restored by the OS");
                    let _ = events.send(RadioEvent::Restored(device));
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let device = device_id(&id);
                lock(&shared.initiated).remove(&device);
                tracing::debug!(%device, "Device disconnected");
                let _ = events.send(RadioEvent::Disconnected(device));
            }
            _ => {}
        }
    }
    tracing::debug!("Adapter event stream ended");
}

/// Copy notification payloads into `tx` until either side goes away.
///
/// btleplug's per-peripheral stream can stay open after the receiving
/// transport is detached, so the closed channel ends the task as well.
async fn forward_notifications<S>(notifications: S, tx: mpsc::Sender<Bytes>)
where
    S: futures::Stream<Item = Bytes>,
{
    tokio::pin!(notifications);
    loop {
        tokio::select! {
            next = notifications.next() => match next {
                Some(value) => {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = tx.closed() => break,
        }
    }
    tracing::debug!("Notification forwarding stopped");
}

#[async_trait]
impl Radio for BtleRadio {
    async fn connected_devices(&self, service: Uuid) -> Result<Vec<DeviceId>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| radio_err("Failed to list peripherals", e))?;
        let mut connected = Vec::new();
        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            let has_service = advertises(&peripheral, service).await
                || peripheral.services().iter().any(|s| s.uuid == service);
            if has_service {
                let device = device_id(&peripheral.id());
                lock(&self.shared.peripherals).insert(device.clone(), peripheral);
                lock(&self.shared.initiated).insert(device.clone());
                connected.push(device);
            }
        }
        Ok(connected)
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        *lock(&self.shared.scan_service) = Some(service);
        lock(&self.shared.reported).clear();
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|e| radio_err("Failed to start scan", e))
    }

    async fn stop_scan(&self) -> Result<()> {
        *lock(&self.shared.scan_service) = None;
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| radio_err("Failed to stop scan", e))
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        lock(&self.shared.initiated).insert(device.clone());
        if let Err(e) = peripheral.connect().await {
            lock(&self.shared.initiated).remove(device);
            return Err(radio_err("Failed to connect", e));
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| radio_err("Failed to disconnect", e))
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<Vec<GattService>> {
        let peripheral = self.peripheral(device).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| radio_err("Service discovery failed", e))?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn read(&self, device: &DeviceId, characteristic: Uuid) -> Result<Bytes> {
        let (peripheral, c) = self.characteristic(device, characteristic).await?;
        peripheral
            .read(&c)
            .await
            .map(Bytes::from)
            .map_err(|e| radio_err("Read failed", e))
    }

    async fn write(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<()> {
        let (peripheral, c) = self.characteristic(device, characteristic).await?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral
            .write(&c, &data, write_type)
            .await
            .map_err(|e| radio_err("Write failed", e))
    }

    async fn subscribe(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Bytes>> {
        let (peripheral, c) = self.characteristic(device, characteristic).await?;
        peripheral
            .subscribe(&c)
            .await
            .map_err(|e| radio_err("Subscribe failed", e))?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| radio_err("Notification stream unavailable", e))?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        tokio::spawn(forward_notifications(
            notifications.filter_map(move |n| {
                futures::future::ready((n.uuid == characteristic).then(|| Bytes::from(n.value)))
            }),
            tx,
        ));
        Ok(rx)
    }

    async fn mtu(&self, _device: &DeviceId) -> Option<u16> {
        // btleplug does not expose the negotiated ATT MTU per peripheral.
        None
    }

    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_forwarding_ends_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(forward_notifications(futures::stream::pending::<Bytes>(), tx));
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("forwarding task kept running")
            .unwrap();
    }

    #[tokio::test]
    async fn test_forwarding_copies_until_stream_ends() {
        let (tx, mut rx) = mpsc::channel(4);
        let source = futures::stream::iter(vec![
            Bytes::from_static(&[1]),
            Bytes::from_static(&[2, 3]),
        ]);
        forward_notifications(source, tx).await;

        assert_eq!(rx.recv().await, Some(Bytes::from_static(&[1])));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(&[2, 3])));
        assert_eq!(rx.recv().await, None);
    }
}
