//! Connection state machine.
//!
//! Two kinds of background work run here:
//!
//! - the event task, for the manager's whole life, reacting to radio
//!   events (link lost, connection restored, MTU changed);
//! - at most one connect loop at a time, scanning and connecting until a
//!   link is bound or the manager is disposed.
//!
//! The re-entrancy guard of the connect loop, the device being established
//! and the active device live under one mutex. A link loss reported while a
//! device is still being bound marks that attempt as lost; the attempt then
//! fails instead of publishing a dead link, and the connect loop retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::ConnectionState;
use crate::audio::AudioTransport;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::file::FileTransport;
use crate::flow::FlowGate;
use crate::queue::{Mtu, PacketQueue};
use crate::transport::{CharacteristicRole, DeviceId, Link, LinkSlot, Radio, RadioEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Session {
    /// Device of the published link.
    active: Option<DeviceId>,
    /// A connect loop is running.
    connecting: bool,
    /// Device currently being discovered and bound.
    establishing: Option<DeviceId>,
    /// The link to `establishing` dropped before it was published.
    lost: bool,
}

struct ManagerInner {
    radio: Arc<dyn Radio>,
    config: LinkConfig,
    queue: PacketQueue,
    flow: FlowGate,
    mtu: Mtu,
    audio: AudioTransport,
    files: FileTransport,
    link: watch::Sender<Option<Link>>,
    state: watch::Sender<ConnectionState>,
    connected: watch::Sender<bool>,
    session: Mutex<Session>,
    manual_connect: AtomicBool,
    disposed: AtomicBool,
    shutdown: watch::Sender<bool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    connect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the device link. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// `link` is the sending half of the slot handed to the transports.
    pub fn new(
        radio: Arc<dyn Radio>,
        config: LinkConfig,
        link: watch::Sender<Option<Link>>,
        queue: PacketQueue,
        flow: FlowGate,
        audio: AudioTransport,
        files: FileTransport,
    ) -> Self {
        let mtu = queue.mtu().clone();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (connected, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ManagerInner {
                radio,
                config,
                queue,
                flow,
                mtu,
                audio,
                files,
                link,
                state,
                connected,
                session: Mutex::new(Session::default()),
                manual_connect: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                shutdown,
                event_task: Mutex::new(None),
                connect_task: Mutex::new(None),
            }),
        }
    }

    /// Start watching radio events and bring up a link.
    ///
    /// A device the OS already holds a connection to is bound directly;
    /// otherwise a scan-and-connect loop starts.
    pub async fn initialize(&self) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.ensure_event_task();
        if let Some(device) = self.active_device() {
            tracing::debug!(%device, "Already bound; initialize is a no-op");
            return Ok(());
        }

        let service = self.inner.config.service.service;
        let already = match self.inner.radio.connected_devices(service).await {
            Ok(devices) => devices.into_iter().next(),
            Err(e) => {
                tracing::warn!("Could not query OS connections: {}", e);
                None
            }
        };
        if let Some(device) = &already {
            tracing::info!(%device, "Device already connected at OS level");
        }
        self.inner.start_connect_loop(already);
        Ok(())
    }

    /// Connect to a specific device, replacing the current link.
    ///
    /// Automatic reconnection is suppressed while this runs. On failure the
    /// automatic scan-and-connect loop takes over.
    pub async fn connect_to(&self, device: DeviceId) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_live()?;
        inner.ensure_event_task();
        inner.manual_connect.store(true, Ordering::Release);

        inner.cancel_connect_loop().await;
        if let Some(previous) = inner.release_link() {
            if previous != device {
                if let Err(e) = inner.radio.disconnect(&previous).await {
                    tracing::warn!(device = %previous, "Disconnect failed: {}", e);
                }
            }
        }

        inner.set_state(ConnectionState::Connecting);
        let result = match inner.radio.connect(&device).await {
            Ok(()) => inner.establish(device).await,
            Err(e) => Err(e),
        };
        inner.manual_connect.store(false, Ordering::Release);

        if let Err(e) = &result {
            tracing::warn!("Manual connect failed: {}", e);
            inner.set_state(ConnectionState::Disconnected);
            inner.start_connect_loop(None);
        }
        result
    }

    /// Drop the link without reconnecting.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.cancel_connect_loop().await;
        if let Some(device) = inner.release_link() {
            if let Err(e) = inner.radio.disconnect(&device).await {
                tracing::warn!(%device, "Disconnect failed: {}", e);
            }
        }
        inner.set_state(ConnectionState::Disconnected);
    }

    /// Stop all background work and drop the link. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.shutdown.send_replace(true);
        if let Some(task) = lock(&inner.event_task).take() {
            task.abort();
        }
        self.disconnect().await;
        tracing::info!("Connection manager disposed");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Boolean connectivity, changing only on connect and disconnect.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn link_slot(&self) -> LinkSlot {
        self.inner.link.subscribe()
    }

    /// Device of the current link.
    pub fn active_device(&self) -> Option<DeviceId> {
        lock(&self.inner.session).active.clone()
    }

    /// Whether a scan-and-connect loop is running.
    pub fn is_reconnecting(&self) -> bool {
        lock(&self.inner.session).connecting
    }
}

impl ManagerInner {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(LinkError::Disposed)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::info!("Connection state: {}", state);
        }
        let connected = state.is_connected();
        self.connected.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            *current = connected;
            true
        });
    }

    fn ensure_event_task(self: &Arc<Self>) {
        let mut slot = lock(&self.event_task);
        if slot.is_some() {
            return;
        }
        let events = self.radio.events();
        let inner = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            event_loop(inner, events).await;
        }));
    }

    /// Claim the re-entrancy guard and spawn a connect loop.
    ///
    /// Returns `false` if a loop is already running or the manager is
    /// disposed.
    fn start_connect_loop(self: &Arc<Self>, first: Option<DeviceId>) -> bool {
        if self.ensure_live().is_err() {
            return false;
        }
        {
            let mut session = lock(&self.session);
            if session.connecting {
                tracing::debug!("Connect loop already running");
                return false;
            }
            session.connecting = true;
        }
        let inner = self.clone();
        let task = tokio::spawn(async move { inner.connect_loop(first).await });
        if let Some(previous) = lock(&self.connect_task).replace(task) {
            // Only a finished loop can be replaced here.
            previous.abort();
        }
        true
    }

    async fn cancel_connect_loop(&self) {
        if let Some(task) = lock(&self.connect_task).take() {
            task.abort();
        }
        let was_connecting = std::mem::take(&mut lock(&self.session).connecting);
        if was_connecting {
            if let Err(e) = self.radio.stop_scan().await {
                tracing::debug!("Stopping scan failed: {}", e);
            }
        }
    }

    async fn connect_loop(self: Arc<Self>, mut first: Option<DeviceId>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if self.ensure_live().is_err() {
                break;
            }
            let attempt = match first.take() {
                Some(device) => self.establish(device).await,
                None => self.scan_and_connect(&mut shutdown).await,
            };
            match attempt {
                Ok(()) => return,
                Err(LinkError::Disposed) => break,
                Err(e) => {
                    tracing::warn!("Connection attempt failed: {}", e);
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = shutdown.changed() => break,
            }
        }
        lock(&self.session).connecting = false;
    }

    async fn scan_and_connect(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let service = self.config.service.service;
        let mut events = self.radio.events();

        self.set_state(ConnectionState::Scanning);
        self.radio.start_scan(service).await?;
        tracing::debug!("Scanning for {}", service);

        let device = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(RadioEvent::Discovered(device)) => break device,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Scan skipped {} radio events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LinkError::Radio("radio event stream closed".into()));
                    }
                },
                _ = shutdown.changed() => {
                    let _ = self.radio.stop_scan().await;
                    return Err(LinkError::Disposed);
                }
            }
        };

        if let Err(e) = self.radio.stop_scan().await {
            tracing::warn!("Stopping scan failed: {}", e);
        }
        tracing::info!(%device, "Found device");

        self.set_state(ConnectionState::Connecting);
        self.radio.connect(&device).await?;
        self.establish(device).await
    }

    /// Discover, bind, attach transports and publish the link.
    ///
    /// Fails with [`LinkError::NotConnected`] when the device drops while
    /// being bound.
    async fn establish(&self, device: DeviceId) -> Result<()> {
        {
            let mut session = lock(&self.session);
            session.establishing = Some(device.clone());
            session.lost = false;
        }
        self.set_state(ConnectionState::Discovering);
        let result = match self.bind(&device).await {
            Ok(link) => {
                let mtu = self.radio.mtu(&device).await;
                if let Some(mtu) = mtu {
                    self.mtu.set(mtu);
                }
                let mut session = lock(&self.session);
                session.establishing = None;
                if std::mem::take(&mut session.lost) {
                    tracing::info!(%device, "Link lost while binding");
                    Err(LinkError::NotConnected)
                } else {
                    session.active = Some(device.clone());
                    session.connecting = false;
                    self.link.send_replace(Some(link));
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(%device, ?mtu, "Link established");
                    Ok(())
                }
            }
            Err(e) => {
                let mut session = lock(&self.session);
                session.establishing = None;
                session.lost = false;
                Err(e)
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.audio.detach();
                self.files.detach();
                if let Err(disconnect_err) = self.radio.disconnect(&device).await {
                    tracing::debug!("Disconnect after failed bind: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    async fn bind(&self, device: &DeviceId) -> Result<Link> {
        let layout = &self.config.service;
        let services = self.radio.discover_services(device).await?;
        let service = services
            .into_iter()
            .find(|s| s.uuid == layout.service)
            .ok_or(LinkError::ServiceNotFound(layout.service))?;

        let bindings: HashMap<CharacteristicRole, _> = CharacteristicRole::ALL
            .iter()
            .map(|role| (*role, layout.uuid_for(*role)))
            .filter(|(_, uuid)| service.characteristics.contains(uuid))
            .collect();
        for role in CharacteristicRole::MANDATORY {
            if !bindings.contains_key(&role) {
                return Err(LinkError::MissingCharacteristic(role));
            }
        }
        for role in CharacteristicRole::ALL {
            if !bindings.contains_key(&role) {
                tracing::debug!("Optional characteristic {} not present", role);
            }
        }

        let link = Link::new(device.clone(), self.radio.clone(), bindings);
        self.audio.attach(&link).await?;
        self.files.attach(&link).await?;
        Ok(link)
    }

    /// Clear the published link and all per-link state.
    ///
    /// Returns the device that was active, if any.
    fn release_link(&self) -> Option<DeviceId> {
        let device = {
            let mut session = lock(&self.session);
            let device = session.active.take();
            self.link.send_replace(None);
            device
        };
        self.audio.detach();
        self.files.detach();
        self.queue.clear();
        self.flow.reset();
        self.mtu.clear();
        self.set_state(ConnectionState::Disconnected);
        device
    }

    /// Handle an unexpected link loss of `device`.
    fn on_disconnected(self: &Arc<Self>, device: &DeviceId) {
        let was_active = {
            let mut session = lock(&self.session);
            let active = session.active.as_ref() == Some(device);
            if !active && session.establishing.as_ref() == Some(device) {
                session.lost = true;
                tracing::debug!(%device, "Disconnect while binding");
                return;
            }
            active
        };
        if !was_active {
            tracing::debug!(%device, "Ignoring disconnect of inactive device");
            return;
        }
        if self.release_link().as_ref() != Some(device) {
            return;
        }
        tracing::info!(%device, "Link lost");
        if self.manual_connect.load(Ordering::Acquire) {
            tracing::debug!("Manual connect in progress; not reconnecting");
            return;
        }
        self.start_connect_loop(None);
    }

    /// Handle a connection the OS restored without our bindings.
    async fn on_restored(self: &Arc<Self>, device: DeviceId) {
        if lock(&self.session).active.is_some() {
            tracing::debug!(%device, "Restore ignored; link already bound");
            return;
        }
        self.cancel_connect_loop().await;
        self.set_state(ConnectionState::Restoring);
        self.start_connect_loop(Some(device));
    }

    fn on_mtu_changed(&self, device: &DeviceId, mtu: u16) {
        let session = lock(&self.session);
        match &session.active {
            Some(active) if active != device => {}
            _ => {
                self.mtu.set(mtu);
                tracing::debug!(%device, mtu, "MTU changed");
            }
        }
    }
}

async fn event_loop(
    inner: std::sync::Weak<ManagerInner>,
    mut events: broadcast::Receiver<RadioEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} radio events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            RadioEvent::Disconnected(device) => inner.on_disconnected(&device),
            RadioEvent::Restored(device) => inner.on_restored(device).await,
            RadioEvent::MtuChanged(device, mtu) => inner.on_mtu_changed(&device, mtu),
            RadioEvent::Discovered(_) => {}
        }
    }
    tracing::debug!("Radio event task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::file::FileStore;
    use crate::test_support::{fake_decoder_factory, fake_encoder_factory};
    use crate::transport::memory::MemoryRadio;
    use crate::transport::{GattService, WriteKind};

    /// Drops the link the first time the MTU is queried, i.e. after the
    /// characteristics are bound but before the link is published.
    struct DroppingRadio {
        inner: Arc<MemoryRadio>,
        dropped: AtomicBool,
    }

    #[async_trait]
    impl Radio for DroppingRadio {
        async fn connected_devices(&self, service: Uuid) -> Result<Vec<DeviceId>> {
            self.inner.connected_devices(service).await
        }

        async fn start_scan(&self, service: Uuid) -> Result<()> {
            self.inner.start_scan(service).await
        }

        async fn stop_scan(&self) -> Result<()> {
            self.inner.stop_scan().await
        }

        async fn connect(&self, device: &DeviceId) -> Result<()> {
            self.inner.connect(device).await
        }

        async fn disconnect(&self, device: &DeviceId) -> Result<()> {
            self.inner.disconnect(device).await
        }

        async fn discover_services(&self, device: &DeviceId) -> Result<Vec<GattService>> {
            self.inner.discover_services(device).await
        }

        async fn read(&self, device: &DeviceId, characteristic: Uuid) -> Result<Bytes> {
            self.inner.read(device, characteristic).await
        }

        async fn write(
            &self,
            device: &DeviceId,
            characteristic: Uuid,
            data: Bytes,
            kind: WriteKind,
        ) -> Result<()> {
            self.inner.write(device, characteristic, data, kind).await
        }

        async fn subscribe(
            &self,
            device: &DeviceId,
            characteristic: Uuid,
        ) -> Result<mpsc::Receiver<Bytes>> {
            self.inner.subscribe(device, characteristic).await
        }

        async fn mtu(&self, device: &DeviceId) -> Option<u16> {
            if !self.dropped.swap(true, Ordering::AcqRel) {
                self.inner.drop_connection(device);
                // Let the event task observe the disconnect.
                tokio::task::yield_now().await;
            }
            self.inner.mtu(device).await
        }

        fn events(&self) -> broadcast::Receiver<RadioEvent> {
            self.inner.events()
        }
    }

    struct Fixture {
        radio: Arc<MemoryRadio>,
        manager: ConnectionManager,
        queue: PacketQueue,
        flow: FlowGate,
        config: LinkConfig,
    }

    fn fixture() -> Fixture {
        fixture_with(|radio| radio as Arc<dyn Radio>)
    }

    fn fixture_with(wrap: impl FnOnce(Arc<MemoryRadio>) -> Arc<dyn Radio>) -> Fixture {
        let config = LinkConfig::default();
        let radio = Arc::new(MemoryRadio::new(&config.service));
        let mtu = Mtu::new();
        let queue = PacketQueue::new(mtu);
        let flow = FlowGate::new();
        let (link_tx, link_rx) = watch::channel(None);
        let audio = AudioTransport::new(
            queue.clone(),
            flow.clone(),
            fake_decoder_factory(),
            fake_encoder_factory(),
            16,
        );
        let files = FileTransport::new(
            link_rx,
            config.file.clone(),
            FileStore::new(std::env::temp_dir().join("wearlink-manager-tests")),
        );
        let manager = ConnectionManager::new(
            wrap(radio.clone()),
            config.clone(),
            link_tx,
            queue.clone(),
            flow.clone(),
            audio,
            files,
        );
        Fixture {
            radio,
            manager,
            queue,
            flow,
            config,
        }
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_os_connected_device_skips_scan() {
        let f = fixture();
        f.radio.add_os_connected(DeviceId::new("pendant"));
        f.radio.set_initial_mtu(185);
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        assert_eq!(f.radio.scan_starts(), 0);
        assert_eq!(f.manager.active_device(), Some(DeviceId::new("pendant")));
        assert_eq!(f.queue.mtu().effective(), 182);
        assert!(f.manager.link_slot().borrow().is_some());
        assert!(!f.manager.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_connects_first_advertisement() {
        let f = fixture();
        f.radio.advertise(DeviceId::new("a"));
        f.radio.advertise(DeviceId::new("b"));
        let mut connected = f.manager.subscribe_connected();
        f.manager.initialize().await.unwrap();

        connected.wait_for(|c| *c).await.unwrap();
        assert_eq!(f.manager.active_device(), Some(DeviceId::new("a")));
        assert!(!f.radio.is_scanning());
        assert_eq!(f.radio.scan_starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_mandatory_characteristic_rescans() {
        let f = fixture();
        f.radio.remove_characteristic(f.config.service.audio_in);
        f.radio.advertise(DeviceId::new("a"));
        f.manager.initialize().await.unwrap();

        tokio::time::sleep(f.config.reconnect_delay() * 2 + Duration::from_millis(50)).await;
        assert!(f.radio.scan_starts() >= 2);
        assert!(!f.manager.is_connected());
        assert!(!f.radio.is_connected(&DeviceId::new("a")));
        assert!(f.manager.is_reconnecting());
        f.manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_service_is_reported() {
        let f = fixture();
        f.radio.set_services(Vec::new());
        f.radio.advertise(DeviceId::new("a"));
        f.manager.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!f.manager.is_connected());
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        assert_eq!(f.radio.connect_attempts(), 1);
        f.manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_disconnect_reconnects_once() {
        let f = fixture();
        let device = DeviceId::new("pendant");
        f.radio.add_os_connected(device.clone());
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        f.queue.enqueue_packet(Bytes::from_static(&[1, 2, 3]));
        f.queue.enqueue_eof();
        f.flow.pause();

        f.radio.drop_connection(&device);
        f.radio.drop_connection(&device);
        f.radio.drop_connection(&device);
        wait_for_state(&f.manager, ConnectionState::Scanning).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(f.queue.is_empty());
        assert!(!f.flow.is_paused());
        assert_eq!(f.radio.scan_starts(), 1);
        assert!(f.manager.link_slot().borrow().is_none());
        f.manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_link_loss() {
        let f = fixture();
        let device = DeviceId::new("pendant");
        f.radio.add_os_connected(device.clone());
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        f.radio.drop_connection(&device);
        wait_for_state(&f.manager, ConnectionState::Scanning).await;
        f.radio.advertise(device.clone());
        wait_for_state(&f.manager, ConnectionState::Connected).await;
        assert_eq!(f.manager.active_device(), Some(device));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_connection_is_rebound() {
        let f = fixture();
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Scanning).await;

        f.radio.restore(DeviceId::new("pendant"));
        wait_for_state(&f.manager, ConnectionState::Connected).await;
        assert!(!f.radio.is_scanning());
        assert!(!f.manager.is_reconnecting());
        assert_eq!(f.manager.active_device(), Some(DeviceId::new("pendant")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_during_binding_reconnects() {
        let f = fixture_with(|radio| {
            Arc::new(DroppingRadio {
                inner: radio,
                dropped: AtomicBool::new(false),
            }) as Arc<dyn Radio>
        });
        let device = DeviceId::new("pendant");
        f.radio.add_os_connected(device.clone());
        f.radio.advertise(device.clone());
        f.manager.initialize().await.unwrap();

        // The dropped link is never published; a rescan binds a live one.
        wait_for_state(&f.manager, ConnectionState::Connected).await;
        assert_eq!(f.radio.scan_starts(), 1);
        assert_eq!(f.radio.connect_attempts(), 1);
        assert_eq!(f.manager.active_device(), Some(device.clone()));
        assert!(f.radio.is_connected(&device));
        assert!(f.manager.link_slot().borrow().is_some());
        assert!(!f.manager.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_while_bound_is_noop() {
        let f = fixture();
        f.radio.add_os_connected(DeviceId::new("pendant"));
        f.radio.advertise(DeviceId::new("other"));
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        let mut rx = f.manager.subscribe_state();
        f.manager.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(f.manager.state(), ConnectionState::Connected);
        assert_eq!(f.manager.active_device(), Some(DeviceId::new("pendant")));
        assert_eq!(f.radio.scan_starts(), 0);
        assert_eq!(f.radio.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mtu_change_updates_queue() {
        let f = fixture();
        let device = DeviceId::new("pendant");
        f.radio.add_os_connected(device.clone());
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;
        assert_eq!(f.queue.mtu().effective(), 20);

        f.radio.set_mtu(&device, 247);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(f.queue.mtu().effective(), 244);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_does_not_reconnect() {
        let f = fixture();
        f.radio.add_os_connected(DeviceId::new("pendant"));
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        f.manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        assert_eq!(f.radio.scan_starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_to_switches_device() {
        let f = fixture();
        f.radio.add_os_connected(DeviceId::new("a"));
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        f.manager.connect_to(DeviceId::new("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.manager.active_device(), Some(DeviceId::new("b")));
        assert!(!f.radio.is_connected(&DeviceId::new("a")));
        assert!(f.manager.is_connected());
        assert_eq!(f.radio.scan_starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_manual_connect_falls_back_to_scan() {
        let f = fixture();
        f.radio.fail_next_connects(1);
        let result = f.manager.connect_to(DeviceId::new("a")).await;
        assert!(matches!(result, Err(LinkError::Radio(_))));
        wait_for_state(&f.manager, ConnectionState::Scanning).await;
        f.manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_idempotent() {
        let f = fixture();
        f.radio.add_os_connected(DeviceId::new("a"));
        f.manager.initialize().await.unwrap();
        wait_for_state(&f.manager, ConnectionState::Connected).await;

        f.manager.dispose().await;
        f.manager.dispose().await;
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            f.manager.initialize().await,
            Err(LinkError::Disposed)
        ));
    }
}
