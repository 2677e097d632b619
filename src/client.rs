//! Client builder and component wiring.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring timing, the
//! radio backend and the voice codecs. The [`Client`] owns every component
//! and manages the lifecycle:
//! 1. Spawn the outbound drain task
//! 2. Initialize the connection manager (bind or scan and connect)
//! 3. Serve audio, file and device operations on the current link
//! 4. Tear everything down on `shutdown()`
//!
//! # Example
//!
//! ```ignore
//! use wearlink::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .with_btle()
//!         .await?
//!         .storage_dir("/tmp/wearlink")
//!         .build()?;
//!     client.start().await?;
//!
//!     let mut pcm = client.audio().pcm24_stream();
//!     while let Some(chunk) = pcm.next().await {
//!         println!("{} samples", chunk.len());
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::audio::AudioTransport;
use crate::codec::{DecoderFactory, EncoderFactory, WavSpec};
use crate::config::{LinkConfig, ServiceLayout};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::device::DeviceControls;
use crate::error::{LinkError, Result};
use crate::file::{FileStore, FileTransport};
use crate::flow::FlowGate;
use crate::queue::{spawn_drain_task, DrainHandle, Mtu, PacketQueue};
use crate::transport::Radio;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: LinkConfig,
    radio: Option<Arc<dyn Radio>>,
    decoder_factory: Option<DecoderFactory>,
    encoder_factory: Option<EncoderFactory>,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
            radio: None,
            decoder_factory: None,
            encoder_factory: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the GATT service and characteristic UUIDs.
    pub fn service_layout(mut self, layout: ServiceLayout) -> Self {
        self.config.service = layout;
        self
    }

    /// Set the drain tick period.
    ///
    /// Default: 20 ms
    pub fn drain_period(mut self, period: Duration) -> Self {
        self.config.queue.drain_period_ms = millis(period);
        self
    }

    /// Set the delay between consecutive radio writes within a drain pass.
    ///
    /// Default: 5 ms
    pub fn write_gap(mut self, gap: Duration) -> Self {
        self.config.queue.write_gap_ms = millis(gap);
        self
    }

    /// Promote a pending batch when the send queue runs empty.
    ///
    /// Default: true
    pub fn idle_flush(mut self, enabled: bool) -> Self {
        self.config.queue.idle_flush = enabled;
        self
    }

    /// Set the file-transfer status poll interval.
    ///
    /// Default: 200 ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.file.poll_interval_ms = millis(interval);
        self
    }

    /// Set the number of status polls before a transfer times out.
    ///
    /// Default: 150
    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.file.max_poll_attempts = attempts;
        self
    }

    /// Set the wait between failed connection attempts.
    ///
    /// Default: 1 second
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay_ms = millis(delay);
        self
    }

    /// Set the directory received files and WAV artifacts are written to.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Set the capacity of the PCM and EOF broadcast channels.
    ///
    /// Default: 256
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.config.broadcast_capacity = capacity;
        self
    }

    /// Use the given radio backend.
    pub fn radio(mut self, radio: Arc<dyn Radio>) -> Self {
        self.radio = Some(radio);
        self
    }

    /// Use the system Bluetooth adapter.
    #[cfg(feature = "btle")]
    pub async fn with_btle(self) -> Result<Self> {
        let radio = crate::transport::btle::BtleRadio::new().await?;
        Ok(self.radio(Arc::new(radio)))
    }

    /// Override the inbound voice decoder.
    pub fn decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    /// Override the outbound voice encoder.
    pub fn encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = Some(factory);
        self
    }

    fn codecs(&mut self) -> Result<(DecoderFactory, EncoderFactory)> {
        #[cfg(feature = "opus")]
        {
            let decoder = self
                .decoder_factory
                .take()
                .unwrap_or_else(crate::codec::opus_decoder_factory);
            let encoder = self
                .encoder_factory
                .take()
                .unwrap_or_else(crate::codec::opus_encoder_factory);
            Ok((decoder, encoder))
        }
        #[cfg(not(feature = "opus"))]
        {
            match (self.decoder_factory.take(), self.encoder_factory.take()) {
                (Some(decoder), Some(encoder)) => Ok((decoder, encoder)),
                _ => Err(LinkError::Codec(
                    "no voice codec configured; enable the `opus` feature or set factories".into(),
                )),
            }
        }
    }

    /// Wire every component together. Nothing runs until [`Client::start`].
    pub fn build(mut self) -> Result<Client> {
        let radio = self
            .radio
            .take()
            .ok_or_else(|| LinkError::Radio("no radio backend configured".into()))?;
        let (decoder_factory, encoder_factory) = self.codecs()?;
        let config = self.config;

        let queue = PacketQueue::new(Mtu::new());
        let flow = FlowGate::new();
        let (link_tx, link_rx) = watch::channel(None);

        let audio = AudioTransport::new(
            queue.clone(),
            flow.clone(),
            decoder_factory,
            encoder_factory,
            config.broadcast_capacity,
        );
        let files = FileTransport::new(
            link_rx.clone(),
            config.file.clone(),
            FileStore::new(config.storage_dir.clone()),
        );
        let device = DeviceControls::new(link_rx);
        let connection = ConnectionManager::new(
            radio,
            config.clone(),
            link_tx,
            queue.clone(),
            flow.clone(),
            audio.clone(),
            files.clone(),
        );

        Ok(Client {
            config,
            queue,
            flow,
            audio,
            files,
            device,
            connection,
            drain: Mutex::new(None),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired wearable link.
///
/// Components are reachable through accessors; all of them observe the one
/// link published by the connection manager.
pub struct Client {
    config: LinkConfig,
    queue: PacketQueue,
    flow: FlowGate,
    audio: AudioTransport,
    files: FileTransport,
    device: DeviceControls,
    connection: ConnectionManager,
    drain: Mutex<Option<DrainHandle>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start the drain task and bring up the link.
    pub async fn start(&self) -> Result<()> {
        if self.audio.is_disposed() {
            return Err(LinkError::Disposed);
        }
        {
            let mut drain = lock(&self.drain);
            if drain.is_none() {
                *drain = Some(spawn_drain_task(
                    self.queue.clone(),
                    self.flow.clone(),
                    self.connection.link_slot(),
                    self.config.queue.clone(),
                ));
            }
        }
        self.connection.initialize().await
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn audio(&self) -> &AudioTransport {
        &self.audio
    }

    pub fn files(&self) -> &FileTransport {
        &self.files
    }

    pub fn device(&self) -> &DeviceControls {
        &self.device
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The outbound packet queue.
    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    /// Whether the device asked the host to stop sending audio.
    pub fn is_paused(&self) -> bool {
        self.flow.is_paused()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connection.subscribe_connected()
    }

    /// Write upstream-rate PCM to `<kind>_<timestamp>.wav` in the storage
    /// directory.
    pub async fn save_pcm24_wav(&self, kind: &str, samples: &[i16]) -> Result<PathBuf> {
        self.files
            .store()
            .write_wav(kind, &WavSpec::upstream(), samples)
            .await
    }

    pub fn storage_dir(&self) -> &Path {
        self.files.store().root()
    }

    /// Stop the drain task, dispose the transports, then the connection
    /// manager. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(drain) = lock(&self.drain).take() {
            drain.shutdown();
        }
        self.audio.dispose();
        self.files.detach();
        self.connection.dispose().await;
    }
}
