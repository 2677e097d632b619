//! MTU-bounded outbound packet queue and its drain task.
//!
//! Producers append already-framed packets; the queue concatenates them into
//! batches no larger than the effective MTU. A periodic drain task is the
//! only writer to the audio-in characteristic.
//!
//! # Architecture
//!
//! ```text
//! AudioTransport ─► enqueue_packet ─► [pending batch] ─► FIFO ─► drain tick (20 ms)
//!                   enqueue_eof    ──────────────────► FIFO        │
//!                                                                  ▼
//!                                    write-without-response, 5 ms apart, stop after EOF
//! ```
//!
//! A tick does nothing while the device has paused the flow, while no link is
//! published, or while there is nothing to send. A failed write is logged and
//! the batch is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::QueueConfig;
use crate::flow::FlowGate;
use crate::protocol::{encode_control_frame, ControlKind};
use crate::transport::{current_link, CharacteristicRole, Link, LinkSlot};

/// ATT header bytes subtracted from the negotiated MTU.
pub const ATT_OVERHEAD: usize = 3;

/// Effective payload size while the MTU is unknown.
pub const FALLBACK_EFFECTIVE_MTU: usize = 20;

/// Shared negotiated MTU. Zero means unknown.
#[derive(Debug, Clone, Default)]
pub struct Mtu(Arc<AtomicU16>);

impl Mtu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the negotiated ATT MTU.
    #[inline]
    pub fn set(&self, mtu: u16) {
        self.0.store(mtu, Ordering::Release);
    }

    /// Forget the MTU (link lost).
    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    #[inline]
    pub fn get(&self) -> Option<u16> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            mtu => Some(mtu),
        }
    }

    /// Largest payload of a single write. Always at least 1.
    #[inline]
    pub fn effective(&self) -> usize {
        match self.get() {
            None => FALLBACK_EFFECTIVE_MTU,
            Some(mtu) => (mtu as usize).saturating_sub(ATT_OVERHEAD).max(1),
        }
    }
}

/// One unit of the send FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// Concatenated framed packets.
    Batch(Bytes),
    /// A standalone EOF frame.
    Eof,
}

impl QueueEntry {
    /// Bytes written to the radio for this entry.
    pub fn payload(&self) -> Bytes {
        match self {
            QueueEntry::Batch(bytes) => bytes.clone(),
            QueueEntry::Eof => encode_control_frame(ControlKind::Eof),
        }
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, QueueEntry::Eof)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BytesMut,
    queue: VecDeque<QueueEntry>,
}

impl QueueState {
    fn flush_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let batch = self.pending.split().freeze();
        self.queue.push_back(QueueEntry::Batch(batch));
        true
    }
}

/// Cloneable handle to the outbound queue.
#[derive(Debug, Clone)]
pub struct PacketQueue {
    state: Arc<Mutex<QueueState>>,
    mtu: Mtu,
}

impl PacketQueue {
    pub fn new(mtu: Mtu) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            mtu,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The MTU this queue batches against.
    pub fn mtu(&self) -> &Mtu {
        &self.mtu
    }

    /// Append a framed packet to the pending batch.
    ///
    /// When the packet would push the batch past the effective MTU, the batch
    /// is moved to the FIFO first and the packet starts a new one. A batch
    /// exactly at the MTU is allowed. A packet larger than the MTU on its own
    /// becomes a batch by itself.
    pub fn enqueue_packet(&self, packet: Bytes) {
        if packet.is_empty() {
            return;
        }
        let limit = self.mtu.effective();
        let mut state = self.state();
        if !state.pending.is_empty() && state.pending.len() + packet.len() > limit {
            state.flush_pending();
        }
        if packet.len() > limit {
            tracing::warn!(
                "Packet of {} bytes exceeds effective MTU {}; sending unbatched",
                packet.len(),
                limit
            );
        }
        state.pending.extend_from_slice(&packet);
    }

    /// Flush the pending batch and append a standalone EOF entry.
    pub fn enqueue_eof(&self) {
        let mut state = self.state();
        state.flush_pending();
        state.queue.push_back(QueueEntry::Eof);
    }

    /// Move the pending batch to the FIFO. Returns `false` if there was none.
    pub fn flush_pending(&self) -> bool {
        self.state().flush_pending()
    }

    /// Drop everything, pending and queued.
    pub fn clear(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.queue.clear();
    }

    /// Pop the oldest queued entry.
    pub fn pop(&self) -> Option<QueueEntry> {
        self.state().queue.pop_front()
    }

    /// Bytes in the pending (not yet queued) batch.
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Entries waiting in the FIFO.
    pub fn queued_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Copy of the FIFO, oldest first.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.state().queue.iter().cloned().collect()
    }

    /// No pending bytes and no queued entries.
    pub fn is_empty(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.queue.is_empty()
    }
}

/// Run one drain pass against `link`.
///
/// Returns the number of entries written (including failed writes, which are
/// dropped).
pub async fn drain_pass(
    queue: &PacketQueue,
    flow: &FlowGate,
    link: Option<&Link>,
    config: &QueueConfig,
) -> usize {
    let Some(link) = link else {
        return 0;
    };
    if flow.is_paused() {
        return 0;
    }
    if queue.queued_len() == 0 && !(config.idle_flush && queue.flush_pending()) {
        return 0;
    }

    let mut written = 0;
    loop {
        if written > 0 {
            if flow.is_paused() {
                break;
            }
            tokio::time::sleep(config.write_gap()).await;
        }
        let Some(entry) = queue.pop() else {
            break;
        };
        let payload = entry.payload();
        let len = payload.len();
        if let Err(e) = link
            .write_without_response(CharacteristicRole::AudioIn, payload)
            .await
        {
            tracing::warn!("Dropping {}-byte batch after failed write: {}", len, e);
        } else {
            tracing::debug!("Wrote {}-byte batch", len);
        }
        written += 1;
        if entry.is_eof() {
            break;
        }
    }
    written
}

/// Handle to the running drain task.
pub struct DrainHandle {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DrainHandle {
    /// Stop the task. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DrainHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the periodic drain task.
pub fn spawn_drain_task(
    queue: PacketQueue,
    flow: FlowGate,
    links: LinkSlot,
    config: QueueConfig,
) -> DrainHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(drain_loop(queue, flow, links, config, shutdown_rx));
    DrainHandle {
        shutdown,
        task: Mutex::new(Some(task)),
    }
}

async fn drain_loop(
    queue: PacketQueue,
    flow: FlowGate,
    links: LinkSlot,
    config: QueueConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.drain_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let link = current_link(&links);
                drain_pass(&queue, &flow, link.as_ref(), &config).await;
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Drain task stopped");
}
