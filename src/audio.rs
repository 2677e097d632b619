//! Bidirectional audio channel over the audio characteristics.
//!
//! ```text
//! audio-out notify ─► decode_notification ─┬─ PAUSE / RESUME ─► FlowGate
//!                                          ├─ EOF ────────────► eof_signal()
//!                                          └─ AUDIO ─► InboundPipeline ─► pcm24_stream()
//!
//! send_pcm24_stream(source) ─► OutboundPipeline ─► encode_audio_frame ─► PacketQueue
//! send_eof() ──────────────────────────────────────────────────────────► PacketQueue
//! ```
//!
//! The inbound task lives as long as the notification subscription; when the
//! link drops the subscription ends and so does the task, without error. The
//! connection manager attaches the transport again after reconnecting.
//!
//! Consumers subscribe through broadcast channels: a fresh [`Pcm24Stream`]
//! sees only chunks decoded after it was created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::{DecoderFactory, EncoderFactory, InboundPipeline, OutboundPipeline};
use crate::error::{LinkError, Result};
use crate::flow::FlowGate;
use crate::protocol::{decode_notification_with_stats, encode_audio_frame, Frame};
use crate::queue::PacketQueue;
use crate::transport::{CharacteristicRole, Link};

/// Lazily-decoded PCM @ 24 kHz from the device.
pub struct Pcm24Stream {
    rx: broadcast::Receiver<Arc<[i16]>>,
}

impl Pcm24Stream {
    /// Next decoded chunk; `None` once the transport is disposed.
    ///
    /// A consumer that falls behind skips the chunks it missed.
    pub async fn next(&mut self) -> Option<Arc<[i16]>> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("PCM consumer lagged, skipped {} chunks", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Arc<[i16]>> + Send {
        futures::stream::unfold(self, |mut s| async move { s.next().await.map(|c| (c, s)) })
    }
}

/// Fires once per EOF frame received from the device.
pub struct EofSignal {
    rx: broadcast::Receiver<()>,
}

impl EofSignal {
    /// Wait for the next EOF; `None` once the transport is disposed.
    pub async fn recv(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(()) => return Some(()),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Collapsed EOFs still count as one end-of-utterance.
                    tracing::warn!("EOF consumer lagged by {}", n);
                    return Some(());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct Channels {
    pcm: broadcast::Sender<Arc<[i16]>>,
    eof: broadcast::Sender<()>,
}

struct AudioInner {
    queue: PacketQueue,
    flow: FlowGate,
    decoder_factory: DecoderFactory,
    encoder_factory: EncoderFactory,
    /// Taken on dispose so that every subscriber sees the end.
    channels: Mutex<Option<Channels>>,
    inbound: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
}

/// Audio transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AudioTransport {
    inner: Arc<AudioInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioTransport {
    pub fn new(
        queue: PacketQueue,
        flow: FlowGate,
        decoder_factory: DecoderFactory,
        encoder_factory: EncoderFactory,
        broadcast_capacity: usize,
    ) -> Self {
        let capacity = broadcast_capacity.max(1);
        let (pcm, _) = broadcast::channel(capacity);
        let (eof, _) = broadcast::channel(capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AudioInner {
                queue,
                flow,
                decoder_factory,
                encoder_factory,
                channels: Mutex::new(Some(Channels { pcm, eof })),
                inbound: Mutex::new(None),
                shutdown,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the link's audio-out notifications and start decoding.
    ///
    /// Replaces any previous attachment. A fresh decoder session is created
    /// per attachment.
    pub async fn attach(&self, link: &Link) -> Result<()> {
        if self.is_disposed() {
            return Err(LinkError::Disposed);
        }
        let notifications = link.subscribe(CharacteristicRole::AudioOut).await?;
        let decoder = (self.inner.decoder_factory)()?;

        let (pcm, eof) = match lock(&self.inner.channels).as_ref() {
            Some(ch) => (ch.pcm.clone(), ch.eof.clone()),
            None => return Err(LinkError::Disposed),
        };

        let task = tokio::spawn(inbound_loop(
            notifications,
            InboundPipeline::new(decoder),
            self.inner.flow.clone(),
            pcm,
            eof,
        ));
        if let Some(previous) = lock(&self.inner.inbound).replace(task) {
            previous.abort();
        }
        tracing::debug!(device = %link.device(), "Audio transport attached");
        Ok(())
    }

    /// Stop the inbound task. Idempotent.
    pub fn detach(&self) {
        if let Some(task) = lock(&self.inner.inbound).take() {
            task.abort();
        }
    }

    /// Whether an inbound task is running.
    pub fn is_attached(&self) -> bool {
        lock(&self.inner.inbound)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// PCM @ 24 kHz decoded from now on.
    pub fn pcm24_stream(&self) -> Pcm24Stream {
        let rx = match lock(&self.inner.channels).as_ref() {
            Some(ch) => ch.pcm.subscribe(),
            // Already disposed: a receiver whose sender is gone yields `None`.
            None => broadcast::channel(1).1,
        };
        Pcm24Stream { rx }
    }

    /// EOF frames observed from now on.
    pub fn eof_signal(&self) -> EofSignal {
        let rx = match lock(&self.inner.channels).as_ref() {
            Some(ch) => ch.eof.subscribe(),
            None => broadcast::channel(1).1,
        };
        EofSignal { rx }
    }

    /// Encode and enqueue PCM @ 24 kHz from `source` until it ends or the
    /// transport is disposed.
    ///
    /// The trailing partial frame is zero-padded and sent when the source
    /// ends. Returns the number of packets enqueued.
    pub async fn send_pcm24_stream<S>(&self, source: S) -> Result<usize>
    where
        S: Stream<Item = Vec<i16>> + Send,
    {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(LinkError::Disposed);
        }
        let mut pipeline = OutboundPipeline::new((self.inner.encoder_factory)()?);
        let mut sent = 0;
        let mut source = std::pin::pin!(source);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Outbound audio stopped by dispose");
                        break;
                    }
                }
                chunk = source.next() => match chunk {
                    Some(chunk) => {
                        for packet in pipeline.push_pcm24(&chunk) {
                            self.enqueue(&packet);
                            sent += 1;
                        }
                    }
                    None => {
                        if let Some(packet) = pipeline.finish() {
                            self.enqueue(&packet);
                            sent += 1;
                        }
                        break;
                    }
                },
            }
        }
        Ok(sent)
    }

    fn enqueue(&self, packet: &Bytes) {
        self.inner.queue.enqueue_packet(encode_audio_frame(packet));
    }

    /// Mark the end of an outbound utterance.
    pub fn send_eof(&self) {
        self.inner.queue.enqueue_eof();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Cancel the inbound task and any running outbound stream and end all
    /// subscriber streams. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        self.detach();
        lock(&self.inner.channels).take();
        tracing::debug!("Audio transport disposed");
    }
}

async fn inbound_loop(
    mut notifications: mpsc::Receiver<Bytes>,
    mut pipeline: InboundPipeline,
    flow: FlowGate,
    pcm: broadcast::Sender<Arc<[i16]>>,
    eof: broadcast::Sender<()>,
) {
    while let Some(notification) = notifications.recv().await {
        let (frames, stats) = decode_notification_with_stats(&notification);
        if !stats.is_clean() {
            tracing::debug!(
                "Recovered from desync: {} unknown identifiers, truncated = {}",
                stats.skipped_identifiers,
                stats.truncated
            );
        }
        for frame in frames {
            match frame {
                Frame::Pause => flow.pause(),
                Frame::Resume => flow.resume(),
                Frame::Eof => {
                    let _ = eof.send(());
                }
                Frame::Audio(packet) => {
                    if let Some(samples) = pipeline.push_packet(&packet) {
                        let _ = pcm.send(samples.into());
                    }
                }
            }
        }
    }
    tracing::debug!("Audio notifications ended");
}
