//! Request/response file protocol over file-control, data over file-out.
//!
//! ```text
//! host                                   device
//!  │ write  file-control  [0x03][path\0]?  │
//!  │ (100 ms)                              │
//!  │ read   file-control ◄──── [0x02][count:u16 BE][entries...]
//!  │                                       │
//!  │ write  file-control  [0x01][path\0]   │
//!  │        file-out      ◄──── [seq:u16 LE][data]   (any order, repeated)
//!  │ read   file-control  every 200 ms ◄── [0x04] complete / [0x05] error
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FileEntry, FileStore, TransferSession};
use crate::config::FileConfig;
use crate::error::{Result, TransferError};
use crate::protocol::file_control::{
    encode_list_files, encode_start_send_file, parse_list_response, ControlStatus,
};
use crate::protocol::FileChunk;
use crate::transport::{current_link, CharacteristicRole, Link, LinkSlot};

type SharedSession = Arc<Mutex<Option<TransferSession>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the open session when the request ends, however it ends.
struct SessionGuard {
    session: SharedSession,
}

impl SessionGuard {
    fn take(&self) -> Option<TransferSession> {
        lock(&self.session).take()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.session).take();
    }
}

struct FileInner {
    links: LinkSlot,
    config: FileConfig,
    store: FileStore,
    session: SharedSession,
    chunk_task: Mutex<Option<JoinHandle<()>>>,
}

/// File transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FileTransport {
    inner: Arc<FileInner>,
}

impl FileTransport {
    pub fn new(links: LinkSlot, config: FileConfig, store: FileStore) -> Self {
        Self {
            inner: Arc::new(FileInner {
                links,
                config,
                store,
                session: Arc::new(Mutex::new(None)),
                chunk_task: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.inner.store
    }

    /// Subscribe to file-out and collect chunks into the open session.
    pub async fn attach(&self, link: &Link) -> Result<()> {
        if !link.has(CharacteristicRole::FileOut) {
            tracing::debug!("No file-out characteristic; file transfer unavailable");
            return Ok(());
        }
        let notifications = link.subscribe(CharacteristicRole::FileOut).await?;
        let task = tokio::spawn(chunk_loop(notifications, self.inner.session.clone()));
        if let Some(previous) = lock(&self.inner.chunk_task).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop collecting chunks. Idempotent.
    pub fn detach(&self) {
        if let Some(task) = lock(&self.inner.chunk_task).take() {
            task.abort();
        }
    }

    /// Whether a transfer session is open.
    pub fn is_transferring(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    fn link(&self) -> Option<Link> {
        current_link(&self.inner.links)
    }

    /// List a directory on the device.
    ///
    /// Any failure (not connected, radio error, malformed response) yields an
    /// empty list.
    pub async fn list_files(&self, path: Option<&str>) -> Vec<FileEntry> {
        let Some(link) = self.link() else {
            tracing::debug!("list_files while disconnected");
            return Vec::new();
        };
        match self.try_list_files(&link, path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Listing files failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_list_files(&self, link: &Link, path: Option<&str>) -> Result<Vec<FileEntry>> {
        link.write(CharacteristicRole::FileControl, encode_list_files(path))
            .await?;
        tokio::time::sleep(self.inner.config.list_delay()).await;
        let response = link.read(CharacteristicRole::FileControl).await?;
        Ok(parse_list_response(&response))
    }

    /// Pull one file and persist it.
    ///
    /// Only one transfer may be open at a time. Polls file-control until the
    /// device reports completion or failure; if polling is exhausted, whatever
    /// chunks arrived are reassembled. No file is written when reassembly
    /// finds a gap.
    pub async fn request_file(&self, path: &str) -> std::result::Result<FileEntry, TransferError> {
        let link = self
            .link()
            .ok_or_else(|| TransferError::Request("not connected".into()))?;

        let guard = {
            let mut session = lock(&self.inner.session);
            if session.is_some() {
                return Err(TransferError::AlreadyActive);
            }
            *session = Some(TransferSession::new(path));
            SessionGuard {
                session: self.inner.session.clone(),
            }
        };

        link.write(CharacteristicRole::FileControl, encode_start_send_file(path))
            .await
            .map_err(|e| TransferError::Request(e.to_string()))?;
        tracing::info!("Requested {}", path);

        let config = &self.inner.config;
        for attempt in 1..=config.max_poll_attempts {
            tokio::time::sleep(config.poll_interval()).await;
            let response = match link.read(CharacteristicRole::FileControl).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("Poll {} failed: {}", attempt, e);
                    continue;
                }
            };
            match ControlStatus::from_response(&response) {
                ControlStatus::Complete => return self.complete(&guard).await,
                ControlStatus::Failed => {
                    tracing::warn!("Device reported an error transferring {}", path);
                    return Err(TransferError::DeviceReported);
                }
                ControlStatus::Pending => {}
            }
        }

        let received = lock(&self.inner.session)
            .as_ref()
            .map_or(0, TransferSession::chunk_count);
        if received == 0 {
            tracing::warn!("Transfer of {} timed out", path);
            return Err(TransferError::TimedOut);
        }
        tracing::warn!(
            "Transfer of {} never completed; reassembling {} chunks",
            path,
            received
        );
        self.complete(&guard).await
    }

    async fn complete(&self, guard: &SessionGuard) -> std::result::Result<FileEntry, TransferError> {
        let session = guard.take().ok_or(TransferError::Empty)?;
        let data = session.reassemble()?;
        let local = self
            .inner
            .store
            .persist(session.file_name(), &data)
            .await
            .map_err(|e| TransferError::Persist(e.to_string()))?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("Received {} ({} bytes)", name, data.len());
        Ok(FileEntry::persisted(name, data.len() as u64, local))
    }
}

async fn chunk_loop(mut notifications: mpsc::Receiver<Bytes>, session: SharedSession) {
    while let Some(notification) = notifications.recv().await {
        let Some(chunk) = FileChunk::decode(&notification) else {
            tracing::debug!("Ignoring {}-byte file notification", notification.len());
            continue;
        };
        let mut session = lock(&session);
        match session.as_mut() {
            Some(open) => {
                let sequence = chunk.sequence;
                if open.insert(chunk) {
                    tracing::debug!("Chunk {} received again; keeping the latest", sequence);
                }
            }
            None => tracing::debug!("Dropping chunk {} with no open transfer", chunk.sequence),
        }
    }
    tracing::debug!("File notifications ended");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;
    use crate::config::ServiceLayout;
    use crate::protocol::file_control::{encode_list_response, Opcode};
    use crate::transport::memory::MemoryRadio;
    use crate::transport::{DeviceId, Radio};

    struct Fixture {
        radio: Arc<MemoryRadio>,
        layout: ServiceLayout,
        files: FileTransport,
        _links: watch::Sender<Option<Link>>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(config: FileConfig) -> Fixture {
        let layout = ServiceLayout::default();
        let radio = Arc::new(MemoryRadio::new(&layout));
        let device = DeviceId::new("dev");
        radio.connect(&device).await.unwrap();
        let bindings: HashMap<_, _> = CharacteristicRole::ALL
            .iter()
            .map(|r| (*r, layout.uuid_for(*r)))
            .collect();
        let link = Link::new(device, radio.clone(), bindings);
        let (tx, rx) = watch::channel(Some(link.clone()));
        let dir = tempfile::tempdir().unwrap();
        let files = FileTransport::new(rx, config, FileStore::new(dir.path()));
        files.attach(&link).await.unwrap();
        Fixture {
            radio,
            layout,
            files,
            _links: tx,
            _dir: dir,
        }
    }

    fn chunk(sequence: u16, data: &[u8]) -> Bytes {
        FileChunk {
            sequence,
            data: Bytes::copy_from_slice(data),
        }
        .encode()
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_files() {
        let f = fixture(FileConfig::default()).await;
        f.radio.push_read(
            f.layout.file_control,
            encode_list_response(&[FileEntry::listed("a.opus", 12, false)]),
        );
        let entries = f.files.list_files(Some("/rec")).await;
        assert_eq!(entries, vec![FileEntry::listed("a.opus", 12, false)]);

        let writes = f.radio.writes_to(f.layout.file_control);
        assert_eq!(&writes[0].data[..], b"\x03/rec\0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_files_failure_is_empty() {
        let f = fixture(FileConfig::default()).await;
        assert!(f.files.list_files(None).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_file_completes() {
        let f = fixture(FileConfig::default()).await;
        let requester = f.files.clone();
        let task = tokio::spawn(async move { requester.request_file("/rec/a.opus").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.files.is_transferring());
        f.radio.notify(f.layout.file_out, chunk(1, b"cd"));
        f.radio.notify(f.layout.file_out, chunk(0, b"ab"));
        f.radio.push_read(f.layout.file_control, vec![0x00]);
        f.radio
            .push_read(f.layout.file_control, vec![Opcode::TransferComplete as u8]);

        let entry = task.await.unwrap().unwrap();
        assert_eq!(entry.name, "a.opus");
        assert_eq!(entry.size, 4);
        let path = entry.local_path.unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"abcd");
        assert!(!f.files.is_transferring());

        let writes = f.radio.writes_to(f.layout.file_control);
        assert_eq!(&writes[0].data[..], b"\x01/rec/a.opus\0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_rejected() {
        let f = fixture(FileConfig::default()).await;
        f.radio
            .set_read(f.layout.file_control, vec![Opcode::TransferError as u8]);
        let requester = f.files.clone();
        let first = tokio::spawn(async move { requester.request_file("a").await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            f.files.request_file("b").await,
            Err(TransferError::AlreadyActive)
        );
        assert_eq!(first.await.unwrap(), Err(TransferError::DeviceReported));
        assert!(!f.files.is_transferring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_chunks() {
        let config = FileConfig {
            max_poll_attempts: 3,
            ..FileConfig::default()
        };
        let f = fixture(config).await;
        f.radio.set_read(f.layout.file_control, vec![0x00]);
        assert_eq!(
            f.files.request_file("a").await,
            Err(TransferError::TimedOut)
        );
        assert!(!f.files.is_transferring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_chunks_is_best_effort() {
        let config = FileConfig {
            max_poll_attempts: 3,
            ..FileConfig::default()
        };
        let f = fixture(config).await;
        f.radio.set_read(f.layout.file_control, vec![0x00]);
        let requester = f.files.clone();
        let task = tokio::spawn(async move { requester.request_file("x/b.txt").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.radio.notify(f.layout.file_out, chunk(0, b"hi"));

        let entry = task.await.unwrap().unwrap();
        assert_eq!(entry.name, "b.txt");
        assert_eq!(entry.size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_persists_nothing() {
        let f = fixture(FileConfig::default()).await;
        let requester = f.files.clone();
        let task = tokio::spawn(async move { requester.request_file("gap.bin").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        for seq in [0u16, 1, 3] {
            f.radio.notify(f.layout.file_out, chunk(seq, b"z"));
        }
        f.radio
            .push_read(f.layout.file_control, vec![Opcode::TransferComplete as u8]);

        assert_eq!(
            task.await.unwrap(),
            Err(TransferError::MissingChunk { sequence: 2 })
        );
        assert!(!f.files.store().root().join("gap.bin").exists());
        assert!(!f.files.is_transferring());
    }

    #[tokio::test]
    async fn test_request_while_disconnected() {
        let (_tx, rx) = watch::channel(None);
        let files = FileTransport::new(rx, FileConfig::default(), FileStore::new("unused"));
        assert!(matches!(
            files.request_file("a").await,
            Err(TransferError::Request(_))
        ));
    }
}
