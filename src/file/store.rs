use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{encode_wav, WavSpec};
use crate::error::Result;

/// Local storage directory for pulled files and recorded audio.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Keep only the final path segment; reject names that would escape `root`.
fn sanitize(name: &str) -> Option<&str> {
    let name = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a new `<kind>_<timestamp>.<ext>` artifact.
    pub fn artifact_path(&self, kind: &str, ext: &str) -> PathBuf {
        self.root
            .join(format!("{}_{}.{}", kind, timestamp_millis(), ext))
    }

    /// Write a pulled file under its device-side name.
    ///
    /// Names without a usable final segment fall back to
    /// `file_<timestamp>.bin`. An existing file of the same name is replaced.
    pub async fn persist(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = match sanitize(name) {
            Some(name) => self.root.join(name),
            None => self.artifact_path("file", "bin"),
        };
        tokio::fs::write(&path, data).await?;
        tracing::debug!("Persisted {} bytes to {}", data.len(), path.display());
        Ok(path)
    }

    /// Write PCM samples as `<kind>_<timestamp>.wav`.
    pub async fn write_wav(&self, kind: &str, spec: &WavSpec, samples: &[i16]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.artifact_path(kind, "wav");
        tokio::fs::write(&path, encode_wav(spec, samples)).await?;
        tracing::debug!("Wrote {} samples to {}", samples.len(), path.display());
        Ok(path)
    }
}
