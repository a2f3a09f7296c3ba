//! Write-ahead snapshots shared by both engines.
//!
//! Every externally visible mutation is committed through a [`Journal`] before the
//! engine call returns. A gateway that fails to store a blob fails the call, and the
//! engine keeps its previous state.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{EngineError, EngineResult, PersistenceError};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Usul,
    Swiss,
}

/// Versioned record of an engine's full state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBlob {
    pub kind: EngineKind,
    pub format_version: u32,
    /// Increases by one per committed mutation; 1 is the creation snapshot
    pub sequence: u64,
    pub payload: serde_json::Value,
}

impl SnapshotBlob {
    pub(crate) fn encode<T: Serialize>(
        kind: EngineKind,
        sequence: u64,
        state: &T,
    ) -> EngineResult<Self> {
        Ok(Self {
            kind,
            format_version: FORMAT_VERSION,
            sequence,
            payload: serde_json::to_value(state)?,
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, expected: EngineKind) -> EngineResult<T> {
        if self.kind != expected {
            return Err(EngineError::Snapshot(format!(
                "expected a {:?} snapshot, got {:?}",
                expected, self.kind
            )));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(EngineError::Snapshot(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Durable home for snapshots. `store` must not return until the blob is durable.
pub trait PersistenceGateway {
    fn store(&mut self, blob: &SnapshotBlob) -> Result<(), PersistenceError>;

    fn latest(&self) -> Result<Option<SnapshotBlob>, PersistenceError>;
}

/// Keeps the latest blob in memory. Clones share the same slot, so a test can keep a
/// handle while the engine owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    latest: Option<SnapshotBlob>,
    writes: usize,
    fail_writes: bool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().map(|s| s.writes).unwrap_or(0)
    }

    /// Makes every following `store` fail until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut slot) = self.inner.lock() {
            slot.fail_writes = fail;
        }
    }
}

impl PersistenceGateway for MemoryGateway {
    fn store(&mut self, blob: &SnapshotBlob) -> Result<(), PersistenceError> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        if slot.fail_writes {
            return Err(PersistenceError::Unavailable("writes disabled".to_string()));
        }
        slot.latest = Some(blob.clone());
        slot.writes += 1;
        Ok(())
    }

    fn latest(&self) -> Result<Option<SnapshotBlob>, PersistenceError> {
        let slot = self
            .inner
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(slot.latest.clone())
    }
}

/// One JSON file per engine, replaced atomically via a sibling temp file.
#[derive(Clone, Debug)]
pub struct FileGateway {
    path: PathBuf,
}

impl FileGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling of `path` with `.tmp` appended to the whole file name.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PersistenceGateway for FileGateway {
    fn store(&mut self, blob: &SnapshotBlob) -> Result<(), PersistenceError> {
        let tmp = self.temp_path();
        let mut file = File::create(&tmp)?;
        file.write_all(&blob.to_bytes()?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;

        // the rename is only durable once the directory entry is synced
        #[cfg(unix)]
        {
            let dir = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<SnapshotBlob>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(SnapshotBlob::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sequence bookkeeping plus the gateway, owned by one engine.
pub(crate) struct Journal {
    kind: EngineKind,
    sequence: u64,
    gateway: Box<dyn PersistenceGateway>,
}

impl Journal {
    pub(crate) fn new(kind: EngineKind, gateway: Box<dyn PersistenceGateway>) -> Self {
        Self {
            kind,
            sequence: 0,
            gateway,
        }
    }

    /// Adopts `blob` as the resume point, refusing it if the gateway already holds a
    /// newer one.
    pub(crate) fn resume(
        blob: &SnapshotBlob,
        gateway: Box<dyn PersistenceGateway>,
    ) -> EngineResult<Self> {
        if let Some(latest) = gateway.latest()? {
            if latest.kind == blob.kind && latest.sequence > blob.sequence {
                return Err(EngineError::Snapshot(format!(
                    "stale snapshot: sequence {} is behind stored sequence {}",
                    blob.sequence, latest.sequence
                )));
            }
        }
        Ok(Self {
            kind: blob.kind,
            sequence: blob.sequence,
            gateway,
        })
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Writes the next snapshot. The sequence only advances once the write succeeded.
    ///
    /// Refuses to write when the gateway holds a snapshot of this kind that this
    /// journal did not write last, i.e. another handle has moved on from the same
    /// resume point.
    pub(crate) fn commit<T: Serialize>(&mut self, state: &T) -> EngineResult<u64> {
        if let Some(latest) = self.gateway.latest()? {
            if latest.kind == self.kind && latest.sequence != self.sequence {
                warn!(
                    kind = ?self.kind,
                    sequence = self.sequence,
                    stored = latest.sequence,
                    "refusing to overwrite a snapshot written by another handle"
                );
                return Err(EngineError::StaleState(format!(
                    "gateway holds sequence {} but this engine is at {}",
                    latest.sequence, self.sequence
                )));
            }
        }
        let next = self.sequence + 1;
        let blob = SnapshotBlob::encode(self.kind, next, state)?;
        self.gateway.store(&blob)?;
        self.sequence = next;
        trace!(kind = ?self.kind, sequence = next, "snapshot committed");
        Ok(next)
    }

    pub(crate) fn current<T: Serialize>(&self, state: &T) -> EngineResult<SnapshotBlob> {
        SnapshotBlob::encode(self.kind, self.sequence, state)
    }
}
