use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::highlight::HighlightRecord;
use crate::domain::ids::{CommunityId, MessageId};
use crate::errors::{PersistenceError, StoreLoadError};

/// Source message id to highlight message id, for one community.
pub type CommunityHighlights = BTreeMap<MessageId, MessageId>;

/// On-disk shape: `{ "<community>": { "<source message>": "<highlight message>" } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StarboardData(pub BTreeMap<CommunityId, CommunityHighlights>);

impl StarboardData {
    pub fn community(&self, community_id: &CommunityId) -> Option<&CommunityHighlights> {
        self.0.get(community_id)
    }

    pub fn record_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }
}

/// Owned, file-backed highlight mapping.
///
/// The whole mapping lives in memory and every mutation rewrites the whole file
/// through a temporary file and an atomic rename. The in-memory map is updated before
/// the write, so a failed write leaves memory ahead of disk until the next successful
/// mutation. The mapping stays locked until the rewrite finishes; the file I/O itself
/// runs on the blocking pool.
#[derive(Debug)]
pub struct HighlightStore {
    path: PathBuf,
    data: Mutex<StarboardData>,
}

impl HighlightStore {
    /// Loads an existing store. A missing or unparsable file is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreLoadError> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Err(StoreLoadError::Missing(path));
            }
            Err(source) => return Err(StoreLoadError::Read { path, source }),
        };

        let data: StarboardData = serde_json::from_str(&raw)
            .map_err(|source| StoreLoadError::Corrupt { path: path.clone(), source })?;

        info!(
            event_name = "system.store.loaded",
            path = %path.display(),
            communities = data.0.len(),
            records = data.record_count(),
            "highlight store loaded"
        );

        Ok(Self { path, data: Mutex::new(data) })
    }

    /// Like [`HighlightStore::load`], but writes an empty store first when the file does
    /// not exist yet. A corrupt file is still an error.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, StoreLoadError> {
        let path = path.into();
        if !path.exists() {
            info!(
                event_name = "system.store.initialized",
                path = %path.display(),
                "highlight store missing; writing empty store"
            );
            write_atomic(&path, &encode(&StarboardData::default())?)?;
        }
        Self::load(path)
    }

    /// Creates a store at `path` holding `data`, overwriting whatever is there.
    pub fn create(path: impl Into<PathBuf>, data: StarboardData) -> Result<Self, PersistenceError> {
        let path = path.into();
        write_atomic(&path, &encode(&data)?)?;
        Ok(Self { path, data: Mutex::new(data) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(
        &self,
        community_id: &CommunityId,
        source_message_id: &MessageId,
    ) -> Option<MessageId> {
        self.data
            .lock()
            .await
            .0
            .get(community_id)
            .and_then(|records| records.get(source_message_id))
            .cloned()
    }

    pub async fn record(
        &self,
        community_id: &CommunityId,
        source_message_id: &MessageId,
    ) -> Option<HighlightRecord> {
        self.get(community_id, source_message_id).await.map(|highlight_message_id| {
            HighlightRecord {
                community_id: community_id.clone(),
                source_message_id: source_message_id.clone(),
                highlight_message_id,
            }
        })
    }

    /// Registers an empty mapping for a community seen for the first time. Memory only.
    pub async fn ensure_community(&self, community_id: &CommunityId) {
        self.data.lock().await.0.entry(community_id.clone()).or_default();
    }

    pub async fn insert(&self, record: HighlightRecord) -> Result<(), PersistenceError> {
        let mut data = self.data.lock().await;
        data.0
            .entry(record.community_id)
            .or_default()
            .insert(record.source_message_id, record.highlight_message_id);
        self.rewrite(&data).await
    }

    /// Rewrites the file without changing the mapping.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let data = self.data.lock().await;
        self.rewrite(&data).await
    }

    pub async fn remove(
        &self,
        community_id: &CommunityId,
        source_message_id: &MessageId,
    ) -> Result<Option<MessageId>, PersistenceError> {
        let mut data = self.data.lock().await;
        let removed =
            data.0.get_mut(community_id).and_then(|records| records.remove(source_message_id));
        self.rewrite(&data).await?;
        Ok(removed)
    }

    pub async fn snapshot(&self) -> StarboardData {
        self.data.lock().await.clone()
    }

    /// Callers hold the data lock for the duration, so rewrites never interleave.
    async fn rewrite(&self, data: &StarboardData) -> Result<(), PersistenceError> {
        let encoded = encode(data)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &encoded))
            .await
            .map_err(|error| PersistenceError::Task(error.to_string()))?
    }
}

fn encode(data: &StarboardData) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(data).map_err(PersistenceError::Serialize)
}

fn write_atomic(path: &Path, encoded: &[u8]) -> Result<(), PersistenceError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_error = |source| PersistenceError::Write { path: path.to_path_buf(), source };

    let mut staged = NamedTempFile::new_in(directory).map_err(write_error)?;
    staged.write_all(encoded).map_err(write_error)?;
    staged.as_file().sync_all().map_err(write_error)?;
    staged.persist(path).map_err(|error| write_error(error.error))?;

    debug!(
        event_name = "system.store.flushed",
        path = %path.display(),
        bytes = encoded.len(),
        "highlight store rewritten"
    );
    Ok(())
}
