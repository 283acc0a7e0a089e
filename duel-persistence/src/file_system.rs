use crate::store::RecordStore;
use async_trait::async_trait;
use duel_core::{DuelError, DuelResult, ParticipantId, SessionId, SessionRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const STATE_FILE: &str = "records.json";

/// On-disk layout: the record list plus a CRC32 of its JSON encoding.
#[derive(Serialize, Deserialize)]
struct StoredRecords {
    checksum: u32,
    records: Vec<SessionRecord>,
}

fn checksum(records: &[SessionRecord]) -> DuelResult<u32> {
    let encoded = serde_json::to_vec(records)
        .map_err(|e| DuelError::storage(format!("Failed to encode records: {}", e)))?;
    Ok(crc32fast::hash(&encoded))
}

/// File-based record store.
///
/// All records live in a single state file that is rewritten on every
/// mutation: written to a temporary file first, then atomically moved into
/// place. Reads are served from an in-memory copy loaded at startup.
#[derive(Debug)]
pub struct FileSystemRecordStore {
    state_file_path: PathBuf,
    records: RwLock<BTreeMap<SessionId, SessionRecord>>,
    write_lock: Mutex<()>,
}

impl FileSystemRecordStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    /// * `Storage` if the directory cannot be created, or the state file
    ///   cannot be read, fails to parse or fails its checksum
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> DuelResult<Self> {
        let data_dir = data_dir.as_ref();

        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await.map_err(|e| {
                DuelError::storage(format!("Failed to create data directory: {}", e))
            })?;
        }

        let state_file_path = data_dir.join(STATE_FILE);
        let records = Self::load(&state_file_path).await?;
        info!(
            "Opened record store at {} with {} records",
            state_file_path.display(),
            records.len()
        );

        Ok(Self {
            state_file_path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    async fn load(path: &Path) -> DuelResult<BTreeMap<SessionId, SessionRecord>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(DuelError::storage(format!(
                    "Failed to read state file: {}",
                    e
                )))
            }
        };

        let stored: StoredRecords = serde_json::from_slice(&data)
            .map_err(|e| DuelError::storage(format!("Corrupt state file: {}", e)))?;
        let expected = checksum(&stored.records)?;
        if stored.checksum != expected {
            return Err(DuelError::storage(format!(
                "State file checksum mismatch: stored {:08x}, computed {:08x}",
                stored.checksum, expected
            )));
        }

        Ok(stored
            .records
            .into_iter()
            .map(|record| (record.session_id.clone(), record))
            .collect())
    }

    async fn persist(&self, records: &BTreeMap<SessionId, SessionRecord>) -> DuelResult<()> {
        let records: Vec<SessionRecord> = records.values().cloned().collect();
        let stored = StoredRecords {
            checksum: checksum(&records)?,
            records,
        };
        let data = serde_json::to_vec_pretty(&stored)
            .map_err(|e| DuelError::storage(format!("Failed to encode state file: {}", e)))?;

        let temp_file_path = self.state_file_path.with_extension("tmp");
        fs::write(&temp_file_path, data).await.map_err(|e| {
            DuelError::storage(format!("Failed to write state to temp file: {}", e))
        })?;
        fs::rename(&temp_file_path, &self.state_file_path)
            .await
            .map_err(|e| {
                DuelError::storage(format!("Failed to rename temp file to state file: {}", e))
            })?;
        Ok(())
    }

    /// Apply `change` to a copy of the records, write it out, then publish it.
    ///
    /// The in-memory copy only changes once the file is in place, so a failed
    /// write leaves readers on the last durable state.
    async fn mutate<T, F>(&self, change: F) -> DuelResult<T>
    where
        F: FnOnce(&mut BTreeMap<SessionId, SessionRecord>) -> T + Send,
        T: Send,
    {
        let _write = self.write_lock.lock().await;
        let mut next = self.records.read().clone();
        let result = change(&mut next);
        self.persist(&next).await?;
        *self.records.write() = next;
        Ok(result)
    }

    pub fn path(&self) -> &Path {
        &self.state_file_path
    }
}

#[async_trait]
impl RecordStore for FileSystemRecordStore {
    async fn get(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn put(&self, record: &SessionRecord) -> DuelResult<()> {
        let record = record.clone();
        debug!("Writing session {}", record.session_id);
        self.mutate(move |records| {
            records.insert(record.session_id.clone(), record);
        })
        .await
    }

    async fn delete(&self, session_id: &SessionId) -> DuelResult<bool> {
        if !self.records.read().contains_key(session_id) {
            return Ok(false);
        }
        self.mutate(|records| records.remove(session_id).is_some())
            .await
    }

    async fn find_by_participant(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        let records = self.records.read();
        Ok(records
            .values()
            .find(|record| record.has_participant(participant))
            .map(|record| record.session_id.clone()))
    }

    async fn count(&self) -> DuelResult<usize> {
        Ok(self.records.read().len())
    }
}
