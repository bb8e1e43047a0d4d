//! Flat-file binding: one pretty-printed camelCase JSON document per NPC.
//!
//! `save_all` writes file by file and is not atomic across files; a failure
//! part-way leaves the earlier files updated.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{keep_valid, NpcStorage, StorageError, StorageKind};
use crate::game::types::NpcRecord;

const KIND: StorageKind = StorageKind::Json;

#[derive(Debug, Clone)]
pub struct JsonStorage {
    dir: PathBuf,
}

/// Map an id to a safe file stem. Anything that could escape the folder or
/// is rejected by common filesystems becomes `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

impl JsonStorage {
    /// Open (creating if needed) the record folder.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    fn encode(record: &NpcRecord) -> Result<String, StorageError> {
        serde_json::to_string_pretty(record).map_err(|e| StorageError::corrupt(&record.id, e))
    }

    fn decode(name: &str, json: &str) -> Result<NpcRecord, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::corrupt(name, e))
    }

    /// Write through a temp file so a crash never leaves half a record.
    async fn write_record(&self, record: &NpcRecord) -> Result<(), StorageError> {
        let json = Self::encode(record)?;
        let path = self.record_path(&record.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        Ok(())
    }
}

#[async_trait]
impl NpcStorage for JsonStorage {
    fn kind(&self) -> StorageKind {
        KIND
    }

    async fn load_all(&self) -> Result<Vec<NpcRecord>, StorageError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;

        let mut rows = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let row = match fs::read_to_string(&path).await {
                Ok(json) => Self::decode(&name, &json),
                Err(e) => Err(StorageError::corrupt(&name, e)),
            };
            rows.push(row);
        }
        Ok(keep_valid(KIND, rows))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<NpcRecord>, StorageError> {
        let path = self.record_path(id);
        match fs::read_to_string(&path).await {
            Ok(json) => Self::decode(id, &json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::unavailable(KIND, e)),
        }
    }

    async fn save(&self, record: &NpcRecord) -> Result<(), StorageError> {
        self.write_record(record).await
    }

    async fn save_all(&self, records: &[NpcRecord]) -> Result<(), StorageError> {
        for record in records {
            self.write_record(record).await?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::unavailable(KIND, e)),
        }
    }
}
