// File: harness/src/store.rs
//
// Record Store
//
// Whole-collection JSON snapshots keyed by file name. A write replaces the
// previous snapshot entirely (temp file, then rename); a read parses the whole
// file. There is no append or merge format.

use crate::error::{HarnessError, HarnessResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// On-disk envelope around a snapshot
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub saved_at: DateTime<Utc>,
    pub records: T,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path(name)).await.unwrap_or(false)
    }

    /// Replace the snapshot `name` with `records`, returning its path
    pub async fn write_snapshot<T: Serialize>(
        &self,
        name: &str,
        records: &T,
    ) -> HarnessResult<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let snapshot = Snapshot {
            saved_at: Utc::now(),
            records,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| HarnessError::Encoding(format!("cannot serialize {}: {}", name, e)))?;

        let path = self.path(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        Ok(path)
    }

    /// Parse the snapshot `name`
    ///
    /// # Errors
    ///
    /// - `NotFound` if no snapshot exists under that name
    /// - `Corrupt` if the file cannot be parsed as a snapshot of `T`
    pub async fn read_snapshot<T: DeserializeOwned>(&self, name: &str) -> HarnessResult<T> {
        let path = self.path(name);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HarnessError::NotFound { path })
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot<T> =
            serde_json::from_slice(&content).map_err(|e| HarnessError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(snapshot.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("nested"));

        let path = store.write_snapshot("nums.json", &vec![1u32, 2, 3]).await.unwrap();
        assert!(path.ends_with("nested/nums.json"));
        assert!(store.exists("nums.json").await);

        let nums: Vec<u32> = store.read_snapshot("nums.json").await.unwrap();
        assert_eq!(nums, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_corrupt_is_distinguished_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        let missing = store.read_snapshot::<Vec<u32>>("none.json").await.unwrap_err();
        assert!(matches!(missing, HarnessError::NotFound { .. }));

        std::fs::write(dir.path().join("bad.json"), b"{\"saved_at\": 12").unwrap();
        let corrupt = store.read_snapshot::<Vec<u32>>("bad.json").await.unwrap_err();
        assert!(matches!(corrupt, HarnessError::Corrupt { .. }));

        // valid JSON of the wrong shape is corrupt too
        store.write_snapshot("shape.json", &"text").await.unwrap();
        let wrong = store.read_snapshot::<Vec<u32>>("shape.json").await.unwrap_err();
        assert!(matches!(wrong, HarnessError::Corrupt { .. }));
    }
}
