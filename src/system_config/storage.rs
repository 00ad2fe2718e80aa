//! System Config Storage
//!
//! Persistence for configuration overrides. Only keys that differ from the
//! defaults are stored; the file backed store keeps them as one JSON object
//! of dotted key to value.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{SystemConfigEntity, SystemConfigKey};
use crate::types::AppResult;

const CONFIG_FILE: &str = "system-config.json";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemConfigRepository: Send + Sync {
    /// Every stored override.
    async fn load(&self) -> AppResult<Vec<SystemConfigEntity>>;

    /// Upsert `updates` and remove `deletes` as one write. Either both land
    /// or storage is left as it was.
    async fn apply(
        &self,
        updates: &[SystemConfigEntity],
        deletes: &[SystemConfigKey],
    ) -> AppResult<()>;

    /// Insert or replace each entity.
    async fn save_all(&self, items: &[SystemConfigEntity]) -> AppResult<()> {
        self.apply(items, &[]).await
    }

    async fn delete_keys(&self, keys: &[SystemConfigKey]) -> AppResult<()> {
        self.apply(&[], keys).await
    }

    /// Raw bytes of an operator supplied config file.
    async fn read_file(&self, path: &Path) -> AppResult<Vec<u8>> {
        Ok(fs::read(path).await?)
    }
}

/// Overrides stored in a JSON file under the data directory.
pub struct FileConfigRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConfigRepository {
    pub fn new() -> Self {
        // Use XDG data directory or fallback to current directory
        let base_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".local/share"))
                    .unwrap_or_else(|_| PathBuf::from("."))
            })
            .join("darkroom");

        Self::with_path(base_dir)
    }

    /// Create storage with custom path (useful for Docker/testing)
    pub fn with_path(base_dir: PathBuf) -> Self {
        Self {
            path: base_dir.join(CONFIG_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> AppResult<Map<String, Value>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Map::new());
        }
        let content = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    async fn write_map(&self, map: &Map<String, Value>) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(map)?;

        // Write next to the target, then swap it in
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl Default for FileConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemConfigRepository for FileConfigRepository {
    async fn load(&self) -> AppResult<Vec<SystemConfigEntity>> {
        let map = self.read_map().await?;
        let mut items = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.parse::<SystemConfigKey>() {
                Ok(key) => items.push(SystemConfigEntity { key, value }),
                Err(e) => warn!("Ignoring stored config override: {}", e),
            }
        }
        debug!("Loaded {} config overrides from {:?}", items.len(), self.path);
        Ok(items)
    }

    async fn apply(
        &self,
        updates: &[SystemConfigEntity],
        deletes: &[SystemConfigKey],
    ) -> AppResult<()> {
        if updates.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        let before = map.clone();
        for key in deletes {
            map.remove(key.as_str());
        }
        for item in updates {
            map.insert(item.key.as_str().to_string(), item.value.clone());
        }
        if map != before {
            self.write_map(&map).await?;
            info!(
                "Applied {} config overrides and {} removals to {:?}",
                updates.len(),
                deletes.len(),
                self.path
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().to_path_buf());

        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_delete_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().join("nested"));

        storage
            .save_all(&[
                SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 30),
                SystemConfigEntity::new(SystemConfigKey::TrashDays, 10),
            ])
            .await
            .unwrap();
        assert_ok!(
            storage
                .save_all(&[SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 28)])
                .await
        );

        let mut loaded = storage.load().await.unwrap();
        loaded.sort_by_key(|item| item.key);
        assert_eq!(
            loaded,
            vec![
                SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 28),
                SystemConfigEntity::new(SystemConfigKey::TrashDays, 10),
            ]
        );

        assert_ok!(storage.delete_keys(&[SystemConfigKey::FfmpegCrf]).await);
        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, vec![SystemConfigEntity::new(SystemConfigKey::TrashDays, 10)]);
    }

    #[tokio::test]
    async fn test_apply_upserts_and_deletes_in_one_write() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().to_path_buf());
        storage
            .save_all(&[
                SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 30),
                SystemConfigEntity::new(SystemConfigKey::TrashDays, 10),
            ])
            .await
            .unwrap();

        assert_ok!(
            storage
                .apply(
                    &[SystemConfigEntity::new(SystemConfigKey::OauthAutoLaunch, true)],
                    &[SystemConfigKey::FfmpegCrf, SystemConfigKey::FfmpegThreads],
                )
                .await
        );

        let content: Value = serde_json::from_slice(&fs::read(storage.path()).await.unwrap()).unwrap();
        assert_eq!(content, json!({ "trash.days": 10, "oauth.autoLaunch": true }));
        assert!(!storage.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_apply_leaves_file_alone_when_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().to_path_buf());
        fs::write(storage.path(), b"{ broken").await.unwrap();

        assert_err!(
            storage
                .apply(
                    &[SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 30)],
                    &[SystemConfigKey::TrashDays],
                )
                .await
        );
        assert_eq!(fs::read(storage.path()).await.unwrap(), b"{ broken".to_vec());
    }

    #[tokio::test]
    async fn test_unknown_stored_keys_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().to_path_buf());
        let content = json!({ "ffmpeg.crf": 30, "ffmpeg.removedOption": true });
        fs::write(storage.path(), serde_json::to_vec(&content).unwrap())
            .await
            .unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, vec![SystemConfigEntity::new(SystemConfigKey::FfmpegCrf, 30)]);
    }

    #[tokio::test]
    async fn test_read_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileConfigRepository::with_path(temp_dir.path().to_path_buf());
        let path = temp_dir.path().join("darkroom.json");
        fs::write(&path, b"{}").await.unwrap();

        assert_eq!(storage.read_file(&path).await.unwrap(), b"{}".to_vec());
        assert_err!(storage.read_file(&temp_dir.path().join("missing.json")).await);
    }
}
