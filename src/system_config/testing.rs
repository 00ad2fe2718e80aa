//! In-memory config repository for tests that need storage to keep state
//! between calls. Call expectations use `MockSystemConfigRepository`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{SystemConfigEntity, SystemConfigKey, SystemConfigRepository};
use crate::types::AppResult;

#[derive(Default)]
pub(crate) struct InMemoryConfigRepository {
    overrides: Mutex<BTreeMap<SystemConfigKey, Value>>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryConfigRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_overrides(items: Vec<SystemConfigEntity>) -> Self {
        let repository = Self::new();
        for item in items {
            repository.set_override(item);
        }
        repository
    }

    pub(crate) fn set_override(&self, item: SystemConfigEntity) {
        self.overrides.lock().unwrap().insert(item.key, item.value);
    }

    pub(crate) fn put_file(&self, path: &str, content: Value) {
        self.put_raw_file(path, serde_json::to_vec(&content).unwrap());
    }

    pub(crate) fn put_raw_file(&self, path: &str, content: Vec<u8>) {
        self.files.lock().unwrap().insert(PathBuf::from(path), content);
    }

    pub(crate) fn overrides(&self) -> Vec<SystemConfigEntity> {
        self.overrides
            .lock()
            .unwrap()
            .iter()
            .map(|(key, value)| SystemConfigEntity::new(*key, value.clone()))
            .collect()
    }
}

#[async_trait]
impl SystemConfigRepository for InMemoryConfigRepository {
    async fn load(&self) -> AppResult<Vec<SystemConfigEntity>> {
        Ok(self.overrides())
    }

    async fn apply(
        &self,
        updates: &[SystemConfigEntity],
        deletes: &[SystemConfigKey],
    ) -> AppResult<()> {
        let mut overrides = self.overrides.lock().unwrap();
        for key in deletes {
            overrides.remove(key);
        }
        for item in updates {
            overrides.insert(item.key, item.value.clone());
        }
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> AppResult<Vec<u8>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(content) => Ok(content.clone()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
            .into()),
        }
    }
}
