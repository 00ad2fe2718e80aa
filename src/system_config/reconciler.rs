//! Configuration Reconciler
//!
//! Merges persisted overrides (or an operator supplied file) onto the
//! compiled defaults, validates and persists updates, pushes job concurrency
//! into the queue registry and publishes every new snapshot.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::keys::{get_path, set_path};
use super::stream::{ConfigChannel, ConfigSubscription};
use super::{
    FeatureFlag, ServerFeatures, SystemConfig, SystemConfigEntity, SystemConfigKey,
    SystemConfigRepository,
};
use crate::queue::{BaseJob, JobItem, JobRepository, QueueName};
use crate::types::{AppError, AppResult};

/// Extra rule a proposed configuration must pass before it is persisted.
/// Receives the proposed and the current configuration.
#[async_trait]
pub trait SystemConfigValidator: Send + Sync {
    async fn validate(&self, new: &SystemConfig, old: &SystemConfig) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> SystemConfigValidator for F
where
    F: Fn(&SystemConfig, &SystemConfig) -> anyhow::Result<()> + Send + Sync,
{
    async fn validate(&self, new: &SystemConfig, old: &SystemConfig) -> anyhow::Result<()> {
        self(new, old)
    }
}

struct Inner {
    repository: Arc<dyn SystemConfigRepository>,
    jobs: JobRepository,
    config_file: Option<PathBuf>,
    validators: RwLock<Vec<Arc<dyn SystemConfigValidator>>>,
    file_cache: Mutex<Option<SystemConfig>>,
    // Held for the whole of an update or refresh
    apply_lock: Mutex<()>,
    channel: ConfigChannel,
}

#[derive(Clone)]
pub struct SystemConfigCore {
    inner: Arc<Inner>,
}

/// Non-owning handle, for job handlers that live in the queue registry the
/// core itself holds.
#[derive(Clone)]
pub struct WeakSystemConfigCore {
    inner: Weak<Inner>,
}

impl WeakSystemConfigCore {
    pub fn upgrade(&self) -> Option<SystemConfigCore> {
        self.inner.upgrade().map(|inner| SystemConfigCore { inner })
    }
}

impl SystemConfigCore {
    pub fn new(
        repository: Arc<dyn SystemConfigRepository>,
        jobs: JobRepository,
        config_file: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                jobs,
                config_file,
                validators: RwLock::new(Vec::new()),
                file_cache: Mutex::new(None),
                apply_lock: Mutex::new(()),
                channel: ConfigChannel::new(SystemConfig::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSystemConfigCore {
        WeakSystemConfigCore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn get_defaults(&self) -> SystemConfig {
        SystemConfig::default()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.config_file.is_some()
    }

    pub async fn get_config(&self) -> AppResult<SystemConfig> {
        self.load(false).await
    }

    pub fn add_validator<V>(&self, validator: V)
    where
        V: SystemConfigValidator + 'static,
    {
        self.inner
            .validators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(validator));
    }

    pub fn subscribe(&self) -> ConfigSubscription {
        self.inner.channel.subscribe()
    }

    /// Last published snapshot, without touching storage.
    pub fn current(&self) -> Arc<SystemConfig> {
        self.inner.channel.current()
    }

    /// Parse a raw configuration document and apply it.
    pub async fn update_config_value(&self, value: Value) -> AppResult<SystemConfig> {
        if self.is_read_only() {
            return Err(AppError::ReadOnlyConfig);
        }
        self.update_config(SystemConfig::from_value(value)?).await
    }

    pub async fn update_config(&self, config: SystemConfig) -> AppResult<SystemConfig> {
        if self.is_read_only() {
            return Err(AppError::ReadOnlyConfig);
        }

        let _guard = self.inner.apply_lock.lock().await;

        config.check()?;
        let current = self.load(false).await?;
        let validators: Vec<_> = self
            .inner
            .validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for validator in validators {
            if let Err(e) = validator.validate(&config, &current).await {
                warn!("Config update rejected: {}", e);
                return Err(AppError::Validation(e.to_string()));
            }
        }

        let (updates, deletes) = diff_from_defaults(&config)?;
        self.inner.repository.apply(&updates, &deletes).await?;
        info!(
            "Persisted config update ({} overrides, {} removed)",
            updates.len(),
            deletes.len()
        );

        let updated = self.load(true).await?;
        self.apply_concurrency(&updated);
        self.inner
            .jobs
            .queue(JobItem::SystemConfigChange(BaseJob::default()))
            .await?;
        self.inner.channel.publish(Arc::new(updated.clone()));

        Ok(updated)
    }

    /// Re-read storage (and the config file), push concurrency and publish.
    pub async fn refresh_config(&self) -> AppResult<bool> {
        let _guard = self.inner.apply_lock.lock().await;
        let config = self.load(true).await?;
        self.apply_concurrency(&config);
        self.inner.channel.publish(Arc::new(config));
        debug!("Refreshed system config");
        Ok(true)
    }

    pub async fn get_features(&self) -> AppResult<ServerFeatures> {
        let config = self.get_config().await?;
        Ok(ServerFeatures::from_config(&config, self.is_read_only()))
    }

    pub async fn has_feature(&self, feature: FeatureFlag) -> AppResult<bool> {
        Ok(self.get_features().await?.has(feature))
    }

    pub async fn require_feature(&self, feature: FeatureFlag) -> AppResult<()> {
        if self.has_feature(feature).await? {
            Ok(())
        } else {
            Err(AppError::FeatureDisabled(feature))
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    async fn load(&self, force: bool) -> AppResult<SystemConfig> {
        match &self.inner.config_file {
            Some(path) => {
                let mut cache = self.inner.file_cache.lock().await;
                if let (false, Some(config)) = (force, cache.as_ref()) {
                    return Ok(config.clone());
                }
                let config = self.load_from_file(path).await?;
                *cache = Some(config.clone());
                Ok(config)
            }
            None => self.load_from_repository().await,
        }
    }

    /// Stored overrides merged onto the defaults. An override that no longer
    /// fits its field is skipped so that an update can still replace it.
    async fn load_from_repository(&self) -> AppResult<SystemConfig> {
        let items: Vec<_> = self
            .inner
            .repository
            .load()
            .await?
            .into_iter()
            .filter(|item| !item.value.is_null())
            .collect();

        let defaults = defaults_value()?;
        let mut value = defaults.clone();
        for item in &items {
            set_path(&mut value, item.key.as_str(), item.value.clone());
        }
        if let Ok(config) = serde_json::from_value(value) {
            return Ok(config);
        }

        let mut value = defaults.clone();
        for item in items {
            let mut single = defaults.clone();
            set_path(&mut single, item.key.as_str(), item.value.clone());
            match serde_json::from_value::<SystemConfig>(single) {
                Ok(_) => set_path(&mut value, item.key.as_str(), item.value),
                Err(e) => warn!("Ignoring stored config override {}: {}", item.key, e),
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn load_from_file(&self, path: &Path) -> AppResult<SystemConfig> {
        let bytes = self.inner.repository.read_file(path).await?;
        let file: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::InvalidConfigFile(format!("{}: {}", path.display(), e)))?;
        if !file.is_object() {
            return Err(AppError::InvalidConfigFile(format!(
                "{}: expected a JSON object",
                path.display()
            )));
        }

        let mut value = defaults_value()?;
        merge_values(&mut value, file);
        let config = SystemConfig::from_value(value).map_err(|e| match e {
            AppError::Validation(msg) => {
                AppError::InvalidConfigFile(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        info!("Loaded system config from {}", path.display());
        Ok(config)
    }

    fn apply_concurrency(&self, config: &SystemConfig) {
        for queue in QueueName::ALL {
            self.inner
                .jobs
                .set_concurrency(queue, config.job.concurrency(queue));
        }
    }
}

fn defaults_value() -> AppResult<Value> {
    Ok(serde_json::to_value(SystemConfig::default())?)
}

/// Split a configuration into overrides to store and keys to drop. A field
/// equal to its default, null or an empty string is not stored.
fn diff_from_defaults(
    config: &SystemConfig,
) -> AppResult<(Vec<SystemConfigEntity>, Vec<SystemConfigKey>)> {
    let defaults = defaults_value()?;
    let proposed = serde_json::to_value(config)?;

    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for key in SystemConfigKey::ALL.iter().copied() {
        let value = get_path(&proposed, key.as_str());
        let default = get_path(&defaults, key.as_str());
        match value {
            None | Some(Value::Null) => deletes.push(key),
            Some(Value::String(s)) if s.is_empty() => deletes.push(key),
            Some(value) if Some(value) == default => deletes.push(key),
            Some(value) => updates.push(SystemConfigEntity::new(key, value.clone())),
        }
    }
    Ok((updates, deletes))
}

/// Deep merge `overlay` into `base`. Objects merge key by key, anything else
/// replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
