use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::db::{self, PgConfigRepository};
use crate::queue::{JobRepository, JobService};
use crate::storage_template;
use crate::system_config::{FileConfigRepository, SystemConfigCore, SystemConfigRepository};
use crate::types::AppResult;

/// Everything a running server shares: the queue registry, the config
/// reconciler and the job service built on both.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: JobRepository,
    pub system_config: SystemConfigCore,
    pub job_service: JobService,
}

impl AppState {
    /// Wire up storage, the registry and the reconciler. Handlers are bound
    /// separately through [`JobService::register_handlers`].
    pub async fn bootstrap(config: Config) -> AppResult<Self> {
        let repository: Arc<dyn SystemConfigRepository> = match &config.database {
            Some(database) => {
                let pool = db::create_pool(database).await?;
                db::run_migrations(&pool).await?;
                Arc::new(PgConfigRepository::new(pool))
            }
            None => {
                let storage = match &config.data_dir {
                    Some(dir) => FileConfigRepository::with_path(dir.clone()),
                    None => FileConfigRepository::new(),
                };
                info!("No DATABASE_URL set, storing config overrides in {:?}", storage.path());
                Arc::new(storage)
            }
        };

        Ok(Self::with_repository(config, repository))
    }

    pub fn with_repository(config: Config, repository: Arc<dyn SystemConfigRepository>) -> Self {
        let jobs = JobRepository::new();
        let system_config =
            SystemConfigCore::new(repository, jobs.clone(), config.config_file.clone());
        system_config.add_validator(storage_template::validate_storage_template);
        let job_service = JobService::new(jobs.clone(), system_config.clone());

        Self {
            config,
            jobs,
            system_config,
            job_service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_config::testing::InMemoryConfigRepository;
    use crate::system_config::SystemConfig;
    use crate::types::AppError;

    fn state() -> AppState {
        let config = Config {
            database: None,
            data_dir: None,
            config_file: None,
        };
        AppState::with_repository(config, Arc::new(InMemoryConfigRepository::new()))
    }

    #[tokio::test]
    async fn test_storage_template_validator_is_registered() {
        let state = state();
        let mut config = SystemConfig::default();
        config.storage_template.template = "{{y}}/{{MM}}".to_string();

        let result = state.system_config.update_config(config).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_state_shares_one_registry() {
        let state = state();
        state.system_config.refresh_config().await.unwrap();

        let status = state.job_service.get_all_jobs_status().await.unwrap();
        assert_eq!(status.len(), crate::queue::QueueName::COUNT);
        assert_eq!(
            state.jobs.get_concurrency(crate::queue::QueueName::VideoConversion),
            1
        );
    }
}
