//! Job service
//!
//! Binds one dispatcher per queue that routes each job to the handler
//! registered for its name, queues follow-up jobs when an asset job
//! succeeds and turns operator commands into queue operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::jobs::{BaseJob, BulkEntityJob, EntityJob, JobItem, JobName, JobSource, QueueName};
use super::repository::{
    JobCounts, JobItemHandler, JobRepository, QueueStatus, WeakJobRepository,
};
use crate::system_config::{FeatureFlag, SystemConfigCore};
use crate::types::{AppError, AppResult};

pub type JobHandlers = HashMap<JobName, Arc<dyn JobItemHandler>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCommand {
    Start,
    Pause,
    Resume,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCommandDto {
    pub command: JobCommand,
    #[serde(default)]
    pub force: bool,
}

impl JobCommandDto {
    pub fn new(command: JobCommand) -> Self {
        Self {
            command,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusDto {
    pub job_counts: JobCounts,
    pub queue_status: QueueStatus,
}

#[derive(Clone)]
pub struct JobService {
    jobs: JobRepository,
    config: SystemConfigCore,
}

impl JobService {
    pub fn new(jobs: JobRepository, config: SystemConfigCore) -> Self {
        Self { jobs, config }
    }

    /// Bind every queue to a dispatcher over `handlers`, using the configured
    /// concurrency. `system-config-change` refreshes the system config unless
    /// a handler for it is supplied.
    pub async fn register_handlers(&self, mut handlers: JobHandlers) -> AppResult<()> {
        let config = self.config.get_config().await?;

        if !handlers.contains_key(&JobName::SystemConfigChange) {
            let core = self.config.downgrade();
            let refresh: Arc<dyn JobItemHandler> = Arc::new(move |_item: JobItem| {
                let core = core.upgrade();
                async move {
                    match core {
                        Some(core) => Ok::<_, anyhow::Error>(core.refresh_config().await?),
                        None => Ok(false),
                    }
                }
            });
            handlers.insert(JobName::SystemConfigChange, refresh);
        }

        let handlers = Arc::new(handlers);
        for queue in QueueName::ALL {
            let dispatcher = QueueDispatcher {
                handlers: Arc::clone(&handlers),
                jobs: self.jobs.downgrade(),
            };
            self.jobs
                .add_handler(queue, config.job.concurrency(queue), dispatcher)?;
        }

        info!("Registered {} job handlers", handlers.len());
        Ok(())
    }

    pub async fn handle_command(
        &self,
        queue: QueueName,
        dto: JobCommandDto,
    ) -> AppResult<JobStatusDto> {
        info!("Executing job command: queue={}, command={:?}", queue, dto.command);

        match dto.command {
            JobCommand::Start => self.start(queue, dto.force).await?,
            JobCommand::Pause => self.jobs.pause(queue).await?,
            JobCommand::Resume => self.jobs.resume(queue).await?,
            JobCommand::Empty => self.jobs.empty(queue).await?,
        }

        self.get_job_status(queue).await
    }

    pub async fn get_job_status(&self, queue: QueueName) -> AppResult<JobStatusDto> {
        Ok(JobStatusDto {
            job_counts: self.jobs.get_job_counts(queue).await?,
            queue_status: self.jobs.get_queue_status(queue).await?,
        })
    }

    pub async fn get_all_jobs_status(&self) -> AppResult<BTreeMap<QueueName, JobStatusDto>> {
        let mut status = BTreeMap::new();
        for queue in QueueName::ALL {
            status.insert(queue, self.get_job_status(queue).await?);
        }
        Ok(status)
    }

    async fn start(&self, queue: QueueName, force: bool) -> AppResult<()> {
        if self.jobs.get_queue_status(queue).await?.is_active {
            return Err(AppError::JobAlreadyRunning(queue));
        }

        let base = BaseJob::forced(force);
        let item = match queue {
            QueueName::VideoConversion => JobItem::QueueVideoConversion(base),
            QueueName::StorageTemplateMigration => {
                JobItem::StorageTemplateMigration(BaseJob::default())
            }
            QueueName::Migration => JobItem::QueueMigration(BaseJob::default()),
            QueueName::ObjectTagging => {
                self.config.require_feature(FeatureFlag::TagImage).await?;
                JobItem::QueueObjectTagging(base)
            }
            QueueName::ClipEncoding => {
                self.config.require_feature(FeatureFlag::ClipEncode).await?;
                JobItem::QueueEncodeClip(base)
            }
            QueueName::MetadataExtraction => JobItem::QueueMetadataExtraction(base),
            QueueName::Sidecar => {
                self.config.require_feature(FeatureFlag::Sidecar).await?;
                JobItem::QueueSidecar(base)
            }
            QueueName::ThumbnailGeneration => JobItem::QueueGenerateThumbnails(base),
            QueueName::RecognizeFaces => {
                self.config
                    .require_feature(FeatureFlag::FacialRecognition)
                    .await?;
                JobItem::QueueRecognizeFaces(base)
            }
            QueueName::Library => JobItem::LibraryQueueScanAll(base),
            QueueName::BackgroundTask | QueueName::Search => {
                return Err(AppError::InvalidCommand(format!("Cannot start {} queue", queue)));
            }
        };

        self.jobs.queue(item).await
    }
}

/// Jobs to queue after `item` succeeded.
fn follow_ups(item: &JobItem) -> Vec<JobItem> {
    match item {
        JobItem::SidecarSync(data) | JobItem::SidecarDiscovery(data) => {
            vec![JobItem::MetadataExtraction(EntityJob::new(data.id))]
        }
        JobItem::MetadataExtraction(data) => vec![
            JobItem::LinkLivePhotos(data.clone()),
            search_index(data),
        ],
        JobItem::LinkLivePhotos(data) => {
            vec![JobItem::StorageTemplateMigrationSingle(data.clone())]
        }
        JobItem::StorageTemplateMigrationSingle(data) if data.source == Some(JobSource::Upload) => {
            vec![JobItem::GenerateJpegThumbnail(data.clone())]
        }
        JobItem::GenerateJpegThumbnail(data) => vec![
            JobItem::GenerateWebpThumbnail(data.clone()),
            JobItem::GenerateThumbhashThumbnail(data.clone()),
            JobItem::ClassifyImage(data.clone()),
            JobItem::EncodeClip(data.clone()),
            JobItem::RecognizeFaces(data.clone()),
        ],
        JobItem::ClassifyImage(data) | JobItem::EncodeClip(data) | JobItem::RecognizeFaces(data) => {
            vec![search_index(data)]
        }
        _ => Vec::new(),
    }
}

fn search_index(data: &EntityJob) -> JobItem {
    JobItem::SearchIndexAsset(BulkEntityJob {
        ids: vec![data.id],
        force: None,
    })
}

/// Handler bound to a queue; routes each job by name. Holds the registry
/// weakly since the registry owns it.
struct QueueDispatcher {
    handlers: Arc<JobHandlers>,
    jobs: WeakJobRepository,
}

impl QueueDispatcher {
    async fn queue_follow_ups(&self, item: &JobItem) -> AppResult<()> {
        let follow_ups = follow_ups(item);
        if follow_ups.is_empty() {
            return Ok(());
        }
        let Some(jobs) = self.jobs.upgrade() else {
            return Ok(());
        };
        debug!("{} queued {} follow-up jobs", item.name(), follow_ups.len());
        jobs.queue_all(follow_ups).await
    }
}

#[async_trait]
impl JobItemHandler for QueueDispatcher {
    async fn handle(&self, item: JobItem) -> anyhow::Result<bool> {
        let name = item.name();
        let Some(handler) = self.handlers.get(&name) else {
            warn!("No handler for job {} on queue {}", name, name.queue());
            return Ok(false);
        };

        let success = handler.handle(item.clone()).await?;
        if success {
            // Follow-up errors do not fail the finished job
            if let Err(e) = self.queue_follow_ups(&item).await {
                error!("Failed to queue follow-up jobs for {}: {}", name, e);
            }
        }
        Ok(success)
    }
}
