//! Background job queues: the job catalog, the in-process queue registry
//! and the service that binds handlers and reacts to finished jobs.

pub mod jobs;
pub mod repository;
pub mod workers;

pub use jobs::{
    AssetDeletionJob, AssetFaceJob, BaseJob, BulkEntityJob, DeleteFilesJob, EntityJob, JobItem,
    JobName, JobSource, LibraryFileJob, LibraryRefreshJob, OfflineLibraryFileJob, QueueName,
    RawJobItem,
};
pub use repository::{
    JobCounts, JobItemHandler, JobOptions, JobRepository, QueueStatus, WeakJobRepository,
};
pub use workers::{JobCommand, JobCommandDto, JobHandlers, JobService, JobStatusDto};
