//! Job catalog
//!
//! Every job kind the server knows about, the payload it carries and the
//! queue it runs on. The catalog is declared once in `job_catalog!` below;
//! the macro expands it into `JobName`, `JobItem` and the exhaustive
//! name/queue/payload matches, so a job kind cannot exist without all three.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::{AppError, AppResult};

// =============================================================================
// Queues
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueName {
    ThumbnailGeneration,
    MetadataExtraction,
    VideoConversion,
    ObjectTagging,
    RecognizeFaces,
    ClipEncoding,
    BackgroundTask,
    StorageTemplateMigration,
    Migration,
    Search,
    Sidecar,
    Library,
}

impl QueueName {
    pub const COUNT: usize = 12;

    pub const ALL: [QueueName; QueueName::COUNT] = [
        QueueName::ThumbnailGeneration,
        QueueName::MetadataExtraction,
        QueueName::VideoConversion,
        QueueName::ObjectTagging,
        QueueName::RecognizeFaces,
        QueueName::ClipEncoding,
        QueueName::BackgroundTask,
        QueueName::StorageTemplateMigration,
        QueueName::Migration,
        QueueName::Search,
        QueueName::Sidecar,
        QueueName::Library,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueName::ThumbnailGeneration => "thumbnailGeneration",
            QueueName::MetadataExtraction => "metadataExtraction",
            QueueName::VideoConversion => "videoConversion",
            QueueName::ObjectTagging => "objectTagging",
            QueueName::RecognizeFaces => "recognizeFaces",
            QueueName::ClipEncoding => "clipEncoding",
            QueueName::BackgroundTask => "backgroundTask",
            QueueName::StorageTemplateMigration => "storageTemplateMigration",
            QueueName::Migration => "migration",
            QueueName::Search => "search",
            QueueName::Sidecar => "sidecar",
            QueueName::Library => "library",
        }
    }

    /// Position in `ALL`, used to index per-queue state.
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| AppError::UnknownName(format!("queue {}", s)))
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Where an entity job originated. Follow-up jobs only fan out for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobSource {
    Upload,
    SidecarWrite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BaseJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl BaseJob {
    pub fn forced(force: bool) -> Self {
        Self { force: Some(force) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntityJob {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<JobSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl EntityJob {
    pub fn new(id: Uuid) -> Self {
        Self { id, source: None, force: None }
    }

    pub fn uploaded(id: Uuid) -> Self {
        Self { id, source: Some(JobSource::Upload), force: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkEntityJob {
    pub ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssetFaceJob {
    pub asset_id: Uuid,
    pub person_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssetDeletionJob {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_external: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LibraryFileJob {
    /// Library id
    pub id: Uuid,
    pub owner_id: Uuid,
    pub asset_path: String,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OfflineLibraryFileJob {
    /// Library id
    pub id: Uuid,
    pub asset_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LibraryRefreshJob {
    pub id: Uuid,
    pub refresh_modified_files: bool,
    pub refresh_all_files: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteFilesJob {
    pub files: Vec<String>,
}

// =============================================================================
// Catalog
// =============================================================================

/// Loosely typed `{ name, data }` pair as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJobItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

macro_rules! job_catalog {
    ($( $variant:ident = $wire:literal on $queue:ident => $payload:ty; )+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum JobName {
            $( $variant, )+
        }

        impl JobName {
            pub const ALL: &'static [JobName] = &[ $( JobName::$variant, )+ ];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( JobName::$variant => $wire, )+
                }
            }

            /// The queue every job of this kind runs on.
            pub const fn queue(&self) -> QueueName {
                match self {
                    $( JobName::$variant => QueueName::$queue, )+
                }
            }
        }

        /// A job ready to be queued. The variant fixes both the job name and
        /// the payload type.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(try_from = "RawJobItem", into = "RawJobItem")]
        pub enum JobItem {
            $( $variant($payload), )+
        }

        impl JobItem {
            pub const fn name(&self) -> JobName {
                match self {
                    $( JobItem::$variant(_) => JobName::$variant, )+
                }
            }

            /// Build an item from a name and an untyped payload, checking the
            /// payload against the shape the name requires.
            pub fn from_parts(name: JobName, data: Value) -> AppResult<Self> {
                let data = if data.is_null() {
                    Value::Object(Default::default())
                } else {
                    data
                };

                let item = match name {
                    $( JobName::$variant => serde_json::from_value::<$payload>(data).map(JobItem::$variant), )+
                };

                item.map_err(|e| AppError::InvalidJob(format!("{}: {}", name, e)))
            }

            pub fn data(&self) -> Value {
                let data = match self {
                    $( JobItem::$variant(payload) => serde_json::to_value(payload), )+
                };
                data.unwrap_or_default()
            }
        }
    };
}

job_catalog! {
    // Transcoding
    QueueVideoConversion = "queue-video-conversion" on VideoConversion => BaseJob;
    VideoConversion = "video-conversion" on VideoConversion => EntityJob;

    // Thumbnails
    QueueGenerateThumbnails = "queue-generate-thumbnails" on ThumbnailGeneration => BaseJob;
    GenerateJpegThumbnail = "generate-jpeg-thumbnail" on ThumbnailGeneration => EntityJob;
    GenerateWebpThumbnail = "generate-webp-thumbnail" on ThumbnailGeneration => EntityJob;
    GenerateThumbhashThumbnail = "generate-thumbhash-thumbnail" on ThumbnailGeneration => EntityJob;
    GeneratePersonThumbnail = "generate-person-thumbnail" on ThumbnailGeneration => EntityJob;

    // User deletion
    UserDeleteCheck = "user-delete-check" on BackgroundTask => BaseJob;
    UserDeletion = "user-deletion" on BackgroundTask => EntityJob;

    // Storage template
    StorageTemplateMigration = "storage-template-migration" on StorageTemplateMigration => BaseJob;
    StorageTemplateMigrationSingle = "storage-template-migration-single" on StorageTemplateMigration => EntityJob;
    SystemConfigChange = "system-config-change" on StorageTemplateMigration => BaseJob;

    // Migration
    QueueMigration = "queue-migration" on Migration => BaseJob;
    MigrateAsset = "migrate-asset" on Migration => EntityJob;
    MigratePerson = "migrate-person" on Migration => EntityJob;

    // Metadata extraction
    QueueMetadataExtraction = "queue-metadata-extraction" on MetadataExtraction => BaseJob;
    MetadataExtraction = "metadata-extraction" on MetadataExtraction => EntityJob;
    LinkLivePhotos = "link-live-photos" on MetadataExtraction => EntityJob;

    // Sidecar scanning
    QueueSidecar = "queue-sidecar" on Sidecar => BaseJob;
    SidecarDiscovery = "sidecar-discovery" on Sidecar => EntityJob;
    SidecarSync = "sidecar-sync" on Sidecar => EntityJob;

    // Object tagging
    QueueObjectTagging = "queue-object-tagging" on ObjectTagging => BaseJob;
    ClassifyImage = "classify-image" on ObjectTagging => EntityJob;

    // Facial recognition
    QueueRecognizeFaces = "queue-recognize-faces" on RecognizeFaces => BaseJob;
    RecognizeFaces = "recognize-faces" on RecognizeFaces => EntityJob;
    PersonDelete = "person-delete" on BackgroundTask => EntityJob;

    // CLIP embedding
    QueueEncodeClip = "queue-clip-encode" on ClipEncoding => BaseJob;
    EncodeClip = "clip-encode" on ClipEncoding => EntityJob;

    // Filesystem
    DeleteFiles = "delete-files" on BackgroundTask => DeleteFilesJob;

    // Audit log cleanup
    CleanOldAuditLogs = "clean-old-audit-logs" on BackgroundTask => BaseJob;

    // Asset deletion
    PersonCleanup = "person-cleanup" on BackgroundTask => BaseJob;
    AssetDeletion = "asset-deletion" on BackgroundTask => AssetDeletionJob;
    AssetDeletionCheck = "asset-deletion-check" on BackgroundTask => BaseJob;

    // Library management
    LibraryScanAsset = "library-scan-asset" on Library => LibraryFileJob;
    LibraryMarkAssetOffline = "library-mark-asset-offline" on Library => OfflineLibraryFileJob;
    LibraryScan = "library-refresh" on Library => LibraryRefreshJob;
    LibraryRemoveOffline = "library-remove-offline" on Library => EntityJob;
    LibraryDelete = "library-delete" on Library => EntityJob;
    LibraryQueueScanAll = "library-queue-scan-all" on Library => BaseJob;
    LibraryQueueCleanup = "library-queue-cleanup" on Library => BaseJob;

    // Search
    SearchIndexAssets = "search-index-assets" on Search => BaseJob;
    SearchIndexAsset = "search-index-asset" on Search => BulkEntityJob;
    SearchIndexFaces = "search-index-faces" on Search => BaseJob;
    SearchIndexFace = "search-index-face" on Search => AssetFaceJob;
    SearchIndexAlbums = "search-index-albums" on Search => BaseJob;
    SearchIndexAlbum = "search-index-album" on Search => BulkEntityJob;
    SearchRemoveAsset = "search-remove-asset" on Search => BulkEntityJob;
    SearchRemoveAlbum = "search-remove-album" on Search => BulkEntityJob;
    SearchRemoveFace = "search-remove-face" on Search => AssetFaceJob;
}

impl JobItem {
    pub fn queue(&self) -> QueueName {
        self.name().queue()
    }

    /// Entity id for payloads that reference a single entity.
    pub fn entity(&self) -> Option<&EntityJob> {
        match self {
            JobItem::VideoConversion(data)
            | JobItem::GenerateJpegThumbnail(data)
            | JobItem::GenerateWebpThumbnail(data)
            | JobItem::GenerateThumbhashThumbnail(data)
            | JobItem::GeneratePersonThumbnail(data)
            | JobItem::UserDeletion(data)
            | JobItem::StorageTemplateMigrationSingle(data)
            | JobItem::MigrateAsset(data)
            | JobItem::MigratePerson(data)
            | JobItem::MetadataExtraction(data)
            | JobItem::LinkLivePhotos(data)
            | JobItem::SidecarDiscovery(data)
            | JobItem::SidecarSync(data)
            | JobItem::ClassifyImage(data)
            | JobItem::RecognizeFaces(data)
            | JobItem::PersonDelete(data)
            | JobItem::EncodeClip(data)
            | JobItem::LibraryRemoveOffline(data)
            | JobItem::LibraryDelete(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AppError::UnknownName(format!("job {}", s)))
    }
}

impl Serialize for JobName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

impl TryFrom<RawJobItem> for JobItem {
    type Error = AppError;

    fn try_from(raw: RawJobItem) -> Result<Self, Self::Error> {
        let name: JobName = raw.name.parse()?;
        JobItem::from_parts(name, raw.data)
    }
}

impl From<JobItem> for RawJobItem {
    fn from(item: JobItem) -> Self {
        Self {
            name: item.name().as_str().to_string(),
            data: item.data(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_every_job_name_round_trips() {
        let mut wire_names = HashSet::new();
        for name in JobName::ALL {
            assert!(wire_names.insert(name.as_str()), "duplicate wire name {}", name);
            assert_eq!(name.as_str().parse::<JobName>().unwrap(), *name);
        }
    }

    #[test]
    fn test_every_queue_has_jobs() {
        for queue in QueueName::ALL {
            assert!(
                JobName::ALL.iter().any(|name| name.queue() == queue),
                "no job runs on {}",
                queue
            );
            assert_eq!(queue.as_str().parse::<QueueName>().unwrap(), queue);
            assert_eq!(QueueName::ALL[queue.index()], queue);
        }
    }

    #[test]
    fn test_queue_assignment() {
        assert_eq!(JobName::SystemConfigChange.queue(), QueueName::StorageTemplateMigration);
        assert_eq!(JobName::GeneratePersonThumbnail.queue(), QueueName::ThumbnailGeneration);
        assert_eq!(JobName::PersonDelete.queue(), QueueName::BackgroundTask);
        assert_eq!(JobName::LibraryScan.queue(), QueueName::Library);
        assert_eq!(JobName::SearchRemoveFace.queue(), QueueName::Search);
    }

    #[test]
    fn test_deserialize_entity_job() {
        let id = Uuid::new_v4();
        let item: JobItem = serde_json::from_value(json!({
            "name": "video-conversion",
            "data": { "id": id, "source": "upload" }
        }))
        .unwrap();

        assert_eq!(item, JobItem::VideoConversion(EntityJob::uploaded(id)));
        assert_eq!(item.queue(), QueueName::VideoConversion);
    }

    #[test]
    fn test_base_job_may_omit_data() {
        let item: JobItem = serde_json::from_value(json!({ "name": "system-config-change" })).unwrap();
        assert_eq!(item, JobItem::SystemConfigChange(BaseJob::default()));

        let raw = serde_json::to_value(&item).unwrap();
        assert_eq!(raw, json!({ "name": "system-config-change", "data": {} }));
    }

    #[test]
    fn test_payload_shape_is_enforced() {
        let err = JobItem::from_parts(JobName::GenerateJpegThumbnail, Value::Null).unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));

        let err = JobItem::from_parts(
            JobName::SearchIndexAsset,
            json!({ "id": Uuid::new_v4() }),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));

        let err = JobItem::from_parts(JobName::QueueSidecar, json!({ "force": true, "extra": 1 })).unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));
    }

    #[test]
    fn test_unknown_job_name_is_rejected() {
        let result = serde_json::from_value::<JobItem>(json!({ "name": "make-coffee", "data": {} }));
        assert!(result.is_err());
        assert!(matches!("make-coffee".parse::<JobName>(), Err(AppError::UnknownName(_))));
    }

    #[test]
    fn test_library_payload_wire_format() {
        let id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let item = JobItem::from_parts(
            JobName::LibraryScanAsset,
            json!({ "id": id, "ownerId": owner_id, "assetPath": "/mnt/photos/a.jpg", "forceRefresh": false }),
        )
        .unwrap();

        match &item {
            JobItem::LibraryScanAsset(job) => {
                assert_eq!(job.owner_id, owner_id);
                assert_eq!(job.asset_path, "/mnt/photos/a.jpg");
            }
            other => panic!("unexpected item {:?}", other),
        }
        assert!(item.entity().is_none());
    }
}
