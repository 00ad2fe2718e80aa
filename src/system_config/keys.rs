//! Dotted keys for every leaf of [`SystemConfig`](super::SystemConfig)
//! and helpers to read and write JSON values by key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::types::AppError;

macro_rules! config_keys {
    ($( $variant:ident = $path:literal, )+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum SystemConfigKey {
            $( $variant, )+
        }

        impl SystemConfigKey {
            pub const ALL: &'static [SystemConfigKey] = &[ $( SystemConfigKey::$variant, )+ ];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( SystemConfigKey::$variant => $path, )+
                }
            }
        }
    };
}

config_keys! {
    FfmpegCrf = "ffmpeg.crf",
    FfmpegThreads = "ffmpeg.threads",
    FfmpegPreset = "ffmpeg.preset",
    FfmpegTargetVideoCodec = "ffmpeg.targetVideoCodec",
    FfmpegTargetAudioCodec = "ffmpeg.targetAudioCodec",
    FfmpegTargetResolution = "ffmpeg.targetResolution",
    FfmpegMaxBitrate = "ffmpeg.maxBitrate",
    FfmpegBframes = "ffmpeg.bframes",
    FfmpegRefs = "ffmpeg.refs",
    FfmpegGopSize = "ffmpeg.gopSize",
    FfmpegNpl = "ffmpeg.npl",
    FfmpegTemporalAq = "ffmpeg.temporalAQ",
    FfmpegCqMode = "ffmpeg.cqMode",
    FfmpegTwoPass = "ffmpeg.twoPass",
    FfmpegTranscode = "ffmpeg.transcode",
    FfmpegAccel = "ffmpeg.accel",
    FfmpegTonemap = "ffmpeg.tonemap",

    JobThumbnailGenerationConcurrency = "job.thumbnailGeneration.concurrency",
    JobMetadataExtractionConcurrency = "job.metadataExtraction.concurrency",
    JobVideoConversionConcurrency = "job.videoConversion.concurrency",
    JobObjectTaggingConcurrency = "job.objectTagging.concurrency",
    JobRecognizeFacesConcurrency = "job.recognizeFaces.concurrency",
    JobClipEncodingConcurrency = "job.clipEncoding.concurrency",
    JobBackgroundTaskConcurrency = "job.backgroundTask.concurrency",
    JobStorageTemplateMigrationConcurrency = "job.storageTemplateMigration.concurrency",
    JobMigrationConcurrency = "job.migration.concurrency",
    JobSearchConcurrency = "job.search.concurrency",
    JobSidecarConcurrency = "job.sidecar.concurrency",
    JobLibraryConcurrency = "job.library.concurrency",

    MachineLearningEnabled = "machineLearning.enabled",
    MachineLearningUrl = "machineLearning.url",
    MachineLearningClassificationEnabled = "machineLearning.classification.enabled",
    MachineLearningClassificationModelName = "machineLearning.classification.modelName",
    MachineLearningClassificationMinScore = "machineLearning.classification.minScore",
    MachineLearningClipEnabled = "machineLearning.clip.enabled",
    MachineLearningClipModelName = "machineLearning.clip.modelName",
    MachineLearningFacialRecognitionEnabled = "machineLearning.facialRecognition.enabled",
    MachineLearningFacialRecognitionModelName = "machineLearning.facialRecognition.modelName",
    MachineLearningFacialRecognitionMinScore = "machineLearning.facialRecognition.minScore",
    MachineLearningFacialRecognitionMaxDistance = "machineLearning.facialRecognition.maxDistance",
    MachineLearningFacialRecognitionMinFaces = "machineLearning.facialRecognition.minFaces",

    MapEnabled = "map.enabled",
    MapTileUrl = "map.tileUrl",

    ReverseGeocodingEnabled = "reverseGeocoding.enabled",
    ReverseGeocodingCitiesFileOverride = "reverseGeocoding.citiesFileOverride",

    OauthAutoLaunch = "oauth.autoLaunch",
    OauthAutoRegister = "oauth.autoRegister",
    OauthButtonText = "oauth.buttonText",
    OauthClientId = "oauth.clientId",
    OauthClientSecret = "oauth.clientSecret",
    OauthEnabled = "oauth.enabled",
    OauthIssuerUrl = "oauth.issuerUrl",
    OauthMobileOverrideEnabled = "oauth.mobileOverrideEnabled",
    OauthMobileRedirectUri = "oauth.mobileRedirectUri",
    OauthScope = "oauth.scope",
    OauthStorageLabelClaim = "oauth.storageLabelClaim",

    PasswordLoginEnabled = "passwordLogin.enabled",

    StorageTemplate = "storageTemplate.template",

    ThumbnailWebpSize = "thumbnail.webpSize",
    ThumbnailJpegSize = "thumbnail.jpegSize",
    ThumbnailQuality = "thumbnail.quality",
    ThumbnailColorspace = "thumbnail.colorspace",

    TrashEnabled = "trash.enabled",
    TrashDays = "trash.days",
}

impl fmt::Display for SystemConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemConfigKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SystemConfigKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| AppError::UnknownName(format!("config key {}", s)))
    }
}

impl Serialize for SystemConfigKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SystemConfigKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

/// One persisted override: a leaf key and its JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfigEntity {
    pub key: SystemConfigKey,
    pub value: Value,
}

impl SystemConfigEntity {
    pub fn new(key: SystemConfigKey, value: impl Into<Value>) -> Self {
        Self { key, value: value.into() }
    }
}

// =============================================================================
// Path helpers
// =============================================================================

pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

/// Set `path` to `value`, creating intermediate objects as needed and
/// replacing any non-object found on the way.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut node = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_config::SystemConfig;
    use serde_json::json;
    use std::collections::BTreeSet;

    /// Dotted paths of every non-object leaf under `value`.
    fn leaf_paths(value: &Value) -> Vec<String> {
        fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
            match value {
                Value::Object(map) if !map.is_empty() => {
                    for (key, child) in map {
                        let path = if prefix.is_empty() {
                            key.clone()
                        } else {
                            format!("{}.{}", prefix, key)
                        };
                        walk(child, &path, out);
                    }
                }
                _ => out.push(prefix.to_string()),
            }
        }

        let mut out = Vec::new();
        walk(value, "", &mut out);
        out
    }

    #[test]
    fn test_keys_cover_every_leaf() {
        let defaults = serde_json::to_value(SystemConfig::default()).unwrap();
        let leaves: BTreeSet<String> = leaf_paths(&defaults).into_iter().collect();
        let keys: BTreeSet<String> = SystemConfigKey::ALL
            .iter()
            .map(|key| key.as_str().to_string())
            .collect();

        assert_eq!(leaves, keys);
    }

    #[test]
    fn test_key_round_trip() {
        for key in SystemConfigKey::ALL {
            assert_eq!(key.as_str().parse::<SystemConfigKey>().unwrap(), *key);
        }
        assert!(matches!(
            "ffmpeg.unknown".parse::<SystemConfigKey>(),
            Err(AppError::UnknownName(_))
        ));
    }

    #[test]
    fn test_path_helpers() {
        let mut value = json!({ "ffmpeg": { "crf": 23, "threads": 0 }, "trash": { "days": 30 } });

        assert_eq!(get_path(&value, "ffmpeg.crf"), Some(&json!(23)));
        assert_eq!(get_path(&value, "ffmpeg.missing"), None);

        set_path(&mut value, "ffmpeg.crf", json!(30));
        set_path(&mut value, "oauth.autoLaunch", json!(true));
        assert_eq!(value["ffmpeg"]["crf"], json!(30));
        assert_eq!(value["oauth"]["autoLaunch"], json!(true));
        assert_eq!(value["trash"]["days"], json!(30));
    }
}
