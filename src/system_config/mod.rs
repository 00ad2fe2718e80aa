//! System Configuration
//!
//! The server-wide configuration document: transcoding, job concurrency,
//! machine learning, OAuth and friends. Defaults are compiled in; operators
//! override individual leaf fields, which are persisted as dotted keys
//! (see [`keys`]) or supplied through a read-only JSON file.

pub mod keys;
pub mod reconciler;
pub mod storage;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use keys::{SystemConfigEntity, SystemConfigKey};
pub use reconciler::{SystemConfigCore, SystemConfigValidator, WeakSystemConfigCore};
pub use storage::{FileConfigRepository, SystemConfigRepository};
pub use stream::{ConfigChannel, ConfigSubscription};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use validator::{Validate, ValidationError};

use crate::queue::QueueName;
use crate::types::{AppError, AppResult};

// =============================================================================
// Enumerated options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodePolicy {
    All,
    Optimal,
    Bitrate,
    Required,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    Aac,
    Libopus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeHwAccel {
    Nvenc,
    Qsv,
    Vaapi,
    Rkmpp,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMapping {
    Hable,
    Mobius,
    Reinhard,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqMode {
    Auto,
    Cqp,
    Icq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colorspace {
    Srgb,
    P3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitiesFile {
    #[serde(rename = "cities15000")]
    Cities15000,
    #[serde(rename = "cities5000")]
    Cities5000,
    #[serde(rename = "cities1000")]
    Cities1000,
    #[serde(rename = "cities500")]
    Cities500,
}

// =============================================================================
// Configuration document
// =============================================================================

/// Full system configuration. Unknown fields are rejected at every level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemConfig {
    #[validate(nested)]
    pub ffmpeg: FfmpegConfig,
    #[validate(nested)]
    pub job: JobConfig,
    #[validate(nested)]
    pub machine_learning: MachineLearningConfig,
    pub map: MapConfig,
    pub reverse_geocoding: ReverseGeocodingConfig,
    #[validate(nested)]
    pub oauth: OAuthConfig,
    pub password_login: PasswordLoginConfig,
    #[validate(nested)]
    pub storage_template: StorageTemplateConfig,
    #[validate(nested)]
    pub thumbnail: ThumbnailConfig,
    #[validate(nested)]
    pub trash: TrashConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[validate(schema(function = "validate_ffmpeg"))]
pub struct FfmpegConfig {
    #[validate(range(min = 0, max = 51))]
    pub crf: i32,
    #[validate(range(min = 0))]
    pub threads: i32,
    pub preset: String,
    pub target_video_codec: VideoCodec,
    pub target_audio_codec: AudioCodec,
    pub target_resolution: String,
    pub max_bitrate: String,
    pub bframes: i32,
    #[validate(range(min = 0, max = 6))]
    pub refs: i32,
    #[validate(range(min = 0))]
    pub gop_size: i32,
    #[validate(range(min = 0))]
    pub npl: i32,
    #[serde(rename = "temporalAQ")]
    pub temporal_aq: bool,
    pub cq_mode: CqMode,
    pub two_pass: bool,
    pub transcode: TranscodePolicy,
    pub accel: TranscodeHwAccel,
    pub tonemap: ToneMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobSettings {
    #[validate(range(min = 1))]
    pub concurrency: u32,
}

impl JobSettings {
    const fn new(concurrency: u32) -> Self {
        Self { concurrency }
    }
}

/// Concurrency per queue. Field names match [`QueueName`] wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobConfig {
    #[validate(nested)]
    pub thumbnail_generation: JobSettings,
    #[validate(nested)]
    pub metadata_extraction: JobSettings,
    #[validate(nested)]
    pub video_conversion: JobSettings,
    #[validate(nested)]
    pub object_tagging: JobSettings,
    #[validate(nested)]
    pub recognize_faces: JobSettings,
    #[validate(nested)]
    pub clip_encoding: JobSettings,
    #[validate(nested)]
    pub background_task: JobSettings,
    #[validate(nested)]
    pub storage_template_migration: JobSettings,
    #[validate(nested)]
    pub migration: JobSettings,
    #[validate(nested)]
    pub search: JobSettings,
    #[validate(nested)]
    pub sidecar: JobSettings,
    #[validate(nested)]
    pub library: JobSettings,
}

impl JobConfig {
    pub fn get(&self, queue: QueueName) -> &JobSettings {
        match queue {
            QueueName::ThumbnailGeneration => &self.thumbnail_generation,
            QueueName::MetadataExtraction => &self.metadata_extraction,
            QueueName::VideoConversion => &self.video_conversion,
            QueueName::ObjectTagging => &self.object_tagging,
            QueueName::RecognizeFaces => &self.recognize_faces,
            QueueName::ClipEncoding => &self.clip_encoding,
            QueueName::BackgroundTask => &self.background_task,
            QueueName::StorageTemplateMigration => &self.storage_template_migration,
            QueueName::Migration => &self.migration,
            QueueName::Search => &self.search,
            QueueName::Sidecar => &self.sidecar,
            QueueName::Library => &self.library,
        }
    }

    pub fn concurrency(&self, queue: QueueName) -> u32 {
        self.get(queue).concurrency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[validate(schema(function = "validate_machine_learning"))]
pub struct MachineLearningConfig {
    pub enabled: bool,
    pub url: String,
    #[validate(nested)]
    pub classification: ClassificationConfig,
    pub clip: ClipConfig,
    #[validate(nested)]
    pub facial_recognition: FacialRecognitionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClassificationConfig {
    pub enabled: bool,
    pub model_name: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClipConfig {
    pub enabled: bool,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FacialRecognitionConfig {
    pub enabled: bool,
    pub model_name: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_score: f64,
    #[validate(range(min = 0.0, max = 2.0))]
    pub max_distance: f64,
    #[validate(range(min = 1))]
    pub min_faces: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MapConfig {
    pub enabled: bool,
    pub tile_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReverseGeocodingConfig {
    pub enabled: bool,
    pub cities_file_override: CitiesFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[validate(schema(function = "validate_oauth"))]
pub struct OAuthConfig {
    pub auto_launch: bool,
    pub auto_register: bool,
    pub button_text: String,
    pub client_id: String,
    pub client_secret: String,
    pub enabled: bool,
    pub issuer_url: String,
    pub mobile_override_enabled: bool,
    pub mobile_redirect_uri: String,
    pub scope: String,
    pub storage_label_claim: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PasswordLoginConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageTemplateConfig {
    #[validate(length(min = 1))]
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThumbnailConfig {
    #[validate(range(min = 1))]
    pub webp_size: u32,
    #[validate(range(min = 1))]
    pub jpeg_size: u32,
    #[validate(range(min = 1, max = 100))]
    pub quality: u32,
    pub colorspace: Colorspace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrashConfig {
    pub enabled: bool,
    pub days: u32,
}

/// -1 lets the encoder pick the number of B-frames.
fn validate_ffmpeg(config: &FfmpegConfig) -> Result<(), ValidationError> {
    if !(-1..=16).contains(&config.bframes) {
        return Err(ValidationError::new("ffmpeg_bframes_range"));
    }
    Ok(())
}

fn validate_machine_learning(config: &MachineLearningConfig) -> Result<(), ValidationError> {
    if config.enabled && config.url.trim().is_empty() {
        return Err(ValidationError::new("machine_learning_url_required"));
    }
    Ok(())
}

/// Issuer, client id and secret are required once OAuth is switched on;
/// the mobile redirect only when the override is.
fn validate_oauth(config: &OAuthConfig) -> Result<(), ValidationError> {
    if config.enabled {
        let required = [
            ("issuerUrl", &config.issuer_url),
            ("clientId", &config.client_id),
            ("clientSecret", &config.client_secret),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                let mut error = ValidationError::new("oauth_field_required");
                error.add_param("field".into(), &field);
                return Err(error);
            }
        }
    }

    if config.mobile_override_enabled && config.mobile_redirect_uri.trim().is_empty() {
        return Err(ValidationError::new("oauth_mobile_redirect_required"));
    }

    Ok(())
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            ffmpeg: FfmpegConfig {
                crf: 23,
                threads: 0,
                preset: "ultrafast".to_string(),
                target_video_codec: VideoCodec::H264,
                target_audio_codec: AudioCodec::Aac,
                target_resolution: "720".to_string(),
                max_bitrate: "0".to_string(),
                bframes: -1,
                refs: 0,
                gop_size: 0,
                npl: 0,
                temporal_aq: false,
                cq_mode: CqMode::Auto,
                two_pass: false,
                transcode: TranscodePolicy::Required,
                accel: TranscodeHwAccel::Disabled,
                tonemap: ToneMapping::Hable,
            },
            job: JobConfig {
                thumbnail_generation: JobSettings::new(5),
                metadata_extraction: JobSettings::new(5),
                video_conversion: JobSettings::new(1),
                object_tagging: JobSettings::new(2),
                recognize_faces: JobSettings::new(2),
                clip_encoding: JobSettings::new(2),
                background_task: JobSettings::new(5),
                storage_template_migration: JobSettings::new(5),
                migration: JobSettings::new(5),
                search: JobSettings::new(5),
                sidecar: JobSettings::new(5),
                library: JobSettings::new(1),
            },
            machine_learning: MachineLearningConfig {
                enabled: true,
                url: "http://darkroom-machine-learning:3003".to_string(),
                classification: ClassificationConfig {
                    enabled: true,
                    model_name: "microsoft/resnet-50".to_string(),
                    min_score: 0.9,
                },
                clip: ClipConfig {
                    enabled: true,
                    model_name: "ViT-B-32::openai".to_string(),
                },
                facial_recognition: FacialRecognitionConfig {
                    enabled: true,
                    model_name: "buffalo_l".to_string(),
                    min_score: 0.7,
                    max_distance: 0.6,
                    min_faces: 1,
                },
            },
            map: MapConfig {
                enabled: true,
                tile_url: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            },
            reverse_geocoding: ReverseGeocodingConfig {
                enabled: true,
                cities_file_override: CitiesFile::Cities500,
            },
            oauth: OAuthConfig {
                auto_launch: false,
                auto_register: true,
                button_text: "Login with OAuth".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                enabled: false,
                issuer_url: String::new(),
                mobile_override_enabled: false,
                mobile_redirect_uri: String::new(),
                scope: "openid email profile".to_string(),
                storage_label_claim: "preferred_username".to_string(),
            },
            password_login: PasswordLoginConfig { enabled: true },
            storage_template: StorageTemplateConfig {
                template: "{{y}}/{{y}}-{{MM}}-{{dd}}/{{filename}}".to_string(),
            },
            thumbnail: ThumbnailConfig {
                webp_size: 250,
                jpeg_size: 1440,
                quality: 80,
                colorspace: Colorspace::P3,
            },
            trash: TrashConfig {
                enabled: true,
                days: 30,
            },
        }
    }
}

impl SystemConfig {
    /// Parse a complete configuration document, rejecting unknown fields,
    /// wrong types and values outside their allowed range.
    pub fn from_value(value: Value) -> AppResult<Self> {
        let config: SystemConfig =
            serde_json::from_value(value).map_err(|e| AppError::Validation(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Run the field level rules.
    pub fn check(&self) -> AppResult<()> {
        self.validate()
            .map_err(|errors| AppError::Validation(errors.to_string()))
    }
}

// =============================================================================
// Feature flags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureFlag {
    ClipEncode,
    ConfigFile,
    FacialRecognition,
    Map,
    Oauth,
    OauthAutoLaunch,
    PasswordLogin,
    ReverseGeocoding,
    Sidecar,
    TagImage,
    Trash,
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureFlag::ClipEncode => "clipEncode",
            FeatureFlag::ConfigFile => "configFile",
            FeatureFlag::FacialRecognition => "facialRecognition",
            FeatureFlag::Map => "map",
            FeatureFlag::Oauth => "oauth",
            FeatureFlag::OauthAutoLaunch => "oauthAutoLaunch",
            FeatureFlag::PasswordLogin => "passwordLogin",
            FeatureFlag::ReverseGeocoding => "reverseGeocoding",
            FeatureFlag::Sidecar => "sidecar",
            FeatureFlag::TagImage => "tagImage",
            FeatureFlag::Trash => "trash",
        };
        f.write_str(name)
    }
}

/// Which optional features the current configuration switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub clip_encode: bool,
    pub config_file: bool,
    pub facial_recognition: bool,
    pub map: bool,
    pub oauth: bool,
    pub oauth_auto_launch: bool,
    pub password_login: bool,
    pub reverse_geocoding: bool,
    pub sidecar: bool,
    pub tag_image: bool,
    pub trash: bool,
}

impl ServerFeatures {
    pub fn from_config(config: &SystemConfig, config_file: bool) -> Self {
        let ml = &config.machine_learning;
        Self {
            clip_encode: ml.enabled && ml.clip.enabled,
            config_file,
            facial_recognition: ml.enabled && ml.facial_recognition.enabled,
            map: config.map.enabled,
            oauth: config.oauth.enabled,
            oauth_auto_launch: config.oauth.auto_launch,
            password_login: config.password_login.enabled,
            reverse_geocoding: config.reverse_geocoding.enabled,
            sidecar: true,
            tag_image: ml.enabled && ml.classification.enabled,
            trash: config.trash.enabled,
        }
    }

    pub fn has(&self, feature: FeatureFlag) -> bool {
        match feature {
            FeatureFlag::ClipEncode => self.clip_encode,
            FeatureFlag::ConfigFile => self.config_file,
            FeatureFlag::FacialRecognition => self.facial_recognition,
            FeatureFlag::Map => self.map,
            FeatureFlag::Oauth => self.oauth,
            FeatureFlag::OauthAutoLaunch => self.oauth_auto_launch,
            FeatureFlag::PasswordLogin => self.password_login,
            FeatureFlag::ReverseGeocoding => self.reverse_geocoding,
            FeatureFlag::Sidecar => self.sidecar,
            FeatureFlag::TagImage => self.tag_image,
            FeatureFlag::Trash => self.trash,
        }
    }
}
