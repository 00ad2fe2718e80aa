//! Storage templates
//!
//! A storage template decides where an asset lands on disk, e.g.
//! `{{y}}/{{y}}-{{MM}}-{{dd}}/{{filename}}`. Templates are rendered with
//! minijinja; every variable must be one of the known tokens, which stand
//! for parts of the asset's capture time, its file name or its id.

use chrono::{DateTime, Datelike, Timelike, Utc};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::system_config::SystemConfig;
use crate::types::{AppError, AppResult};

pub const FILE_TOKENS: &[&str] = &["filename", "ext", "filetype", "filetypefull", "assetId"];
pub const YEAR_TOKENS: &[&str] = &["y", "yy"];
pub const MONTH_TOKENS: &[&str] = &["M", "MM", "MMM", "MMMM"];
pub const WEEK_TOKENS: &[&str] = &["W", "WW"];
pub const DAY_TOKENS: &[&str] = &["d", "dd"];
pub const HOUR_TOKENS: &[&str] = &["h", "hh", "H", "HH"];
pub const MINUTE_TOKENS: &[&str] = &["m", "mm"];
pub const SECOND_TOKENS: &[&str] = &["s", "ss"];

pub const PRESET_TEMPLATES: &[&str] = &[
    "{{y}}/{{y}}-{{MM}}-{{dd}}/{{filename}}",
    "{{y}}/{{MM}}-{{dd}}/{{filename}}",
    "{{y}}/{{MMMM}}-{{dd}}/{{filename}}",
    "{{y}}/{{MM}}/{{filename}}",
    "{{y}}/{{MMM}}/{{filename}}",
    "{{y}}/{{MMMM}}/{{filename}}",
    "{{y}}/{{MM}}/{{dd}}/{{filename}}",
    "{{y}}/{{MMMM}}/{{dd}}/{{filename}}",
    "{{y}}/{{y}}-{{MM}}/{{y}}-{{MM}}-{{dd}}/{{filename}}",
    "{{y}}-{{MM}}-{{dd}}/{{filename}}",
    "{{y}}-{{MMM}}-{{dd}}/{{filename}}",
    "{{y}}-{{MMMM}}-{{dd}}/{{filename}}",
    "{{y}}/{{y}}-{{MM}}/{{filename}}",
    "{{y}}/{{y}}-{{WW}}/{{filename}}",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageTemplateOptions {
    pub day_options: Vec<String>,
    pub hour_options: Vec<String>,
    pub minute_options: Vec<String>,
    pub month_options: Vec<String>,
    pub preset_options: Vec<String>,
    pub second_options: Vec<String>,
    pub week_options: Vec<String>,
    pub year_options: Vec<String>,
}

pub fn get_storage_template_options() -> StorageTemplateOptions {
    fn owned(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    StorageTemplateOptions {
        day_options: owned(DAY_TOKENS),
        hour_options: owned(HOUR_TOKENS),
        minute_options: owned(MINUTE_TOKENS),
        month_options: owned(MONTH_TOKENS),
        preset_options: owned(PRESET_TEMPLATES),
        second_options: owned(SECOND_TOKENS),
        week_options: owned(WEEK_TOKENS),
        year_options: owned(YEAR_TOKENS),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Image,
    Video,
}

/// What a template is rendered against.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub asset_id: Uuid,
    pub asset_type: AssetType,
    /// File name without extension.
    pub filename: &'a str,
    pub ext: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageTemplate {
    source: String,
    tokens: HashSet<String>,
}

impl StorageTemplate {
    pub fn compile(template: &str) -> AppResult<Self> {
        let env = environment();
        let tokens = env
            .template_from_str(template)
            .map_err(|e| invalid(template, &e.to_string()))?
            .undeclared_variables(false);

        let mut unknown: Vec<_> = tokens.iter().filter(|token| !is_known_token(token)).collect();
        if !unknown.is_empty() {
            unknown.sort();
            let unknown: Vec<_> = unknown.iter().map(|token| format!("`{}`", token)).collect();
            return Err(invalid(template, &format!("unknown token {}", unknown.join(", "))));
        }

        Ok(Self {
            source: template.to_string(),
            tokens,
        })
    }

    pub fn uses_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Relative path for the asset, extension included.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> AppResult<String> {
        let values: BTreeMap<&str, String> = all_tokens()
            .map(|token| (token, render_token(token, ctx)))
            .collect();

        let mut path = environment()
            .render_str(&self.source, &values)
            .map_err(|e| invalid(&self.source, &e.to_string()))?;
        if !ctx.ext.is_empty() {
            path.push('.');
            path.push_str(ctx.ext.trim_start_matches('.'));
        }
        Ok(path)
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

fn invalid(template: &str, reason: &str) -> AppError {
    AppError::Validation(format!("Invalid storage template `{}`: {}", template, reason))
}

fn all_tokens() -> impl Iterator<Item = &'static str> {
    [
        FILE_TOKENS,
        YEAR_TOKENS,
        MONTH_TOKENS,
        WEEK_TOKENS,
        DAY_TOKENS,
        HOUR_TOKENS,
        MINUTE_TOKENS,
        SECOND_TOKENS,
    ]
    .into_iter()
    .flatten()
    .copied()
}

fn is_known_token(token: &str) -> bool {
    all_tokens().any(|known| known == token)
}

fn render_token(token: &str, ctx: &TemplateContext<'_>) -> String {
    let at = ctx.created_at;
    match token {
        "filename" => ctx.filename.to_string(),
        "ext" => ctx.ext.trim_start_matches('.').to_string(),
        "filetype" => match ctx.asset_type {
            AssetType::Image => "IMG".to_string(),
            AssetType::Video => "VID".to_string(),
        },
        "filetypefull" => match ctx.asset_type {
            AssetType::Image => "IMAGE".to_string(),
            AssetType::Video => "VIDEO".to_string(),
        },
        "assetId" => ctx.asset_id.to_string(),
        "y" => format!("{:04}", at.year()),
        "yy" => format!("{:02}", at.year().rem_euclid(100)),
        "M" => at.month().to_string(),
        "MM" => format!("{:02}", at.month()),
        "MMM" => at.format("%b").to_string(),
        "MMMM" => at.format("%B").to_string(),
        "W" => at.iso_week().week().to_string(),
        "WW" => format!("{:02}", at.iso_week().week()),
        "d" => at.day().to_string(),
        "dd" => format!("{:02}", at.day()),
        "h" => at.hour12().1.to_string(),
        "hh" => format!("{:02}", at.hour12().1),
        "H" => at.hour().to_string(),
        "HH" => format!("{:02}", at.hour()),
        "m" => at.minute().to_string(),
        "mm" => format!("{:02}", at.minute()),
        "s" => at.second().to_string(),
        "ss" => format!("{:02}", at.second()),
        _ => String::new(),
    }
}

/// A template must render and keep the original file name in the path.
/// Returns the path a sample image would get.
pub fn validate_template(template: &str) -> AppResult<String> {
    let compiled = StorageTemplate::compile(template)?;
    if !compiled.uses_token("filename") {
        return Err(invalid(template, "must include {{filename}}"));
    }

    let sample = TemplateContext {
        asset_id: Uuid::nil(),
        asset_type: AssetType::Image,
        filename: "IMG_123",
        ext: "jpg",
        created_at: Utc::now(),
    };
    compiled.render(&sample)
}

/// Config validator for the storage template section.
pub fn validate_storage_template(new: &SystemConfig, _old: &SystemConfig) -> anyhow::Result<()> {
    validate_template(&new.storage_template.template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context() -> TemplateContext<'static> {
        TemplateContext {
            asset_id: Uuid::nil(),
            asset_type: AssetType::Image,
            filename: "IMG_0042",
            ext: "jpg",
            created_at: Utc.with_ymd_and_hms(2023, 3, 5, 14, 7, 9).unwrap(),
        }
    }

    #[test]
    fn test_render_default_template() {
        let template = StorageTemplate::compile("{{y}}/{{y}}-{{MM}}-{{dd}}/{{filename}}").unwrap();
        assert_eq!(template.render(&context()).unwrap(), "2023/2023-03-05/IMG_0042.jpg");
    }

    #[test]
    fn test_render_every_token() {
        let template = StorageTemplate::compile(
            "{{yy}} {{M}} {{MMM}} {{MMMM}} {{W}} {{WW}} {{d}} {{h}} {{hh}} {{H}} {{m}} {{mm}} {{s}} {{ss}}",
        )
        .unwrap();
        let mut ctx = context();
        ctx.ext = "";
        assert_eq!(template.render(&ctx).unwrap(), "23 3 Mar March 9 09 5 2 02 14 7 07 9 09");

        let template =
            StorageTemplate::compile("{{filetype}}/{{filetypefull}}/{{assetId}}-{{filename}}.{{ext}}")
                .unwrap();
        assert_eq!(
            template.render(&ctx).unwrap(),
            "IMG/IMAGE/00000000-0000-0000-0000-000000000000-IMG_0042."
        );
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in PRESET_TEMPLATES {
            let sample = validate_template(preset).unwrap();
            assert!(sample.ends_with("/IMG_123.jpg"), "{} -> {}", preset, sample);
        }
    }

    #[test]
    fn test_compile_collects_tokens() {
        let template = StorageTemplate::compile("{{ y }}/{{MMMM}}/{{filename}}").unwrap();
        assert!(template.uses_token("y"));
        assert!(template.uses_token("MMMM"));
        assert!(template.uses_token("filename"));
        assert!(!template.uses_token("dd"));
    }

    #[test]
    fn test_invalid_templates() {
        assert!(validate_template("{{y}}/{{MM}}").is_err());
        assert!(validate_template("{{y}}/{{unknown}}/{{filename}}").is_err());
        assert!(validate_template("{{y}/{{filename}}").is_err());
        assert!(validate_template("{{y}}/{{filename").is_err());
        assert!(validate_template("{{y|nofilter}}/{{filename}}").is_err());
    }

    #[test]
    fn test_unknown_tokens_are_named() {
        let err = StorageTemplate::compile("{{year}}/{{filename}}").unwrap_err();
        assert!(err.to_string().contains("`year`"), "{}", err);
    }

    #[test]
    fn test_config_validator() {
        let mut config = SystemConfig::default();
        assert!(validate_storage_template(&config, &SystemConfig::default()).is_ok());

        config.storage_template.template = "{{y}}/{{MM}}".to_string();
        assert!(validate_storage_template(&config, &SystemConfig::default()).is_err());
    }

    #[test]
    fn test_options() {
        let options = get_storage_template_options();
        assert_eq!(options.preset_options.len(), PRESET_TEMPLATES.len());
        assert_eq!(options.hour_options, vec!["h", "hh", "H", "HH"]);

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["yearOptions"], serde_json::json!(["y", "yy"]));
    }
}
