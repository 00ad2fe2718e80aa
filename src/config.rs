use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Process settings read from the environment. The system configuration
/// itself lives in storage (or `DARKROOM_CONFIG_FILE`), not here.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres is optional; without it overrides go to a JSON file.
    pub database: Option<DatabaseConfig>,
    pub data_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            }),
            _ => None,
        };

        Ok(Self {
            database,
            data_dir: non_empty_path("DARKROOM_DATA_DIR"),
            config_file: non_empty_path("DARKROOM_CONFIG_FILE"),
        })
    }
}

fn non_empty_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_path() {
        env::set_var("DARKROOM_TEST_EMPTY_PATH", "  ");
        env::set_var("DARKROOM_TEST_SET_PATH", "/etc/darkroom.json");

        assert_eq!(non_empty_path("DARKROOM_TEST_EMPTY_PATH"), None);
        assert_eq!(
            non_empty_path("DARKROOM_TEST_SET_PATH"),
            Some(PathBuf::from("/etc/darkroom.json"))
        );
        assert_eq!(non_empty_path("DARKROOM_TEST_UNSET_PATH"), None);
    }
}
