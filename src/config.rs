use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};
use tracing::debug;

use crate::error::{EtlError, Result};

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://etl.db";

const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub retries: u32,
    pub backoff: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    database: DatabaseSection,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    url: Option<String>,
    retries: Option<u32>,
    backoff_ms: Option<u64>,
}

impl Config {
    /// Resolves the connection string: `explicit`, then `DATABASE_URL`, then
    /// `database.url` in the YAML file at `path`, then the built-in fallback.
    /// A missing file is fine; an unreadable or malformed one is not.
    pub fn load<P: AsRef<Path>>(path: P, explicit: Option<&str>) -> Result<Self> {
        let env_url = env::var(DATABASE_URL_ENV).ok();
        Self::resolve(path.as_ref(), explicit, env_url.as_deref())
    }

    fn resolve(path: &Path, explicit: Option<&str>, env_url: Option<&str>) -> Result<Self> {
        let file = read_config_file(path)?;

        let database_url = [explicit, env_url, file.database.url.as_deref()]
            .into_iter()
            .flatten()
            .find(|url| !url.is_empty())
            .unwrap_or(DEFAULT_DATABASE_URL)
            .to_string();

        let retries = file.database.retries.unwrap_or(DEFAULT_RETRIES);
        if retries == 0 {
            return Err(EtlError::Config(
                "database.retries must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            retries,
            backoff: Duration::from_millis(file.database.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        debug!("No config file at {}", path.display());
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        EtlError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    // An empty document deserializes as unit, not as a mapping.
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn explicit_url_wins() {
        let file = config_file("database:\n  url: sqlite://from-file.db\n");

        let config = Config::resolve(file.path(), Some("cli.db"), Some("env.db")).unwrap();

        assert_eq!(config.database_url, "cli.db");
    }

    #[test]
    fn env_beats_file() {
        let file = config_file("database:\n  url: sqlite://from-file.db\n");

        let config = Config::resolve(file.path(), None, Some("sqlite://env.db")).unwrap();

        assert_eq!(config.database_url, "sqlite://env.db");
    }

    #[test]
    fn file_beats_fallback() {
        let file = config_file(
            "database:\n  url: sqlite://from-file.db\n  retries: 2\n  backoff_ms: 10\n",
        );

        let config = Config::resolve(file.path(), None, None).unwrap();

        assert_eq!(
            config,
            Config {
                database_url: "sqlite://from-file.db".to_string(),
                retries: 2,
                backoff: Duration::from_millis(10),
            }
        );
    }

    #[test]
    fn fallback_without_file() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::resolve(&dir.path().join("missing.yml"), None, None).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.retries, DEFAULT_RETRIES);
        assert_eq!(config.backoff, Duration::from_millis(DEFAULT_BACKOFF_MS));
    }

    #[test]
    fn empty_file_and_empty_env_fall_through() {
        let file = config_file("");

        let config = Config::resolve(file.path(), None, Some("")).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = config_file("database: [not, a, mapping\n");

        assert!(Config::resolve(file.path(), None, None).is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let file = config_file("database:\n  retries: 0\n");

        assert!(matches!(
            Config::resolve(file.path(), None, None),
            Err(EtlError::Config(_))
        ));
    }
}
