//! Per-section TOML configuration.
//!
//! Each configurable part of the service owns one named section, stored as
//! `<dir>/<section>.toml`. Loading a section that has no file yet writes the
//! section's defaults to disk and returns them, so a fresh deployment ends up
//! with a fully populated, editable config directory after first start.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while loading or persisting configuration sections.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config section {section:?}: {source}")]
    Read {
        section: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config section {section:?}: {source}")]
    Write {
        section: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config section {section:?} is malformed: {source}")]
    Parse {
        section: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config section {section:?} cannot be serialized: {source}")]
    Serialize {
        section: String,
        #[source]
        source: toml::ser::Error,
    },
}

/// Loads and persists named configuration sections.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    dir: PathBuf,
}

impl ConfigManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the section files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn section_path(&self, section: &str) -> PathBuf {
        self.dir.join(format!("{section}.toml"))
    }

    /// Load `section`, creating it from `T::default()` if it does not exist.
    ///
    /// # Errors
    ///
    /// I/O failures other than "not found", malformed TOML, and
    /// unserializable defaults all surface as [`ConfigError`]. A malformed
    /// file is never silently replaced with defaults.
    pub async fn load<T>(&self, section: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let path = self.section_path(section);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                section: section.to_string(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(section, path = %path.display(), "config section missing, writing defaults");
                let default = T::default();
                self.save(section, &default).await?;
                Ok(default)
            }
            Err(source) => Err(ConfigError::Read {
                section: section.to_string(),
                source,
            }),
        }
    }

    /// Persist `config` as `section`, creating the config directory if needed.
    pub async fn save<T>(&self, section: &str, config: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let raw = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
            section: section.to_string(),
            source,
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ConfigError::Write {
                section: section.to_string(),
                source,
            })?;
        tokio::fs::write(self.section_path(section), raw)
            .await
            .map_err(|source| ConfigError::Write {
                section: section.to_string(),
                source,
            })
    }
}
