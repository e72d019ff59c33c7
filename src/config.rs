// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// User configuration, read from `.msacacheconfig` (JSON) in $HOME or the current directory.
// Command-line flags take precedence over anything set here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::MsaCacheError;
use crate::store::{StoreConfig, DEFAULT_BUSY_TIMEOUT};

pub const CONFIG_FILE_NAME: &str = ".msacacheconfig";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsaCacheConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub prediction_script: Option<PathBuf>,
    #[serde(default)]
    pub validation_script: Option<PathBuf>,
}

impl MsaCacheConfig {
    pub fn from_file(path: &Path) -> Result<MsaCacheConfig, MsaCacheError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| MsaCacheError::Format(format!("{}: {}", path.display(), e)))
    }

    /// Loads the first config file found, or the defaults if there is none.
    pub fn load() -> Result<MsaCacheConfig, MsaCacheError> {
        match find_config() {
            Some(path) => {
                info!("Reading config {}", path.display());
                MsaCacheConfig::from_file(&path)
            }
            None => {
                debug!("No {} found; using defaults", CONFIG_FILE_NAME);
                Ok(MsaCacheConfig::default())
            }
        }
    }

    /// Store settings, with `db_path` (typically from the command line) overriding the config.
    pub fn store_config(&self, db_path: Option<&Path>) -> Result<StoreConfig, MsaCacheError> {
        let path = match db_path.or(self.db_path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => default_db_path()?,
        };
        let busy_timeout = self
            .busy_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BUSY_TIMEOUT);
        Ok(StoreConfig::new(path).with_busy_timeout(busy_timeout))
    }
}

fn find_config() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(home).join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// `$HOME/.msacache/msa.sqlite`
pub fn default_db_path() -> Result<PathBuf, MsaCacheError> {
    let home = std::env::var("HOME").map_err(|_| {
        MsaCacheError::Format(String::from(
            "HOME is not set; pass --db-path or set db_path in .msacacheconfig",
        ))
    })?;
    Ok(PathBuf::from(home).join(".msacache").join("msa.sqlite"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"{"db_path": "/data/msa.sqlite", "busy_timeout_ms": 250, "prediction_script": "/opt/af3/run.sh"}"#,
        )
        .unwrap();
        let cfg = MsaCacheConfig::from_file(&path).unwrap();
        assert_eq!(cfg.db_path, Some(PathBuf::from("/data/msa.sqlite")));
        assert_eq!(cfg.validation_script, None);

        let store = cfg.store_config(None).unwrap();
        assert_eq!(store.path, PathBuf::from("/data/msa.sqlite"));
        assert_eq!(store.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_cli_path_overrides() {
        let cfg = MsaCacheConfig {
            db_path: Some(PathBuf::from("/data/msa.sqlite")),
            ..Default::default()
        };
        let store = cfg.store_config(Some(Path::new("./local.sqlite"))).unwrap();
        assert_eq!(store.path, PathBuf::from("./local.sqlite"));
        assert_eq!(store.busy_timeout, DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"db": "/x"}"#).unwrap();
        assert!(matches!(
            MsaCacheConfig::from_file(&path),
            Err(MsaCacheError::Format(_))
        ));
    }
}
