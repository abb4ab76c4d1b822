use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::fileset::default_exclude_dirs;
use crate::layout::Layout;
use crate::store::Atomicity;

pub const CONFIG_FILE: &str = "ifcb-catalog.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub skip_existing: Option<bool>,
    #[serde(default)]
    pub skip_missing: Option<bool>,
    #[serde(default)]
    pub atomicity: Option<Atomicity>,
    #[serde(default)]
    pub exclude_dirs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog_path: Utf8PathBuf,
    pub layout: Layout,
    pub workers: usize,
    pub skip_existing: bool,
    pub skip_missing: bool,
    pub atomicity: Atomicity,
    pub exclude_dirs: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `ifcb-catalog.json` in the current directory when no
    /// path is given. A missing default file resolves to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CatalogError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CatalogError> {
        let layout = match config.layout {
            Some(name) => name.parse()?,
            None => Layout::default(),
        };
        let catalog_path = match config.catalog_path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_catalog_path()?,
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            catalog_path,
            layout,
            workers: config.workers.unwrap_or(4).max(1),
            skip_existing: config.skip_existing.unwrap_or(true),
            skip_missing: config.skip_missing.unwrap_or(true),
            atomicity: config.atomicity.unwrap_or_default(),
            exclude_dirs: config.exclude_dirs.unwrap_or_else(default_exclude_dirs),
        })
    }
}

pub fn default_catalog_path() -> Result<Utf8PathBuf, CatalogError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("ifcb-catalog").join("catalog.json"))
                .ok()
        })
        .ok_or_else(|| CatalogError::Filesystem("unable to resolve data directory".to_string()))
}
