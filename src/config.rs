use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::favorites::{DEFAULT_FAVORITE_ZOOM, JsonFavoritesStore};
use crate::geo::Coordinate;

/// Top-level configuration for the geotagger library.
///
/// Controls the catalog filter, how commits write files, where the map
/// starts, and where favorites are stored.
///
/// # Loading
///
/// ```rust,no_run
/// use geotagger::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.commit.dry_run = true;
/// config.catalog.hide_with_coordinates = true;
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub commit: CommitConfig,
    pub map: MapConfig,
    pub favorites: FavoritesConfig,
}

/// Catalog view settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Start with photos that already have coordinates hidden.
    pub hide_with_coordinates: bool,
}

/// Write behavior for commits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// If `true`, preview what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying an image.
    pub backup_originals: bool,
}

/// Map defaults used when a photo has no coordinates yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub initial_center: Coordinate,
    pub favorite_zoom: u8,
}

/// Namespace of the per-user favorites file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoritesConfig {
    pub organization: String,
    pub application: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_center: Coordinate::new(55.666, 37.666),
            favorite_zoom: DEFAULT_FAVORITE_ZOOM,
        }
    }
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            organization: "geotagger".to_string(),
            application: "geotagger".to_string(),
        }
    }
}

impl FavoritesConfig {
    /// The JSON store for this namespace in the user's config directory.
    pub fn store(&self) -> Result<JsonFavoritesStore> {
        JsonFavoritesStore::for_namespace(&self.organization, &self.application)
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
