use super::types::{
    CatalogConfig, HubConfig, OutputConfig, QuerySettings, RawCatalogConfig, RawHubConfig,
    RawOutputConfig, RawQueryConfig, RawStoreConfig, StoreConfig,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<HubConfig> {
        let mut raw = RawHubConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("forecast-hub").join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with FORECAST_HUB_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("FORECAST_HUB_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".forecast-hub/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawHubConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawHubConfig, overlay: RawHubConfig) -> RawHubConfig {
        RawHubConfig {
            store: RawStoreConfig {
                path: overlay.store.path.or(base.store.path),
            },
            catalog: RawCatalogConfig {
                path: overlay.catalog.path.or(base.catalog.path),
            },
            query: RawQueryConfig {
                max_rows: overlay.query.max_rows.or(base.query.max_rows),
                max_cells: overlay.query.max_cells.or(base.query.max_cells),
                timeout_secs: overlay.query.timeout_secs.or(base.query.timeout_secs),
            },
            output: RawOutputConfig {
                format: overlay.output.format.or(base.output.format),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawHubConfig) -> HubConfig {
        let query = QuerySettings::default();
        HubConfig {
            store: StoreConfig {
                path: raw.store.path.unwrap_or_else(|| StoreConfig::default().path),
            },
            catalog: CatalogConfig {
                path: raw
                    .catalog
                    .path
                    .unwrap_or_else(|| CatalogConfig::default().path),
            },
            query: QuerySettings {
                max_rows: raw.query.max_rows.unwrap_or(query.max_rows),
                max_cells: raw.query.max_cells.unwrap_or(query.max_cells),
                timeout_secs: raw.query.timeout_secs.unwrap_or(query.timeout_secs),
            },
            output: OutputConfig {
                format: raw.output.format.unwrap_or_default(),
            },
        }
    }

    /// Load config from a specific path (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<HubConfig> {
        if path.exists() {
            Ok(Self::finalize(Self::read_raw(path)?))
        } else {
            Ok(HubConfig::default())
        }
    }
}
