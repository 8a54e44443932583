pub mod config;
pub mod load;
pub mod query;
pub mod versions;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use forecast_core::{Catalog, SqliteVersionStore, VersionStore};
use tracing::debug;

use crate::config::HubConfig;

/// The store and catalog every command works against.
pub struct Hub {
    pub store: Arc<dyn VersionStore>,
    pub catalog: Arc<Catalog>,
}

impl Hub {
    pub fn open(config: &HubConfig) -> Result<Self> {
        let catalog = read_catalog(&config.catalog.path)?;
        let store = SqliteVersionStore::open(&config.store.path)
            .with_context(|| format!("opening store {}", config.store.path.display()))?;
        debug!(
            store = %config.store.path.display(),
            models = catalog.models().len(),
            units = catalog.units().len(),
            targets = catalog.targets().len(),
            time_points = catalog.time_points().len(),
            "Opened hub"
        );
        Ok(Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
        })
    }
}

/// Read a catalog file, TOML when the extension says so, JSON otherwise.
pub fn read_catalog(path: &Path) -> Result<Catalog> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let catalog = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .with_context(|| format!("parsing catalog {}", path.display()))?,
        _ => Catalog::from_json_str(&contents)
            .with_context(|| format!("parsing catalog {}", path.display()))?,
    };
    Ok(catalog)
}
