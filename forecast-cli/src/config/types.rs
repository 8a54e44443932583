use std::path::PathBuf;
use std::time::Duration;

use forecast_query::{DEFAULT_MAX_ROWS, DEFAULT_TIMEOUT, QueryConfig};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHubConfig {
    #[serde(default)]
    pub store: RawStoreConfig,

    #[serde(default)]
    pub catalog: RawCatalogConfig,

    #[serde(default)]
    pub query: RawQueryConfig,

    #[serde(default)]
    pub output: RawOutputConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCatalogConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawQueryConfig {
    pub max_rows: Option<usize>,
    pub max_cells: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawOutputConfig {
    pub format: Option<OutputFormat>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding every version
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Project catalog, JSON or TOML by extension
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CATALOG_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    pub max_rows: usize,
    pub max_cells: usize,
    pub timeout_secs: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_cells: DEFAULT_MAX_ROWS,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl QuerySettings {
    pub fn to_query_config(&self) -> QueryConfig {
        QueryConfig::new()
            .with_max_rows(self.max_rows)
            .with_max_cells(self.max_cells)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Row output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

/// Default SQLite database, relative to the working directory
pub const DEFAULT_STORE_PATH: &str = "forecast-hub.db";

/// Default catalog file, relative to the working directory
pub const DEFAULT_CATALOG_PATH: &str = "catalog.json";
