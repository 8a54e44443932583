//! Query limits.

use std::time::Duration;

/// Default cap on emitted rows.
pub const DEFAULT_MAX_ROWS: usize = 10_000_000;

/// Default wall-clock budget for a query job.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Limits applied to every query an engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Maximum rows a query may emit.
    pub max_rows: usize,
    /// Maximum resolved cells before any payload is read.
    pub max_cells: usize,
    /// Wall-clock budget for jobs run by [`crate::QueryJobRunner`].
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_cells: DEFAULT_MAX_ROWS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueryConfig::default();
        assert_eq!(config.max_rows, 10_000_000);
        assert_eq!(config.max_cells, config.max_rows);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = QueryConfig::new()
            .with_max_rows(5)
            .with_max_cells(3)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(config.max_rows, 5);
        assert_eq!(config.max_cells, 3);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }
}
