//! Version resolution: the authoritative element per cell as of a cutoff.
//!
//! Elements are folded per [`CellKey`], keeping the one whose version has the
//! greatest `issued_at` at or before the cutoff. Two versions of a pair never
//! share an `issued_at` (the store refuses it), but if they did, the element
//! with the larger id wins. Output order is [`CellKey`] order, so resolution
//! is deterministic for a given store state, filter and cutoff.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use forecast_core::{CellKey, ElementFilter, ElementId, ElementRecord, VersionId, VersionStore};
use tokio_util::sync::CancellationToken;

use crate::error::{QueryError, Result};

/// Options for a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Only versions issued at or before this instant. `None` means latest.
    pub cutoff: Option<DateTime<Utc>>,
    /// Keep cells whose authoritative element is a retraction.
    pub include_retracted: bool,
    /// Abort when more cells than this match.
    pub max_cells: usize,
}

impl ResolveOptions {
    pub fn new(max_cells: usize) -> Self {
        Self {
            cutoff: None,
            include_retracted: false,
            max_cells,
        }
    }

    #[must_use]
    pub fn with_cutoff(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.cutoff = cutoff;
        self
    }

    #[must_use]
    pub fn with_retracted(mut self, include_retracted: bool) -> Self {
        self.include_retracted = include_retracted;
        self
    }
}

/// The winning element of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCell {
    pub key: CellKey,
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub issued_at: DateTime<Utc>,
    pub is_retracted: bool,
}

impl From<ElementRecord> for ResolvedCell {
    fn from(record: ElementRecord) -> Self {
        Self {
            key: record.key,
            element_id: record.element_id,
            version_id: record.version_id,
            issued_at: record.issued_at,
            is_retracted: record.is_retracted,
        }
    }
}

/// Pick the authoritative element per cell among `records`.
pub fn resolve_records(
    records: impl IntoIterator<Item = ElementRecord>,
    options: &ResolveOptions,
) -> Result<Vec<ResolvedCell>> {
    let mut winners: BTreeMap<CellKey, ElementRecord> = BTreeMap::new();
    for record in records {
        if options.cutoff.is_some_and(|cutoff| record.issued_at > cutoff) {
            continue;
        }
        let replace = winners.get(&record.key).is_none_or(|current| {
            (record.issued_at, record.element_id) > (current.issued_at, current.element_id)
        });
        if replace {
            winners.insert(record.key, record);
        }
    }

    if winners.len() > options.max_cells {
        return Err(QueryError::ResultTooLarge {
            count: winners.len(),
            max: options.max_cells,
        });
    }

    Ok(winners
        .into_values()
        .filter(|r| options.include_retracted || !r.is_retracted)
        .map(ResolvedCell::from)
        .collect())
}

/// Scan `store` with `filter` and resolve the matching cells. With a
/// `cancel` token the scan stops with [`QueryError::Cancelled`] once it fires.
pub fn resolve(
    store: &dyn VersionStore,
    filter: &ElementFilter,
    options: &ResolveOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<ResolvedCell>> {
    let mut filter = filter.clone();
    filter.cutoff = options.cutoff;
    let records = match cancel {
        Some(token) => store.scan_elements_cancellable(&filter, token)?,
        None => store.scan_elements(&filter)?,
    };
    let scanned = records.len();
    let cells = resolve_records(records, options)?;
    tracing::debug!(scanned, cells = cells.len(), cutoff = ?options.cutoff, "Resolved cells");
    Ok(cells)
}
