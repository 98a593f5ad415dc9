use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, instrument};

use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::clean::CleanedDataset;
use crate::types::{DatasetKind, KeyTuple};

/// Identity of a measure column before output naming is decided.
///
/// Ordering (source, then position in the source header) fixes the merged
/// column layout independently of the order in which tables were joined.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceColumn {
    pub source: DatasetKind,
    pub position: usize,
    pub measure: String,
}

#[derive(Debug, Clone, PartialEq)]
struct JoinRow {
    cells: Vec<Option<f64>>,
    sources: BTreeSet<DatasetKind>,
}

/// Outer-join intermediate. Cells from sources that had no row for a key are
/// `None`; they only become zeros in `fill_missing`, after every join is done.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTable {
    columns: Vec<SourceColumn>,
    rows: BTreeMap<KeyTuple, JoinRow>,
    sources: BTreeSet<DatasetKind>,
}

impl JoinTable {
    pub fn from_cleaned(dataset: &CleanedDataset) -> Self {
        let columns = dataset
            .measures
            .iter()
            .enumerate()
            .map(|(position, measure)| SourceColumn {
                source: dataset.kind,
                position,
                measure: measure.clone(),
            })
            .collect();
        let rows = dataset
            .rows
            .iter()
            .map(|(key, values)| {
                let row = JoinRow {
                    cells: values.iter().copied().map(Some).collect(),
                    sources: BTreeSet::from([dataset.kind]),
                };
                (key.clone(), row)
            })
            .collect();
        Self {
            columns,
            rows,
            sources: BTreeSet::from([dataset.kind]),
        }
    }

    pub fn sources(&self) -> &BTreeSet<DatasetKind> {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full outer join on the key tuple. Associative and commutative: the
    /// column layout is derived from source order, not argument order.
    pub fn outer_join(self, other: JoinTable) -> Result<JoinTable> {
        let overlap: Vec<_> = self.sources.intersection(&other.sources).collect();
        if !overlap.is_empty() {
            return Err(PipelineError::Schema(format!(
                "dataset(s) {:?} appear on both sides of the join",
                overlap
            )));
        }

        let mut columns: Vec<SourceColumn> = self
            .columns
            .iter()
            .chain(other.columns.iter())
            .cloned()
            .collect();
        columns.sort();

        // For each output column: which side it comes from and its index there
        let left_index: HashMap<&SourceColumn, usize> =
            self.columns.iter().enumerate().map(|(i, c)| (c, i)).collect();
        let right_index: HashMap<&SourceColumn, usize> =
            other.columns.iter().enumerate().map(|(i, c)| (c, i)).collect();

        let keys: BTreeSet<&KeyTuple> = self.rows.keys().chain(other.rows.keys()).collect();
        let mut rows = BTreeMap::new();
        for key in keys {
            let left = self.rows.get(key);
            let right = other.rows.get(key);

            let cells = columns
                .iter()
                .map(|column| match (left_index.get(column), right_index.get(column)) {
                    (Some(&i), _) => left.and_then(|r| r.cells[i]),
                    (None, Some(&i)) => right.and_then(|r| r.cells[i]),
                    (None, None) => None,
                })
                .collect();
            let sources = left
                .into_iter()
                .chain(right)
                .flat_map(|r| r.sources.iter().copied())
                .collect();

            rows.insert(key.clone(), JoinRow { cells, sources });
        }

        let sources = self.sources.union(&other.sources).copied().collect();
        Ok(JoinTable {
            columns,
            rows,
            sources,
        })
    }

    /// Replace every absent cell with `fill` and assign output column names.
    ///
    /// A measure keeps its own name unless the same name occurs in more than
    /// one source; then each colliding column gets a `_<source>` suffix.
    pub fn fill_missing(self, fill: f64) -> MergedTable {
        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for column in &self.columns {
            *name_counts.entry(column.measure.as_str()).or_default() += 1;
        }
        let columns: Vec<MergedColumn> = self
            .columns
            .iter()
            .map(|c| {
                let name = if name_counts[c.measure.as_str()] > 1 {
                    format!("{}_{}", c.measure, c.source.suffix())
                } else {
                    c.measure.clone()
                };
                MergedColumn {
                    source: c.source,
                    measure: c.measure.clone(),
                    name,
                }
            })
            .collect();

        let mut zero_filled = 0;
        let rows = self
            .rows
            .into_iter()
            .map(|(key, row)| {
                let values = row
                    .cells
                    .into_iter()
                    .map(|cell| {
                        cell.unwrap_or_else(|| {
                            zero_filled += 1;
                            fill
                        })
                    })
                    .collect();
                MergedRow {
                    key,
                    values,
                    sources: row.sources,
                }
            })
            .collect::<Vec<_>>();

        MergedTable {
            stats: MergeStats {
                rows: rows.len(),
                zero_filled,
            },
            columns,
            rows,
        }
    }
}

/// An output column of the merged table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedColumn {
    pub source: DatasetKind,
    /// Measure name as it appeared in the source
    pub measure: String,
    /// Name written to the output header
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    pub key: KeyTuple,
    /// One value per `MergedTable::columns` entry, never missing
    pub values: Vec<f64>,
    /// Datasets that actually had a row for this key
    pub sources: BTreeSet<DatasetKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeStats {
    pub rows: usize,
    pub zero_filled: usize,
}

/// The wide table: every key seen in any source, every measure of every
/// source, absent combinations zero-filled.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    pub columns: Vec<MergedColumn>,
    /// Sorted by key
    pub rows: Vec<MergedRow>,
    pub stats: MergeStats,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Output shape: key columns plus measure columns
    pub fn width(&self) -> usize {
        4 + self.columns.len()
    }

    pub fn column_index(&self, source: DatasetKind, measure: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.source == source && c.measure == measure)
    }

    pub fn column_by_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Like `column_index`, but a missing column is a schema error
    pub fn require_column(&self, source: DatasetKind, measure: &str) -> Result<usize> {
        self.column_index(source, measure).ok_or_else(|| {
            PipelineError::Schema(format!(
                "merged table has no {} column '{}'",
                source, measure
            ))
        })
    }

    pub fn find(&self, key: &KeyTuple) -> Option<&MergedRow> {
        self.rows
            .binary_search_by(|row| row.key.cmp(key))
            .ok()
            .map(|i| &self.rows[i])
    }
}

/// Outer-join any number of cleaned datasets and zero-fill the gaps.
#[instrument(skip_all, fields(datasets = datasets.len()))]
pub fn merge_datasets(datasets: &[&CleanedDataset]) -> Result<MergedTable> {
    let mut tables = datasets.iter().map(|d| JoinTable::from_cleaned(d));
    let first = tables
        .next()
        .ok_or_else(|| PipelineError::DataSource("no datasets to merge".to_string()))?;
    let joined = tables.try_fold(first, JoinTable::outer_join)?;

    let merged = joined.fill_missing(0.0);
    metrics::merger::merged(merged.stats.rows, merged.stats.zero_filled);
    info!(
        "🔗 Merged into {} rows x {} columns ({} cells zero-filled)",
        merged.len(),
        merged.width(),
        merged.stats.zero_filled
    );
    Ok(merged)
}

/// Merge the three corpora
pub fn merge(
    enrol: &CleanedDataset,
    demo: &CleanedDataset,
    bio: &CleanedDataset,
) -> Result<MergedTable> {
    merge_datasets(&[enrol, demo, bio])
}
