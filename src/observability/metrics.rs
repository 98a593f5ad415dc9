//! Pipeline metrics recorded through the `metrics` facade.
//!
//! Nothing here is required for correctness: when no recorder is installed
//! every call is a no-op. The CLI installs a Prometheus recorder and dumps the
//! rendered text at the end of a run.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::{PipelineError, Result};

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Loader
    LoaderFragmentsRead,
    LoaderRowsRead,

    // Cleaner
    CleanerRowsInput,
    CleanerRowsDroppedInvalidDate,
    CleanerRowsDroppedMissingKey,
    CleanerDuplicatesCollapsed,
    CleanerColumnsDropped,
    CleanerRowsOutput,

    // Merger
    MergerRowsOutput,
    MergerCellsZeroFilled,

    // Metric engine
    ScoringRowsScored,
    ScoringUndefinedBur,
    ScoringUndefinedFafiRate,
    ScoringDistrictsScored,

    // Writer
    WriterRowsWritten,
    WriterBytesWritten,

    // Whole run
    StageDuration,
    PipelineErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LoaderFragmentsRead => "uidai_loader_fragments_read_total",
            MetricName::LoaderRowsRead => "uidai_loader_rows_read_total",
            MetricName::CleanerRowsInput => "uidai_cleaner_rows_input_total",
            MetricName::CleanerRowsDroppedInvalidDate => {
                "uidai_cleaner_rows_dropped_invalid_date_total"
            }
            MetricName::CleanerRowsDroppedMissingKey => "uidai_cleaner_rows_dropped_missing_key_total",
            MetricName::CleanerDuplicatesCollapsed => "uidai_cleaner_duplicates_collapsed_total",
            MetricName::CleanerColumnsDropped => "uidai_cleaner_columns_dropped_total",
            MetricName::CleanerRowsOutput => "uidai_cleaner_rows_output_total",
            MetricName::MergerRowsOutput => "uidai_merger_rows_output_total",
            MetricName::MergerCellsZeroFilled => "uidai_merger_cells_zero_filled_total",
            MetricName::ScoringRowsScored => "uidai_scoring_rows_scored_total",
            MetricName::ScoringUndefinedBur => "uidai_scoring_undefined_bur_total",
            MetricName::ScoringUndefinedFafiRate => "uidai_scoring_undefined_fafi_rate_total",
            MetricName::ScoringDistrictsScored => "uidai_scoring_districts_scored_total",
            MetricName::WriterRowsWritten => "uidai_writer_rows_written_total",
            MetricName::WriterBytesWritten => "uidai_writer_bytes_written",
            MetricName::StageDuration => "uidai_stage_duration_seconds",
            MetricName::PipelineErrors => "uidai_pipeline_errors_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            LoaderFragmentsRead,
            LoaderRowsRead,
            CleanerRowsInput,
            CleanerRowsDroppedInvalidDate,
            CleanerRowsDroppedMissingKey,
            CleanerDuplicatesCollapsed,
            CleanerColumnsDropped,
            CleanerRowsOutput,
            MergerRowsOutput,
            MergerCellsZeroFilled,
            ScoringRowsScored,
            ScoringUndefinedBur,
            ScoringUndefinedFafiRate,
            ScoringDistrictsScored,
            WriterRowsWritten,
            WriterBytesWritten,
            StageDuration,
            PipelineErrors,
        ]
        .into_iter()
    }

    /// Returns (stage, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::LoaderFragmentsRead => ("loader", "CSV fragments read"),
            MetricName::LoaderRowsRead => ("loader", "Raw rows read from fragments"),
            MetricName::CleanerRowsInput => ("cleaner", "Raw rows entering the cleaner"),
            MetricName::CleanerRowsDroppedInvalidDate => {
                ("cleaner", "Rows dropped because the date could not be parsed")
            }
            MetricName::CleanerRowsDroppedMissingKey => {
                ("cleaner", "Rows dropped because a key field was empty")
            }
            MetricName::CleanerDuplicatesCollapsed => {
                ("cleaner", "Rows folded into an existing key by summation")
            }
            MetricName::CleanerColumnsDropped => ("cleaner", "Non-numeric columns discarded"),
            MetricName::CleanerRowsOutput => ("cleaner", "Distinct keys after cleaning"),
            MetricName::MergerRowsOutput => ("merger", "Rows in the merged table"),
            MetricName::MergerCellsZeroFilled => ("merger", "Cells zero-filled after the join"),
            MetricName::ScoringRowsScored => ("scoring", "Rows scored, by risk tier"),
            MetricName::ScoringUndefinedBur => ("scoring", "Rows with a zero BUR denominator"),
            MetricName::ScoringUndefinedFafiRate => {
                ("scoring", "Rows with a zero FAFI_rate denominator")
            }
            MetricName::ScoringDistrictsScored => ("scoring", "Districts scored"),
            MetricName::WriterRowsWritten => ("writer", "Rows written to output files"),
            MetricName::WriterBytesWritten => ("writer", "Size of each written file"),
            MetricName::StageDuration => ("pipeline", "Wall time per stage"),
            MetricName::PipelineErrors => ("pipeline", "Fatal pipeline errors, by kind"),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later calls
/// are ignored.
pub fn init() -> Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PipelineError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;

    for name in MetricName::all_metrics() {
        let (_, description) = name.metadata();
        match name {
            MetricName::StageDuration | MetricName::WriterBytesWritten => {
                ::metrics::describe_histogram!(name.as_str(), description)
            }
            _ => ::metrics::describe_counter!(name.as_str(), description),
        }
    }

    METRICS_HANDLE.set(handle).ok();
    info!("Metrics recorder installed");
    Ok(())
}

/// Render all recorded metrics in Prometheus text format
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

/// Record the duration of a pipeline stage
pub fn stage_duration(stage: &'static str, secs: f64) {
    ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(secs);
}

/// Record a fatal pipeline error
pub fn pipeline_error(kind: &'static str) {
    ::metrics::counter!(MetricName::PipelineErrors.as_str(), "kind" => kind).increment(1);
}

// ============================================================================
// Loader Metrics
// ============================================================================

pub mod loader {
    use super::MetricName;

    pub fn fragment_read(dataset: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::LoaderFragmentsRead.as_str(), "dataset" => dataset)
            .increment(1);
        ::metrics::counter!(MetricName::LoaderRowsRead.as_str(), "dataset" => dataset)
            .increment(rows as u64);
    }
}

// ============================================================================
// Cleaner Metrics
// ============================================================================

pub mod cleaner {
    use super::MetricName;
    use crate::pipeline::processing::clean::CleanStats;

    /// Record every counter of a finished cleaning pass
    pub fn record_stats(dataset: &'static str, stats: &CleanStats) {
        let pairs = [
            (MetricName::CleanerRowsInput, stats.input_rows),
            (MetricName::CleanerRowsDroppedInvalidDate, stats.dropped_invalid_date),
            (MetricName::CleanerRowsDroppedMissingKey, stats.dropped_missing_key),
            (MetricName::CleanerDuplicatesCollapsed, stats.duplicates_collapsed),
            (MetricName::CleanerColumnsDropped, stats.dropped_columns.len()),
            (MetricName::CleanerRowsOutput, stats.output_rows),
        ];
        for (name, value) in pairs {
            ::metrics::counter!(name.as_str(), "dataset" => dataset).increment(value as u64);
        }
    }
}

// ============================================================================
// Merger Metrics
// ============================================================================

pub mod merger {
    use super::MetricName;

    pub fn merged(rows: usize, zero_filled: usize) {
        ::metrics::counter!(MetricName::MergerRowsOutput.as_str()).increment(rows as u64);
        ::metrics::counter!(MetricName::MergerCellsZeroFilled.as_str())
            .increment(zero_filled as u64);
    }
}

// ============================================================================
// Scoring Metrics
// ============================================================================

pub mod scoring {
    use super::MetricName;

    pub fn row_scored(tier: &'static str) {
        ::metrics::counter!(MetricName::ScoringRowsScored.as_str(), "tier" => tier).increment(1);
    }

    pub fn undefined_bur() {
        ::metrics::counter!(MetricName::ScoringUndefinedBur.as_str()).increment(1);
    }

    pub fn undefined_fafi_rate() {
        ::metrics::counter!(MetricName::ScoringUndefinedFafiRate.as_str()).increment(1);
    }

    pub fn districts_scored(count: usize) {
        ::metrics::counter!(MetricName::ScoringDistrictsScored.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Writer Metrics
// ============================================================================

pub mod writer {
    use super::MetricName;

    pub fn written(rows: usize, bytes: u64) {
        ::metrics::counter!(MetricName::WriterRowsWritten.as_str()).increment(rows as u64);
        ::metrics::histogram!(MetricName::WriterBytesWritten.as_str()).record(bytes as f64);
    }
}
