// Data processing pipeline: ingestion, processing, and storage

pub mod ingestion;
pub mod processing;
pub mod storage;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{error, info, instrument};

use crate::config::Config;
use crate::error::Result;
use crate::observability::metrics;
use crate::types::DatasetKind;
use processing::clean::{self, CleanStats, CleanedDataset};
use processing::merge::{self, MergedTable};
use processing::scoring::{DistrictScore, MetricEngine, ScoredTable};
use storage::WriteSummary;

/// Run `f` as a named stage: its wall time goes to the stage histogram and a
/// failure is counted by error kind before being propagated.
fn timed<T>(stage: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f();
    metrics::stage_duration(stage, start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("❌ Stage {} failed: {}", stage, e);
        metrics::pipeline_error(e.kind());
    }
    result
}

/// Load every fragment of one dataset and clean it
fn load_and_clean(config: &Config, kind: DatasetKind) -> Result<CleanedDataset> {
    let dir = config.inputs.dir_for(kind);
    let raw = timed("load", || ingestion::load_dataset_from_dir(dir, kind.name()))?;
    timed("clean", || clean::clean(&raw, kind, &config.cleaning))
}

/// The three cleaned corpora
#[derive(Debug, Clone)]
pub struct CleanedInputs {
    pub enrolment: CleanedDataset,
    pub demographic: CleanedDataset,
    pub biometric: CleanedDataset,
}

impl CleanedInputs {
    pub fn stats(&self) -> BTreeMap<DatasetKind, CleanStats> {
        [&self.enrolment, &self.demographic, &self.biometric]
            .into_iter()
            .map(|d| (d.kind, d.stats.clone()))
            .collect()
    }
}

/// Final table of a run
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Merged(MergedTable),
    Scored {
        table: ScoredTable,
        districts: Vec<DistrictScore>,
    },
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub clean_stats: BTreeMap<DatasetKind, CleanStats>,
    pub output: PipelineOutput,
    /// The merged or scored CSV
    pub written: WriteSummary,
    /// District rollup CSV, when configured
    pub district_written: Option<WriteSummary>,
}

/// Entry points for running the pipeline in-process
pub struct Pipeline;

impl Pipeline {
    /// Load and clean the three datasets. With `execution.parallel_clean`
    /// the branches run on the rayon pool; the result is identical either
    /// way.
    #[instrument(skip_all, fields(parallel = config.execution.parallel_clean))]
    pub fn load_inputs(config: &Config) -> Result<CleanedInputs> {
        if config.execution.parallel_clean {
            let (enrolment, (demographic, biometric)) = rayon::join(
                || load_and_clean(config, DatasetKind::Enrolment),
                || {
                    rayon::join(
                        || load_and_clean(config, DatasetKind::Demographic),
                        || load_and_clean(config, DatasetKind::Biometric),
                    )
                },
            );
            Ok(CleanedInputs {
                enrolment: enrolment?,
                demographic: demographic?,
                biometric: biometric?,
            })
        } else {
            Ok(CleanedInputs {
                enrolment: load_and_clean(config, DatasetKind::Enrolment)?,
                demographic: load_and_clean(config, DatasetKind::Demographic)?,
                biometric: load_and_clean(config, DatasetKind::Biometric)?,
            })
        }
    }

    fn merge_inputs(inputs: &CleanedInputs) -> Result<MergedTable> {
        timed("merge", || {
            merge::merge(&inputs.enrolment, &inputs.demographic, &inputs.biometric)
        })
    }

    /// Load, clean and merge, without scoring or writing anything
    pub fn build_merged(config: &Config) -> Result<MergedTable> {
        config.validate()?;
        let inputs = Self::load_inputs(config)?;
        Self::merge_inputs(&inputs)
    }

    /// `build_merged` plus the metric engine
    pub fn build_scored(config: &Config) -> Result<ScoredTable> {
        let engine = MetricEngine::new(config.scoring.clone())?;
        let merged = Self::build_merged(config)?;
        timed("score", || engine.score_table(merged))
    }

    /// Full run: build the final table and write it (plus the optional
    /// district rollup) to the configured paths.
    #[instrument(skip_all, fields(output = %config.output.path.display()))]
    pub fn run(config: &Config) -> Result<PipelineResult> {
        config.validate()?;
        info!("🚀 Starting pipeline run");

        let inputs = Self::load_inputs(config)?;
        let merged = Self::merge_inputs(&inputs)?;

        let (output, written, district_written) = if config.scoring.enabled {
            let engine = MetricEngine::new(config.scoring.clone())?;
            let table = timed("score", || engine.score_table(merged))?;
            let districts = engine.score_districts(&table);

            let written = timed("write", || storage::write_csv(&table, &config.output.path))?;
            let district_written = match &config.output.district_scores_path {
                Some(path) => Some(timed("write", || storage::write_csv(&districts, path))?),
                None => None,
            };
            (
                PipelineOutput::Scored { table, districts },
                written,
                district_written,
            )
        } else {
            let written = timed("write", || storage::write_csv(&merged, &config.output.path))?;
            (PipelineOutput::Merged(merged), written, None)
        };

        info!(
            "✅ Pipeline finished: {} rows x {} columns written to {}",
            written.rows,
            written.cols,
            written.path.display()
        );
        Ok(PipelineResult {
            clean_stats: inputs.stats(),
            output,
            written,
            district_written,
        })
    }
}
