use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument};

use crate::config::ScoringConfig;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::merge::MergedTable;
use crate::types::DatasetKind;

/// A ratio whose denominator may be zero.
///
/// `Undefined` never takes part in arithmetic: aggregations must skip it
/// explicitly instead of averaging it in as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Ratio {
    Defined(f64),
    Undefined,
}

impl Ratio {
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            Ratio::Undefined
        } else {
            Ratio::Defined(numerator / denominator)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Defined(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Ratio::Defined(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RiskTier {
    Healthy,
    Emerging,
    Hotspot,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Healthy => "Healthy",
            RiskTier::Emerging => "Emerging",
            RiskTier::Hotspot => "Hotspot",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds are inclusive: a BIS equal to a threshold lands in the
/// higher tier.
pub fn classify_tier(bis: f64, config: &ScoringConfig) -> RiskTier {
    if bis >= config.hotspot_threshold {
        RiskTier::Hotspot
    } else if bis >= config.emerging_threshold {
        RiskTier::Emerging
    } else {
        RiskTier::Healthy
    }
}

/// Derived metrics for one merged row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowMetrics {
    /// Biometric capture gap, `Enrol_0_5 - Bio_5_17`
    pub bcg: f64,
    /// Biometric utilization ratio, `Bio_5_17 / Demo_5_17`
    pub bur: Ratio,
    /// First-attempt failure count, `Enrol_0_5 - Bio_5_17`
    pub fafi: f64,
    /// `FAFI / Enrol_0_5`
    pub fafi_rate: Ratio,
    /// Composite integrity score in [0, 100]
    pub bis: Option<f64>,
    pub tier: Option<RiskTier>,
}

/// Column positions of the metric inputs inside a merged table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricInputs {
    pub enrol_0_5: usize,
    pub bio_5_17: usize,
    pub demo_5_17: usize,
}

impl MetricInputs {
    /// Resolve the configured input columns by source and measure name.
    /// Missing columns are a schema error, never a silent zero.
    pub fn resolve(table: &MergedTable, config: &ScoringConfig) -> Result<Self> {
        Ok(Self {
            enrol_0_5: table.require_column(DatasetKind::Enrolment, &config.columns.enrol_0_5)?,
            bio_5_17: table.require_column(DatasetKind::Biometric, &config.columns.bio_5_17)?,
            demo_5_17: table.require_column(DatasetKind::Demographic, &config.columns.demo_5_17)?,
        })
    }
}

/// Merged table plus one `RowMetrics` per row, index-aligned
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTable {
    pub merged: MergedTable,
    pub metrics: Vec<RowMetrics>,
    pub inputs: MetricInputs,
}

impl ScoredTable {
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn tier_counts(&self) -> BTreeMap<RiskTier, usize> {
        let mut counts = BTreeMap::new();
        for tier in self.metrics.iter().filter_map(|m| m.tier) {
            *counts.entry(tier).or_insert(0) += 1;
        }
        counts
    }
}

/// Aggregated metrics for one `(state, district)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictScore {
    pub state: String,
    pub district: String,
    /// Merged rows that fell into this district
    pub rows: usize,
    pub enrol_0_5: f64,
    pub bio_5_17: f64,
    pub demo_5_17: f64,
    /// Sum of the row-level capture gaps
    pub bcg: f64,
    /// Mean BUR over rows where it is defined
    pub mean_bur: Option<f64>,
    /// Mean FAFI_rate over rows where it is defined
    pub mean_fafi_rate: Option<f64>,
    /// Rows left out of the BUR mean because their denominator was zero
    pub bur_excluded_rows: usize,
    pub bis: Option<f64>,
    pub tier: Option<RiskTier>,
}

#[derive(Default)]
struct DistrictAccumulator {
    rows: usize,
    enrol_0_5: f64,
    bio_5_17: f64,
    demo_5_17: f64,
    bcg: f64,
    bur: Mean,
    fafi_rate: Mean,
    components: [Mean; 3],
    bur_excluded_rows: usize,
}

#[derive(Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Computes BCG, BUR, FAFI, FAFI_rate, BIS and tiers over a merged table
#[derive(Debug, Clone)]
pub struct MetricEngine {
    config: ScoringConfig,
}

impl MetricEngine {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// `[c1, c2, c3]`: normalized BCG, `1 - BUR` and `FAFI_rate`, each in [0, 1]
    pub fn components(&self, bcg: f64, bur: Ratio, fafi_rate: Ratio) -> [Option<f64>; 3] {
        let span = self.config.bcg_ceiling - self.config.bcg_floor;
        let c1 = ((bcg - self.config.bcg_floor) / span).clamp(0.0, 1.0);
        let c2 = bur.value().map(|b| 1.0 - b.clamp(0.0, 1.0));
        let c3 = fafi_rate.value().map(|r| r.clamp(0.0, 1.0));
        [Some(c1), c2, c3]
    }

    /// Weighted mean of the defined components, scaled to [0, 100].
    /// `None` when no positively weighted component is defined.
    pub fn bis(&self, components: [Option<f64>; 3]) -> Option<f64> {
        let weights = self.config.weights.as_array();
        let (weighted, total) = components
            .iter()
            .zip(weights)
            .filter_map(|(c, w)| c.map(|c| (c * w, w)))
            .fold((0.0, 0.0), |(acc, tot), (cw, w)| (acc + cw, tot + w));
        (total > 0.0).then(|| 100.0 * weighted / total)
    }

    pub fn row_metrics(&self, enrol_0_5: f64, bio_5_17: f64, demo_5_17: f64) -> RowMetrics {
        let bcg = enrol_0_5 - bio_5_17;
        let bur = Ratio::of(bio_5_17, demo_5_17);
        let fafi = enrol_0_5 - bio_5_17;
        let fafi_rate = Ratio::of(fafi, enrol_0_5);
        let bis = self.bis(self.components(bcg, bur, fafi_rate));
        RowMetrics {
            bcg,
            bur,
            fafi,
            fafi_rate,
            bis,
            tier: bis.map(|b| classify_tier(b, &self.config)),
        }
    }

    #[instrument(skip_all, fields(rows = merged.len()))]
    pub fn score_table(&self, merged: MergedTable) -> Result<ScoredTable> {
        let inputs = MetricInputs::resolve(&merged, &self.config)?;

        let mut scored = Vec::with_capacity(merged.len());
        for row in &merged.rows {
            let m = self.row_metrics(
                row.values[inputs.enrol_0_5],
                row.values[inputs.bio_5_17],
                row.values[inputs.demo_5_17],
            );
            let finite = m.bcg.is_finite()
                && m.bur.value().map_or(true, f64::is_finite)
                && m.fafi_rate.value().map_or(true, f64::is_finite);
            if !finite {
                return Err(PipelineError::MetricComputation(format!(
                    "non-finite metric for key {:?}",
                    row.key
                )));
            }

            if !m.bur.is_defined() {
                metrics::scoring::undefined_bur();
            }
            if !m.fafi_rate.is_defined() {
                metrics::scoring::undefined_fafi_rate();
            }
            metrics::scoring::row_scored(m.tier.map_or("unscored", |t| t.as_str()));
            scored.push(m);
        }

        let table = ScoredTable {
            merged,
            metrics: scored,
            inputs,
        };
        let undefined_bur = table.metrics.iter().filter(|m| !m.bur.is_defined()).count();
        debug!("{} rows have an undefined BUR", undefined_bur);
        info!(
            "📊 Scored {} rows, tiers: {:?}",
            table.len(),
            table.tier_counts()
        );
        Ok(table)
    }

    /// District-level rollup, sorted by BIS descending with unscored
    /// districts last.
    #[instrument(skip_all, fields(rows = table.len()))]
    pub fn score_districts(&self, table: &ScoredTable) -> Vec<DistrictScore> {
        let mut groups: BTreeMap<(&str, &str), DistrictAccumulator> = BTreeMap::new();
        for (row, m) in table.merged.rows.iter().zip(&table.metrics) {
            let acc = groups
                .entry((row.key.state.as_str(), row.key.district.as_str()))
                .or_default();
            acc.rows += 1;
            acc.enrol_0_5 += row.values[table.inputs.enrol_0_5];
            acc.bio_5_17 += row.values[table.inputs.bio_5_17];
            acc.demo_5_17 += row.values[table.inputs.demo_5_17];
            acc.bcg += m.bcg;
            acc.bur.add(m.bur.value());
            acc.fafi_rate.add(m.fafi_rate.value());
            if !m.bur.is_defined() {
                acc.bur_excluded_rows += 1;
            }
            for (mean, c) in acc
                .components
                .iter_mut()
                .zip(self.components(m.bcg, m.bur, m.fafi_rate))
            {
                mean.add(c);
            }
        }

        let mut scores: Vec<DistrictScore> = groups
            .into_iter()
            .map(|((state, district), acc)| {
                let bis = self.bis(acc.components.map(|m| m.get()));
                DistrictScore {
                    state: state.to_string(),
                    district: district.to_string(),
                    rows: acc.rows,
                    enrol_0_5: acc.enrol_0_5,
                    bio_5_17: acc.bio_5_17,
                    demo_5_17: acc.demo_5_17,
                    bcg: acc.bcg,
                    mean_bur: acc.bur.get(),
                    mean_fafi_rate: acc.fafi_rate.get(),
                    bur_excluded_rows: acc.bur_excluded_rows,
                    bis,
                    tier: bis.map(|b| classify_tier(b, &self.config)),
                }
            })
            .collect();

        // Stable sort keeps (state, district) order among equal scores
        scores.sort_by(|a, b| match (a.bis, b.bis) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        metrics::scoring::districts_scored(scores.len());
        info!("🗺️ Scored {} districts", scores.len());
        scores
    }
}

/// Score every row of a merged table
pub fn score_table(merged: MergedTable, config: &ScoringConfig) -> Result<ScoredTable> {
    MetricEngine::new(config.clone())?.score_table(merged)
}

/// Roll a scored table up to `(state, district)`
pub fn score_districts(table: &ScoredTable, config: &ScoringConfig) -> Result<Vec<DistrictScore>> {
    Ok(MetricEngine::new(config.clone())?.score_districts(table))
}
