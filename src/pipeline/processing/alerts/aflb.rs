use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::{month_of, round2, target_month, trailing_ratios, AlertsResponse, MonthlySeries};
use crate::constants::{
    AGE_0_5, AGE_18_GREATER, AGE_5_17, BIO_AGE_17_PLUS, BIO_AGE_5_17, DEMO_AGE_17_PLUS,
    DEMO_AGE_5_17,
};
use crate::error::Result;
use crate::pipeline::processing::merge::MergedTable;
use crate::types::DatasetKind;

/// Every measure that counts towards a facility's load
const LOAD_COLUMNS: [(DatasetKind, &str); 7] = [
    (DatasetKind::Enrolment, AGE_0_5),
    (DatasetKind::Enrolment, AGE_5_17),
    (DatasetKind::Enrolment, AGE_18_GREATER),
    (DatasetKind::Demographic, DEMO_AGE_5_17),
    (DatasetKind::Demographic, DEMO_AGE_17_PLUS),
    (DatasetKind::Biometric, BIO_AGE_5_17),
    (DatasetKind::Biometric, BIO_AGE_17_PLUS),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AflbTier {
    Critical,
    High,
    Watch,
    Normal,
}

impl AflbTier {
    pub fn from_stress(stress: f64) -> Self {
        if stress > 2.0 {
            AflbTier::Critical
        } else if stress >= 1.5 {
            AflbTier::High
        } else if stress >= 1.2 {
            AflbTier::Watch
        } else {
            AflbTier::Normal
        }
    }

    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            AflbTier::Critical => &[
                "Set up drinking water points",
                "Shade + seating arrangement",
                "Token queue system",
                "Basic medical support",
                "Volunteer/police crowd management",
                "Mobile vans to split the load",
            ],
            AflbTier::High => &[
                "Add temporary Aadhaar camp (school/community hall)",
                "Deploy 2-3 extra kits",
                "Add queue tokens + helpdesk",
            ],
            AflbTier::Watch => &[
                "Extend working hours",
                "Enable appointment scheduling",
                "Add 1 extra operator temporarily",
            ],
            AflbTier::Normal => &["No action required"],
        }
    }
}

/// Facility load alert for one pincode in the target month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AflbAlert {
    pub state: String,
    pub district: String,
    pub pincode: String,
    pub month: String,
    /// Enrolment, demographic and biometric activity combined
    pub total_load: f64,
    /// Load relative to the trailing monthly mean, 2 decimals
    pub stress_score: f64,
    pub tier: AflbTier,
    pub recommendations: Vec<String>,
}

/// Rank pincodes by how far this month's load exceeds their recent baseline.
#[instrument(skip(merged), fields(rows = merged.len()))]
pub fn compute_aflb_alerts(
    merged: &MergedTable,
    month: Option<&str>,
    top_n: usize,
) -> Result<AlertsResponse<AflbAlert>> {
    let columns = LOAD_COLUMNS
        .iter()
        .map(|(source, measure)| merged.require_column(*source, measure))
        .collect::<Result<Vec<_>>>()?;

    let mut series: MonthlySeries<(&str, &str, &str)> = BTreeMap::new();
    for row in &merged.rows {
        let load: f64 = columns.iter().map(|&i| row.values[i]).sum();
        let group = (
            row.key.state.as_str(),
            row.key.district.as_str(),
            row.key.pincode.as_str(),
        );
        *series
            .entry(group)
            .or_default()
            .entry(month_of(row.key.date))
            .or_insert(0.0) += load;
    }

    let Some(target) = target_month(&series, month) else {
        return Ok(AlertsResponse {
            month: None,
            alerts: Vec::new(),
        });
    };

    let mut alerts = Vec::new();
    for ((state, district, pincode), months) in &series {
        let Some(&total_load) = months.get(&target) else {
            continue;
        };
        let stress = trailing_ratios(months)
            .get(target.as_str())
            .copied()
            .unwrap_or(0.0);
        let tier = AflbTier::from_stress(stress);
        alerts.push((
            stress,
            AflbAlert {
                state: state.to_string(),
                district: district.to_string(),
                pincode: pincode.to_string(),
                month: target.clone(),
                total_load,
                stress_score: round2(stress),
                tier,
                recommendations: tier.recommendations().iter().map(|r| r.to_string()).collect(),
            },
        ));
    }

    alerts.sort_by(|a, b| b.0.total_cmp(&a.0));
    let alerts: Vec<AflbAlert> = alerts.into_iter().take(top_n).map(|(_, a)| a).collect();

    info!("🚦 {} AFLB alerts for {}", alerts.len(), target);
    Ok(AlertsResponse {
        month: Some(target),
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::processing::clean::{CleanStats, CleanedDataset};
    use crate::pipeline::processing::merge::merge;
    use crate::types::KeyTuple;
    use chrono::NaiveDate;

    fn key(month: u32, pincode: &str) -> KeyTuple {
        KeyTuple::new(
            NaiveDate::from_ymd_opt(2021, month, 15).unwrap(),
            "Odisha",
            "Puri",
            pincode,
        )
    }

    fn dataset(kind: DatasetKind, rows: Vec<(KeyTuple, f64)>) -> CleanedDataset {
        let measures: Vec<String> = kind.known_measures().iter().map(|m| m.to_string()).collect();
        let width = measures.len();
        CleanedDataset {
            kind,
            measures,
            rows: rows
                .into_iter()
                .map(|(k, v)| {
                    let mut values = vec![0.0; width];
                    values[0] = v;
                    (k, values)
                })
                .collect(),
            stats: CleanStats::default(),
        }
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(AflbTier::from_stress(2.01), AflbTier::Critical);
        assert_eq!(AflbTier::from_stress(2.0), AflbTier::High);
        assert_eq!(AflbTier::from_stress(1.5), AflbTier::High);
        assert_eq!(AflbTier::from_stress(1.2), AflbTier::Watch);
        assert_eq!(AflbTier::from_stress(1.19), AflbTier::Normal);
        assert_eq!(AflbTier::Normal.recommendations(), &["No action required"]);
    }

    #[test]
    fn test_load_spike_is_ranked_first() {
        let enrol = dataset(
            DatasetKind::Enrolment,
            vec![
                (key(1, "752001"), 100.0),
                (key(2, "752001"), 100.0),
                (key(3, "752001"), 300.0),
                (key(1, "752002"), 100.0),
                (key(3, "752002"), 110.0),
            ],
        );
        let demo = dataset(DatasetKind::Demographic, vec![]);
        let bio = dataset(DatasetKind::Biometric, vec![(key(3, "752002"), 10.0)]);
        let merged = merge(&enrol, &demo, &bio).unwrap();

        let response = compute_aflb_alerts(&merged, None, 20).unwrap();
        assert_eq!(response.month.as_deref(), Some("2021-03"));
        assert_eq!(response.alerts.len(), 2);

        let top = &response.alerts[0];
        assert_eq!(top.pincode, "752001");
        assert_eq!(top.stress_score, 3.0);
        assert_eq!(top.tier, AflbTier::Critical);
        assert_eq!(top.recommendations.len(), 6);

        let second = &response.alerts[1];
        assert_eq!(second.total_load, 120.0);
        assert_eq!(second.stress_score, 1.2);
        assert_eq!(second.tier, AflbTier::Watch);
    }

    #[test]
    fn test_top_n_and_missing_month() {
        let enrol = dataset(
            DatasetKind::Enrolment,
            vec![(key(1, "752001"), 1.0), (key(1, "752002"), 2.0)],
        );
        let merged = merge(
            &enrol,
            &dataset(DatasetKind::Demographic, vec![]),
            &dataset(DatasetKind::Biometric, vec![]),
        )
        .unwrap();

        assert_eq!(compute_aflb_alerts(&merged, None, 1).unwrap().alerts.len(), 1);
        let empty = compute_aflb_alerts(&merged, Some("2020-12"), 20).unwrap();
        assert_eq!(empty.month.as_deref(), Some("2020-12"));
        assert!(empty.alerts.is_empty());
    }

    #[test]
    fn test_missing_load_column_is_schema_error() {
        let enrol = CleanedDataset {
            kind: DatasetKind::Enrolment,
            measures: vec![AGE_0_5.to_string()],
            rows: BTreeMap::new(),
            stats: CleanStats::default(),
        };
        let merged = merge(
            &enrol,
            &dataset(DatasetKind::Demographic, vec![]),
            &dataset(DatasetKind::Biometric, vec![]),
        )
        .unwrap();
        assert!(matches!(
            compute_aflb_alerts(&merged, None, 20).unwrap_err(),
            PipelineError::Schema(_)
        ));
    }
}
