use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::{month_of, round2, target_month, trailing_ratios, AlertsResponse, MonthlySeries};
use crate::constants::DEMO_AGE_17_PLUS;
use crate::error::Result;
use crate::pipeline::processing::merge::MergedTable;
use crate::types::DatasetKind;

/// Services expected to feel an adult population inflow
pub const PREDICTED_PRESSURE: [&str; 4] = ["PDS", "Public Health", "Housing", "Aadhaar Centers"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UrrdfLevel {
    Surge,
    Heavy,
    Normal,
}

impl UrrdfLevel {
    pub fn from_inflow(inflow: f64) -> Self {
        if inflow > 1.8 {
            UrrdfLevel::Surge
        } else if inflow >= 1.3 {
            UrrdfLevel::Heavy
        } else {
            UrrdfLevel::Normal
        }
    }

    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            UrrdfLevel::Surge => &[
                "Open 2 temporary enrollment/update camps",
                "Deploy mobile Aadhaar van",
                "Increase ration shop capacity",
                "Set up drinking water + shade",
            ],
            UrrdfLevel::Heavy => &[
                "Increase staff shifts for 14 days",
                "Add multilingual helpdesk",
            ],
            UrrdfLevel::Normal => &["Monitor trends"],
        }
    }
}

/// Adult demographic-update inflow alert for one district
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrrdfAlert {
    pub state: String,
    pub district: String,
    pub month: String,
    pub demo_total_adult: f64,
    /// This month's adult updates over the trailing monthly mean, 2 decimals
    pub inflow_score: f64,
    pub level: UrrdfLevel,
    pub predicted_pressure: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Rank districts by growth in adult demographic updates, a proxy for
/// residents moving in.
#[instrument(skip(merged), fields(rows = merged.len()))]
pub fn compute_urrdf_alerts(
    merged: &MergedTable,
    month: Option<&str>,
    top_n: usize,
) -> Result<AlertsResponse<UrrdfAlert>> {
    let adult = merged.require_column(DatasetKind::Demographic, DEMO_AGE_17_PLUS)?;

    let mut series: MonthlySeries<(&str, &str)> = BTreeMap::new();
    for row in &merged.rows {
        let group = (row.key.state.as_str(), row.key.district.as_str());
        *series
            .entry(group)
            .or_default()
            .entry(month_of(row.key.date))
            .or_insert(0.0) += row.values[adult];
    }

    let Some(target) = target_month(&series, month) else {
        return Ok(AlertsResponse {
            month: None,
            alerts: Vec::new(),
        });
    };

    let mut alerts = Vec::new();
    for ((state, district), months) in &series {
        let Some(&demo_total_adult) = months.get(&target) else {
            continue;
        };
        let inflow = trailing_ratios(months)
            .get(target.as_str())
            .copied()
            .unwrap_or(0.0);
        let level = UrrdfLevel::from_inflow(inflow);
        alerts.push((
            inflow,
            UrrdfAlert {
                state: state.to_string(),
                district: district.to_string(),
                month: target.clone(),
                demo_total_adult,
                inflow_score: round2(inflow),
                level,
                predicted_pressure: PREDICTED_PRESSURE.iter().map(|p| p.to_string()).collect(),
                recommendations: level.recommendations().iter().map(|r| r.to_string()).collect(),
            },
        ));
    }

    alerts.sort_by(|a, b| b.0.total_cmp(&a.0));
    let alerts: Vec<UrrdfAlert> = alerts.into_iter().take(top_n).map(|(_, a)| a).collect();

    info!("🏙️ {} URRDF alerts for {}", alerts.len(), target);
    Ok(AlertsResponse {
        month: Some(target),
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::clean::{CleanStats, CleanedDataset};
    use crate::pipeline::processing::merge::merge;
    use crate::types::KeyTuple;
    use chrono::NaiveDate;

    fn demographic(rows: Vec<(u32, &str, f64)>) -> CleanedDataset {
        CleanedDataset {
            kind: DatasetKind::Demographic,
            measures: vec![DEMO_AGE_17_PLUS.to_string()],
            rows: rows
                .into_iter()
                .map(|(month, district, v)| {
                    let date = NaiveDate::from_ymd_opt(2021, month, 1).unwrap();
                    (KeyTuple::new(date, "Karnataka", district, "560001"), vec![v])
                })
                .collect(),
            stats: CleanStats::default(),
        }
    }

    fn empty(kind: DatasetKind) -> CleanedDataset {
        CleanedDataset {
            kind,
            measures: vec![],
            rows: BTreeMap::new(),
            stats: CleanStats::default(),
        }
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(UrrdfLevel::from_inflow(1.81), UrrdfLevel::Surge);
        assert_eq!(UrrdfLevel::from_inflow(1.8), UrrdfLevel::Heavy);
        assert_eq!(UrrdfLevel::from_inflow(1.3), UrrdfLevel::Heavy);
        assert_eq!(UrrdfLevel::from_inflow(1.29), UrrdfLevel::Normal);
        assert_eq!(UrrdfLevel::from_inflow(0.2), UrrdfLevel::Normal);
    }

    #[test]
    fn test_surge_district_ranked_first() {
        let demo = demographic(vec![
            (1, "Bengaluru Urban", 100.0),
            (2, "Bengaluru Urban", 100.0),
            (3, "Bengaluru Urban", 250.0),
            (2, "Mysuru", 100.0),
            (3, "Mysuru", 140.0),
        ]);
        let merged = merge(&empty(DatasetKind::Enrolment), &demo, &empty(DatasetKind::Biometric)).unwrap();

        let response = compute_urrdf_alerts(&merged, None, 10).unwrap();
        assert_eq!(response.month.as_deref(), Some("2021-03"));
        assert_eq!(response.alerts[0].district, "Bengaluru Urban");
        assert_eq!(response.alerts[0].inflow_score, 2.5);
        assert_eq!(response.alerts[0].level, UrrdfLevel::Surge);
        assert_eq!(response.alerts[0].predicted_pressure.len(), 4);
        assert_eq!(response.alerts[1].level, UrrdfLevel::Heavy);
    }

    #[test]
    fn test_serializes_level_uppercase() {
        let json = serde_json::to_string(&UrrdfLevel::Surge).unwrap();
        assert_eq!(json, "\"SURGE\"");
    }
}
