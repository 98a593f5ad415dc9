//! Month-over-month alert models computed from the merged table.
//!
//! Both models bucket rows by calendar month, compare each month with the
//! mean of the (up to) three preceding months of the same group, and report
//! the groups under the most pressure in a target month.

pub mod aflb;
pub mod urrdf;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub use aflb::{compute_aflb_alerts, AflbAlert, AflbTier};
pub use urrdf::{compute_urrdf_alerts, UrrdfAlert, UrrdfLevel};

/// Number of preceding months averaged into the baseline
pub const TRAILING_WINDOW: usize = 3;

/// `YYYY-MM` bucket of a date
pub fn month_of(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Alerts for one month, as returned to callers and written as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertsResponse<T> {
    /// Target month; `None` only when the table held no rows at all
    pub month: Option<String>,
    pub alerts: Vec<T>,
}

/// Monthly totals per group, months ordered lexically (which for `YYYY-MM`
/// is chronological).
pub(crate) type MonthlySeries<K> = BTreeMap<K, BTreeMap<String, f64>>;

/// Ratio of each month's value to the mean of the preceding months of the
/// series. Zero when there is no preceding month or the baseline is zero.
pub(crate) fn trailing_ratios(series: &BTreeMap<String, f64>) -> BTreeMap<&str, f64> {
    let values: Vec<f64> = series.values().copied().collect();
    series
        .keys()
        .enumerate()
        .map(|(i, month)| {
            let previous = &values[i.saturating_sub(TRAILING_WINDOW)..i];
            let ratio = if previous.is_empty() {
                0.0
            } else {
                let mean = previous.iter().sum::<f64>() / previous.len() as f64;
                if mean == 0.0 {
                    0.0
                } else {
                    values[i] / mean
                }
            };
            (month.as_str(), ratio)
        })
        .collect()
}

/// The requested month, or the latest month present in any group
pub(crate) fn target_month<K>(series: &MonthlySeries<K>, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(month) => Some(month.to_string()),
        None => series
            .values()
            .filter_map(|months| months.keys().next_back())
            .max()
            .cloned(),
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
