use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::config::{CleaningConfig, RegionNormalization};
use crate::constants::{DATE_COL, DISTRICT_COL, KEY_COLUMNS, PINCODE_COL, STATE_COL};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::regions::canonical_state_name;
use crate::types::{DatasetKind, KeyTuple, RawRow, RawTable};

const ISO_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const DAY_FIRST_FORMATS: [&str; 3] = ["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"];
const MONTH_FIRST_FORMATS: [&str; 3] = ["%m-%d-%Y", "%m/%d/%Y", "%m.%d.%Y"];

/// Parse a raw date cell.
///
/// Values starting with a four-digit year are read as ISO regardless of
/// `day_first`; everything else is read day-first (or month-first when
/// `day_first` is false) and must carry a four-digit year, so `05-01-21`
/// yields `None`. Years before 1000 are rejected. A trailing time component
/// is ignored. Impossible calendar dates such as `31/02/2021` yield `None`.
pub fn parse_date(raw: &str, day_first: bool) -> Option<NaiveDate> {
    let date_part = raw.trim().split([' ', 'T']).next()?;
    if date_part.is_empty() {
        return None;
    }

    let bytes = date_part.as_bytes();
    let starts_with_year = bytes.len() > 4
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && matches!(bytes[4], b'-' | b'/');

    let formats: &[&str] = if starts_with_year {
        &ISO_FORMATS
    } else if day_first {
        &DAY_FIRST_FORMATS
    } else {
        &MONTH_FIRST_FORMATS
    };

    // chrono's %Y takes one to four digits; a short year is ambiguous
    if !starts_with_year {
        let year = date_part.rsplit(['-', '/', '.']).next()?;
        if year.len() != 4 {
            return None;
        }
    }

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .filter(|date| date.year() >= 1000)
}

/// Parse a measure cell: `Some(None)` for an empty cell, `Some(Some(v))` for
/// a number, `None` when the cell is not numeric.
fn parse_measure(raw: &str) -> Option<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(Some(v)),
        _ => None,
    }
}

/// Counters describing what one cleaning pass absorbed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanStats {
    pub input_rows: usize,
    /// Rows whose date could not be parsed
    pub dropped_invalid_date: usize,
    /// Rows with an empty state, district or pincode after trimming
    pub dropped_missing_key: usize,
    /// Rows summed into a key that was already present
    pub duplicates_collapsed: usize,
    pub output_rows: usize,
    /// Non-key columns discarded because they held non-numeric values
    pub dropped_columns: Vec<String>,
}

/// One dataset after cleaning: exactly one row of summed measures per key
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    pub kind: DatasetKind,
    /// Measure column names, in source header order
    pub measures: Vec<String>,
    pub rows: BTreeMap<KeyTuple, Vec<f64>>,
    pub stats: CleanStats,
}

impl CleanedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn measure_index(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == name)
    }

    pub fn get(&self, key: &KeyTuple) -> Option<&[f64]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    /// Render back into an untyped table with ISO dates, so the result can be
    /// fed through the cleaner again.
    pub fn to_raw_table(&self) -> RawTable {
        let headers: Vec<&str> = KEY_COLUMNS
            .iter()
            .copied()
            .chain(self.measures.iter().map(String::as_str))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|(key, values)| {
                key.to_fields()
                    .into_iter()
                    .chain(values.iter().map(|v| v.to_string()))
                    .collect()
            })
            .collect();
        RawTable::from_rows(&headers, rows)
    }
}

/// Per-dataset cleaner: trims identifiers, parses dates, drops unusable rows
/// and deduplicates by summing measures across the key tuple.
pub struct DatasetCleaner {
    pub config: CleaningConfig,
}

impl DatasetCleaner {
    pub fn new() -> Self {
        Self {
            config: CleaningConfig::default(),
        }
    }

    pub fn with_config(config: CleaningConfig) -> Self {
        Self { config }
    }

    fn normalize_state(&self, value: &str) -> String {
        match self.config.region_normalization {
            RegionNormalization::Exact => value.trim().to_string(),
            RegionNormalization::Canonical => canonical_state_name(value),
        }
    }

    /// Decide which non-key columns are numeric measures, looking only at
    /// rows that survived date and key validation.
    ///
    /// A column the dataset schema declares as a measure must be numeric;
    /// finding text in one is an error. Undeclared columns are kept only when
    /// every non-empty cell parses as a number.
    fn classify_columns(
        &self,
        raw: &RawTable,
        rows: &[(KeyTuple, &RawRow)],
        kind: DatasetKind,
        stats: &mut CleanStats,
    ) -> Result<Vec<(usize, String)>> {
        let mut measures = Vec::new();

        for (idx, name) in raw.headers.iter().enumerate() {
            if KEY_COLUMNS.contains(&name.as_str()) {
                continue;
            }

            let first_bad = rows.iter().map(|(_, row)| *row).find(|row| {
                row.fields
                    .get(idx)
                    .map(|cell| parse_measure(cell).is_none())
                    .unwrap_or(false)
            });

            match first_bad {
                None => measures.push((idx, name.clone())),
                Some(row) if kind.known_measures().contains(&name.as_str()) => {
                    return Err(PipelineError::MetricComputation(format!(
                        "non-numeric value {:?} in {} measure column '{}' at {}",
                        row.fields[idx],
                        kind,
                        name,
                        raw.origin(row)
                    )));
                }
                Some(_) => {
                    warn!(dataset = %kind, column = %name, "Dropping non-numeric column");
                    stats.dropped_columns.push(name.clone());
                }
            }
        }
        Ok(measures)
    }

    #[instrument(skip_all, fields(dataset = %kind))]
    pub fn clean(&self, raw: &RawTable, kind: DatasetKind) -> Result<CleanedDataset> {
        let column = |name: &str| {
            raw.column_index(name).ok_or_else(|| {
                PipelineError::Schema(format!(
                    "{} dataset is missing required column '{}'",
                    kind, name
                ))
            })
        };
        let date_idx = column(DATE_COL)?;
        let state_idx = column(STATE_COL)?;
        let district_idx = column(DISTRICT_COL)?;
        let pincode_idx = column(PINCODE_COL)?;

        let mut stats = CleanStats {
            input_rows: raw.len(),
            ..CleanStats::default()
        };
        let mut survivors: Vec<(KeyTuple, &RawRow)> = Vec::with_capacity(raw.len());
        for row in &raw.rows {
            let cell = |idx: usize| row.fields.get(idx).map(String::as_str).unwrap_or("");

            let Some(date) = parse_date(cell(date_idx), self.config.day_first) else {
                stats.dropped_invalid_date += 1;
                continue;
            };

            let state = self.normalize_state(cell(state_idx));
            let district = cell(district_idx).trim().to_string();
            let pincode = cell(pincode_idx).trim().to_string();
            if state.is_empty() || district.is_empty() || pincode.is_empty() {
                stats.dropped_missing_key += 1;
                continue;
            }

            let key = KeyTuple {
                date,
                state,
                district,
                pincode,
            };
            survivors.push((key, row));
        }

        let measures = self.classify_columns(raw, &survivors, kind, &mut stats)?;

        let mut rows: BTreeMap<KeyTuple, Vec<f64>> = BTreeMap::new();
        for (key, row) in survivors {
            let sums = match rows.entry(key) {
                Entry::Occupied(entry) => {
                    stats.duplicates_collapsed += 1;
                    entry.into_mut()
                }
                Entry::Vacant(entry) => entry.insert(vec![0.0; measures.len()]),
            };
            for (slot, (idx, _)) in sums.iter_mut().zip(&measures) {
                let cell = row.fields.get(*idx).map(String::as_str).unwrap_or("");
                if let Some(Some(value)) = parse_measure(cell) {
                    *slot += value;
                }
            }
        }

        stats.output_rows = rows.len();
        if stats.dropped_invalid_date > 0 {
            warn!(
                "Dropped {} rows with unparseable dates",
                stats.dropped_invalid_date
            );
        }
        if stats.dropped_missing_key > 0 {
            warn!(
                "Dropped {} rows with an empty key field",
                stats.dropped_missing_key
            );
        }
        metrics::cleaner::record_stats(kind.name(), &stats);
        info!(
            "🧹 Cleaned {} rows into {} keys ({} duplicates collapsed)",
            stats.input_rows, stats.output_rows, stats.duplicates_collapsed
        );

        Ok(CleanedDataset {
            kind,
            measures: measures.into_iter().map(|(_, name)| name).collect(),
            rows,
            stats,
        })
    }
}

impl Default for DatasetCleaner {
    fn default() -> Self {
        Self::new()
    }
}

/// Clean a raw table with the given configuration
pub fn clean(raw: &RawTable, kind: DatasetKind, config: &CleaningConfig) -> Result<CleanedDataset> {
    DatasetCleaner::with_config(config.clone()).clean(raw, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrolment_table(rows: &[[&str; 5]]) -> RawTable {
        RawTable::from_rows(
            &["date", "state", "district", "pincode", "age_0_5"],
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_day_first() {
        assert_eq!(parse_date("05-01-2021", true), Some(date(2021, 1, 5)));
        assert_eq!(parse_date("05/01/2021", true), Some(date(2021, 1, 5)));
        assert_eq!(parse_date("5.1.2021", true), Some(date(2021, 1, 5)));
        assert_eq!(parse_date(" 2021-01-05 ", true), Some(date(2021, 1, 5)));
        assert_eq!(parse_date("2021-01-05 00:00:00", true), Some(date(2021, 1, 5)));
    }

    #[test]
    fn test_parse_date_month_first() {
        assert_eq!(parse_date("01/05/2021", false), Some(date(2021, 1, 5)));
        assert_eq!(parse_date("2021-01-05", false), Some(date(2021, 1, 5)));
    }

    #[test]
    fn test_parse_date_rejects_impossible_dates() {
        assert_eq!(parse_date("31/02/2021", true), None);
        assert_eq!(parse_date("13/13/2021", true), None);
        assert_eq!(parse_date("", true), None);
        assert_eq!(parse_date("yesterday", true), None);
    }

    #[test]
    fn test_parse_date_requires_four_digit_year() {
        assert_eq!(parse_date("05-01-21", true), None);
        assert_eq!(parse_date("05-01-0021", true), None);
        assert_eq!(parse_date("01/05/21", false), None);
        assert_eq!(parse_date("0021-01-05", true), None);
    }

    #[test]
    fn test_two_digit_year_row_is_dropped() {
        let raw = enrolment_table(&[
            ["05-01-21", "Odisha", "Puri", "752001", "9"],
            ["05-01-2021", "Odisha", "Puri", "752001", "4"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.stats.dropped_invalid_date, 1);
        assert_eq!(cleaned.len(), 1);
        assert!(cleaned.rows.keys().all(|k| k.date == date(2021, 1, 5)));
    }

    #[test]
    fn test_repeated_header_row_is_dropped_before_measures_are_checked() {
        let raw = enrolment_table(&[
            ["", "", "", "", "age_0_5"],
            ["05-01-2021", "Odisha", "Puri", "752001", "100"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.stats.dropped_invalid_date, 1);
        assert_eq!(cleaned.len(), 1);
        let key = KeyTuple::new(date(2021, 1, 5), "Odisha", "Puri", "752001");
        assert_eq!(cleaned.get(&key), Some(&[100.0][..]));
    }

    #[test]
    fn test_text_in_row_missing_key_does_not_drop_column() {
        let raw = RawTable::from_rows(
            &["date", "state", "district", "pincode", "extra_count"],
            vec![
                vec![
                    "05-01-2021".into(),
                    "Odisha".into(),
                    "".into(),
                    "752001".into(),
                    "n/a".into(),
                ],
                vec![
                    "05-01-2021".into(),
                    "Odisha".into(),
                    "Puri".into(),
                    "752001".into(),
                    "3".into(),
                ],
            ],
        );
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.stats.dropped_missing_key, 1);
        assert_eq!(cleaned.measures, vec!["extra_count".to_string()]);
        assert!(cleaned.stats.dropped_columns.is_empty());
    }

    #[test]
    fn test_trims_and_sums_duplicates() {
        let raw = enrolment_table(&[
            ["05-01-2021", "Odisha ", " Puri", "752001", "60"],
            ["05-01-2021", "Odisha", "Puri", " 752001", "40"],
            ["06-01-2021", "Odisha", "Puri", "752001", "7"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned.stats.duplicates_collapsed, 1);
        let key = KeyTuple::new(date(2021, 1, 5), "Odisha", "Puri", "752001");
        assert_eq!(cleaned.get(&key), Some(&[100.0][..]));
    }

    #[test]
    fn test_case_is_preserved_by_default() {
        let raw = enrolment_table(&[
            ["05-01-2021", "Odisha", "Puri", "752001", "1"],
            ["05-01-2021", "ODISHA", "Puri", "752001", "1"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.len(), 2);
    }

    #[test]
    fn test_canonical_normalization_merges_variants() {
        let raw = enrolment_table(&[
            ["05-01-2021", "Orissa", "Puri", "752001", "1"],
            ["05-01-2021", "odisha ", "Puri", "752001", "2"],
        ]);
        let cleaner = DatasetCleaner::with_config(CleaningConfig {
            day_first: true,
            region_normalization: RegionNormalization::Canonical,
        });
        let cleaned = cleaner.clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.len(), 1);
        let key = KeyTuple::new(date(2021, 1, 5), "Odisha", "Puri", "752001");
        assert_eq!(cleaned.get(&key), Some(&[3.0][..]));
    }

    #[test]
    fn test_invalid_dates_and_missing_keys_are_counted() {
        let raw = enrolment_table(&[
            ["31/02/2021", "Odisha", "Puri", "752001", "5"],
            ["05-01-2021", "  ", "Puri", "752001", "5"],
            ["05-01-2021", "Odisha", "Puri", "752001", "5"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.stats.dropped_invalid_date, 1);
        assert_eq!(cleaned.stats.dropped_missing_key, 1);
        assert_eq!(cleaned.len(), 1);
        assert!(cleaned.rows.keys().all(|k| k.date == date(2021, 1, 5)));
    }

    #[test]
    fn test_empty_measure_cell_counts_as_zero() {
        let raw = enrolment_table(&[
            ["05-01-2021", "Odisha", "Puri", "752001", ""],
            ["05-01-2021", "Odisha", "Puri", "752001", "4"],
        ]);
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        let key = KeyTuple::new(date(2021, 1, 5), "Odisha", "Puri", "752001");
        assert_eq!(cleaned.get(&key), Some(&[4.0][..]));
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let raw = RawTable::from_rows(&["date", "state", "pincode"], vec![]);
        let err = DatasetCleaner::new().clean(&raw, DatasetKind::Biometric).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_text_in_known_measure_is_metric_error() {
        let raw = enrolment_table(&[["05-01-2021", "Odisha", "Puri", "752001", "many"]]);
        let err = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap_err();
        match err {
            PipelineError::MetricComputation(msg) => assert!(msg.contains("age_0_5")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_text_column_is_dropped() {
        let raw = RawTable::from_rows(
            &["date", "state", "district", "pincode", "remarks", "extra_count"],
            vec![vec![
                "05-01-2021".into(),
                "Odisha".into(),
                "Puri".into(),
                "752001".into(),
                "late upload".into(),
                "3".into(),
            ]],
        );
        let cleaned = DatasetCleaner::new().clean(&raw, DatasetKind::Enrolment).unwrap();
        assert_eq!(cleaned.measures, vec!["extra_count".to_string()]);
        assert_eq!(cleaned.stats.dropped_columns, vec!["remarks".to_string()]);
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let raw = enrolment_table(&[
            ["05-01-2021", "Odisha ", "Puri", "752001", "60"],
            ["05-01-2021", "Odisha", "Puri", "752001", "40"],
            ["07-03-2021", "Kerala", "Idukki", "685501", "2.5"],
        ]);
        let cleaner = DatasetCleaner::new();
        let once = cleaner.clean(&raw, DatasetKind::Enrolment).unwrap();
        let twice = cleaner
            .clean(&once.to_raw_table(), DatasetKind::Enrolment)
            .unwrap();

        assert_eq!(once.rows, twice.rows);
        assert_eq!(once.measures, twice.measures);
        assert_eq!(twice.stats.duplicates_collapsed, 0);
    }
}
