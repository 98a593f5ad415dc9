// Pipeline storage: serializing result tables and writing them atomically

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::constants::{KEY_COLUMNS, METRIC_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::merge::MergedTable;
use crate::pipeline::processing::scoring::{DistrictScore, Ratio, ScoredTable};

/// A table that can be written as CSV: a header plus string records of the
/// same width.
pub trait TabularOutput {
    fn headers(&self) -> Vec<String>;

    fn records(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_>;

    fn row_count(&self) -> usize;
}

fn number(value: f64) -> String {
    value.to_string()
}

fn optional(value: Option<f64>) -> String {
    value.map(number).unwrap_or_default()
}

fn ratio(value: Ratio) -> String {
    optional(value.value())
}

impl TabularOutput for MergedTable {
    fn headers(&self) -> Vec<String> {
        KEY_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    fn records(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.rows.iter().map(|row| {
            row.key
                .to_fields()
                .into_iter()
                .chain(row.values.iter().copied().map(number))
                .collect()
        }))
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl TabularOutput for ScoredTable {
    fn headers(&self) -> Vec<String> {
        let mut headers = self.merged.headers();
        headers.extend(METRIC_COLUMNS.iter().map(|c| c.to_string()));
        headers
    }

    fn records(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.merged.records().zip(&self.metrics).map(|(mut record, m)| {
            record.extend([
                number(m.bcg),
                ratio(m.bur),
                number(m.fafi),
                ratio(m.fafi_rate),
                optional(m.bis),
                m.tier.map(|t| t.to_string()).unwrap_or_default(),
            ]);
            record
        }))
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

const DISTRICT_COLUMNS: [&str; 12] = [
    "state",
    "district",
    "rows",
    "enrol_0_5",
    "bio_5_17",
    "demo_5_17",
    "BCG",
    "BUR",
    "FAFI_rate",
    "bur_excluded_rows",
    "BIS",
    "risk_tier",
];

impl TabularOutput for Vec<DistrictScore> {
    fn headers(&self) -> Vec<String> {
        DISTRICT_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn records(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.iter().map(|d| {
            vec![
                d.state.clone(),
                d.district.clone(),
                d.rows.to_string(),
                number(d.enrol_0_5),
                number(d.bio_5_17),
                number(d.demo_5_17),
                number(d.bcg),
                optional(d.mean_bur),
                optional(d.mean_fafi_rate),
                d.bur_excluded_rows.to_string(),
                optional(d.bis),
                d.tier.map(|t| t.to_string()).unwrap_or_default(),
            ]
        }))
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

/// What a successful write produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub cols: usize,
    /// Hex SHA-256 of the bytes on disk
    pub sha256: String,
}

impl WriteSummary {
    /// One-line report for operators, e.g.
    /// `Wrote merged table with shape (3, 11) to out.csv`
    pub fn describe(&self, label: &str) -> String {
        format!(
            "Wrote {} with shape ({}, {}) to {}",
            label,
            self.rows,
            self.cols,
            self.path.display()
        )
    }
}

impl fmt::Display for WriteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (sha256 {})", self.describe("output"), self.sha256)
    }
}

/// Replace `path` with `bytes` without ever exposing a partially written
/// file: the data goes to a temp file in the same directory which is then
/// renamed over the target. Returns the hex SHA-256 of `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<String> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::write(path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::write(path, e))?;
    tmp.write_all(bytes).map_err(|e| PipelineError::write(path, e))?;
    tmp.flush().map_err(|e| PipelineError::write(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PipelineError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::write(path, e.error))?;

    debug!("Persisted {} bytes to {}", bytes.len(), path.display());
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Serialize a table as CSV and write it atomically.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_csv<T: TabularOutput + ?Sized>(table: &T, path: &Path) -> Result<WriteSummary> {
    let headers = table.headers();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| PipelineError::write(path, e.into()))?;
    for record in table.records() {
        writer
            .write_record(&record)
            .map_err(|e| PipelineError::write(path, e.into()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::write(path, e.into_error()))?;

    let sha256 = write_atomic(path, &bytes)?;
    let summary = WriteSummary {
        path: path.to_path_buf(),
        rows: table.row_count(),
        cols: headers.len(),
        sha256,
    };
    metrics::writer::written(summary.rows, bytes.len() as u64);
    info!("💾 {}", summary);
    Ok(summary)
}

/// Pretty-print `value` as JSON and write it atomically. Returns the digest.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<String> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    let sha256 = write_atomic(path, &bytes)?;
    metrics::writer::written(0, bytes.len() as u64);
    info!("💾 Wrote {} bytes of JSON to {}", bytes.len(), path.display());
    Ok(sha256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::pipeline::processing::clean::{CleanStats, CleanedDataset};
    use crate::pipeline::processing::merge::merge;
    use crate::pipeline::processing::scoring::MetricEngine;
    use crate::types::{DatasetKind, KeyTuple};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn dataset(kind: DatasetKind, measure: &str, rows: Vec<(u32, f64)>) -> CleanedDataset {
        CleanedDataset {
            kind,
            measures: vec![measure.to_string()],
            rows: rows
                .into_iter()
                .map(|(day, v)| {
                    let date = NaiveDate::from_ymd_opt(2021, 1, day).unwrap();
                    (KeyTuple::new(date, "Odisha", "Puri", "752001"), vec![v])
                })
                .collect(),
            stats: CleanStats::default(),
        }
    }

    fn sample() -> MergedTable {
        merge(
            &dataset(DatasetKind::Enrolment, "age_0_5", vec![(1, 100.0)]),
            &dataset(DatasetKind::Demographic, "demo_age_5_17", vec![(1, 80.0)]),
            &dataset(DatasetKind::Biometric, "bio_age_5_17", vec![(1, 20.0), (2, 7.5)]),
        )
        .unwrap()
    }

    #[test]
    fn test_merged_csv_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out/merged.csv");
        let summary = write_csv(&sample(), &path).unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.cols, 7);
        assert_eq!(summary.sha256.len(), 64);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "date,state,district,pincode,age_0_5,demo_age_5_17,bio_age_5_17"
        );
        assert_eq!(lines[1], "2021-01-01,Odisha,Puri,752001,100,80,20");
        assert_eq!(lines[2], "2021-01-02,Odisha,Puri,752001,0,0,7.5");
    }

    #[test]
    fn test_scored_csv_leaves_undefined_cells_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scored.csv");
        let scored = MetricEngine::new(ScoringConfig::default())
            .unwrap()
            .score_table(sample())
            .unwrap();
        write_csv(&scored, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].ends_with("BCG,BUR,FAFI,FAFI_rate,BIS,risk_tier"));
        let first: Vec<_> = lines[1].split(',').collect();
        assert_eq!(&first[7..11], &["80", "0.25", "80", "0.8"]);
        assert!((first[11].parse::<f64>().unwrap() - 78.3333).abs() < 1e-3);
        assert_eq!(first[12], "Hotspot");
        // BUR and FAFI_rate have zero denominators on the second row
        assert!(lines[2].ends_with(",-7.5,,-7.5,,0,Healthy"));
    }

    #[test]
    fn test_identical_content_has_identical_digest() {
        let dir = tempdir().unwrap();
        let a = write_csv(&sample(), &dir.path().join("a.csv")).unwrap();
        let b = write_csv(&sample(), &dir.path().join("b.csv")).unwrap();
        assert_eq!(a.sha256, b.sha256);
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale contents that are much longer than the new ones").unwrap();
        write_atomic(&path, b"fresh").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");

        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_unwritable_target_is_write_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "x").unwrap();

        let err = write_atomic(&target, b"data").unwrap_err();
        assert!(matches!(err, PipelineError::Write { .. }));
        assert_eq!(fs::read_to_string(target.join("keep.txt")).unwrap(), "x");
    }

    #[test]
    fn test_describe() {
        let summary = WriteSummary {
            path: PathBuf::from("out.csv"),
            rows: 3,
            cols: 11,
            sha256: String::new(),
        };
        assert_eq!(
            summary.describe("merged table"),
            "Wrote merged table with shape (3, 11) to out.csv"
        );
    }
}
