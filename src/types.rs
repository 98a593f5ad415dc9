use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::constants::{
    BIOMETRIC_MEASURES, DEMOGRAPHIC_MEASURES, ENROLMENT_MEASURES, OUTPUT_DATE_FORMAT,
};

/// The three source corpora. Ordering is significant: merged columns are laid
/// out enrolment first, then demographic, then biometric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Enrolment,
    Demographic,
    Biometric,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [
        DatasetKind::Enrolment,
        DatasetKind::Demographic,
        DatasetKind::Biometric,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Enrolment => "enrolment",
            DatasetKind::Demographic => "demographic",
            DatasetKind::Biometric => "biometric",
        }
    }

    /// Suffix used to disambiguate measure names that collide across sources
    pub fn suffix(&self) -> &'static str {
        match self {
            DatasetKind::Enrolment => "enrol",
            DatasetKind::Demographic => "demo",
            DatasetKind::Biometric => "bio",
        }
    }

    /// Measure columns the published schema declares for this dataset.
    /// These must hold numbers; other extra columns are inferred.
    pub fn known_measures(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::Enrolment => &ENROLMENT_MEASURES,
            DatasetKind::Demographic => &DEMOGRAPHIC_MEASURES,
            DatasetKind::Biometric => &BIOMETRIC_MEASURES,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One aggregation unit: `(date, state, district, pincode)`.
///
/// Field order matters for the derived `Ord`: tables keyed by this type
/// iterate by date first, then region, which keeps output stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyTuple {
    pub date: NaiveDate,
    pub state: String,
    pub district: String,
    pub pincode: String,
}

impl KeyTuple {
    pub fn new(
        date: NaiveDate,
        state: impl Into<String>,
        district: impl Into<String>,
        pincode: impl Into<String>,
    ) -> Self {
        Self {
            date,
            state: state.into(),
            district: district.into(),
            pincode: pincode.into(),
        }
    }

    /// Key cells rendered in output column order
    pub fn to_fields(&self) -> [String; 4] {
        [
            self.date.format(OUTPUT_DATE_FORMAT).to_string(),
            self.state.clone(),
            self.district.clone(),
            self.pincode.clone(),
        ]
    }
}

/// A single untyped CSV row together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Index into `RawTable::fragments`
    pub fragment: usize,
    /// 1-based line number within the fragment (header is line 1)
    pub line: u64,
    pub fields: Vec<String>,
}

/// All fragments of one dataset concatenated, before any typing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Fragment paths in discovery order
    pub fragments: Vec<PathBuf>,
}

impl RawTable {
    /// Build an in-memory table; every row is attributed to a single
    /// synthetic fragment. Mostly useful for tests and re-cleaning.
    pub fn from_rows(headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, fields)| RawRow {
                fragment: 0,
                line: i as u64 + 2,
                fields,
            })
            .collect();
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
            fragments: vec![PathBuf::from("<memory>")],
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Human-readable origin of a row for error messages
    pub fn origin(&self, row: &RawRow) -> String {
        let path = self
            .fragments
            .get(row.fragment)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        format!("{}:{}", path, row.line)
    }
}
