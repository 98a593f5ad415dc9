// Pipeline ingestion: discovering and reading the CSV fragments of a dataset

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::types::{RawRow, RawTable};

/// Return the CSV fragments in `directory`, sorted lexically by file name.
///
/// Non-CSV files and subdirectories are ignored. A missing directory is a
/// `DataSource` error; an empty listing is returned as-is so callers can
/// decide how to treat it.
pub fn list_csv_files(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(PipelineError::DataSource(format!(
            "Directory does not exist: {}",
            directory.display()
        )));
    }

    let entries = std::fs::read_dir(directory).map_err(|e| {
        PipelineError::DataSource(format!(
            "Failed to list directory {}: {}",
            directory.display(),
            e
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Read one fragment. The file handle lives only for the duration of this
/// call, including when parsing fails part-way through.
fn read_fragment(path: &Path) -> Result<(Vec<String>, Vec<(u64, Vec<String>)>)> {
    let parse_err = |source: csv::Error| PipelineError::FragmentParse {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| parse_err(csv::Error::from(e)))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(parse_err(csv::Error::from(io::Error::new(
            io::ErrorKind::InvalidData,
            "fragment has no header row",
        ))));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_err)?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        rows.push((line, record.iter().map(str::to_string).collect()));
    }
    Ok((headers, rows))
}

/// Load and concatenate every CSV fragment of a dataset directory.
///
/// Fails the whole load on the first unreadable fragment rather than
/// skipping it: a silently partial dataset would skew every regional score.
#[instrument(skip_all, fields(dataset = dataset, dir = %directory.display()))]
pub fn load_dataset_from_dir(directory: &Path, dataset: &'static str) -> Result<RawTable> {
    let files = list_csv_files(directory)?;
    if files.is_empty() {
        return Err(PipelineError::DataSource(format!(
            "No CSV fragments found in {}",
            directory.display()
        )));
    }

    let mut table = RawTable::default();
    for (index, path) in files.iter().enumerate() {
        let (headers, rows) = read_fragment(path)?;

        if index == 0 {
            table.headers = headers;
        } else if headers != table.headers {
            return Err(PipelineError::Schema(format!(
                "Fragment {} has columns {:?}, expected {:?}",
                path.display(),
                headers,
                table.headers
            )));
        }

        debug!("Read {} rows from {}", rows.len(), path.display());
        metrics::loader::fragment_read(dataset, rows.len());

        table.rows.extend(rows.into_iter().map(|(line, fields)| RawRow {
            fragment: index,
            line,
            fields,
        }));
        table.fragments.push(path.clone());
    }

    info!(
        "📥 Loaded {} rows from {} fragments",
        table.rows.len(),
        table.fragments.len()
    );
    Ok(table)
}
