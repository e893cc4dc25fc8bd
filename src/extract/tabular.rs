//! Row-oriented extraction for CSV and TSV files.

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use super::{Metadata, RawDocument};
use crate::{GranthError, Result};

/// Extract one raw document per data row, rendered as `header: value` lines
#[inline]
pub fn extract_rows(path: &Path) -> Result<Vec<RawDocument>> {
    let delimiter = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
    {
        b'\t'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| csv_error(path, &e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, &e))?.clone();
    let source = path.display().to_string();
    let mut documents = Vec::new();
    let mut skipped = 0_usize;

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed row {} in {}: {}", row, source, e);
                skipped += 1;
                continue;
            }
        };

        let content = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        if content.trim().is_empty() {
            continue;
        }

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(source.clone()));
        metadata.insert("loader".to_string(), Value::String("tabular".to_string()));
        metadata.insert("row".to_string(), Value::from(row));
        documents.push(RawDocument::new(content, metadata));
    }

    debug!(
        "Extracted {} rows from {} ({} skipped)",
        documents.len(),
        source,
        skipped
    );
    Ok(documents)
}

fn csv_error(path: &Path, error: &csv::Error) -> GranthError {
    GranthError::Extraction(format!(
        "Failed to read tabular file {}: {}",
        path.display(),
        error
    ))
}
