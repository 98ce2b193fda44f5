// Auxiliary series loader for semicolon-delimited measurement exports
use crate::domain::series::AuxiliaryTable;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum AuxiliaryError {
    #[error("failed to open auxiliary file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("auxiliary file is not readable: {0}")]
    Csv(#[from] csv::Error),
    #[error("auxiliary file has no header row")]
    MissingHeader,
    #[error("auxiliary file has no numeric data rows")]
    NoValidRows,
}

pub fn load_auxiliary(path: &Path) -> Result<AuxiliaryTable, AuxiliaryError> {
    let file = std::fs::File::open(path).map_err(|source| AuxiliaryError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let table = read_auxiliary(file)?;

    tracing::info!(
        "Loaded auxiliary file {} ({} columns, {} rows)",
        path.display(),
        table.column_count(),
        table.rows.len()
    );
    Ok(table)
}

/// Parse a header row plus numeric rows. Rows with the wrong field count or a
/// non-numeric field are skipped with a warning.
pub fn read_auxiliary<R: Read>(source: R) -> Result<AuxiliaryTable, AuxiliaryError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut records = reader.records();
    let header = records.next().ok_or(AuxiliaryError::MissingHeader)??;
    let headers: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, h)| if i == 0 { h.trim_start_matches(BOM).trim() } else { h })
        .map(str::to_string)
        .collect();

    if headers.iter().all(String::is_empty) {
        return Err(AuxiliaryError::MissingHeader);
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in records {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());

        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != headers.len() {
            tracing::warn!(
                "Skipping auxiliary line {}: expected {} fields, found {}",
                line,
                headers.len(),
                record.len()
            );
            skipped += 1;
            continue;
        }

        match record.iter().map(parse_number).collect::<Option<Vec<f64>>>() {
            Some(row) => rows.push(row),
            None => {
                tracing::warn!("Skipping auxiliary line {}: non-numeric field", line);
                skipped += 1;
            }
        }
    }

    if rows.is_empty() {
        return Err(AuxiliaryError::NoValidRows);
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} malformed auxiliary rows", skipped);
    }

    Ok(AuxiliaryTable::new(headers, rows))
}

/// Accepts `,` or `.` as the decimal separator.
fn parse_number(field: &str) -> Option<f64> {
    let normalized = field.replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
