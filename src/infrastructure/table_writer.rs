// Merged dataset writer
use crate::domain::series::MergedTable;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Leading columns of every merged row. Signal columns may not reuse these names.
pub const RESERVED_COLUMNS: [&str; 3] = ["timestamp", "time_s", "arbitration_id"];

/// Write the merged table as comma-separated text.
///
/// Rows go to `<path>.part` first and the file is renamed only after the last
/// row is flushed. NaN cells are written as empty fields.
pub fn write_merged(path: &Path, merged: &MergedTable) -> Result<usize> {
    if let Some(name) = merged.column_names().find(|name| RESERVED_COLUMNS.contains(name)) {
        anyhow::bail!("column {} collides with a reserved merged column", name);
    }

    let partial = partial_path(path);
    let mut writer = csv::Writer::from_path(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;

    let mut header = RESERVED_COLUMNS.to_vec();
    header.extend(merged.column_names());
    writer.write_record(&header)?;

    let table = &merged.table;
    let mut record = Vec::with_capacity(header.len());
    for row in 0..table.len() {
        record.clear();
        record.push(table.timestamps[row].to_string());
        record.push((table.timestamps[row] - table.base_time).to_string());
        record.push(format!("0x{:X}", table.arbitration_ids[row]));
        record.extend(table.columns.iter().map(|column| format_cell(column[row])));
        record.push(format_cell(merged.values[row]));
        writer.write_record(&record)?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", partial.display()))?;
    drop(writer);

    std::fs::rename(&partial, path)
        .with_context(|| format!("Failed to move {} into place", partial.display()))?;

    tracing::info!("Wrote {} merged rows to {}", table.len(), path.display());
    Ok(table.len())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
