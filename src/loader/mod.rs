//! Local CSV snapshot of the extracted listing, written on every successful
//! scrape and readable back for a republish when the warehouse step failed.

use crate::models::{COLUMNS, SaleListingRow};
use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::{info, warn};

pub fn write_snapshot(path: &Path, rows: &[SaleListingRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create snapshot {:?}", path))?;

    if rows.is_empty() {
        // serde only emits the header alongside the first record
        writer.write_record(COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Snapshot of {} rows written to {:?}", rows.len(), path);
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<SaleListingRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open snapshot {:?}", path))?;

    let headers = reader.headers()?.clone();
    if headers.iter().ne(COLUMNS) {
        bail!("Snapshot {:?} has columns {:?}, expected {:?}", path, headers, COLUMNS);
    }

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<SaleListingRow>().enumerate() {
        match result {
            Ok(row) if row.app_id.trim().is_empty() => {
                warn!("Row {} in {:?}: empty ID, skipped", i + 1, path);
            }
            Ok(row) => rows.push(row),
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }

    info!("{} rows read from snapshot {:?}", rows.len(), path);
    Ok(rows)
}
