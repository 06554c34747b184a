//! Writers for the summary tables and the combined JSON summary.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::aggregate::volumes::total_rows;
use crate::aggregate::{DeviceClassification, DomainCounts, VolumeMatrix};
use crate::error::Result;
use crate::models::dto::AnalysisSummary;

/// Serializes `rows` as CSV with a header taken from the row type.
pub fn write_rows<W, T>(writer: W, rows: &[T]) -> Result<W>
where
    W: Write,
    T: Serialize,
{
    let mut out = csv::Writer::from_writer(writer);
    for row in rows {
        out.serialize(row)?;
    }
    out.into_inner().map_err(|e| e.into_error().into())
}

/// `Domain/IP,Requests` in first-appearance order.
pub fn write_domains<W: Write>(writer: W, counts: &DomainCounts) -> Result<W> {
    write_rows(writer, &counts.rows())
}

/// `MAC Address,Vendor,Device Type` sorted by MAC.
pub fn write_devices<W: Write>(writer: W, devices: &DeviceClassification) -> Result<W> {
    write_rows(writer, &devices.rows())
}

/// `Device Type,Count`, most common first.
pub fn write_device_counts<W: Write>(writer: W, devices: &DeviceClassification) -> Result<W> {
    write_rows(writer, &devices.count_rows())
}

/// `Source MAC,Destination MAC,Total Data Volume (Bytes)` sorted by link.
pub fn write_volumes<W: Write>(writer: W, matrix: &VolumeMatrix) -> Result<W> {
    write_rows(writer, &matrix.rows())
}

pub fn write_source_totals<W: Write>(writer: W, matrix: &VolumeMatrix) -> Result<W> {
    write_rows(writer, &total_rows(&matrix.source_totals()))
}

pub fn write_destination_totals<W: Write>(writer: W, matrix: &VolumeMatrix) -> Result<W> {
    write_rows(writer, &total_rows(&matrix.destination_totals()))
}

pub fn write_summary<W: Write>(writer: W, summary: &AnalysisSummary) -> Result<()> {
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(())
}

/// Writes to `path`, or to stdout when no path is given.
pub fn to_path_or_stdout<F>(path: Option<&Path>, what: &str, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    match path {
        Some(path) => {
            let mut file = File::create(path)?;
            write(&mut file)?;
            file.flush()?;
            info!(path = %path.display(), table = what, "summary written");
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write(&mut lock)?;
            lock.flush()?;
        }
    }
    Ok(())
}

/// Builds the combined summary from the three pass results.
pub fn summarize(
    records: usize,
    domains: &DomainCounts,
    devices: &DeviceClassification,
    volumes: &VolumeMatrix,
) -> AnalysisSummary {
    AnalysisSummary {
        records,
        domain_rows_processed: domains.processed_rows(),
        domains: domains.rows(),
        devices: devices.rows(),
        device_counts: devices.count_rows(),
        volumes: volumes.rows(),
        total_bytes: volumes.total_bytes(),
    }
}
