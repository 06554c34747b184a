//! Error types for the traffic pipeline.
//!
//! Per-row and per-key failures never reach [`Error`]: they are logged where
//! they happen and only shrink the aggregate. What ends up here aborts a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::aggregate::Cancelled;
use crate::resolve::ResolveError;
use crate::table::TableError;

/// Top-level error for a pipeline run.
#[derive(Error, Debug)]
pub enum Error {
    /// Input file does not exist
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// Traffic table could not be read or written
    #[error(transparent)]
    Table(#[from] TableError),

    /// Summary table could not be written
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Resolver could not be built
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolveError),

    /// OUI registry download failed
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// Offline capture could not be read
    #[cfg(feature = "capture")]
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An aggregation pass was aborted; nothing was emitted
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type Result<T> = std::result::Result<T, Error>;
