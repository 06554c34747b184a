//! Packet events in, traffic table out, and three summaries derived from the
//! table: requests per domain, devices per vendor, and bytes per link.

pub mod aggregate;
pub mod cache;
#[cfg(feature = "capture")]
pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod table;

pub use error::{Error, Result};
