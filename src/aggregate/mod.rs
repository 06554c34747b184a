//! The three summary passes over a traffic table. Each pass owns its
//! accumulator and either returns a complete summary or nothing.

pub mod devices;
pub mod domains;
pub mod volumes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub use devices::{classify_devices, classify_vendor, DeviceClassification, DeviceType};
pub use domains::{count_domains, DomainCounts};
pub use volumes::{accumulate_volumes, VolumeMatrix};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("aggregation cancelled")]
pub struct Cancelled;

/// Shared stop switch. Passes poll it between records.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Knobs shared by the passes that call out to resolvers.
#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Resolver pool size
    pub workers: usize,
    pub cancel: CancelFlag,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            cancel: CancelFlag::new(),
        }
    }
}
