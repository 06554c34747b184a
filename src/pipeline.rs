//! Wiring from files and configuration to the extractor and the passes.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::aggregate::{
    accumulate_volumes, classify_devices, count_domains, CancelFlag, DeviceClassification,
    DomainCounts, PassOptions, VolumeMatrix,
};
use crate::cache::ResolverCache;
use crate::config::{DnsArgs, OuiArgs};
use crate::error::{Error, Result};
use crate::event::{read_jsonl, PacketEvent};
use crate::extract::extract_parallel;
use crate::models::domain::TrafficRecord;
use crate::resolve::{DnsResolver, Fallback, OuiDatabase, Resolver, StaticResolver};
use crate::table::{read_records, TableWriter};

/// Fails with [`Error::MissingInput`] before anything is read.
pub fn require_input(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingInput(path.to_path_buf()))
    }
}

pub fn load_events(path: &Path) -> Result<Vec<PacketEvent>> {
    require_input(path)?;
    let events = read_jsonl(File::open(path)?)?;
    info!(path = %path.display(), events = events.len(), "packet events loaded");
    Ok(events)
}

#[cfg(feature = "capture")]
pub fn load_capture(path: &Path) -> Result<Vec<PacketEvent>> {
    require_input(path)?;
    Ok(crate::capture::read_capture(path)?)
}

/// Extracts `events` and writes the traffic table to `output` in sequence
/// order. Returns the number of rows written.
pub fn extract_to_table(events: Vec<PacketEvent>, output: &Path, workers: usize) -> Result<usize> {
    let extraction = extract_parallel(events, workers);
    let mut table = TableWriter::create(output)?;
    for record in &extraction.records {
        table.write(record)?;
    }
    let rows = table.rows();
    table.finish()?;
    info!(
        path = %output.display(),
        rows,
        skipped = extraction.skipped.len(),
        "traffic table written"
    );
    Ok(rows)
}

pub fn load_table(path: &Path) -> Result<Vec<TrafficRecord>> {
    require_input(path)?;
    let records = read_records(File::open(path)?)?;
    info!(path = %path.display(), records = records.len(), "traffic table loaded");
    Ok(records)
}

pub type BoxedResolver = Box<dyn Resolver>;

pub const SYSTEM_HOSTS: &str = "/etc/hosts";

/// Reverse DNS with a hosts file consulted first. An explicit hosts file
/// must exist; the system one is used only when present.
pub fn dns_resolver(args: &DnsArgs) -> Result<BoxedResolver> {
    let dns = match args.dns_server {
        Some(server) => DnsResolver::new(server, args.timeout()),
        None => DnsResolver::from_resolv_conf(&args.resolv_conf, args.timeout()),
    };
    info!(servers = ?dns.servers(), "reverse DNS resolver ready");

    let hosts = match &args.hosts {
        Some(path) => {
            require_input(path)?;
            Some(path.clone())
        }
        None if args.no_hosts => None,
        None => Some(PathBuf::from(SYSTEM_HOSTS)).filter(|p| p.is_file()),
    };
    Ok(match hosts {
        Some(path) => Box::new(Fallback::new(StaticResolver::from_hosts_file(&path)?, dns)),
        None => Box::new(dns),
    })
}

pub fn vendor_resolver(args: &OuiArgs) -> Result<OuiDatabase> {
    require_input(&args.oui)?;
    let db = OuiDatabase::from_path(&args.oui)?;
    if db.is_empty() {
        warn!(path = %args.oui.display(), "OUI registry has no entries; every vendor will be Unknown");
    }
    Ok(db)
}

pub fn run_domains<R: Resolver + ?Sized>(
    records: &[TrafficRecord],
    max_rows: usize,
    cache: &ResolverCache,
    resolver: &R,
    opts: &PassOptions,
) -> Result<DomainCounts> {
    Ok(count_domains(records, max_rows, cache, resolver, opts)?)
}

pub fn run_devices<R: Resolver + ?Sized>(
    records: &[TrafficRecord],
    cache: &ResolverCache,
    resolver: &R,
    opts: &PassOptions,
) -> Result<DeviceClassification> {
    Ok(classify_devices(records, cache, resolver, opts)?)
}

pub fn run_volumes(records: &[TrafficRecord], cancel: &CancelFlag) -> Result<VolumeMatrix> {
    Ok(accumulate_volumes(records, cancel)?)
}

/// Shared state for running the three passes side by side. The caches are
/// shared so that a key asked for by two passes is looked up once.
#[derive(Clone)]
pub struct Analysis {
    pub records: Arc<Vec<TrafficRecord>>,
    pub dns: Arc<BoxedResolver>,
    pub vendors: Arc<OuiDatabase>,
    pub dns_cache: Arc<ResolverCache>,
    pub vendor_cache: Arc<ResolverCache>,
    pub opts: PassOptions,
    pub max_rows: usize,
}

impl Analysis {
    pub fn new(
        records: Vec<TrafficRecord>,
        dns: BoxedResolver,
        vendors: OuiDatabase,
        max_rows: usize,
        opts: PassOptions,
    ) -> Self {
        Self {
            records: Arc::new(records),
            dns: Arc::new(dns),
            vendors: Arc::new(vendors),
            dns_cache: Arc::new(ResolverCache::new()),
            vendor_cache: Arc::new(ResolverCache::new()),
            opts,
            max_rows,
        }
    }

    pub fn domains(&self) -> Result<DomainCounts> {
        run_domains(
            &self.records,
            self.max_rows,
            &self.dns_cache,
            &**self.dns,
            &self.opts,
        )
    }

    pub fn devices(&self) -> Result<DeviceClassification> {
        run_devices(
            &self.records,
            &self.vendor_cache,
            self.vendors.as_ref(),
            &self.opts,
        )
    }

    pub fn volumes(&self) -> Result<VolumeMatrix> {
        run_volumes(&self.records, &self.opts.cancel)
    }
}

pub fn oui_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
