use std::collections::HashMap;

use tracing::info;

use super::{Cancelled, PassOptions};
use crate::cache::ResolverCache;
use crate::models::domain::TrafficRecord;
use crate::models::dto::DomainCountRow;
use crate::resolve::Resolver;

/// Request counts per resolved domain (or raw IP), kept in order of first
/// appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCounts {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
    processed: usize,
}

impl DomainCounts {
    fn increment(&mut self, key: String) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows consumed from the table, including those without a destination.
    pub fn processed_rows(&self) -> usize {
        self.processed
    }

    pub fn rows(&self) -> Vec<DomainCountRow> {
        self.iter()
            .map(|(domain, count)| DomainCountRow {
                domain: domain.to_string(),
                count,
            })
            .collect()
    }
}

/// Counts destinations over the first `max_rows` records in sequence order.
///
/// Every record in that window uses up budget, even when it has no
/// destination IP. Destinations that resolve are counted under their name,
/// the rest under the raw address.
pub fn count_domains<R>(
    records: &[TrafficRecord],
    max_rows: usize,
    cache: &ResolverCache,
    resolver: &R,
    opts: &PassOptions,
) -> Result<DomainCounts, Cancelled>
where
    R: Resolver + ?Sized,
{
    let mut ordered: Vec<&TrafficRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.sequence);
    ordered.truncate(max_rows);

    let destinations = ordered
        .iter()
        .filter_map(|r| r.dest_ip.as_deref())
        .filter(|ip| !ip.is_empty());
    cache.resolve_all(destinations, resolver, opts.workers, &opts.cancel)?;

    let mut counts = DomainCounts::default();
    for record in &ordered {
        opts.cancel.check()?;
        counts.processed += 1;
        let Some(ip) = record.dest_ip.as_deref().filter(|ip| !ip.is_empty()) else {
            continue;
        };
        let key = cache
            .resolve(ip, resolver)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ip.to_string());
        counts.increment(key);
    }

    info!(
        processed = counts.processed,
        domains = counts.len(),
        "domain pass finished"
    );
    Ok(counts)
}
