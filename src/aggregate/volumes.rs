use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::{CancelFlag, Cancelled};
use crate::models::domain::TrafficRecord;
use crate::models::dto::{MacTotalRow, VolumeRow};

/// Bytes per (source MAC, destination MAC) link. Per-MAC totals are derived
/// from the matrix on demand rather than kept alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeMatrix {
    links: BTreeMap<(String, String), u64>,
}

impl VolumeMatrix {
    pub fn get(&self, source: &str, dest: &str) -> Option<u64> {
        self.links
            .get(&(source.to_string(), dest.to_string()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.links
            .iter()
            .map(|((s, d), bytes)| (s.as_str(), d.as_str(), *bytes))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Sum over every link, saturating at `u64::MAX`.
    pub fn total_bytes(&self) -> u64 {
        self.links.values().fold(0u64, |total, bytes| {
            total.checked_add(*bytes).unwrap_or_else(|| {
                warn!("total byte count saturated");
                u64::MAX
            })
        })
    }

    /// Bytes sent per source MAC (row sums).
    pub fn source_totals(&self) -> BTreeMap<String, u64> {
        sum_by(self.links.iter().map(|((source, _), bytes)| (source, *bytes)))
    }

    /// Bytes received per destination MAC (column sums).
    pub fn destination_totals(&self) -> BTreeMap<String, u64> {
        sum_by(self.links.iter().map(|((_, dest), bytes)| (dest, *bytes)))
    }

    pub fn rows(&self) -> Vec<VolumeRow> {
        self.iter()
            .map(|(source_mac, dest_mac, total_bytes)| VolumeRow {
                source_mac: source_mac.to_string(),
                dest_mac: dest_mac.to_string(),
                total_bytes,
            })
            .collect()
    }
}

/// Per-MAC sums that saturate at `u64::MAX` instead of wrapping.
fn sum_by<'a, I>(links: I) -> BTreeMap<String, u64>
where
    I: Iterator<Item = (&'a String, u64)>,
{
    let mut totals = BTreeMap::new();
    for (mac, bytes) in links {
        let total: &mut u64 = totals.entry(mac.clone()).or_insert(0);
        *total = total.checked_add(bytes).unwrap_or_else(|| {
            warn!(mac = %mac, "per-MAC byte total saturated");
            u64::MAX
        });
    }
    totals
}

pub fn total_rows(totals: &BTreeMap<String, u64>) -> Vec<MacTotalRow> {
    totals
        .iter()
        .map(|(mac, bytes)| MacTotalRow {
            mac: mac.clone(),
            total_bytes: *bytes,
        })
        .collect()
}

/// Sums frame lengths per link. Records missing either MAC or the frame
/// length do not contribute, nor does a frame that would overflow its link.
pub fn accumulate_volumes(
    records: &[TrafficRecord],
    cancel: &CancelFlag,
) -> Result<VolumeMatrix, Cancelled> {
    let mut matrix = VolumeMatrix::default();
    let mut excluded = 0usize;
    for record in records {
        cancel.check()?;
        let (Some(source), Some(dest), Some(bytes)) = (
            record.source_mac.as_deref().filter(|m| !m.is_empty()),
            record.dest_mac.as_deref().filter(|m| !m.is_empty()),
            record.frame_length,
        ) else {
            excluded += 1;
            continue;
        };
        let link = matrix
            .links
            .entry((source.to_string(), dest.to_string()))
            .or_insert(0);
        match link.checked_add(bytes) {
            Some(sum) => *link = sum,
            None => {
                warn!(
                    sequence = record.sequence,
                    source,
                    dest,
                    bytes,
                    "frame would overflow the link total; excluded"
                );
                excluded += 1;
            }
        }
    }

    debug!(excluded, "records without volume data");
    info!(
        links = matrix.len(),
        bytes = matrix.total_bytes(),
        "volume pass finished"
    );
    Ok(matrix)
}
