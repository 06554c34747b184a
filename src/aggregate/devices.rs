use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::info;

use super::{Cancelled, PassOptions};
use crate::cache::ResolverCache;
use crate::models::domain::{TrafficRecord, ZERO_MAC};
use crate::models::dto::{DeviceRow, DeviceTypeCountRow};
use crate::resolve::Resolver;

pub const UNKNOWN_VENDOR: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceType {
    AppleDevice,
    Smartphone,
    Computer,
    MediaDevice,
    NetworkDevice,
    IotDevice,
    Other,
}

impl DeviceType {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::AppleDevice => "iPhone/iPad/Mac",
            DeviceType::Smartphone => "Smartphone/Tablet",
            DeviceType::Computer => "Computer",
            DeviceType::MediaDevice => "Smart TV/Media Device",
            DeviceType::NetworkDevice => "Router/Network Device",
            DeviceType::IotDevice => "IoT Device",
            DeviceType::Other => "Other",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Checked top to bottom; keyword lists overlap, so the order decides ties.
const CATEGORIES: [(DeviceType, &[&str]); 6] = [
    (DeviceType::AppleDevice, &["apple"]),
    (
        DeviceType::Smartphone,
        &["samsung", "huawei", "honor", "xiaomi", "oneplus", "oppo", "vivo"],
    ),
    (
        DeviceType::Computer,
        &["dell", "hp", "hewlett packard", "lenovo", "asus", "acer", "msi"],
    ),
    (
        DeviceType::MediaDevice,
        &["sony", "lg", "panasonic", "samsung", "philips", "vizio"],
    ),
    (
        DeviceType::NetworkDevice,
        &["netgear", "tp-link", "d-link", "asus", "linksys", "huawei"],
    ),
    (
        DeviceType::IotDevice,
        &["ikea", "belkin", "philips hue", "tp-link", "amazon", "google"],
    ),
];

/// First category with a keyword contained in the vendor name,
/// case-insensitively.
pub fn classify_vendor(vendor: &str) -> DeviceType {
    let vendor = vendor.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| vendor.contains(k)))
        .map(|(device_type, _)| *device_type)
        .unwrap_or(DeviceType::Other)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub vendor: String,
    pub device_type: DeviceType,
}

/// Vendor and device type for every MAC seen in the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceClassification {
    devices: BTreeMap<String, Device>,
}

impl DeviceClassification {
    pub fn get(&self, mac: &str) -> Option<&Device> {
        self.devices.get(mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Device)> {
        self.devices.iter().map(|(mac, d)| (mac.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices per type, most common first; ties in category order.
    pub fn counts_by_type(&self) -> Vec<(DeviceType, usize)> {
        let mut counts: BTreeMap<DeviceType, usize> = BTreeMap::new();
        for device in self.devices.values() {
            *counts.entry(device.device_type).or_insert(0) += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    pub fn rows(&self) -> Vec<DeviceRow> {
        self.iter()
            .map(|(mac, d)| DeviceRow {
                mac: mac.to_string(),
                vendor: d.vendor.clone(),
                device_type: d.device_type.label().to_string(),
            })
            .collect()
    }

    pub fn count_rows(&self) -> Vec<DeviceTypeCountRow> {
        self.counts_by_type()
            .into_iter()
            .map(|(device_type, count)| DeviceTypeCountRow {
                device_type: device_type.label().to_string(),
                count,
            })
            .collect()
    }
}

/// Distinct source and destination MACs in lowercase, without the all-zero
/// placeholder.
pub fn distinct_macs(records: &[TrafficRecord]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| [r.source_mac.as_deref(), r.dest_mac.as_deref()])
        .flatten()
        .map(str::trim)
        .filter(|mac| !mac.is_empty() && !mac.eq_ignore_ascii_case(ZERO_MAC))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Looks up the vendor of every distinct MAC in the whole table (no row
/// limit) and assigns a device type. Failed lookups become
/// [`UNKNOWN_VENDOR`].
pub fn classify_devices<R>(
    records: &[TrafficRecord],
    cache: &ResolverCache,
    resolver: &R,
    opts: &PassOptions,
) -> Result<DeviceClassification, Cancelled>
where
    R: Resolver + ?Sized,
{
    let macs = distinct_macs(records);
    cache.resolve_all(macs.iter().map(String::as_str), resolver, opts.workers, &opts.cancel)?;

    let mut classification = DeviceClassification::default();
    for mac in macs {
        opts.cancel.check()?;
        let vendor = cache
            .resolve(&mac, resolver)
            .unwrap_or_else(|| UNKNOWN_VENDOR.to_string());
        let device_type = classify_vendor(&vendor);
        classification.devices.insert(
            mac,
            Device {
                vendor,
                device_type,
            },
        );
    }

    info!(devices = classification.len(), "device pass finished");
    Ok(classification)
}
