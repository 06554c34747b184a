//! MAC vendor lookup from a local copy of the OUI registry.
//!
//! Accepts the IEEE `oui.txt` listing and Wireshark's `manuf` file. Manuf
//! entries may carry a prefix length (`/28`, `/36`); the longest matching
//! prefix wins.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use super::{ResolveError, Resolver};
use crate::error::Result;

pub const IEEE_OUI_URL: &str = "https://standards-oui.ieee.org/oui/oui.txt";

#[derive(Debug, Clone, Default)]
pub struct OuiDatabase {
    /// prefix length in bits -> masked prefix -> vendor
    prefixes: BTreeMap<u8, HashMap<u64, String>>,
}

impl OuiDatabase {
    pub fn parse(contents: &str) -> Self {
        let mut db = OuiDatabase::default();
        for line in contents.lines() {
            if let Some((prefix, bits, vendor)) = parse_ieee_line(line).or_else(|| parse_manuf_line(line)) {
                db.insert(prefix, bits, vendor);
            }
        }
        debug!(entries = db.len(), "OUI table parsed");
        db
    }

    pub fn from_path(path: &Path) -> std::result::Result<Self, ResolveError> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    fn insert(&mut self, prefix: u64, bits: u8, vendor: String) {
        self.prefixes
            .entry(bits)
            .or_default()
            .entry(mask(prefix, bits))
            .or_insert(vendor);
    }

    pub fn len(&self) -> usize {
        self.prefixes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vendor(&self, mac: u64) -> Option<&str> {
        self.prefixes
            .iter()
            .rev()
            .find_map(|(bits, table)| table.get(&mask(mac, *bits)))
            .map(String::as_str)
    }
}

impl Resolver for OuiDatabase {
    fn lookup(&self, key: &str) -> std::result::Result<Option<String>, ResolveError> {
        let mac = parse_mac(key).ok_or_else(|| ResolveError::InvalidKey(key.to_string()))?;
        Ok(self.vendor(mac).map(str::to_string))
    }
}

fn mask(value: u64, bits: u8) -> u64 {
    value >> (48 - u32::from(bits.min(48)))
}

/// 48-bit MAC from `aa:bb:cc:dd:ee:ff`, `aa-bb-..` or `aabb.ccdd.eeff`.
pub fn parse_mac(text: &str) -> Option<u64> {
    let hex: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()
}

/// `002272     (base 16)\t\tAmerican Micro-Fuel Device Corp.`
fn parse_ieee_line(line: &str) -> Option<(u64, u8, String)> {
    let (prefix, vendor) = line.split_once("(base 16)")?;
    let prefix = prefix.trim();
    if prefix.len() != 6 {
        return None;
    }
    let value = u64::from_str_radix(prefix, 16).ok()?;
    let vendor = vendor.trim();
    (!vendor.is_empty()).then(|| (value << 24, 24, vendor.to_string()))
}

/// `00:00:0C\tCisco\tCisco Systems, Inc` or
/// `00:1B:C5:00:00:00/36\tConverg\tConverging Systems Inc.`
fn parse_manuf_line(line: &str) -> Option<(u64, u8, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split('\t').map(str::trim).filter(|f| !f.is_empty());
    let prefix = fields.next()?;
    let short = fields.next()?;
    let vendor = fields.next().unwrap_or(short);

    let (addr, bits) = match prefix.split_once('/') {
        Some((addr, bits)) => (addr, Some(bits.parse::<u8>().ok()?)),
        None => (prefix, None),
    };
    let hex: String = addr
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.is_empty() || hex.len() > 12 || hex.len() % 2 != 0 {
        return None;
    }
    let value = u64::from_str_radix(&hex, 16).ok()? << (4 * (12 - hex.len()));
    let bits = bits.unwrap_or((hex.len() * 4) as u8);
    if bits == 0 || bits > 48 {
        return None;
    }
    Some((value, bits, vendor.to_string()))
}

/// Downloads the registry to `dest`. The file is only replaced when the
/// download parses to at least one entry.
pub fn download(url: &str, dest: &Path, timeout: Duration) -> Result<usize> {
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let body = client.get(url).send()?.error_for_status()?.text()?;
    let entries = OuiDatabase::parse(&body).len();
    if entries == 0 {
        return Err(ResolveError::Malformed(format!("no OUI entries found at {url}")).into());
    }
    fs::write(dest, body)?;
    info!(url, path = %dest.display(), entries, "OUI registry updated");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IEEE: &str = "\
OUI/MA-L                                                    Organization
company_id                                                  Organization
                                                            Address

28-6F-B9   (hex)\t\tNokia Shanghai Bell Co., Ltd.
286FB9     (base 16)\t\tNokia Shanghai Bell Co., Ltd.
\t\t\t\tNo.388 Ning Qiao Road,Jin Qiao Pudong Shanghai

F0-18-98   (hex)\t\tApple, Inc.
F01898     (base 16)\t\tApple, Inc.
\t\t\t\t1 Infinite Loop
";

    const MANUF: &str = "\
# Wireshark manuf
00:00:0C\tCisco\tCisco Systems, Inc
00:1B:C5\tIeeeRegi\tIEEE Registration Authority
00:1B:C5:00:00:00/36\tConverg\tConverging Systems Inc.
AC:84:C6\tTp-LinkT
";

    #[test]
    fn parses_ieee_listing() {
        let db = OuiDatabase::parse(IEEE);
        assert_eq!(db.len(), 2);
        assert_eq!(
            db.lookup("f0:18:98:12:34:56").unwrap().as_deref(),
            Some("Apple, Inc.")
        );
        assert_eq!(
            db.lookup("28-6F-B9-00-00-01").unwrap().as_deref(),
            Some("Nokia Shanghai Bell Co., Ltd.")
        );
        assert_eq!(db.lookup("00:00:00:00:00:01").unwrap(), None);
    }

    #[test]
    fn manuf_longest_prefix_wins() {
        let db = OuiDatabase::parse(MANUF);
        assert_eq!(db.len(), 4);
        assert_eq!(
            db.lookup("00:1b:c5:00:00:42").unwrap().as_deref(),
            Some("Converging Systems Inc.")
        );
        assert_eq!(
            db.lookup("00:1b:c5:ff:00:42").unwrap().as_deref(),
            Some("IEEE Registration Authority")
        );
        // Short name is used when no long name is given
        assert_eq!(
            db.lookup("ac:84:c6:01:02:03").unwrap().as_deref(),
            Some("Tp-LinkT")
        );
    }

    #[test]
    fn invalid_mac_is_an_error() {
        let db = OuiDatabase::parse(MANUF);
        assert!(matches!(
            db.lookup("00:00:0c"),
            Err(ResolveError::InvalidKey(_))
        ));
        assert_eq!(parse_mac("0000.0c12.3456"), Some(0x0000_0c12_3456));
    }
}
