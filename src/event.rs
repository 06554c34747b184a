//! Packet events as handed over by a decoder.
//!
//! Each protocol layer is a capability: either the packet has it or it does
//! not. Field values stay in the decoder's textual form; turning them into
//! typed values (and rejecting garbage) is the extractor's job.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthLayer {
    pub src: Option<String>,
    pub dst: Option<String>,
    /// Ethertype as reported, e.g. `0x0800`
    #[serde(rename = "type")]
    pub ether_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLayer {
    pub src: Option<String>,
    pub dst: Option<String>,
    pub ttl: Option<String>,
    pub checksum_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpLayer {
    pub srcport: Option<String>,
    pub dstport: Option<String>,
    pub flags: Option<String>,
    pub checksum_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpLayer {
    pub srcport: Option<String>,
    pub dstport: Option<String>,
    pub checksum_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpLayer {
    #[serde(rename = "type")]
    pub icmp_type: Option<String>,
    pub code: Option<String>,
}

/// One decoded unit of captured traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEvent {
    /// Frame ordinal assigned by the decoder
    pub number: u64,
    pub sniff_time: Option<NaiveDateTime>,
    /// Bytes on the wire
    pub length: Option<String>,
    pub info: Option<String>,
    pub highest_layer: Option<String>,
    pub eth: Option<EthLayer>,
    pub ip: Option<IpLayer>,
    pub tcp: Option<TcpLayer>,
    pub udp: Option<UdpLayer>,
    pub icmp: Option<IcmpLayer>,
}

/// Reads newline-delimited JSON events. Lines that do not parse are logged
/// and skipped; I/O failures abort.
pub fn read_jsonl<R: Read>(reader: R) -> std::io::Result<Vec<PacketEvent>> {
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PacketEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed packet event"),
        }
    }
    Ok(events)
}

pub fn read_jsonl_path(path: &Path) -> std::io::Result<Vec<PacketEvent>> {
    read_jsonl(File::open(path)?)
}
