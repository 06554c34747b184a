//! Packet event to [`TrafficRecord`] extraction.

use std::net::IpAddr;
use std::thread;

use chrono::SubsecRound;
use crossbeam_channel::unbounded;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::PacketEvent;
use crate::models::domain::{TrafficRecord, Transport};

/// A packet event that could not be turned into a record. The pipeline logs
/// it and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("packet {sequence}: malformed {field}: {reason}")]
pub struct ExtractionSkip {
    pub sequence: u64,
    pub field: &'static str,
    pub reason: String,
}

/// Records extracted from one batch of events.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Sorted by sequence
    pub records: Vec<TrafficRecord>,
    pub skipped: Vec<ExtractionSkip>,
}

/// Converts one packet event into a record.
///
/// Fields the packet simply does not have come out absent. A field that is
/// present but cannot be interpreted means the event itself is broken, and
/// the whole record is skipped.
pub fn extract(event: &PacketEvent) -> Result<TrafficRecord, ExtractionSkip> {
    let sequence = event.number;
    let skip = |field: &'static str, reason: String| ExtractionSkip {
        sequence,
        field,
        reason,
    };

    let transport = if let Some(tcp) = &event.tcp {
        Transport::Tcp {
            source_port: parse_port(tcp.srcport.as_deref()).map_err(|r| skip("tcp.srcport", r))?,
            dest_port: parse_port(tcp.dstport.as_deref()).map_err(|r| skip("tcp.dstport", r))?,
            flags: non_empty(tcp.flags.as_deref()),
        }
    } else if let Some(udp) = &event.udp {
        Transport::Udp {
            source_port: parse_port(udp.srcport.as_deref()).map_err(|r| skip("udp.srcport", r))?,
            dest_port: parse_port(udp.dstport.as_deref()).map_err(|r| skip("udp.dstport", r))?,
        }
    } else if event.icmp.is_some() {
        Transport::Icmp
    } else {
        Transport::other(event.highest_layer.as_deref().unwrap_or_default().trim())
    };

    let mut record = TrafficRecord::new(sequence, transport);
    // The table keeps microseconds
    record.timestamp = event.sniff_time.map(|t| t.trunc_subsecs(6));

    if let Some(eth) = &event.eth {
        record.source_mac = normalize_mac(eth.src.as_deref()).map_err(|r| skip("eth.src", r))?;
        record.dest_mac = normalize_mac(eth.dst.as_deref()).map_err(|r| skip("eth.dst", r))?;
        record.l2_protocol = non_empty(eth.ether_type.as_deref());
    }

    if let Some(ip) = &event.ip {
        record.source_ip = normalize_ip(ip.src.as_deref()).map_err(|r| skip("ip.src", r))?;
        record.dest_ip = normalize_ip(ip.dst.as_deref()).map_err(|r| skip("ip.dst", r))?;
        record.ttl = parse_number(ip.ttl.as_deref()).map_err(|r| skip("ip.ttl", r))?;
    }

    record.info = non_empty(event.info.as_deref());
    record.frame_length = parse_number(event.length.as_deref()).map_err(|r| skip("length", r))?;

    // TCP and UDP outrank IP when several layers report a status.
    record.checksum_status = event
        .tcp
        .as_ref()
        .and_then(|tcp| non_empty(tcp.checksum_status.as_deref()))
        .or_else(|| {
            event
                .udp
                .as_ref()
                .and_then(|udp| non_empty(udp.checksum_status.as_deref()))
        })
        .or_else(|| {
            event
                .ip
                .as_ref()
                .and_then(|ip| non_empty(ip.checksum_status.as_deref()))
        });

    Ok(record)
}

/// Extracts every event on the calling thread.
pub fn extract_all<I>(events: I) -> Extraction
where
    I: IntoIterator<Item = PacketEvent>,
{
    let mut out = Extraction::default();
    for event in events {
        collect(&mut out, extract(&event));
    }
    finish(out)
}

/// Extracts events on a pool of `workers` threads. The result is ordered by
/// sequence exactly as [`extract_all`] would order it.
pub fn extract_parallel(events: Vec<PacketEvent>, workers: usize) -> Extraction {
    let workers = workers.max(1);
    if workers == 1 {
        return extract_all(events);
    }

    let (job_tx, job_rx) = unbounded::<PacketEvent>();
    let (result_tx, result_rx) = unbounded();

    for event in events {
        if job_tx.send(event).is_err() {
            break;
        }
    }
    drop(job_tx);

    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move || {
                for event in job_rx {
                    if result_tx.send(extract(&event)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut out = Extraction::default();
    for result in result_rx {
        collect(&mut out, result);
    }
    finish(out)
}

fn collect(out: &mut Extraction, result: Result<TrafficRecord, ExtractionSkip>) {
    match result {
        Ok(record) => out.records.push(record),
        Err(skip) => {
            warn!(sequence = skip.sequence, field = skip.field, reason = %skip.reason, "skipping packet");
            out.skipped.push(skip);
        }
    }
}

fn finish(mut out: Extraction) -> Extraction {
    out.records.sort_by_key(|r| r.sequence);
    out.skipped.sort_by_key(|s| s.sequence);
    info!(
        records = out.records.len(),
        skipped = out.skipped.len(),
        "extraction finished"
    );
    out
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_port(value: Option<&str>) -> Result<Option<u16>, String> {
    parse_number(value)
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match non_empty(value) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("{v:?}: {e}")),
    }
}

fn normalize_ip(value: Option<&str>) -> Result<Option<String>, String> {
    match non_empty(value) {
        None => Ok(None),
        Some(v) => v
            .parse::<IpAddr>()
            .map(|ip| Some(ip.to_string()))
            .map_err(|e| format!("{v:?}: {e}")),
    }
}

/// Lowercase colon-separated form of a 48-bit MAC. Hyphens are accepted as
/// separators.
pub fn normalize_mac(value: Option<&str>) -> Result<Option<String>, String> {
    let Some(v) = non_empty(value) else {
        return Ok(None);
    };
    let octets: Vec<&str> = v.split(|c| c == ':' || c == '-').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        debug!(mac = %v, "rejecting MAC literal");
        return Err(format!("{v:?} is not a 48-bit MAC"));
    }
    Ok(Some(octets.join(":").to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EthLayer, IcmpLayer, IpLayer, TcpLayer, UdpLayer};
    use crate::table::{read_records, write_records};
    use chrono::NaiveDate;

    fn tcp_event(number: u64) -> PacketEvent {
        PacketEvent {
            number,
            length: Some("74".into()),
            info: Some("51000 → 443 [SYN]".into()),
            highest_layer: Some("TLS".into()),
            eth: Some(EthLayer {
                src: Some("AA:BB:CC:00:11:22".into()),
                dst: Some("10-20-30-40-50-60".into()),
                ether_type: Some("0x0800".into()),
            }),
            ip: Some(IpLayer {
                src: Some("192.168.1.10".into()),
                dst: Some("93.184.216.34".into()),
                ttl: Some("64".into()),
                checksum_status: Some("good".into()),
            }),
            tcp: Some(TcpLayer {
                srcport: Some("51000".into()),
                dstport: Some("443".into()),
                flags: Some("0x0002".into()),
                checksum_status: Some("unverified".into()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn tcp_event_fills_every_field() {
        let record = extract(&tcp_event(7)).unwrap();
        assert_eq!(record.sequence, 7);
        assert_eq!(record.source_mac.as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(record.dest_mac.as_deref(), Some("10:20:30:40:50:60"));
        assert_eq!(record.l2_protocol.as_deref(), Some("0x0800"));
        assert_eq!(record.dest_ip.as_deref(), Some("93.184.216.34"));
        assert_eq!(record.ttl, Some(64));
        assert_eq!(record.protocol(), "TCP");
        assert_eq!(record.source_port(), Some(51000));
        assert_eq!(record.dest_port(), Some(443));
        assert_eq!(record.tcp_flags(), Some("0x0002"));
        assert_eq!(record.frame_length, Some(74));
        assert_eq!(record.checksum_status.as_deref(), Some("unverified"));
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn tcp_wins_over_udp_and_icmp() {
        let mut event = tcp_event(1);
        event.udp = Some(UdpLayer {
            srcport: Some("53".into()),
            dstport: Some("53".into()),
            checksum_status: None,
        });
        event.icmp = Some(IcmpLayer::default());
        let record = extract(&event).unwrap();
        assert_eq!(record.protocol(), "TCP");
        assert_eq!(record.source_port(), Some(51000));
    }

    #[test]
    fn checksum_falls_back_through_udp_then_ip() {
        let mut event = tcp_event(1);
        event.tcp.as_mut().unwrap().checksum_status = None;
        assert_eq!(extract(&event).unwrap().checksum_status.as_deref(), Some("good"));

        event.udp = Some(UdpLayer {
            checksum_status: Some("bad".into()),
            ..Default::default()
        });
        assert_eq!(extract(&event).unwrap().checksum_status.as_deref(), Some("bad"));
    }

    #[test]
    fn icmp_and_other_carry_no_ports() {
        let icmp = PacketEvent {
            number: 2,
            highest_layer: Some("ICMP".into()),
            icmp: Some(IcmpLayer::default()),
            ..Default::default()
        };
        let record = extract(&icmp).unwrap();
        assert_eq!(record.transport, Transport::Icmp);
        assert_eq!(record.source_port(), None);

        let arp = PacketEvent {
            number: 3,
            highest_layer: Some("ARP".into()),
            ..Default::default()
        };
        let record = extract(&arp).unwrap();
        assert_eq!(record.transport, Transport::other("ARP"));
        assert!(record.source_mac.is_none());
        assert!(record.l2_protocol.is_none());
        assert!(record.source_ip.is_none());
        assert!(record.frame_length.is_none());
    }

    #[test]
    fn transport_named_layer_without_its_layer_survives_the_table() {
        let event = PacketEvent {
            number: 5,
            highest_layer: Some("TCP".into()),
            ..Default::default()
        };
        let record = extract(&event).unwrap();
        assert_eq!(
            record.transport,
            Transport::Tcp {
                source_port: None,
                dest_port: None,
                flags: None,
            }
        );

        let bytes = write_records(Vec::new(), std::slice::from_ref(&record)).unwrap();
        assert_eq!(read_records(bytes.as_slice()).unwrap(), vec![record]);
    }

    #[test]
    fn sniff_time_is_kept_to_the_microsecond() {
        let sniffed = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_nano_opt(12, 30, 5, 123_456_789)
            .unwrap();
        let event = PacketEvent {
            number: 6,
            sniff_time: Some(sniffed),
            highest_layer: Some("ARP".into()),
            ..Default::default()
        };
        let record = extract(&event).unwrap();
        assert_eq!(
            record.timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_micro_opt(12, 30, 5, 123_456)
        );

        let bytes = write_records(Vec::new(), std::slice::from_ref(&record)).unwrap();
        assert_eq!(read_records(bytes.as_slice()).unwrap(), vec![record]);
    }

    #[test]
    fn missing_attributes_are_absent_not_skipped() {
        let event = PacketEvent {
            number: 4,
            tcp: Some(TcpLayer::default()),
            ip: Some(IpLayer {
                dst: Some("10.0.0.1".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record = extract(&event).unwrap();
        assert_eq!(record.source_port(), None);
        assert_eq!(record.tcp_flags(), None);
        assert_eq!(record.ttl, None);
        assert_eq!(record.source_ip, None);
        assert_eq!(record.dest_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn malformed_fields_skip_the_record() {
        let mut event = tcp_event(9);
        event.tcp.as_mut().unwrap().dstport = Some("70000".into());
        let skip = extract(&event).unwrap_err();
        assert_eq!(skip.sequence, 9);
        assert_eq!(skip.field, "tcp.dstport");

        let mut event = tcp_event(10);
        event.eth.as_mut().unwrap().src = Some("not-a-mac".into());
        assert_eq!(extract(&event).unwrap_err().field, "eth.src");

        let mut event = tcp_event(11);
        event.ip.as_mut().unwrap().dst = Some("999.1.1.1".into());
        assert_eq!(extract(&event).unwrap_err().field, "ip.dst");
    }

    #[test]
    fn parallel_matches_sequential_order() {
        let mut events: Vec<PacketEvent> = (1..=200).map(tcp_event).collect();
        events[50].tcp.as_mut().unwrap().srcport = Some("x".into());

        let sequential = extract_all(events.clone());
        let parallel = extract_parallel(events, 4);

        assert_eq!(sequential.records, parallel.records);
        assert_eq!(parallel.records.len(), 199);
        assert_eq!(parallel.skipped.len(), 1);
        assert_eq!(parallel.skipped[0].sequence, 51);
        assert!(parallel
            .records
            .windows(2)
            .all(|w| w[0].sequence < w[1].sequence));
    }
}
