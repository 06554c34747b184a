//! The traffic table: one CSV row per [`TrafficRecord`].
//!
//! Absent fields are empty cells. Decoding never fails on a single bad cell;
//! the field degrades to absent and the row is kept.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::domain::{TrafficRecord, Transport};

pub const HEADER: [&str; 16] = [
    "No.",
    "Time",
    "Source MAC",
    "Destination MAC",
    "Source IP",
    "Destination IP",
    "Source Port",
    "Destination Port",
    "Protocol",
    "Info",
    "Frame Length",
    "TTL",
    "TCP Flags",
    "Checksum Errors",
    "Layer 2 Protocol",
    "Dropped",
];

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const TIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The header lacks a column no row can do without
    #[error("missing column {0:?} in table header")]
    MissingColumn(&'static str),
}

/// Writes the header on creation, then one row per record.
pub struct TableWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl TableWriter<File> {
    pub fn create(path: &Path) -> Result<Self, TableError> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> TableWriter<W> {
    pub fn from_writer(writer: W) -> Result<Self, TableError> {
        let mut inner = csv::Writer::from_writer(writer);
        inner.write_record(HEADER)?;
        Ok(Self { inner, rows: 0 })
    }

    pub fn write(&mut self, record: &TrafficRecord) -> Result<(), TableError> {
        let row = [
            record.sequence.to_string(),
            record
                .timestamp
                .map(|ts| ts.format(TIME_FORMAT).to_string())
                .unwrap_or_default(),
            cell(record.source_mac.as_deref()),
            cell(record.dest_mac.as_deref()),
            cell(record.source_ip.as_deref()),
            cell(record.dest_ip.as_deref()),
            cell(record.source_port()),
            cell(record.dest_port()),
            record.protocol().to_string(),
            cell(record.info.as_deref()),
            cell(record.frame_length),
            cell(record.ttl),
            cell(record.tcp_flags()),
            cell(record.checksum_status.as_deref()),
            cell(record.l2_protocol.as_deref()),
            // Dropped: no decoder reports it
            String::new(),
        ];
        self.inner.write_record(&row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(self) -> Result<W, TableError> {
        self.inner
            .into_inner()
            .map_err(|e| TableError::Io(e.into_error()))
    }
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes a whole table in one go.
pub fn write_records<'a, W, I>(writer: W, records: I) -> Result<W, TableError>
where
    W: Write,
    I: IntoIterator<Item = &'a TrafficRecord>,
{
    let mut table = TableWriter::from_writer(writer)?;
    for record in records {
        table.write(record)?;
    }
    table.finish()
}

/// Column positions resolved from the header, so files with reordered or
/// missing optional columns still decode.
struct Columns {
    sequence: usize,
    time: Option<usize>,
    source_mac: Option<usize>,
    dest_mac: Option<usize>,
    source_ip: Option<usize>,
    dest_ip: Option<usize>,
    source_port: Option<usize>,
    dest_port: Option<usize>,
    protocol: Option<usize>,
    info: Option<usize>,
    frame_length: Option<usize>,
    ttl: Option<usize>,
    tcp_flags: Option<usize>,
    checksum: Option<usize>,
    l2_protocol: Option<usize>,
}

impl Columns {
    fn from_header(header: &csv::ByteRecord) -> Result<Self, TableError> {
        let find = |name: &str| {
            header.iter().position(|h| {
                std::str::from_utf8(h)
                    .is_ok_and(|h| h.trim_start_matches('\u{feff}').trim() == name)
            })
        };
        Ok(Columns {
            sequence: find(HEADER[0]).ok_or(TableError::MissingColumn(HEADER[0]))?,
            time: find(HEADER[1]),
            source_mac: find(HEADER[2]),
            dest_mac: find(HEADER[3]),
            source_ip: find(HEADER[4]),
            dest_ip: find(HEADER[5]),
            source_port: find(HEADER[6]),
            dest_port: find(HEADER[7]),
            protocol: find(HEADER[8]),
            info: find(HEADER[9]),
            frame_length: find(HEADER[10]),
            ttl: find(HEADER[11]),
            tcp_flags: find(HEADER[12]),
            checksum: find(HEADER[13]),
            l2_protocol: find(HEADER[14]),
        })
    }
}

/// Streams records out of a table. Rows whose sequence number cannot be read
/// are logged and skipped; I/O failures end the stream with an error.
pub struct TableReader<R: Read> {
    inner: csv::Reader<R>,
    columns: Columns,
    row: csv::ByteRecord,
}

impl TableReader<File> {
    pub fn open(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read> TableReader<R> {
    pub fn from_reader(reader: R) -> Result<Self, TableError> {
        let mut inner = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns = Columns::from_header(inner.byte_headers()?)?;
        Ok(Self {
            inner,
            columns,
            row: csv::ByteRecord::new(),
        })
    }

    fn decode_row(&self) -> Option<TrafficRecord> {
        let row = &self.row;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let text = |col: Option<usize>| {
            cell_text(row, col, line)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let sequence = match cell_text(row, Some(self.columns.sequence), line).map(str::trim) {
            Some(v) => match v.parse::<u64>() {
                Ok(sequence) => sequence,
                Err(e) => {
                    warn!(line, value = v, error = %e, "skipping row with unreadable sequence number");
                    return None;
                }
            },
            None => {
                warn!(line, "skipping row without a sequence number");
                return None;
            }
        };

        let timestamp = text(self.columns.time).and_then(|v| {
            NaiveDateTime::parse_from_str(v.trim(), TIME_PARSE_FORMAT)
                .map_err(|e| debug!(line, column = "Time", value = %v, error = %e, "malformed cell"))
                .ok()
        });

        let transport = Transport::from_parts(
            &text(self.columns.protocol).unwrap_or_default(),
            parse_cell(row, self.columns.source_port, line, HEADER[6]),
            parse_cell(row, self.columns.dest_port, line, HEADER[7]),
            text(self.columns.tcp_flags),
        );

        Some(TrafficRecord {
            sequence,
            timestamp,
            source_mac: text(self.columns.source_mac),
            dest_mac: text(self.columns.dest_mac),
            source_ip: text(self.columns.source_ip),
            dest_ip: text(self.columns.dest_ip),
            transport,
            info: text(self.columns.info),
            frame_length: parse_cell(row, self.columns.frame_length, line, HEADER[10]),
            ttl: parse_cell(row, self.columns.ttl, line, HEADER[11]),
            checksum_status: text(self.columns.checksum),
            l2_protocol: text(self.columns.l2_protocol),
        })
    }
}

/// Text of one cell. A cell that is not UTF-8 reads as absent without
/// costing the rest of the row.
fn cell_text(row: &csv::ByteRecord, col: Option<usize>, line: u64) -> Option<&str> {
    let index = col?;
    match std::str::from_utf8(row.get(index)?) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(line, column = index, error = %e, "cell is not UTF-8");
            None
        }
    }
}

fn parse_cell<T: FromStr>(
    row: &csv::ByteRecord,
    col: Option<usize>,
    line: u64,
    name: &str,
) -> Option<T> {
    let value = cell_text(row, col, line).map(str::trim)?;
    if value.is_empty() {
        return None;
    }
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!(line, column = name, value, "malformed cell");
            None
        }
    }
}

impl<R: Read> Iterator for TableReader<R> {
    type Item = Result<TrafficRecord, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.read_byte_record(&mut self.row) {
                Ok(false) => return None,
                Ok(true) => {
                    if let Some(record) = self.decode_row() {
                        return Some(Ok(record));
                    }
                }
                Err(e) if e.is_io_error() => return Some(Err(e.into())),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable row");
                }
            }
        }
    }
}

/// Reads a whole table.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<TrafficRecord>, TableError> {
    TableReader::from_reader(reader)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn full_record() -> TrafficRecord {
        TrafficRecord {
            sequence: 1,
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_micro_opt(10, 0, 0, 123_456)),
            source_mac: Some("aa:bb:cc:dd:ee:ff".into()),
            dest_mac: Some("11:22:33:44:55:66".into()),
            source_ip: Some("192.168.1.2".into()),
            dest_ip: Some("93.184.216.34".into()),
            transport: Transport::Tcp {
                source_port: Some(51000),
                dest_port: Some(443),
                flags: Some("0x0018".into()),
            },
            info: Some("Client Hello, \"quoted\", with commas".into()),
            frame_length: Some(583),
            ttl: Some(64),
            checksum_status: Some("unverified".into()),
            l2_protocol: Some("0x0800".into()),
        }
    }

    fn encode(records: &[TrafficRecord]) -> String {
        let bytes = write_records(Vec::new(), records).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn writes_header_and_empty_cells() {
        let sparse = TrafficRecord::new(2, Transport::Icmp);
        let text = encode(&[full_record(), sparse]);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(HEADER.join(",").as_str()));
        assert!(lines
            .next()
            .unwrap()
            .starts_with("1,2024-05-01 10:00:00.123456,aa:bb:cc:dd:ee:ff,"));
        assert_eq!(lines.next(), Some("2,,,,,,,,ICMP,,,,,,,"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn round_trips_present_and_absent_fields() {
        let records = vec![
            full_record(),
            TrafficRecord::new(2, Transport::Icmp),
            TrafficRecord::new(
                3,
                Transport::Udp {
                    source_port: None,
                    dest_port: Some(53),
                },
            ),
            TrafficRecord::new(4, Transport::other("ARP")),
        ];
        let decoded = read_records(encode(&records).as_bytes()).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn malformed_cells_degrade_to_absent() {
        let mut text = HEADER.join(",");
        text.push_str("\n5,yesterday,aa:bb:cc:dd:ee:ff,,,10.0.0.1,http,99999,TCP,,sixty,300,,,,\n");
        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.sequence, 5);
        assert_eq!(r.timestamp, None);
        assert_eq!(r.source_mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(r.dest_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(r.source_port(), None);
        assert_eq!(r.dest_port(), None);
        assert_eq!(r.protocol(), "TCP");
        assert_eq!(r.frame_length, None);
        assert_eq!(r.ttl, None);
    }

    #[test]
    fn rows_without_sequence_are_skipped() {
        let mut text = HEADER.join(",");
        text.push_str("\n,,,,,,,,UDP,,,,,,,\nabc,,,,,,,,UDP,,,,,,,\n7,,,,,,,,UDP,,60,,,,,\n");
        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 7);
        assert_eq!(records[0].frame_length, Some(60));
    }

    #[test]
    fn ports_on_portless_protocols_are_dropped() {
        let mut text = HEADER.join(",");
        text.push_str("\n1,,,,,,80,80,ICMP,,,,0x0002,,,\n");
        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(records[0].transport, Transport::Icmp);
        assert_eq!(records[0].source_port(), None);
        assert_eq!(records[0].tcp_flags(), None);
    }

    #[test]
    fn short_rows_and_reordered_columns_decode() {
        let text = "Destination IP,No.,Frame Length\n8.8.8.8,3,120\n1.1.1.1,4\n";
        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dest_ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(records[0].frame_length, Some(120));
        assert_eq!(records[1].sequence, 4);
        assert_eq!(records[1].frame_length, None);
        assert_eq!(records[1].transport, Transport::other(""));
    }

    #[test]
    fn non_utf8_cell_costs_only_that_cell() {
        let mut bytes = HEADER.join(",").into_bytes();
        bytes.extend_from_slice(b"\n1,,,,,,,,UDP,caf\xe9,60,,,,,\n2,,,,,,,,UDP,ok,70,,,,,\n");
        let records = read_records(bytes.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].info, None);
        assert_eq!(records[0].frame_length, Some(60));
        assert_eq!(records[1].info.as_deref(), Some("ok"));
    }

    #[test]
    fn byte_order_mark_before_header_is_ignored() {
        let text = "\u{feff}No.,Frame Length\n3,120\n";
        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 3);
        assert_eq!(records[0].frame_length, Some(120));
    }

    #[test]
    fn header_without_sequence_is_rejected() {
        let text = "Destination IP\n8.8.8.8\n";
        assert!(matches!(
            read_records(text.as_bytes()),
            Err(TableError::MissingColumn("No."))
        ));
    }

    fn opt_text() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[ -~]*[!-~][ -~]*")
    }

    fn transport() -> impl Strategy<Value = Transport> {
        prop_oneof![
            (any::<Option<u16>>(), any::<Option<u16>>(), opt_text()).prop_map(
                |(source_port, dest_port, flags)| Transport::Tcp {
                    source_port,
                    dest_port,
                    flags
                }
            ),
            (any::<Option<u16>>(), any::<Option<u16>>())
                .prop_map(|(source_port, dest_port)| Transport::Udp {
                    source_port,
                    dest_port
                }),
            Just(Transport::Icmp),
            prop_oneof!["[A-Z][A-Z0-9]{1,7}", "TCP|UDP|ICMP", "[ -~]{0,8}"]
                .prop_map(|tag: String| Transport::other(&tag)),
        ]
    }

    prop_compose! {
        fn record()(
            sequence in any::<u64>(),
            micros in proptest::option::of(0i64..4_102_444_800_000_000),
            macs in (opt_text(), opt_text()),
            ips in (opt_text(), opt_text()),
            transport in transport(),
            info in opt_text(),
            frame_length in any::<Option<u64>>(),
            ttl in any::<Option<u8>>(),
            checksum_status in opt_text(),
            l2_protocol in opt_text(),
        ) -> TrafficRecord {
            TrafficRecord {
                sequence,
                timestamp: micros.and_then(|m| {
                    chrono::DateTime::from_timestamp(m / 1_000_000, (m % 1_000_000) as u32 * 1_000)
                        .map(|dt| dt.naive_utc())
                }),
                source_mac: macs.0,
                dest_mac: macs.1,
                source_ip: ips.0,
                dest_ip: ips.1,
                transport,
                info,
                frame_length,
                ttl,
                checksum_status,
                l2_protocol,
            }
        }
    }

    proptest! {
        #[test]
        fn any_record_mix_round_trips(records in proptest::collection::vec(record(), 0..20)) {
            let decoded = read_records(encode(&records).as_bytes()).unwrap();
            prop_assert_eq!(decoded, records);
        }
    }
}
