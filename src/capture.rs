// src/capture.rs
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};
use pcap::{Capture, Offline};
use tracing::{debug, info};

use crate::decode::decode_frame;
use crate::event::PacketEvent;

/// Reads every frame of an offline capture (`.pcap` or `.pcapng`) and hands
/// it to the frame decoder. Frames are numbered from 1 in file order.
pub fn read_capture(path: &Path) -> Result<Vec<PacketEvent>, pcap::Error> {
    let mut cap = open_capture(path)?;
    let events = process_packets(&mut cap)?;
    info!(path = %path.display(), packets = events.len(), "capture read");
    Ok(events)
}

fn open_capture(path: &Path) -> Result<Capture<Offline>, pcap::Error> {
    let cap = Capture::from_file(path)?;
    debug!(path = %path.display(), "opened offline capture");
    Ok(cap)
}

fn process_packets(cap: &mut Capture<Offline>) -> Result<Vec<PacketEvent>, pcap::Error> {
    let mut events = Vec::new();
    let mut number = 0u64;
    loop {
        match cap.next_packet() {
            Ok(packet) => {
                number += 1;
                let sniff_time = capture_time(
                    packet.header.ts.tv_sec as i64,
                    packet.header.ts.tv_usec as i64,
                );
                events.push(decode_frame(number, sniff_time, packet.header.len, packet.data));
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(events)
}

/// Capture time in local wall-clock time, microsecond precision.
fn capture_time(secs: i64, micros: i64) -> Option<NaiveDateTime> {
    let nanos = u32::try_from(micros.checked_mul(1_000)?).ok()?;
    DateTime::from_timestamp(secs, nanos).map(|ts| ts.with_timezone(&Local).naive_local())
}
