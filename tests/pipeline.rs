use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use netcensus::aggregate::{
    accumulate_volumes, classify_devices, count_domains, CancelFlag, PassOptions,
};
use netcensus::cache::ResolverCache;
use netcensus::models::domain::{TrafficRecord, Transport, ZERO_MAC};
use netcensus::pipeline;
use netcensus::resolve::ResolveError;
use netcensus::table::{read_records, write_records};
use netcensus::Error;

fn example_records() -> Vec<TrafficRecord> {
    let mut tcp = TrafficRecord::new(
        1,
        Transport::Tcp {
            source_port: Some(51000),
            dest_port: Some(443),
            flags: Some("0x0002".into()),
        },
    );
    tcp.dest_ip = Some("93.184.216.34".into());
    tcp.frame_length = Some(60);

    let mut udp = TrafficRecord::new(
        2,
        Transport::Udp {
            source_port: Some(5353),
            dest_port: Some(53),
        },
    );
    udp.dest_ip = Some("93.184.216.34".into());
    udp.frame_length = Some(80);

    let mut icmp = TrafficRecord::new(3, Transport::Icmp);
    icmp.frame_length = Some(40);

    vec![tcp, udp, icmp]
}

#[test]
fn three_record_example_through_the_table_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traffic.csv");
    let file = fs::File::create(&path).unwrap();
    write_records(file, &example_records()).unwrap();

    let records = pipeline::load_table(&path).unwrap();
    assert_eq!(records, example_records());

    let calls = AtomicUsize::new(0);
    let reverse = |ip: &str| -> Result<Option<String>, ResolveError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok((ip == "93.184.216.34").then(|| "example.com".to_string()))
    };
    let counts = count_domains(
        &records,
        1000,
        &ResolverCache::new(),
        &reverse,
        &PassOptions::default(),
    )
    .unwrap();

    assert_eq!(counts.iter().collect::<Vec<_>>(), vec![("example.com", 2)]);
    assert_eq!(counts.processed_rows(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_input_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    match pipeline::load_table(&path) {
        Err(Error::MissingInput(missing)) => assert_eq!(missing, path),
        other => panic!("expected MissingInput, got {other:?}"),
    }
}

#[test]
fn zero_mac_pair_yields_no_devices() {
    let mut a = TrafficRecord::new(1, Transport::other("ARP"));
    a.source_mac = Some(ZERO_MAC.into());
    a.dest_mac = Some(ZERO_MAC.into());
    let mut b = a.clone();
    b.sequence = 2;

    let vendors = |_: &str| -> Result<Option<String>, ResolveError> { Ok(Some("Apple".into())) };
    let devices = classify_devices(
        &[a, b],
        &ResolverCache::new(),
        &vendors,
        &PassOptions::default(),
    )
    .unwrap();
    assert!(devices.is_empty());
    assert!(devices.counts_by_type().is_empty());
}

#[test]
fn volume_conservation_after_reload() {
    let macs = ["02:00:00:00:00:01", "02:00:00:00:00:02", "02:00:00:00:00:03"];
    let mut records = Vec::new();
    let mut expected = 0u64;
    for seq in 0..60u64 {
        let mut r = TrafficRecord::new(seq, Transport::Icmp);
        r.source_mac = Some(macs[(seq % 3) as usize].into());
        r.dest_mac = Some(macs[((seq + 1) % 3) as usize].into());
        // Every fifth record lacks a length and must not count
        if seq % 5 != 0 {
            r.frame_length = Some(seq * 10);
            expected += seq * 10;
        }
        records.push(r);
    }

    let bytes = write_records(Vec::new(), &records).unwrap();
    let reloaded = read_records(bytes.as_slice()).unwrap();
    let matrix = accumulate_volumes(&reloaded, &CancelFlag::new()).unwrap();

    assert_eq!(matrix.total_bytes(), expected);
    assert_eq!(matrix.source_totals().values().sum::<u64>(), expected);
    assert_eq!(matrix.destination_totals().values().sum::<u64>(), expected);
    assert_eq!(matrix.len(), 3);
}

#[test]
fn shared_cache_serves_both_passes() {
    let records = example_records();
    let cache = ResolverCache::new();
    let calls = AtomicUsize::new(0);
    let reverse = |_: &str| -> Result<Option<String>, ResolveError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ResolveError::Timeout)
    };
    let opts = PassOptions::default();

    let first = count_domains(&records, 1000, &cache, &reverse, &opts).unwrap();
    let second = count_domains(&records, 2, &cache, &reverse, &opts).unwrap();

    assert_eq!(first.get("93.184.216.34"), Some(2));
    assert_eq!(second.get("93.184.216.34"), Some(2));
    assert_eq!(second.processed_rows(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
