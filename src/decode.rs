// src/decode.rs
use chrono::NaiveDateTime;
use etherparse::{
    Ethernet2HeaderSlice, Ipv4Slice, LinkSlice, NetSlice, SlicedPacket, TcpSlice, TransportSlice,
};

use crate::event::{EthLayer, IcmpLayer, IpLayer, PacketEvent, TcpLayer, UdpLayer};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_LLDP: u16 = 0x88CC;

/// TCP/UDP checksums are not validated here.
const UNVERIFIED: &str = "unverified";

/// Decodes one Ethernet II frame into a packet event.
///
/// `wire_len` is the original length on the wire, which can exceed
/// `data.len()` for truncated captures.
pub fn decode_frame(
    number: u64,
    sniff_time: Option<NaiveDateTime>,
    wire_len: u32,
    data: &[u8],
) -> PacketEvent {
    let mut event = PacketEvent {
        number,
        sniff_time,
        length: Some(wire_len.to_string()),
        ..Default::default()
    };

    let sliced = match SlicedPacket::from_ethernet(data) {
        Ok(sliced) => sliced,
        Err(_) => {
            // Keep the link layer when only the upper layers are broken
            if let Ok(eth) = Ethernet2HeaderSlice::from_slice(data) {
                let ether_type = eth.ether_type().0;
                event.eth = Some(eth_layer(eth.source(), eth.destination(), ether_type));
                event.highest_layer = Some(ethertype_name(ether_type).to_string());
            } else {
                event.highest_layer = Some("DATA".into());
            }
            return event;
        }
    };

    let mut ether_type = None;
    if let Some(LinkSlice::Ethernet2(eth)) = &sliced.link {
        let et = eth.ether_type().0;
        ether_type = Some(et);
        event.eth = Some(eth_layer(eth.source(), eth.destination(), et));
    }

    match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            event.ip = Some(IpLayer {
                src: Some(header.source_addr().to_string()),
                dst: Some(header.destination_addr().to_string()),
                ttl: Some(header.ttl().to_string()),
                checksum_status: Some(ipv4_checksum_status(ipv4).into()),
            });
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            event.ip = Some(IpLayer {
                src: Some(header.source_addr().to_string()),
                dst: Some(header.destination_addr().to_string()),
                ttl: Some(header.hop_limit().to_string()),
                checksum_status: None,
            });
        }
        _ => {}
    }

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let flags = tcp_flag_bits(tcp);
            event.info = Some(format!(
                "{} → {} [{}]",
                tcp.source_port(),
                tcp.destination_port(),
                tcp_flag_names(flags).join(", ")
            ));
            event.tcp = Some(TcpLayer {
                srcport: Some(tcp.source_port().to_string()),
                dstport: Some(tcp.destination_port().to_string()),
                flags: Some(format!("0x{flags:04x}")),
                checksum_status: Some(UNVERIFIED.into()),
            });
            event.highest_layer = Some("TCP".into());
        }
        Some(TransportSlice::Udp(udp)) => {
            event.info = Some(format!(
                "{} → {} Len={}",
                udp.source_port(),
                udp.destination_port(),
                udp.payload().len()
            ));
            event.udp = Some(UdpLayer {
                srcport: Some(udp.source_port().to_string()),
                dstport: Some(udp.destination_port().to_string()),
                checksum_status: Some(UNVERIFIED.into()),
            });
            event.highest_layer = Some("UDP".into());
        }
        Some(TransportSlice::Icmpv4(icmp)) => {
            event.info = Some(format!("type={} code={}", icmp.type_u8(), icmp.code_u8()));
            event.icmp = Some(IcmpLayer {
                icmp_type: Some(icmp.type_u8().to_string()),
                code: Some(icmp.code_u8().to_string()),
            });
            event.highest_layer = Some("ICMP".into());
        }
        Some(TransportSlice::Icmpv6(icmp)) => {
            event.info = Some(format!("type={} code={}", icmp.type_u8(), icmp.code_u8()));
            event.icmp = Some(IcmpLayer {
                icmp_type: Some(icmp.type_u8().to_string()),
                code: Some(icmp.code_u8().to_string()),
            });
            event.highest_layer = Some("ICMPV6".into());
        }
        _ => {
            event.highest_layer = Some(match (&event.ip, ether_type) {
                (Some(_), _) => "IP".to_string(),
                (None, Some(et)) => ethertype_name(et).to_string(),
                (None, None) => "DATA".to_string(),
            });
        }
    }

    event
}

fn eth_layer(source: [u8; 6], destination: [u8; 6], ether_type: u16) -> EthLayer {
    EthLayer {
        src: Some(format_mac(&source)),
        dst: Some(format_mac(&destination)),
        ether_type: Some(format!("0x{ether_type:04x}")),
    }
}

pub fn format_mac(bytes: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

fn ethertype_name(ether_type: u16) -> &'static str {
    match ether_type {
        ETHERTYPE_IPV4 => "IP",
        ETHERTYPE_ARP => "ARP",
        ETHERTYPE_VLAN => "VLAN",
        ETHERTYPE_IPV6 => "IPV6",
        ETHERTYPE_LLDP => "LLDP",
        _ => "ETH",
    }
}

/// Verifies the IPv4 header checksum: the one's complement sum over the
/// whole header, checksum included, folds to `0xffff` when intact.
fn ipv4_checksum_status(ipv4: &Ipv4Slice) -> &'static str {
    let header = ipv4.header().slice();
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    if sum == 0xffff {
        "good"
    } else {
        "bad"
    }
}

const TCP_FLAGS: [(u16, &str); 8] = [
    (0x001, "FIN"),
    (0x002, "SYN"),
    (0x004, "RST"),
    (0x008, "PSH"),
    (0x010, "ACK"),
    (0x020, "URG"),
    (0x040, "ECE"),
    (0x080, "CWR"),
];

fn tcp_flag_bits(tcp: &TcpSlice) -> u16 {
    let set = [
        tcp.fin(),
        tcp.syn(),
        tcp.rst(),
        tcp.psh(),
        tcp.ack(),
        tcp.urg(),
        tcp.ece(),
        tcp.cwr(),
    ];
    TCP_FLAGS
        .iter()
        .zip(set)
        .filter(|(_, on)| *on)
        .fold(0, |bits, ((bit, _), _)| bits | bit)
}

fn tcp_flag_names(bits: u16) -> Vec<&'static str> {
    TCP_FLAGS
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}
