pub mod domain {
    use chrono::NaiveDateTime;

    /// Placeholder MAC some stacks report for missing link-layer addresses.
    pub const ZERO_MAC: &str = "00:00:00:00:00:00";

    /// Transport variant of a record. Ports and flags only exist where the
    /// variant can carry them.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Transport {
        Tcp {
            source_port: Option<u16>,
            dest_port: Option<u16>,
            flags: Option<String>,
        },
        Udp {
            source_port: Option<u16>,
            dest_port: Option<u16>,
        },
        Icmp,
        /// Top-level protocol name reported by the decoder
        Other(OtherProtocol),
    }

    /// A protocol name other than `TCP`, `UDP` or `ICMP`. Only
    /// [`Transport::other`] and [`Transport::from_parts`] build one, so a
    /// transport name always maps back to the same variant.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct OtherProtocol(String);

    impl OtherProtocol {
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Transport {
        pub fn name(&self) -> &str {
            match self {
                Transport::Tcp { .. } => "TCP",
                Transport::Udp { .. } => "UDP",
                Transport::Icmp => "ICMP",
                Transport::Other(tag) => tag.as_str(),
            }
        }

        /// Variant for a bare protocol name. A transport name gives that
        /// transport with no ports or flags.
        pub fn other(name: &str) -> Self {
            Self::from_parts(name, None, None, None)
        }

        /// Rebuilds a variant from its protocol name and the cells that travel
        /// with it. Ports and flags are dropped when the variant has no room
        /// for them.
        pub fn from_parts(
            name: &str,
            source_port: Option<u16>,
            dest_port: Option<u16>,
            flags: Option<String>,
        ) -> Self {
            match name {
                "TCP" => Transport::Tcp {
                    source_port,
                    dest_port,
                    flags,
                },
                "UDP" => Transport::Udp {
                    source_port,
                    dest_port,
                },
                "ICMP" => Transport::Icmp,
                other => Transport::Other(OtherProtocol(other.to_string())),
            }
        }
    }

    /// One row per observed packet.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TrafficRecord {
        pub sequence: u64,
        pub timestamp: Option<NaiveDateTime>,
        pub source_mac: Option<String>,
        pub dest_mac: Option<String>,
        pub source_ip: Option<String>,
        pub dest_ip: Option<String>,
        pub transport: Transport,
        pub info: Option<String>,
        pub frame_length: Option<u64>,
        pub ttl: Option<u8>,
        pub checksum_status: Option<String>,
        pub l2_protocol: Option<String>,
    }

    impl TrafficRecord {
        /// A record with only the mandatory fields set.
        pub fn new(sequence: u64, transport: Transport) -> Self {
            TrafficRecord {
                sequence,
                timestamp: None,
                source_mac: None,
                dest_mac: None,
                source_ip: None,
                dest_ip: None,
                transport,
                info: None,
                frame_length: None,
                ttl: None,
                checksum_status: None,
                l2_protocol: None,
            }
        }

        pub fn protocol(&self) -> &str {
            self.transport.name()
        }

        pub fn source_port(&self) -> Option<u16> {
            match self.transport {
                Transport::Tcp { source_port, .. } | Transport::Udp { source_port, .. } => {
                    source_port
                }
                _ => None,
            }
        }

        pub fn dest_port(&self) -> Option<u16> {
            match self.transport {
                Transport::Tcp { dest_port, .. } | Transport::Udp { dest_port, .. } => dest_port,
                _ => None,
            }
        }

        pub fn tcp_flags(&self) -> Option<&str> {
            match &self.transport {
                Transport::Tcp { flags, .. } => flags.as_deref(),
                _ => None,
            }
        }
    }
}

pub mod dto {
    use serde::Serialize;

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct DomainCountRow {
        #[serde(rename = "Domain/IP")]
        pub domain: String,
        #[serde(rename = "Requests")]
        pub count: u64,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct DeviceRow {
        #[serde(rename = "MAC Address")]
        pub mac: String,
        #[serde(rename = "Vendor")]
        pub vendor: String,
        #[serde(rename = "Device Type")]
        pub device_type: String,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct DeviceTypeCountRow {
        #[serde(rename = "Device Type")]
        pub device_type: String,
        #[serde(rename = "Count")]
        pub count: usize,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct VolumeRow {
        #[serde(rename = "Source MAC")]
        pub source_mac: String,
        #[serde(rename = "Destination MAC")]
        pub dest_mac: String,
        #[serde(rename = "Total Data Volume (Bytes)")]
        pub total_bytes: u64,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct MacTotalRow {
        #[serde(rename = "MAC Address")]
        pub mac: String,
        #[serde(rename = "Total Data Volume (Bytes)")]
        pub total_bytes: u64,
    }

    /// Combined output of an `analyze` run.
    #[derive(Debug, Serialize, Clone, Default)]
    pub struct AnalysisSummary {
        pub records: usize,
        pub domain_rows_processed: usize,
        pub domains: Vec<DomainCountRow>,
        pub devices: Vec<DeviceRow>,
        pub device_counts: Vec<DeviceTypeCountRow>,
        pub volumes: Vec<VolumeRow>,
        pub total_bytes: u64,
    }
}
