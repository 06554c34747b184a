//! Command line and environment configuration.
//!
//! Every option can also come from the environment (or a `.env` file, loaded
//! before parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::aggregate::{CancelFlag, PassOptions};
use crate::resolve::oui::IEEE_OUI_URL;

pub const DEFAULT_MAX_ROWS: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "netcensus")]
#[command(version)]
#[command(about = "Builds a traffic table from packet captures and summarises it", long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, env = "NETCENSUS_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert packet events into the traffic table
    Extract(ExtractArgs),
    /// Count requests per destination domain or IP
    Domains(DomainsArgs),
    /// Classify every MAC in the table by vendor
    Devices(DevicesArgs),
    /// Sum frame bytes per (source, destination) MAC pair
    Volumes(VolumesArgs),
    /// Run all three passes and write a JSON summary
    Analyze(AnalyzeArgs),
    /// Download the IEEE OUI registry used for vendor lookup
    UpdateOui(UpdateOuiArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Packet events, one JSON object per line
    #[arg(long, conflicts_with = "pcap", required_unless_present = "pcap")]
    pub events: Option<PathBuf>,

    /// Offline capture file (needs the `capture` feature)
    #[arg(long)]
    pub pcap: Option<PathBuf>,

    /// Traffic table to write
    #[arg(long, short, env = "NETCENSUS_TABLE")]
    pub output: PathBuf,

    #[arg(long, env = "NETCENSUS_WORKERS", default_value_t = 8)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DnsArgs {
    /// DNS server for reverse lookups; defaults to the resolv.conf nameservers
    #[arg(long, env = "NETCENSUS_DNS_SERVER")]
    pub dns_server: Option<SocketAddr>,

    #[arg(long, default_value = "/etc/resolv.conf")]
    pub resolv_conf: PathBuf,

    #[arg(long, env = "NETCENSUS_DNS_TIMEOUT_MS", default_value_t = 2000)]
    pub dns_timeout_ms: u64,

    /// Hosts file consulted before DNS; /etc/hosts when present
    #[arg(long, env = "NETCENSUS_HOSTS")]
    pub hosts: Option<PathBuf>,

    /// Skip the hosts file and ask DNS only
    #[arg(long, conflicts_with = "hosts")]
    pub no_hosts: bool,
}

impl DnsArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct OuiArgs {
    /// Local OUI registry (IEEE oui.txt or Wireshark manuf)
    #[arg(long, env = "NETCENSUS_OUI")]
    pub oui: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Resolver worker threads
    #[arg(long, env = "NETCENSUS_WORKERS", default_value_t = 8)]
    pub workers: usize,
}

impl PoolArgs {
    pub fn pass_options(&self, cancel: &CancelFlag) -> PassOptions {
        PassOptions {
            workers: self.workers.max(1),
            cancel: cancel.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DomainsArgs {
    /// Traffic table to read
    #[arg(long, short, env = "NETCENSUS_TABLE")]
    pub input: PathBuf,

    /// Only the first N rows in sequence order are counted
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    pub max_rows: usize,

    #[command(flatten)]
    pub dns: DnsArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Output CSV; stdout when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DevicesArgs {
    #[arg(long, short, env = "NETCENSUS_TABLE")]
    pub input: PathBuf,

    #[command(flatten)]
    pub oui: OuiArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Device table; stdout when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Count-per-type table
    #[arg(long)]
    pub counts_output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct VolumesArgs {
    #[arg(long, short, env = "NETCENSUS_TABLE")]
    pub input: PathBuf,

    /// Link table; stdout when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Bytes sent per MAC
    #[arg(long)]
    pub sources_output: Option<PathBuf>,

    /// Bytes received per MAC
    #[arg(long)]
    pub destinations_output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(long, short, env = "NETCENSUS_TABLE")]
    pub input: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    pub max_rows: usize,

    #[command(flatten)]
    pub dns: DnsArgs,

    #[command(flatten)]
    pub oui: OuiArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// JSON summary; stdout when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateOuiArgs {
    #[arg(long, short, env = "NETCENSUS_OUI")]
    pub output: PathBuf,

    #[arg(long, default_value = IEEE_OUI_URL)]
    pub url: String,

    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}
