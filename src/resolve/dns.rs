//! Reverse DNS: one PTR question per lookup, with a timeout.
//!
//! Queries go out over UDP. A truncated answer is asked again over TCP, and
//! servers are tried in resolv.conf order until one of them answers.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use dns_parser::{Builder, Packet, QueryClass, QueryType, RData, ResponseCode};
use tracing::{debug, trace};

use super::{ResolveError, Resolver};

const DNS_PORT: u16 = 53;
const FALLBACK_SERVER: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 53)), DNS_PORT);

/// What one reply says about the question that was asked.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Name(Option<String>),
    /// TC bit set and no usable answer in what arrived
    Truncated,
    /// Reply to some other query
    WrongId,
}

/// PTR lookups against a list of recursive servers.
#[derive(Debug)]
pub struct DnsResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    next_id: AtomicU16,
}

impl DnsResolver {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self::with_servers(vec![server], timeout)
    }

    /// Servers are asked in order; an empty list means the local stub
    /// resolver.
    pub fn with_servers(mut servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        if servers.is_empty() {
            servers.push(FALLBACK_SERVER);
        }
        Self {
            servers,
            timeout,
            next_id: AtomicU16::new(0x4e43),
        }
    }

    /// Uses every `nameserver` in a resolv.conf-style file, falling back to
    /// the local stub resolver.
    pub fn from_resolv_conf(path: &Path, timeout: Duration) -> Self {
        let servers = fs::read_to_string(path)
            .map(|contents| nameservers(&contents))
            .unwrap_or_default();
        debug!(?servers, "using DNS servers");
        Self::with_servers(servers, timeout)
    }

    /// The server asked first.
    pub fn server(&self) -> SocketAddr {
        self.servers[0]
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    fn query(&self, ip: IpAddr) -> Result<Option<String>, ResolveError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let packet = build_query(id, &ptr_name(ip))?;

        let mut last_error = ResolveError::Timeout;
        for server in &self.servers {
            match self.ask(*server, id, &packet) {
                Ok(name) => return Ok(name),
                Err(e) => {
                    debug!(%server, %ip, error = %e, "DNS server gave no answer");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn ask(&self, server: SocketAddr, id: u16, packet: &[u8]) -> Result<Option<String>, ResolveError> {
        let deadline = Instant::now() + self.timeout;
        match self.ask_udp(server, id, packet, deadline)? {
            Reply::Name(name) => Ok(name),
            _ => {
                trace!(%server, "answer truncated, retrying over TCP");
                self.ask_tcp(server, id, packet, deadline)
            }
        }
    }

    fn ask_udp(
        &self,
        server: SocketAddr,
        id: u16,
        packet: &[u8],
        deadline: Instant,
    ) -> Result<Reply, ResolveError> {
        let bind: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)?;
        socket.send_to(packet, server)?;

        let mut buf = [0u8; 1500];
        loop {
            socket.set_read_timeout(Some(remaining(deadline)?))?;
            let (len, from) = socket.recv_from(&mut buf).map_err(timeout_or_io)?;
            if from != server {
                trace!(%from, "ignoring datagram from unexpected peer");
                continue;
            }
            match parse_response(id, &buf[..len])? {
                Reply::WrongId => continue,
                reply => return Ok(reply),
            }
        }
    }

    fn ask_tcp(
        &self,
        server: SocketAddr,
        id: u16,
        packet: &[u8],
        deadline: Instant,
    ) -> Result<Option<String>, ResolveError> {
        let mut stream =
            TcpStream::connect_timeout(&server, remaining(deadline)?).map_err(timeout_or_io)?;
        stream.set_write_timeout(Some(remaining(deadline)?))?;
        let len = u16::try_from(packet.len())
            .map_err(|_| ResolveError::Malformed("query too long".into()))?;
        stream.write_all(&len.to_be_bytes()).map_err(timeout_or_io)?;
        stream.write_all(packet).map_err(timeout_or_io)?;

        stream.set_read_timeout(Some(remaining(deadline)?))?;
        let mut len = [0u8; 2];
        stream.read_exact(&mut len).map_err(timeout_or_io)?;
        let mut msg = vec![0u8; usize::from(u16::from_be_bytes(len))];
        stream.read_exact(&mut msg).map_err(timeout_or_io)?;

        match parse_response(id, &msg)? {
            Reply::Name(name) => Ok(name),
            Reply::Truncated => Err(ResolveError::Malformed("truncated TCP answer".into())),
            Reply::WrongId => Err(ResolveError::Malformed("transaction id mismatch".into())),
        }
    }
}

impl Resolver for DnsResolver {
    fn lookup(&self, key: &str) -> Result<Option<String>, ResolveError> {
        let ip: IpAddr = key
            .trim()
            .parse()
            .map_err(|_| ResolveError::InvalidKey(key.to_string()))?;
        self.query(ip)
    }
}

fn remaining(deadline: Instant) -> Result<Duration, ResolveError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(ResolveError::Timeout)
    } else {
        Ok(left)
    }
}

fn timeout_or_io(e: io::Error) -> ResolveError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ResolveError::Timeout,
        _ => e.into(),
    }
}

fn nameservers(resolv_conf: &str) -> Vec<SocketAddr> {
    resolv_conf
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => addr
                    .parse::<IpAddr>()
                    .ok()
                    .map(|ip| SocketAddr::new(ip, DNS_PORT)),
                _ => None,
            }
        })
        .collect()
}

/// `in-addr.arpa` / `ip6.arpa` name for an address.
pub fn ptr_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

fn build_query(id: u16, name: &str) -> Result<Vec<u8>, ResolveError> {
    let mut builder = Builder::new_query(id, true);
    builder.add_question(name, false, QueryType::PTR, QueryClass::IN);
    builder
        .build()
        .map_err(|_| ResolveError::Malformed("query does not fit a datagram".into()))
}

fn rcode(code: ResponseCode) -> u8 {
    match code {
        ResponseCode::NoError => 0,
        ResponseCode::FormatError => 1,
        ResponseCode::ServerFailure => 2,
        ResponseCode::NameError => 3,
        ResponseCode::NotImplemented => 4,
        ResponseCode::Refused => 5,
        ResponseCode::Reserved(code) => code,
    }
}

fn parse_response(id: u16, msg: &[u8]) -> Result<Reply, ResolveError> {
    let packet = Packet::parse(msg).map_err(|e| ResolveError::Malformed(e.to_string()))?;
    if packet.header.id != id {
        return Ok(Reply::WrongId);
    }
    if packet.header.query {
        return Err(ResolveError::Malformed("not a response".into()));
    }
    match packet.header.response_code {
        ResponseCode::NoError => {}
        ResponseCode::NameError => return Ok(Reply::Name(None)),
        code => return Err(ResolveError::Server(rcode(code))),
    }

    let name = packet.answers.iter().find_map(|answer| match &answer.data {
        RData::PTR(ptr) => Some(ptr.0.to_string()),
        _ => None,
    });
    match name {
        Some(name) => {
            let name = name.trim_end_matches('.');
            Ok(Reply::Name((!name.is_empty()).then(|| name.to_string())))
        }
        None if packet.header.truncated => Ok(Reply::Truncated),
        None => Ok(Reply::Name(None)),
    }
}
