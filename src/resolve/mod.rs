//! Lookup services behind the resolver cache.
//!
//! A [`Resolver`] answers `Ok(Some(name))`, `Ok(None)` when the service has
//! no answer for the key, or an error when the service itself failed. The
//! cache treats the last two the same way.

pub mod dns;
pub mod oui;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

pub use dns::DnsResolver;
pub use oui::OuiDatabase;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("lookup timed out")]
    Timeout,

    #[error("key is not a valid address: {0}")]
    InvalidKey(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("server answered with rcode {0}")]
    Server(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key to name lookup that may be slow or fail.
pub trait Resolver: Send + Sync {
    fn lookup(&self, key: &str) -> Result<Option<String>, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Result<Option<String>, ResolveError> + Send + Sync,
{
    fn lookup(&self, key: &str) -> Result<Option<String>, ResolveError> {
        self(key)
    }
}

/// Fixed key to name table, e.g. loaded from a hosts file.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Parses `/etc/hosts` syntax. The first name listed for an address wins.
    pub fn from_hosts(contents: &str) -> Self {
        let mut names = HashMap::new();
        for line in contents.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace();
            if let (Some(addr), Some(name)) = (fields.next(), fields.next()) {
                let addr = addr
                    .parse::<std::net::IpAddr>()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|_| addr.to_string());
                names.entry(addr).or_insert_with(|| name.to_string());
            }
        }
        debug!(entries = names.len(), "hosts table loaded");
        Self { names }
    }

    pub fn from_hosts_file(path: &Path) -> Result<Self, ResolveError> {
        Ok(Self::from_hosts(&fs::read_to_string(path)?))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Resolver for StaticResolver {
    fn lookup(&self, key: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.names.get(key).cloned())
    }
}

/// Asks `primary` first and `secondary` only when `primary` has no answer.
#[derive(Debug)]
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> Fallback<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: Resolver, S: Resolver> Resolver for Fallback<P, S> {
    fn lookup(&self, key: &str) -> Result<Option<String>, ResolveError> {
        match self.primary.lookup(key) {
            Ok(Some(name)) => Ok(Some(name)),
            Ok(None) => self.secondary.lookup(key),
            Err(e) => {
                debug!(key, error = %e, "primary resolver failed");
                self.secondary.lookup(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_file_first_name_wins() {
        let hosts = StaticResolver::from_hosts(
            "# comment\n127.0.0.1 localhost loopback\n\n10.0.0.5\tnas.lan nas # storage\n10.0.0.5 other.lan\n::1 ip6-localhost\nbroken\n",
        );
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts.lookup("10.0.0.5").unwrap().as_deref(), Some("nas.lan"));
        assert_eq!(hosts.lookup("::1").unwrap().as_deref(), Some("ip6-localhost"));
        assert_eq!(hosts.lookup("10.0.0.6").unwrap(), None);
    }

    #[test]
    fn fallback_consults_secondary_on_miss_or_error() {
        let primary = StaticResolver::from_hosts("10.0.0.5 nas.lan\n");
        let secondary = |key: &str| -> Result<Option<String>, ResolveError> {
            match key {
                "10.0.0.9" => Ok(Some("printer.lan".into())),
                _ => Err(ResolveError::Timeout),
            }
        };
        let chain = Fallback::new(primary, secondary);
        assert_eq!(chain.lookup("10.0.0.5").unwrap().as_deref(), Some("nas.lan"));
        assert_eq!(chain.lookup("10.0.0.9").unwrap().as_deref(), Some("printer.lan"));
        assert!(matches!(chain.lookup("10.0.0.1"), Err(ResolveError::Timeout)));
    }
}
