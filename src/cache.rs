//! Memoizing, single-flight lookup cache shared by the DNS and vendor passes.

use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::unbounded;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::aggregate::{CancelFlag, Cancelled};
use crate::resolve::Resolver;

/// Outcome of the one lookup made for a key. `resolved == None` with
/// `attempted == true` is a remembered negative answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub resolved: Option<String>,
    pub attempted: bool,
}

/// Remembers every lookup for the lifetime of a run.
///
/// Each key owns a [`OnceLock`], so callers asking for the same unresolved
/// key wait on the first caller's lookup instead of issuing their own, while
/// callers for different keys never wait on each other. Entries are never
/// evicted.
#[derive(Debug, Default)]
pub struct ResolverCache {
    entries: DashMap<String, Arc<OnceLock<CacheEntry>>>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached answer for `key`, asking `resolver` only if no
    /// caller has asked before. Lookup errors are stored as negative answers.
    pub fn resolve<R>(&self, key: &str, resolver: &R) -> Option<String>
    where
        R: Resolver + ?Sized,
    {
        let cell = match self.entries.get(key) {
            Some(cell) => Arc::clone(&cell),
            // The shard lock is released before the lookup runs
            None => Arc::clone(&self.entries.entry(key.to_string()).or_default()),
        };

        if let Some(entry) = cell.get() {
            trace!(key, "resolver cache hit");
            return entry.resolved.clone();
        }

        cell.get_or_init(|| {
            let resolved = match resolver.lookup(key) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!(key, error = %e, "lookup failed, caching negative result");
                    None
                }
            };
            CacheEntry {
                resolved,
                attempted: true,
            }
        })
        .resolved
        .clone()
    }

    /// Resolves every key on a pool of `workers` threads so later
    /// [`resolve`](Self::resolve) calls are cache hits. Pool size only
    /// affects speed.
    pub fn resolve_all<'k, R, I>(
        &self,
        keys: I,
        resolver: &R,
        workers: usize,
        cancel: &CancelFlag,
    ) -> Result<(), Cancelled>
    where
        R: Resolver + ?Sized,
        I: IntoIterator<Item = &'k str>,
    {
        let (tx, rx) = unbounded::<&str>();
        for key in keys {
            if tx.send(key).is_err() {
                break;
            }
        }
        drop(tx);

        thread::scope(|s| {
            for _ in 0..workers.max(1) {
                let rx = rx.clone();
                s.spawn(move || {
                    for key in rx {
                        if cancel.is_cancelled() {
                            break;
                        }
                        self.resolve(key, resolver);
                    }
                });
            }
        });

        cancel.check()
    }

    /// The stored entry for `key`, if a lookup has completed.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
