//! Authoritative query resolution.
//!
//! The hot path. [`Resolver::records`] turns a DNS question into the set of
//! [`Service`] values stored for it: zone-apex queries short-circuit to
//! empty, long names collapse onto a wildcard answer set, star queries are
//! matched label-by-label against a prefix scan, and each surviving
//! document has its TTL negotiated between the storage lease and the
//! document's own TTL. The resolver holds no state of its own; concurrent
//! calls share only the backend handle.

use crate::config::SharedConfig;
use crate::error::Error;
use crate::kv::{self, DynRecordLookup, Kv};
use crate::model::Service;
use crate::path;
use std::collections::HashSet;
use tracing::warn;
use trust_dns_server::client::rr::RecordType;

pub struct Resolver {
    lookup: DynRecordLookup,
    config: SharedConfig,
}

impl Resolver {
    pub fn new(config: SharedConfig, lookup: DynRecordLookup) -> Self {
        Resolver { config, lookup }
    }

    /// Answer set for a query name. With `exact` the name is fetched as
    /// stored, skipping wildcard collapse; this is the form used when a
    /// caller already holds a concrete owned name.
    ///
    /// Absent names return [`Error::KeyNotFound`] so the DNS frontend can
    /// distinguish NXDOMAIN from backend failure.
    pub async fn records(
        &self,
        name: &str,
        qtype: RecordType,
        exact: bool,
    ) -> Result<Vec<Service>, Error> {
        let mut name = path::canonicalize(name);
        if name.is_empty() {
            return Err(Error::KeyNotFound);
        }

        // Zone apexes are the outer framework's SOA/NS territory; the record
        // store is never consulted for them.
        if self.is_zone_apex(&name) {
            return Ok(Vec::new());
        }

        if exact {
            let kvs = self.fetch(&path::path(&name, self.prefix())).await?;
            if kvs.is_empty() {
                return Err(Error::KeyNotFound);
            }
            return Ok(self.materialize(kvs, qtype));
        }

        let bound = self.config.wildcard_bound;
        if bound > 0 && qtype != RecordType::TXT {
            let labels = path::labels(&name);
            if labels.len() > bound && !self.path_exists(&name).await? {
                name = format!("*.{}", labels[labels.len() - bound..].join("."));
            }
        }

        let (lookup_path, star) = path::path_with_wildcard(&name, self.prefix());
        let kvs = if star {
            self.star_lookup(&name, lookup_path, qtype, bound).await?
        } else {
            self.fetch(&lookup_path).await?
        };
        if kvs.is_empty() {
            return Err(Error::KeyNotFound);
        }

        Ok(self.materialize(kvs, qtype))
    }

    /// Prefix-scan matching for a star query.
    ///
    /// The scan starts at the star-free part of the encoded name and walks
    /// up one segment at a time until some wildcard key survives filtering,
    /// so a `*` in a stored key can sit where the query holds a concrete
    /// label (the closest enclosing wildcard answers). Runs out of segments
    /// means the name does not exist.
    async fn star_lookup(
        &self,
        name: &str,
        mut root: String,
        qtype: RecordType,
        bound: usize,
    ) -> Result<Vec<Kv>, Error> {
        let segments: Vec<String> = path::path(name, self.prefix())
            .split('/')
            .map(str::to_string)
            .collect();
        loop {
            let scanned = self.scan(&root).await?;
            let filtered = filter_kvs(scanned, &segments, qtype, bound);
            if !filtered.is_empty() {
                return Ok(filtered);
            }
            match root.rfind('/') {
                Some(idx) => root.truncate(idx),
                None => return Ok(Vec::new()),
            }
        }
    }

    /// The service-backend entry point used by the DNS frontend; identical
    /// to [`Resolver::records`].
    pub async fn services(
        &self,
        name: &str,
        qtype: RecordType,
        exact: bool,
    ) -> Result<Vec<Service>, Error> {
        self.records(name, qtype, exact).await
    }

    /// Reverse lookups carry no special handling.
    pub async fn reverse(
        &self,
        name: &str,
        qtype: RecordType,
        exact: bool,
    ) -> Result<Vec<Service>, Error> {
        self.services(name, qtype, exact).await
    }

    fn prefix(&self) -> &str {
        &self.config.path_prefix
    }

    fn is_zone_apex(&self, name: &str) -> bool {
        self.config
            .zones
            .iter()
            .any(|zone| path::canonicalize(zone) == name)
    }

    /// True when any key lives at or under the name's full path.
    async fn path_exists(&self, name: &str) -> Result<bool, Error> {
        let kvs = self.scan(&path::path(name, self.prefix())).await?;
        Ok(!kvs.is_empty())
    }

    async fn fetch(&self, p: &str) -> Result<Vec<Kv>, Error> {
        kv::with_deadline(self.config.backend_timeout, self.lookup.fetch(p)).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<Kv>, Error> {
        kv::with_deadline(self.config.backend_timeout, self.lookup.scan(prefix)).await
    }

    /// Decode, deduplicate and finish the answer set: malformed documents
    /// are logged and skipped, duplicates collapse, then each service gets
    /// its key, negotiated TTL and default priority before the final
    /// type-consistency check.
    fn materialize(&self, kvs: Vec<Kv>, qtype: RecordType) -> Vec<Service> {
        let mut seen: HashSet<Service> = HashSet::new();
        let mut out = Vec::new();
        for kv in kvs {
            let mut serv: Service = match serde_json::from_str(&kv.value) {
                Ok(serv) => serv,
                Err(err) => {
                    warn!(key = %kv.key, %err, "skipping malformed service document");
                    continue;
                }
            };
            if !seen.insert(serv.clone()) {
                continue;
            }
            serv.key = kv.key.clone();
            serv.ttl = self.negotiate_ttl(kv.lease_secs, serv.ttl);
            if serv.priority == 0 {
                serv.priority = self.config.default_priority;
            }
            if should_include(&serv, qtype) {
                out.push(serv);
            }
        }
        out
    }

    /// The smaller of the storage-lease TTL and the service's own TTL; a
    /// zero on either side defers to the other, two zeros fall back to the
    /// configured default.
    fn negotiate_ttl(&self, lease_secs: u32, service_ttl: u32) -> u32 {
        match (lease_secs, service_ttl) {
            (0, 0) => self.config.default_ttl,
            (0, ttl) => ttl,
            (lease, 0) => lease,
            (lease, ttl) => lease.min(ttl),
        }
    }
}

/// A service answers TXT queries through its text and everything else
/// through its host; the other field being empty excludes it.
fn should_include(serv: &Service, qtype: RecordType) -> bool {
    if qtype == RecordType::TXT {
        !serv.text.is_empty()
    } else {
        !serv.host.is_empty()
    }
}

/// Keep the scanned keys a star query may legitimately answer from.
///
/// Every key must match the query segments position-by-position (a `*` on
/// either side matches anything; keys shorter than the query never match)
/// and must itself contain a wildcard segment, so concrete sibling records
/// are not pulled into a wildcard answer. `TypeA` queries additionally pass
/// the sibling depth filter and the collapsed-wildcard suppression of
/// IPv4-literal query leaves.
fn filter_kvs(kvs: Vec<Kv>, segments: &[String], qtype: RecordType, bound: usize) -> Vec<Kv> {
    let leaf = segments.last().map(String::as_str).unwrap_or_default();
    kvs.into_iter()
        .filter(|kv| {
            let ss: Vec<&str> = kv.key.split('/').collect();
            if !matches_segments(&ss, segments) {
                return false;
            }
            if !ss.iter().any(|s| path::is_wildcard_label(s)) {
                return false;
            }
            if qtype != RecordType::A {
                return true;
            }
            if path::is_host_label(leaf) && bound == segments.len() - 2 {
                return false;
            }
            if path::is_wildcard_label(leaf) {
                ss.len() == segments.len()
            } else {
                ss.len() == segments.len() + 1
            }
        })
        .collect()
}

fn matches_segments(key_segments: &[&str], name_segments: &[String]) -> bool {
    for (i, name_segment) in name_segments.iter().enumerate() {
        let Some(key_segment) = key_segments.get(i) else {
            // Name is longer than the key.
            return false;
        };
        if path::is_wildcard_label(name_segment) || path::is_wildcard_label(key_segment) {
            continue;
        }
        if *key_segment != name_segment.as_str() {
            return false;
        }
    }
    true
}
