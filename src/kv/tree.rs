//! Hierarchical in-memory implementation of the [`KeyValueStore`] contract.
//!
//! Keys follow the reverse-label layout of [`crate::path`], which makes
//! sibling listings a range scan over an ordered map. Record writes are
//! projected into service documents under the configured path prefix, each
//! carrying a TTL lease; the resolver reads the lease's remaining seconds
//! through [`RecordLookup`] and negotiates it against the document's own
//! TTL. Bookkeeping values (tokens, frozen prefixes) stay in flat per-type
//! buckets and never appear in the record tree.
//!
//! Leases are advisory: an expired lease reports zero remaining seconds but
//! the document stays answerable until the sweep deletes its record. Not
//! durable across restarts.

use crate::clock::SharedClock;
use crate::error::Error;
use crate::kv::{CreatedOn, KeyValueStore, Kv, RecordLookup, ValueType};
use crate::model::{self, Service};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[allow(clippy::module_name_repetitions)]
pub struct TreeStore {
    path_prefix: String,
    lease_duration: Duration,
    clock: SharedClock,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Raw serialized values per type tag, the six-operation view.
    buckets: HashMap<ValueType, BTreeMap<String, String>>,
    /// Derived service documents per storage key, the resolver's view.
    tree: BTreeMap<String, Vec<Doc>>,
}

#[derive(Debug, Clone)]
struct Doc {
    vtype: ValueType,
    name: String,
    value: String,
    /// Lease expiry in epoch nanoseconds; 0 means no lease.
    expires_at: i64,
}

impl TreeStore {
    pub fn new(path_prefix: &str, lease_duration: Duration, clock: SharedClock) -> Self {
        TreeStore {
            path_prefix: path_prefix.to_string(),
            lease_duration,
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Place a single service document at a raw storage key with an explicit
    /// lease. Bypasses the record buckets; meant for migrations and tests.
    pub async fn put_document(&self, key: &str, serv: &Service, lease_secs: u32) -> Result<(), Error> {
        let expires_at = if lease_secs == 0 {
            0
        } else {
            self.clock.now_nanos() + i64::from(lease_secs) * NANOS_PER_SEC
        };
        let doc = Doc {
            vtype: ValueType::ARecord,
            name: key.to_string(),
            value: serde_json::to_string(serv)?,
            expires_at,
        };
        let mut inner = self.inner.write().await;
        inner.tree.entry(key.to_string()).or_default().push(doc);
        Ok(())
    }

    /// Place an arbitrary payload at a raw storage key, bypassing document
    /// validation. Resolver tests use this to model corrupted state.
    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, raw: &str, lease_secs: u32) {
        let expires_at = if lease_secs == 0 {
            0
        } else {
            self.clock.now_nanos() + i64::from(lease_secs) * NANOS_PER_SEC
        };
        let mut inner = self.inner.write().await;
        inner.tree.entry(key.to_string()).or_default().push(Doc {
            vtype: ValueType::ARecord,
            name: key.to_string(),
            value: raw.to_string(),
            expires_at,
        });
    }

    async fn write_value(
        &self,
        name: &str,
        vtype: ValueType,
        value: &str,
        overwrite: bool,
    ) -> Result<(), Error> {
        let docs = if vtype.is_record() {
            model::service_documents(vtype, value, &self.path_prefix).map_err(|source| {
                Error::Decode {
                    key: name.to_string(),
                    source,
                }
            })?
        } else {
            Vec::new()
        };

        let expires_at = if self.lease_duration.is_zero() {
            0
        } else {
            self.clock.now_nanos() + self.lease_duration.as_nanos() as i64
        };

        let mut inner = self.inner.write().await;
        let bucket = inner.buckets.entry(vtype).or_default();
        if !overwrite && bucket.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        bucket.insert(name.to_string(), value.to_string());
        remove_docs(&mut inner.tree, name, vtype);
        for (key, serv) in docs {
            inner.tree.entry(key).or_default().push(Doc {
                vtype,
                name: name.to_string(),
                value: serde_json::to_string(&serv)?,
                expires_at,
            });
        }
        Ok(())
    }

    fn lease_secs(&self, doc: &Doc) -> u32 {
        if doc.expires_at == 0 {
            return 0;
        }
        let remaining = doc.expires_at - self.clock.now_nanos();
        if remaining <= 0 {
            0
        } else {
            (remaining / NANOS_PER_SEC) as u32
        }
    }

    fn collect(&self, docs: &[Doc], key: &str) -> Vec<Kv> {
        docs.iter()
            .map(|doc| Kv {
                key: key.to_string(),
                value: doc.value.clone(),
                lease_secs: self.lease_secs(doc),
            })
            .collect()
    }
}

/// Drop every derived document belonging to (`name`, `vtype`), pruning
/// emptied nodes.
fn remove_docs(tree: &mut BTreeMap<String, Vec<Doc>>, name: &str, vtype: ValueType) {
    let mut emptied = Vec::new();
    for (key, docs) in tree.iter_mut() {
        docs.retain(|doc| !(doc.vtype == vtype && doc.name == name));
        if docs.is_empty() {
            emptied.push(key.clone());
        }
    }
    for key in emptied {
        tree.remove(&key);
    }
}

#[async_trait::async_trait]
impl KeyValueStore for TreeStore {
    async fn get(&self, name: &str, vtype: ValueType) -> Result<Option<String>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .buckets
            .get(&vtype)
            .and_then(|bucket| bucket.get(name))
            .cloned())
    }

    async fn set(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error> {
        self.write_value(name, vtype, value, false).await
    }

    async fn update(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error> {
        self.write_value(name, vtype, value, true).await
    }

    async fn delete(&self, name: &str, vtype: ValueType) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if let Some(bucket) = inner.buckets.get_mut(&vtype) {
            bucket.remove(name);
        }
        remove_docs(&mut inner.tree, name, vtype);
        Ok(())
    }

    async fn list(&self, vtype: ValueType) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .buckets
            .get(&vtype)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_expired(&self, vtype: ValueType, cutoff_nanos: i64) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().await;
        let Some(bucket) = inner.buckets.get(&vtype) else {
            return Ok(Vec::new());
        };
        let mut expired = Vec::new();
        for (name, raw) in bucket {
            let record: CreatedOn = match serde_json::from_str(raw) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%name, %vtype, %err, "skipping undecodable value in expiry scan");
                    continue;
                }
            };
            if record.created_on < cutoff_nanos {
                expired.push(name.clone());
            }
        }
        Ok(expired)
    }
}

#[async_trait::async_trait]
impl RecordLookup for TreeStore {
    async fn fetch(&self, path: &str) -> Result<Vec<Kv>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .tree
            .get(path)
            .map(|docs| self.collect(docs, path))
            .unwrap_or_default())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<Kv>, Error> {
        let child_prefix = format!("{prefix}/");
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for (key, docs) in inner.tree.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if key != prefix && !key.starts_with(&child_prefix) {
                continue;
            }
            out.extend(self.collect(docs, key));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{RecordA, RecordTXT};
    use std::sync::Arc;

    fn tree(lease: Duration) -> (TreeStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = TreeStore::new("rdnsv3", lease, clock.clone());
        (store, clock)
    }

    async fn put_a(store: &TreeStore, fqdn: &str, hosts: &[&str]) {
        let rec = RecordA {
            fqdn: fqdn.into(),
            hosts: hosts.iter().map(ToString::to_string).collect(),
            text: String::new(),
            tid: 1,
        };
        store
            .update(fqdn, ValueType::ARecord, &serde_json::to_string(&rec).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn record_write_materializes_documents() {
        let (store, _) = tree(Duration::from_secs(300));
        put_a(&store, "host1.lb.example", &["1.1.1.1", "2.2.2.2"]).await;

        let kvs = store.fetch("rdnsv3/example/lb/host1").await.unwrap();
        assert_eq!(kvs.len(), 2);
        for kv in &kvs {
            assert_eq!(kv.lease_secs, 300);
        }
        // The six-operation view still returns the raw record.
        let raw = store
            .get("host1.lb.example", ValueType::ARecord)
            .await
            .unwrap()
            .unwrap();
        let rec: RecordA = serde_json::from_str(&raw).unwrap();
        assert_eq!(rec.hosts.len(), 2);
    }

    #[tokio::test]
    async fn set_is_create_only_per_partition() {
        let (store, _) = tree(Duration::ZERO);
        store
            .set("x.lb.example", ValueType::Token, r#"{"token":"a"}"#)
            .await
            .unwrap();
        let err = store
            .set("x.lb.example", ValueType::Token, r#"{"token":"b"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        // Same name under a different tag is a fresh key.
        store
            .set(
                "x.lb.example",
                ValueType::TXTRecord,
                &serde_json::to_string(&RecordTXT {
                    fqdn: "x.lb.example".into(),
                    text: "hi".into(),
                    tid: 1,
                })
                .unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_replaces_previous_documents() {
        let (store, _) = tree(Duration::ZERO);
        put_a(&store, "host1.lb.example", &["1.1.1.1"]).await;
        put_a(&store, "host1.lb.example", &["9.9.9.9"]).await;
        let kvs = store.fetch("rdnsv3/example/lb/host1").await.unwrap();
        assert_eq!(kvs.len(), 1);
        let serv: Service = serde_json::from_str(&kvs[0].value).unwrap();
        assert_eq!(serv.host, "9.9.9.9");
    }

    #[tokio::test]
    async fn delete_prunes_the_tree() {
        let (store, _) = tree(Duration::ZERO);
        put_a(&store, "host1.lb.example", &["1.1.1.1"]).await;
        store.delete("host1.lb.example", ValueType::ARecord).await.unwrap();
        store.delete("host1.lb.example", ValueType::ARecord).await.unwrap();
        assert!(store.fetch("rdnsv3/example/lb/host1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_respects_label_boundaries() {
        let (store, _) = tree(Duration::ZERO);
        put_a(&store, "host1.lb.example", &["1.1.1.1"]).await;
        put_a(&store, "sub.host1.lb.example", &["2.2.2.2"]).await;
        put_a(&store, "host1x.lb.example", &["3.3.3.3"]).await;

        let kvs = store.scan("rdnsv3/example/lb/host1").await.unwrap();
        let keys: Vec<&str> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert!(keys.contains(&"rdnsv3/example/lb/host1"));
        assert!(keys.contains(&"rdnsv3/example/lb/host1/sub"));
        assert!(!keys.contains(&"rdnsv3/example/lb/host1x"));
    }

    #[tokio::test]
    async fn lease_counts_down_and_floors_at_zero() {
        let (store, clock) = tree(Duration::from_secs(100));
        put_a(&store, "host1.lb.example", &["1.1.1.1"]).await;

        clock.advance(40 * NANOS_PER_SEC);
        let kvs = store.fetch("rdnsv3/example/lb/host1").await.unwrap();
        assert_eq!(kvs[0].lease_secs, 60);

        clock.advance(100 * NANOS_PER_SEC);
        let kvs = store.fetch("rdnsv3/example/lb/host1").await.unwrap();
        assert_eq!(kvs[0].lease_secs, 0);
        // Expired leases do not hide the document; the sweep owns deletion.
        assert_eq!(kvs.len(), 1);
    }

    #[tokio::test]
    async fn expiry_scan_reads_created_on() {
        let (store, _) = tree(Duration::ZERO);
        store
            .set("old", ValueType::FrozenPrefix, r#"{"createdOn":100}"#)
            .await
            .unwrap();
        store
            .set("new", ValueType::FrozenPrefix, r#"{"createdOn":900}"#)
            .await
            .unwrap();
        let expired = store.get_expired(ValueType::FrozenPrefix, 500).await.unwrap();
        assert_eq!(expired, vec!["old"]);
    }
}
