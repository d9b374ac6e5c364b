//! Key/value storage contract.
//!
//! The record layer talks to storage through the deliberately narrow
//! [`KeyValueStore`] trait: six operations, no transactions, no conditional
//! writes, no secondary indexes. Cross-object consistency is the lifecycle
//! engine's problem; the token record is the anchor and is deleted last on
//! release so that an interrupted cascade leaves data the next sweep can
//! still find.
//!
//! Two implementations are provided. [`tree::TreeStore`] keeps records in a
//! hierarchical key space with per-key leases and additionally serves the
//! resolver through [`RecordLookup`]. [`file::FileStore`] persists one JSON
//! object per value in per-type directories and serves the resolver by
//! re-encoding its buckets on demand.

use crate::error::Error;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod file;
pub mod tree;

#[allow(clippy::module_name_repetitions)]
pub use file::FileStore;
pub use tree::TreeStore;

/// A [`KeyValueStore`] shared by the record store and the lifecycle engine.
pub type DynKvStore = Arc<dyn KeyValueStore>;

/// A [`RecordLookup`] shared by concurrent resolver calls.
pub type DynRecordLookup = Arc<dyn RecordLookup>;

/// Semantic type tags partitioning the storage namespace. Backends must keep
/// the partitions disjoint: the flat store uses one directory per tag, the
/// tree store one bucket per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Token,
    FrozenPrefix,
    SubARecord,
    ARecord,
    CNAMERecord,
    TXTRecord,
}

impl ValueType {
    pub const ALL: [ValueType; 6] = [
        ValueType::Token,
        ValueType::FrozenPrefix,
        ValueType::SubARecord,
        ValueType::ARecord,
        ValueType::CNAMERecord,
        ValueType::TXTRecord,
    ];

    /// Stable storage name of the tag, also the flat store's directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Token => "token",
            ValueType::FrozenPrefix => "frozen-prefix",
            ValueType::SubARecord => "sub-a-record",
            ValueType::ARecord => "a-record",
            ValueType::CNAMERecord => "cname-record",
            ValueType::TXTRecord => "txt-record",
        }
    }

    /// True for the tags whose values materialize as resolver-visible
    /// service documents.
    pub fn is_record(self) -> bool {
        !matches!(self, ValueType::Token | ValueType::FrozenPrefix)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six-operation storage contract. Values are serialized JSON documents;
/// decoding is the caller's concern.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. Absent keys are `Ok(None)`, not an error.
    async fn get(&self, name: &str, vtype: ValueType) -> Result<Option<String>, Error>;

    /// Create a value. Fails with [`Error::AlreadyExists`] if the key is
    /// taken.
    async fn set(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error>;

    /// Create or overwrite a value.
    async fn update(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error>;

    /// Remove a value. Deleting an absent key is a success.
    async fn delete(&self, name: &str, vtype: ValueType) -> Result<(), Error>;

    /// All logical names stored under a tag, in no particular order.
    async fn list(&self, vtype: ValueType) -> Result<Vec<String>, Error>;

    /// Names whose stored `createdOn` field lies before `cutoff_nanos`.
    async fn get_expired(&self, vtype: ValueType, cutoff_nanos: i64) -> Result<Vec<String>, Error>;
}

/// A service document as seen by the resolver: the raw storage key, the
/// serialized document, and the remaining seconds of the key's storage
/// lease (0 when the backend has none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kv {
    pub key: String,
    pub value: String,
    pub lease_secs: u32,
}

/// Read access for the resolver's hot path.
#[async_trait::async_trait]
pub trait RecordLookup: Send + Sync {
    /// All service documents stored exactly at `path`.
    async fn fetch(&self, path: &str) -> Result<Vec<Kv>, Error>;

    /// All service documents at `prefix` or below it.
    async fn scan(&self, prefix: &str) -> Result<Vec<Kv>, Error>;
}

/// The minimal shape shared by every stored document that expires.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreatedOn {
    #[serde(default, rename = "createdOn")]
    pub created_on: i64,
}

/// Wrap a backend call in the configured deadline. Elapsed deadlines become
/// [`Error::BackendUnreachable`]; there are no retries at this layer.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::BackendUnreachable(format!(
            "operation exceeded {}s deadline",
            deadline.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_names_are_stable() {
        let names: Vec<&str> = ValueType::ALL.iter().map(|v| v.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "token",
                "frozen-prefix",
                "sub-a-record",
                "a-record",
                "cname-record",
                "txt-record"
            ]
        );
    }

    #[test]
    fn record_tags_exclude_bookkeeping() {
        assert!(ValueType::ARecord.is_record());
        assert!(ValueType::TXTRecord.is_record());
        assert!(!ValueType::Token.is_record());
        assert!(!ValueType::FrozenPrefix.is_record());
    }

    #[tokio::test]
    async fn deadline_maps_to_backend_unreachable() {
        let res: Result<(), Error> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(Error::BackendUnreachable(_))));
    }
}
