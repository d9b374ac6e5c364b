//! Typed CRUD over the key/value contract.
//!
//! Thin, deliberately mechanical translation between the model types and
//! their serialized storage form. Create-only inserts surface
//! [`Error::AlreadyExists`]; reads of absent records are `None` except for
//! tokens, whose absence is the [`Error::KeyNotFound`] that callers turn
//! into authorization failures. Every backend call runs under the
//! configured deadline.

use crate::clock::SharedClock;
use crate::error::Error;
use crate::kv::{self, DynKvStore, ValueType};
use crate::model::{FrozenPrefix, RecordA, RecordCNAME, RecordTXT, SubRecordA, Token};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub struct RecordStore {
    store: DynKvStore,
    clock: SharedClock,
    timeout: Duration,
}

impl RecordStore {
    pub fn new(store: DynKvStore, clock: SharedClock, timeout: Duration) -> Self {
        RecordStore {
            store,
            clock,
            timeout,
        }
    }

    async fn read<T: DeserializeOwned>(
        &self,
        name: &str,
        vtype: ValueType,
    ) -> Result<Option<T>, Error> {
        let raw = kv::with_deadline(self.timeout, self.store.get(name, vtype)).await?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|source| {
                Error::Decode {
                    key: name.to_string(),
                    source,
                }
            })?)),
        }
    }

    async fn write<T: Serialize>(
        &self,
        name: &str,
        vtype: ValueType,
        value: &T,
        overwrite: bool,
    ) -> Result<(), Error> {
        let raw = serde_json::to_string(value)?;
        if overwrite {
            kv::with_deadline(self.timeout, self.store.update(name, vtype, &raw)).await
        } else {
            kv::with_deadline(self.timeout, self.store.set(name, vtype, &raw)).await
        }
    }

    async fn remove(&self, name: &str, vtype: ValueType) -> Result<(), Error> {
        kv::with_deadline(self.timeout, self.store.delete(name, vtype)).await
    }

    // --- frozen prefixes ---

    /// Reserve a label. Fails if the label is already frozen.
    pub async fn insert_frozen(&self, prefix: &str) -> Result<(), Error> {
        let frozen = FrozenPrefix {
            token: String::new(),
            created_on: self.clock.now_nanos(),
        };
        self.write(prefix, ValueType::FrozenPrefix, &frozen, false)
            .await
    }

    pub async fn query_frozen(&self, prefix: &str) -> Result<Option<FrozenPrefix>, Error> {
        self.read(prefix, ValueType::FrozenPrefix).await
    }

    /// Refresh a reservation's `createdOn`. A missing reservation is not an
    /// error; there is simply nothing to refresh.
    pub async fn renew_frozen(&self, prefix: &str) -> Result<(), Error> {
        let Some(mut frozen) = self.query_frozen(prefix).await? else {
            return Ok(());
        };
        frozen.created_on = self.clock.now_nanos();
        self.write(prefix, ValueType::FrozenPrefix, &frozen, true)
            .await
    }

    pub async fn delete_frozen(&self, prefix: &str) -> Result<(), Error> {
        self.remove(prefix, ValueType::FrozenPrefix).await
    }

    pub async fn delete_expired_frozen(&self, cutoff_nanos: i64) -> Result<(), Error> {
        let expired = kv::with_deadline(
            self.timeout,
            self.store.get_expired(ValueType::FrozenPrefix, cutoff_nanos),
        )
        .await?;
        for name in expired {
            self.delete_frozen(&name).await?;
        }
        Ok(())
    }

    /// Import a reservation with an explicit `createdOn`, for moving state
    /// between storage drivers.
    pub async fn migrate_frozen(&self, prefix: &str, created_on: i64) -> Result<(), Error> {
        let frozen = FrozenPrefix {
            token: String::new(),
            created_on,
        };
        self.write(prefix, ValueType::FrozenPrefix, &frozen, false)
            .await
    }

    // --- tokens ---

    /// Bind a freshly minted token to an FQDN. Returns the `createdOn`
    /// stamp, which doubles as the token id records reference.
    pub async fn insert_token(&self, token: &str, fqdn: &str) -> Result<i64, Error> {
        let record = Token {
            token: token.to_string(),
            fqdn: fqdn.to_string(),
            created_on: self.clock.now_nanos(),
        };
        self.write(fqdn, ValueType::Token, &record, false).await?;
        Ok(record.created_on)
    }

    pub async fn query_token(&self, fqdn: &str) -> Result<Token, Error> {
        self.read(fqdn, ValueType::Token)
            .await?
            .ok_or(Error::KeyNotFound)
    }

    pub async fn query_token_count(&self) -> Result<usize, Error> {
        let names = kv::with_deadline(self.timeout, self.store.list(ValueType::Token)).await?;
        Ok(names.len())
    }

    pub async fn query_expired_tokens(&self, cutoff_nanos: i64) -> Result<Vec<Token>, Error> {
        let names = kv::with_deadline(
            self.timeout,
            self.store.get_expired(ValueType::Token, cutoff_nanos),
        )
        .await?;
        let mut tokens = Vec::with_capacity(names.len());
        for name in names {
            tokens.push(self.query_token(&name).await?);
        }
        Ok(tokens)
    }

    /// Rewrite the token with a fresh `createdOn`, extending its lease.
    /// Returns the new stamp.
    pub async fn renew_token(&self, fqdn: &str) -> Result<i64, Error> {
        let mut record = self.query_token(fqdn).await?;
        record.created_on = self.clock.now_nanos();
        self.write(fqdn, ValueType::Token, &record, true).await?;
        Ok(record.created_on)
    }

    /// Revoke by token value. Tokens are keyed by FQDN, so this walks the
    /// whole bucket; callers that know the FQDN should use
    /// [`RecordStore::remove_token`] instead.
    pub async fn delete_token(&self, value: &str) -> Result<(), Error> {
        let names = kv::with_deadline(self.timeout, self.store.list(ValueType::Token)).await?;
        for name in names {
            let record = self.query_token(&name).await?;
            if record.token == value {
                self.remove(&record.fqdn, ValueType::Token).await?;
            }
        }
        Ok(())
    }

    pub async fn remove_token(&self, fqdn: &str) -> Result<(), Error> {
        self.remove(fqdn, ValueType::Token).await
    }

    pub async fn migrate_token(
        &self,
        token: &str,
        fqdn: &str,
        created_on: i64,
    ) -> Result<(), Error> {
        let record = Token {
            token: token.to_string(),
            fqdn: fqdn.to_string(),
            created_on,
        };
        self.write(fqdn, ValueType::Token, &record, false).await
    }

    // --- A records ---

    pub async fn insert_a(&self, record: &RecordA) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::ARecord, record, false)
            .await
    }

    pub async fn update_a(&self, record: &RecordA) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::ARecord, record, true)
            .await
    }

    pub async fn query_a(&self, fqdn: &str) -> Result<Option<RecordA>, Error> {
        self.read(fqdn, ValueType::ARecord).await
    }

    pub async fn delete_a(&self, fqdn: &str) -> Result<(), Error> {
        self.remove(fqdn, ValueType::ARecord).await
    }

    // --- sub A records ---

    pub async fn insert_sub_a(&self, record: &SubRecordA) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::SubARecord, record, false)
            .await
    }

    pub async fn update_sub_a(&self, record: &SubRecordA) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::SubARecord, record, true)
            .await
    }

    pub async fn query_sub_a(&self, fqdn: &str) -> Result<Option<SubRecordA>, Error> {
        self.read(fqdn, ValueType::SubARecord).await
    }

    /// Sub-records owned by the given token id.
    pub async fn list_sub_a(&self, tid: i64) -> Result<Vec<SubRecordA>, Error> {
        let names = kv::with_deadline(self.timeout, self.store.list(ValueType::SubARecord)).await?;
        let mut records = Vec::new();
        for name in names {
            if let Some(record) = self.query_sub_a(&name).await? {
                if record.tid == tid {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    pub async fn delete_sub_a(&self, fqdn: &str) -> Result<(), Error> {
        self.remove(fqdn, ValueType::SubARecord).await
    }

    // --- CNAME records ---

    pub async fn insert_cname(&self, record: &RecordCNAME) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::CNAMERecord, record, false)
            .await
    }

    pub async fn update_cname(&self, record: &RecordCNAME) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::CNAMERecord, record, true)
            .await
    }

    pub async fn query_cname(&self, fqdn: &str) -> Result<Option<RecordCNAME>, Error> {
        self.read(fqdn, ValueType::CNAMERecord).await
    }

    pub async fn delete_cname(&self, fqdn: &str) -> Result<(), Error> {
        self.remove(fqdn, ValueType::CNAMERecord).await
    }

    // --- TXT records ---

    pub async fn insert_txt(&self, record: &RecordTXT) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::TXTRecord, record, false)
            .await
    }

    pub async fn update_txt(&self, record: &RecordTXT) -> Result<(), Error> {
        self.write(&record.fqdn, ValueType::TXTRecord, record, true)
            .await
    }

    pub async fn query_txt(&self, fqdn: &str) -> Result<Option<RecordTXT>, Error> {
        self.read(fqdn, ValueType::TXTRecord).await
    }

    /// TXT records owned by the given token id, the release cascade's view.
    pub async fn list_txt(&self, tid: i64) -> Result<Vec<RecordTXT>, Error> {
        let names = kv::with_deadline(self.timeout, self.store.list(ValueType::TXTRecord)).await?;
        let mut records = Vec::new();
        for name in names {
            if let Some(record) = self.query_txt(&name).await? {
                if record.tid == tid {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    pub async fn delete_txt(&self, fqdn: &str) -> Result<(), Error> {
        self.remove(fqdn, ValueType::TXTRecord).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::TreeStore;
    use std::sync::Arc;

    fn fixture() -> (RecordStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let tree = Arc::new(TreeStore::new(
            "rdnsv3",
            Duration::from_secs(3600),
            clock.clone(),
        ));
        let records = RecordStore::new(tree, clock.clone(), Duration::from_secs(5));
        (records, clock)
    }

    #[tokio::test]
    async fn frozen_prefix_roundtrip() {
        let (records, clock) = fixture();
        records.insert_frozen("abc123").await.unwrap();
        let frozen = records.query_frozen("abc123").await.unwrap().unwrap();
        assert_eq!(frozen.created_on, 1_000);

        // A second reservation of the same label collides.
        let err = records.insert_frozen("abc123").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        clock.advance(500);
        records.renew_frozen("abc123").await.unwrap();
        let frozen = records.query_frozen("abc123").await.unwrap().unwrap();
        assert_eq!(frozen.created_on, 1_500);

        records.delete_frozen("abc123").await.unwrap();
        assert!(records.query_frozen("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn renew_frozen_without_reservation_is_quiet() {
        let (records, _) = fixture();
        records.renew_frozen("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn expired_frozen_are_deleted_in_bulk() {
        let (records, clock) = fixture();
        records.insert_frozen("old").await.unwrap();
        clock.advance(10_000);
        records.insert_frozen("new").await.unwrap();

        records.delete_expired_frozen(5_000).await.unwrap();
        assert!(records.query_frozen("old").await.unwrap().is_none());
        assert!(records.query_frozen("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn token_lifecycle() {
        let (records, clock) = fixture();
        let created = records
            .insert_token("secret", "x.lb.example")
            .await
            .unwrap();
        assert_eq!(created, 1_000);
        assert_eq!(records.query_token_count().await.unwrap(), 1);

        let token = records.query_token("x.lb.example").await.unwrap();
        assert_eq!(token.token, "secret");
        assert_eq!(token.id(), 1_000);

        clock.advance(250);
        let renewed = records.renew_token("x.lb.example").await.unwrap();
        assert_eq!(renewed, 1_250);

        // Revocation by value scans the bucket.
        records.delete_token("secret").await.unwrap();
        let err = records.query_token("x.lb.example").await.unwrap_err();
        assert!(err.is_name_error());
    }

    #[tokio::test]
    async fn expired_tokens_are_queried_by_cutoff() {
        let (records, clock) = fixture();
        records.insert_token("a", "old.lb.example").await.unwrap();
        clock.advance(10_000);
        records.insert_token("b", "new.lb.example").await.unwrap();

        let expired = records.query_expired_tokens(5_000).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].fqdn, "old.lb.example");
    }

    #[tokio::test]
    async fn sub_records_filter_by_owner() {
        let (records, _) = fixture();
        for (fqdn, tid) in [("s1.x.lb.example", 7), ("s2.x.lb.example", 7), ("s3.y.lb.example", 8)]
        {
            records
                .insert_sub_a(&SubRecordA {
                    fqdn: fqdn.into(),
                    hosts: vec!["1.1.1.1".into()],
                    tid,
                })
                .await
                .unwrap();
        }
        let mine = records.list_sub_a(7).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.tid == 7));
    }

    #[tokio::test]
    async fn txt_records_filter_by_owner() {
        let (records, _) = fixture();
        records
            .insert_txt(&RecordTXT {
                fqdn: "t1.lb.example".into(),
                text: "one".into(),
                tid: 7,
            })
            .await
            .unwrap();
        records
            .insert_txt(&RecordTXT {
                fqdn: "t2.lb.example".into(),
                text: "two".into(),
                tid: 9,
            })
            .await
            .unwrap();
        let mine = records.list_txt(7).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].text, "one");
    }

    #[tokio::test]
    async fn migrate_preserves_the_imported_stamp() {
        let (records, _) = fixture();
        records.migrate_frozen("moved", 42).await.unwrap();
        assert_eq!(
            records.query_frozen("moved").await.unwrap().unwrap().created_on,
            42
        );
        records
            .migrate_token("tok", "moved.lb.example", 42)
            .await
            .unwrap();
        assert_eq!(
            records.query_token("moved.lb.example").await.unwrap().created_on,
            42
        );
    }
}
