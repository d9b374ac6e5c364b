//! FQDN allocation, renewal, release and the expiry sweep.
//!
//! The token record is the anchor of a domain's state: records reference it
//! through their `tid`, and release deletes data records first so that an
//! interrupted cascade leaves a token the next sweep can finish from. The
//! reverse order would orphan records with no owner left to find them.

use crate::clock::SharedClock;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::model::{RecordA, RecordCNAME, RecordTXT, SubRecordA, Token};
use crate::path;
use crate::records::store::RecordStore;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LABEL_LEN: usize = 6;
const TOKEN_LEN: usize = 32;
const MAX_ALLOCATION_ATTEMPTS: usize = 5;

const LABEL_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LABEL_FIRST_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Outcome of a successful FQDN allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub fqdn: String,
    pub token: String,
    /// Epoch nanoseconds at which the lease runs out unless renewed.
    pub expiration: i64,
}

pub struct Lifecycle {
    records: Arc<RecordStore>,
    config: SharedConfig,
    clock: SharedClock,
}

impl Lifecycle {
    pub fn new(records: Arc<RecordStore>, config: SharedConfig, clock: SharedClock) -> Self {
        Lifecycle {
            records,
            config,
            clock,
        }
    }

    pub fn record_store(&self) -> &RecordStore {
        &self.records
    }

    /// Hand out a random label under the first configured zone, freezing the
    /// label and binding a fresh token to the resulting FQDN. Allocation
    /// collisions retry with a new label a bounded number of times.
    pub async fn allocate(&self) -> Result<Allocation, Error> {
        let zone = self
            .config
            .zones
            .first()
            .map(|z| path::canonicalize(z))
            .ok_or_else(|| Error::InvalidArgument("no zones configured".to_string()))?;

        let mut last_collision = None;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let label = random_label();
            match self.records.insert_frozen(&label).await {
                Ok(()) => {
                    let fqdn = format!("{label}.{zone}");
                    let token = mint_token();
                    let created_on = self.records.insert_token(&token, &fqdn).await?;
                    info!(%fqdn, "allocated domain");
                    return Ok(Allocation {
                        fqdn,
                        token,
                        expiration: created_on + self.lease_nanos(),
                    });
                }
                Err(Error::AlreadyExists(label)) => {
                    debug!(%label, "allocation collision, retrying");
                    last_collision = Some(Error::AlreadyExists(label));
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_collision
            .unwrap_or_else(|| Error::InvalidArgument("allocation retries exhausted".to_string())))
    }

    /// Extend the lease of an FQDN: the token is rewritten with a fresh
    /// `createdOn` and any frozen prefix follows. Returns the new expiry.
    pub async fn renew(&self, fqdn: &str) -> Result<i64, Error> {
        let fqdn = self.owned_name(fqdn)?;
        let created_on = self.records.renew_token(&fqdn).await?;
        self.records.renew_frozen(&self.prefix_label(&fqdn)).await?;
        Ok(created_on + self.lease_nanos())
    }

    /// Tear down an FQDN: data records first, then the token, then the
    /// frozen prefix.
    pub async fn release(&self, fqdn: &str) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = self.records.query_token(&fqdn).await?;
        let tid = token.id();

        self.records.delete_a(&fqdn).await?;
        self.records.delete_a(&format!("*.{fqdn}")).await?;
        for sub in self.records.list_sub_a(tid).await? {
            self.records.delete_sub_a(&sub.fqdn).await?;
        }
        self.records.delete_cname(&fqdn).await?;
        for txt in self.records.list_txt(tid).await? {
            self.records.delete_txt(&txt.fqdn).await?;
        }

        self.records.remove_token(&fqdn).await?;
        self.records.delete_frozen(&self.prefix_label(&fqdn)).await?;
        info!(%fqdn, "released domain");
        Ok(())
    }

    /// Reclaim everything whose lease ran out before `now`. Per-domain
    /// release failures are logged and skipped so one wedged domain cannot
    /// stall the rest of the sweep.
    pub async fn sweep(&self, now_nanos: i64) -> Result<(), Error> {
        let cutoff = now_nanos - self.lease_nanos();
        let expired = self.records.query_expired_tokens(cutoff).await?;
        for token in expired {
            if let Err(err) = self.release(&token.fqdn).await {
                warn!(fqdn = %token.fqdn, %err, "failed to release expired domain");
            }
        }
        self.records.delete_expired_frozen(cutoff).await
    }

    /// Check a presented token against the one bound to the FQDN. Wildcard
    /// and challenge children authorize through their base domain.
    pub async fn authorize(&self, fqdn: &str, presented: &str) -> Result<Token, Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = match self.records.query_token(&fqdn).await {
            Ok(token) => token,
            Err(Error::KeyNotFound) => {
                let base = self.parent_name(&fqdn)?;
                self.records.query_token(&base).await?
            }
            Err(err) => return Err(err),
        };
        if token.token != presented {
            return Err(Error::TokenMismatch(fqdn));
        }
        Ok(token)
    }

    /// Replace the answer set of a domain: the base A record plus one
    /// sub-record per named child.
    pub async fn put_domain(
        &self,
        fqdn: &str,
        presented: &str,
        hosts: Vec<String>,
        subdomains: HashMap<String, Vec<String>>,
    ) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = self.authorize(&fqdn, presented).await?;
        let tid = token.id();

        // Drop sub-records that are no longer mentioned.
        for sub in self.records.list_sub_a(tid).await? {
            let still_named = path::labels(&sub.fqdn)
                .first()
                .is_some_and(|label| subdomains.contains_key(label));
            if !still_named {
                self.records.delete_sub_a(&sub.fqdn).await?;
            }
        }

        self.records
            .update_a(&RecordA {
                fqdn: fqdn.clone(),
                hosts,
                text: String::new(),
                tid,
            })
            .await?;
        for (label, hosts) in subdomains {
            self.records
                .update_sub_a(&SubRecordA {
                    fqdn: format!("{label}.{}", token.fqdn),
                    hosts,
                    tid,
                })
                .await?;
        }
        Ok(())
    }

    /// Current state of a domain: its token, base A record and named
    /// children.
    pub async fn get_domain(
        &self,
        fqdn: &str,
        presented: &str,
    ) -> Result<(Token, Option<RecordA>, Vec<SubRecordA>), Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = self.authorize(&fqdn, presented).await?;
        let record = self.records.query_a(&fqdn).await?;
        let subs = self.records.list_sub_a(token.id()).await?;
        Ok((token, record, subs))
    }

    /// Nanosecond expiry of a token stamp under the configured lease.
    pub fn expiration_of(&self, created_on: i64) -> i64 {
        created_on + self.lease_nanos()
    }

    pub async fn put_txt(&self, fqdn: &str, presented: &str, text: &str) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = self.authorize(&fqdn, presented).await?;
        self.records
            .update_txt(&RecordTXT {
                fqdn,
                text: text.to_string(),
                tid: token.id(),
            })
            .await
    }

    pub async fn delete_txt(&self, fqdn: &str, presented: &str) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        self.authorize(&fqdn, presented).await?;
        self.records.delete_txt(&fqdn).await
    }

    pub async fn put_cname(&self, fqdn: &str, presented: &str, target: &str) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        let token = self.authorize(&fqdn, presented).await?;
        self.records
            .update_cname(&RecordCNAME {
                fqdn,
                target: path::canonicalize(target),
                tid: token.id(),
            })
            .await
    }

    pub async fn delete_cname(&self, fqdn: &str, presented: &str) -> Result<(), Error> {
        let fqdn = self.owned_name(fqdn)?;
        self.authorize(&fqdn, presented).await?;
        self.records.delete_cname(&fqdn).await
    }

    fn lease_nanos(&self) -> i64 {
        self.config.lease_duration.as_nanos() as i64
    }

    /// Canonicalize and reject names outside the configured zones.
    fn owned_name(&self, fqdn: &str) -> Result<String, Error> {
        let name = path::canonicalize(fqdn);
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty FQDN".to_string()));
        }
        if self.config.zone_for(&name).is_none() {
            return Err(Error::InvalidArgument(format!(
                "\"{name}\" is not under a managed zone"
            )));
        }
        Ok(name)
    }

    /// One label up, for children that authorize through their base domain.
    fn parent_name(&self, fqdn: &str) -> Result<String, Error> {
        match fqdn.split_once('.') {
            Some((_, parent)) if self.config.zone_for(parent).is_some() => {
                Ok(parent.to_string())
            }
            _ => Err(Error::KeyNotFound),
        }
    }

    /// The frozen-prefix label of an FQDN: everything left of its zone.
    fn prefix_label(&self, fqdn: &str) -> String {
        match self.config.zone_for(fqdn) {
            Some(zone) => {
                let zone = path::canonicalize(zone);
                fqdn.trim_end_matches(&zone)
                    .trim_end_matches('.')
                    .to_string()
            }
            None => fqdn.to_string(),
        }
    }
}

fn random_label() -> String {
    let mut rng = rand::thread_rng();
    let mut label = String::with_capacity(LABEL_LEN);
    label.push(LABEL_FIRST_CHARSET[rng.gen_range(0..LABEL_FIRST_CHARSET.len())] as char);
    for _ in 1..LABEL_LEN {
        label.push(LABEL_CHARSET[rng.gen_range(0..LABEL_CHARSET.len())] as char);
    }
    label
}

fn mint_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| LABEL_CHARSET[rng.gen_range(0..LABEL_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::kv::{KeyValueStore, TreeStore, ValueType};
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(3600);
    const LEASE_NANOS: i64 = 3600 * 1_000_000_000;

    struct Fixture {
        lifecycle: Lifecycle,
        tree: Arc<TreeStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(Config {
            lease_duration: LEASE,
            ..Config::test_defaults()
        });
        let clock = Arc::new(ManualClock::new(1_000));
        let tree = Arc::new(TreeStore::new("rdnsv3", LEASE, clock.clone()));
        let records = Arc::new(RecordStore::new(
            tree.clone(),
            clock.clone(),
            Duration::from_secs(5),
        ));
        Fixture {
            lifecycle: Lifecycle::new(records, config, clock.clone()),
            tree,
            clock,
        }
    }

    #[tokio::test]
    async fn allocation_freezes_label_and_binds_token() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        assert!(alloc.fqdn.ends_with(".lb.example"));
        assert_eq!(alloc.token.len(), TOKEN_LEN);
        assert_eq!(alloc.expiration, 1_000 + LEASE_NANOS);

        let records = fx.lifecycle.record_store();
        let token = records.query_token(&alloc.fqdn).await.unwrap();
        assert_eq!(token.token, alloc.token);
        let label = alloc.fqdn.split('.').next().unwrap();
        assert!(records.query_frozen(label).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn successive_allocations_differ() {
        let fx = fixture();
        let a = fx.lifecycle.allocate().await.unwrap();
        let b = fx.lifecycle.allocate().await.unwrap();
        assert_ne!(a.fqdn, b.fqdn);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn renew_refreshes_token_and_frozen_prefix() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.clock.advance(500);

        let expiration = fx.lifecycle.renew(&alloc.fqdn).await.unwrap();
        assert_eq!(expiration, 1_500 + LEASE_NANOS);

        let label = alloc.fqdn.split('.').next().unwrap();
        let frozen = fx
            .lifecycle
            .record_store()
            .query_frozen(label)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.created_on, 1_500);
    }

    #[tokio::test]
    async fn authorization_requires_the_bound_token() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.lifecycle.authorize(&alloc.fqdn, &alloc.token).await.unwrap();

        let err = fx
            .lifecycle
            .authorize(&alloc.fqdn, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenMismatch(_)));

        // Children authorize through the base domain's token.
        let child = format!("_acme-challenge.{}", alloc.fqdn);
        fx.lifecycle.authorize(&child, &alloc.token).await.unwrap();
    }

    #[tokio::test]
    async fn names_outside_managed_zones_are_rejected() {
        let fx = fixture();
        let err = fx
            .lifecycle
            .renew("foo.other.example.")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn release_cascades_to_all_owned_records() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.lifecycle
            .put_domain(
                &alloc.fqdn,
                &alloc.token,
                vec!["1.1.1.1".into()],
                HashMap::from([("sub1".to_string(), vec!["9.9.9.9".to_string()])]),
            )
            .await
            .unwrap();
        fx.lifecycle
            .put_txt(
                &format!("_acme-challenge.{}", alloc.fqdn),
                &alloc.token,
                "challenge",
            )
            .await
            .unwrap();

        fx.lifecycle.release(&alloc.fqdn).await.unwrap();

        let records = fx.lifecycle.record_store();
        assert!(records.query_a(&alloc.fqdn).await.unwrap().is_none());
        assert!(records
            .query_sub_a(&format!("sub1.{}", alloc.fqdn))
            .await
            .unwrap()
            .is_none());
        assert!(records
            .query_txt(&format!("_acme-challenge.{}", alloc.fqdn))
            .await
            .unwrap()
            .is_none());
        assert!(records.query_token(&alloc.fqdn).await.is_err());
        let label = alloc.fqdn.split('.').next().unwrap();
        assert!(records.query_frozen(label).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_domains() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.lifecycle
            .put_domain(&alloc.fqdn, &alloc.token, vec!["1.1.1.1".into()], HashMap::new())
            .await
            .unwrap();

        // One nanosecond past the lease.
        fx.clock.advance(LEASE_NANOS + 1);
        fx.lifecycle.sweep(fx.clock.now_nanos()).await.unwrap();

        let records = fx.lifecycle.record_store();
        assert!(records.query_token(&alloc.fqdn).await.is_err());
        assert!(records.query_a(&alloc.fqdn).await.unwrap().is_none());
        let label = alloc.fqdn.split('.').next().unwrap();
        assert!(records.query_frozen(label).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_spares_live_domains() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.clock.advance(LEASE_NANOS / 2);
        fx.lifecycle.sweep(fx.clock.now_nanos()).await.unwrap();
        assert!(fx
            .lifecycle
            .record_store()
            .query_token(&alloc.fqdn)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.clock.advance(LEASE_NANOS + 1);
        let now = fx.clock.now_nanos();
        fx.lifecycle.sweep(now).await.unwrap();
        fx.lifecycle.sweep(now).await.unwrap();

        let records = fx.lifecycle.record_store();
        assert_eq!(records.query_token_count().await.unwrap(), 0);
        assert!(records.query_a(&alloc.fqdn).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_domain_prunes_unmentioned_subdomains() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        fx.lifecycle
            .put_domain(
                &alloc.fqdn,
                &alloc.token,
                vec!["1.1.1.1".into()],
                HashMap::from([
                    ("sub1".to_string(), vec!["9.9.9.9".to_string()]),
                    ("sub2".to_string(), vec!["5.5.5.5".to_string()]),
                ]),
            )
            .await
            .unwrap();
        fx.lifecycle
            .put_domain(
                &alloc.fqdn,
                &alloc.token,
                vec!["2.2.2.2".into()],
                HashMap::from([("sub1".to_string(), vec!["9.9.9.9".to_string()])]),
            )
            .await
            .unwrap();

        let records = fx.lifecycle.record_store();
        assert!(records
            .query_sub_a(&format!("sub1.{}", alloc.fqdn))
            .await
            .unwrap()
            .is_some());
        assert!(records
            .query_sub_a(&format!("sub2.{}", alloc.fqdn))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            records.query_a(&alloc.fqdn).await.unwrap().unwrap().hosts,
            vec!["2.2.2.2".to_string()]
        );
    }

    #[tokio::test]
    async fn wildcard_records_release_with_their_domain() {
        let fx = fixture();
        let alloc = fx.lifecycle.allocate().await.unwrap();
        let wildcard = format!("*.{}", alloc.fqdn);
        fx.lifecycle
            .put_domain(&wildcard, &alloc.token, vec!["1.2.3.4".into()], HashMap::new())
            .await
            .unwrap();

        // The wildcard entry is resolvable storage state under the domain.
        let raw = fx
            .tree
            .get(&wildcard, ValueType::ARecord)
            .await
            .unwrap();
        assert!(raw.is_some());

        fx.lifecycle.release(&alloc.fqdn).await.unwrap();
        assert!(fx
            .tree
            .get(&wildcard, ValueType::ARecord)
            .await
            .unwrap()
            .is_none());
    }
}
