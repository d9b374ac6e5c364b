//! Record and bookkeeping data model.
//!
//! Storage holds two families of documents. The bookkeeping family —
//! [`Token`] and [`FrozenPrefix`] — drives the lease state machine. The
//! record family — [`RecordA`], [`SubRecordA`], [`RecordCNAME`],
//! [`RecordTXT`] — is what clients publish, and each record projects into
//! one or more [`Service`] documents, the uniform shape the resolver hands
//! to the DNS frontend.

use crate::kv::ValueType;
use crate::path;
use serde::{Deserialize, Serialize};

/// A reservation preventing a label from being handed out while live.
/// Expiry is `created_on + lease_duration`, enforced by the sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrozenPrefix {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(rename = "createdOn")]
    pub created_on: i64,
}

/// The opaque secret binding a client to its FQDN. Uniquely keyed by FQDN
/// in storage; the token value itself is not indexed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub token: String,
    pub fqdn: String,
    #[serde(rename = "createdOn")]
    pub created_on: i64,
}

impl Token {
    /// Records reference their owning token through this identifier.
    pub fn id(&self) -> i64 {
        self.created_on
    }
}

/// An IPv4 answer set for one FQDN. `hosts` is unordered; `tid` links the
/// record to its owning token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordA {
    pub fqdn: String,
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub tid: i64,
}

/// Same shape as [`RecordA`], stored under a child label of its parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubRecordA {
    pub fqdn: String,
    pub hosts: Vec<String>,
    pub tid: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordCNAME {
    pub fqdn: String,
    pub target: String,
    pub tid: i64,
}

/// TXT content for one FQDN. Siblings under a common parent are permitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordTXT {
    pub fqdn: String,
    pub text: String,
    pub tid: i64,
}

/// The uniform resolver-internal value decoded from storage before
/// rendering to a wire record. A service with an empty `host` is answerable
/// only as TXT.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub priority: u16,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mail: bool,
    /// Raw storage key, assigned at lookup time and never persisted.
    #[serde(skip)]
    pub key: String,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Service {
    pub fn host(host: impl Into<String>) -> Self {
        Service {
            host: host.into(),
            ..Service::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Service {
            text: text.into(),
            ..Service::default()
        }
    }
}

/// Project a stored record into its resolver-visible service documents.
///
/// Concrete records put one document per value at the path of their FQDN; a
/// wildcard record spreads its hosts over underscore-encoded IPv4 leaf
/// labels below the `*` segment, which is what lets a collapsed query match
/// them by position.
pub fn service_documents(
    vtype: ValueType,
    raw: &str,
    prefix: &str,
) -> Result<Vec<(String, Service)>, serde_json::Error> {
    let mut docs = Vec::new();
    match vtype {
        ValueType::ARecord => {
            let rec: RecordA = serde_json::from_str(raw)?;
            push_host_docs(&mut docs, &rec.fqdn, &rec.hosts, prefix);
            if !rec.text.is_empty() {
                docs.push((path::path(&rec.fqdn, prefix), Service::text(&rec.text)));
            }
        }
        ValueType::SubARecord => {
            let rec: SubRecordA = serde_json::from_str(raw)?;
            push_host_docs(&mut docs, &rec.fqdn, &rec.hosts, prefix);
        }
        ValueType::CNAMERecord => {
            let rec: RecordCNAME = serde_json::from_str(raw)?;
            docs.push((
                path::path(&rec.fqdn, prefix),
                Service::host(path::canonicalize(&rec.target)),
            ));
        }
        ValueType::TXTRecord => {
            let rec: RecordTXT = serde_json::from_str(raw)?;
            docs.push((path::path(&rec.fqdn, prefix), Service::text(&rec.text)));
        }
        ValueType::Token | ValueType::FrozenPrefix => {}
    }
    Ok(docs)
}

fn push_host_docs(docs: &mut Vec<(String, Service)>, fqdn: &str, hosts: &[String], prefix: &str) {
    let base = path::path(fqdn, prefix);
    let wildcard = path::labels(fqdn)
        .first()
        .map(|l| path::is_wildcard_label(l))
        .unwrap_or(false);
    for host in hosts {
        let key = if wildcard {
            format!("{base}/{}", path::host_label(host))
        } else {
            base.clone()
        };
        docs.push((key, Service::host(host)));
    }
}
