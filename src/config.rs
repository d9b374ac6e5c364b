use crate::error::Error;
use crate::path;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_server::client::rr::Name;

pub type SharedConfig = Arc<Config>;

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Authoritative zone suffixes, e.g. `["lb.example."]`.
    pub zones: Vec<String>,
    /// Root of the hierarchical storage keys.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Names with more than this many labels collapse to `*.<last N labels>`
    /// when no exact key exists. 0 disables collapsing.
    #[serde(default)]
    pub wildcard_bound: usize,
    /// Lifetime of frozen prefixes and tokens between renewals.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_lease_duration")]
    pub lease_duration: Duration,
    /// Tick of the background expiry sweeper.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
    #[serde(default = "default_priority")]
    pub default_priority: u16,
    /// Deadline applied to every storage backend call.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout: Duration,
    pub storage: StorageConfig,
    pub dns_udp_bind_addr: SocketAddr,
    pub dns_tcp_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_dns_tcp_timeout")]
    pub dns_tcp_timeout: Duration,
    pub api_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub api_timeout: Duration,
    /// Name server host used in SOA answers.
    pub ns_domain: String,
    /// Zone contact in mailbox form, e.g. `dns-admin@example.com`.
    pub ns_admin: String,
    /// Static NS answers per FQDN.
    #[serde(default)]
    pub ns_records: HashMap<String, Vec<String>>,
    /// Recursive upstreams for names outside the configured zones. Empty
    /// means such queries are refused.
    #[serde(default)]
    pub upstreams: Vec<SocketAddr>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub driver: StorageDriver,
    /// Root directory for the `keyvalue` driver.
    #[serde(default)]
    pub dsn: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    KeyValue,
    Memory,
}

fn default_path_prefix() -> String {
    "rdnsv3".to_string()
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(86_400)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_ttl() -> u32 {
    300
}

fn default_priority() -> u16 {
    10
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_dns_tcp_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.zones.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one authoritative zone is required".to_string(),
            ));
        }
        if self.storage.driver == StorageDriver::KeyValue && self.storage.dsn.is_none() {
            return Err(Error::InvalidArgument(
                "the keyvalue storage driver requires a dsn directory".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured zone owning `name`, if any.
    pub fn zone_for(&self, name: &str) -> Option<&str> {
        let name = path::canonicalize(name);
        self.zones.iter().map(String::as_str).find(|zone| {
            let zone = zone.trim_end_matches('.');
            name == zone.to_lowercase() || name.ends_with(&format!(".{}", zone.to_lowercase()))
        })
    }

    pub fn ns_admin(&self) -> Result<Name, Error> {
        Ok(Name::from_str(&self.sanitized_ns_admin())?)
    }

    fn sanitized_ns_admin(&self) -> Cow<str> {
        match self.ns_admin.split_once('@') {
            Some((user, domain)) => {
                let user = user.replace('.', "\\.");
                Cow::Owned(format!("{user}.{domain}"))
            }
            _ => Cow::Borrowed(&self.ns_admin),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_defaults() -> Config {
        Config {
            zones: vec!["lb.example.".to_string()],
            path_prefix: default_path_prefix(),
            wildcard_bound: 0,
            lease_duration: default_lease_duration(),
            sweep_interval: default_sweep_interval(),
            default_ttl: default_ttl(),
            default_priority: default_priority(),
            backend_timeout: default_backend_timeout(),
            storage: StorageConfig {
                driver: StorageDriver::Memory,
                dsn: None,
            },
            dns_udp_bind_addr: "127.0.0.1:5353".parse().unwrap(),
            dns_tcp_bind_addr: "127.0.0.1:5353".parse().unwrap(),
            dns_tcp_timeout: default_dns_tcp_timeout(),
            api_bind_addr: "127.0.0.1:3000".parse().unwrap(),
            api_timeout: default_api_timeout(),
            ns_domain: "ns1.example.".to_string(),
            ns_admin: "dns-admin@example.com".to_string(),
            ns_records: HashMap::new(),
            upstreams: Vec::new(),
        }
    }
}
