//! Hermit DNS
//!
//! A dynamic DNS server handing out ephemeral subdomains under fixed parent
//! zones, in the spirit of [rdns-server]. Clients `POST` the
//! [management API][crate::api] to receive a random FQDN and an opaque
//! renewal token, then publish A, sub-A, CNAME and TXT records under that
//! FQDN. Records live in a pluggable key/value backend and expire unless
//! renewed; an [authoritative resolver][crate::resolver] answers DNS
//! queries for them, including wildcard collapsing of deep names onto a
//! shared answer set.
//!
//! Like a hermit crab's shell, every name is borrowed: hold on to your
//! token and renew, or the [sweeper][crate::records::sweeper] reclaims it.
//!
//! [rdns-server]: https://github.com/rancher/rdns-server
//!
#![warn(clippy::pedantic)]

pub mod api;
pub mod clock;
pub mod config;
pub mod dns;
pub mod error;
pub mod kv;
pub mod model;
pub mod path;
pub mod records;
pub mod resolver;

pub use config::{Config, SharedConfig};
pub use error::Error;
pub use kv::{FileStore, TreeStore};
pub use records::{Lifecycle, RecordStore, Sweeper};
pub use resolver::Resolver;
