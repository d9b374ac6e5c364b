//! Authoritative DNS frontend.
//!
//! A trust-dns `ServerFuture` over UDP and TCP. Dynamic A, CNAME and TXT
//! answers come from the [`Resolver`][crate::resolver::Resolver]; SOA and
//! NS answers for the zone apexes are synthesized from static config.
//! Queries for names outside the managed zones are forwarded to the
//! configured upstream resolver, or refused when none is configured.

mod handlers;
pub mod server;

pub use server::new;
