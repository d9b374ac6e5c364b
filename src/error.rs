//! Error types.

use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible hermitdns error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a query name has no record in the storage backend. The
    /// DNS frontend maps this to NXDOMAIN via [`Error::is_name_error`].
    #[error("key not found")]
    KeyNotFound,

    /// Returned when a storage operation could not complete, typically a
    /// timed-out or failed I/O call. Surfaced as SERVFAIL and never retried
    /// inside the core.
    #[error("storage backend unreachable: {0}")]
    BackendUnreachable(String),

    /// Returned from create-only storage writes when the key already exists.
    /// The lifecycle engine treats this as an allocation collision and
    /// retries with a fresh label, bounded.
    #[error("key \"{0}\" already exists")]
    AlreadyExists(String),

    /// Returned when a stored document fails to decode. The offending record
    /// is skipped; queries continue with the remaining records.
    #[error("malformed record at \"{key}\"")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Returned at the lifecycle boundary for an empty FQDN, a name outside
    /// the configured zones, or a label allocation that exhausted its retry
    /// budget.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Returned when the presented renewal token does not match the token
    /// bound to the FQDN.
    #[error("token is not authorized for \"{0}\"")]
    TokenMismatch(String),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when JSON from disk or from an API client fails to parse.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when the DNS server encounters a generic protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),
}

impl Error {
    /// True iff the error is the absent-record sentinel, which the DNS
    /// frontend answers with NXDOMAIN rather than SERVFAIL.
    pub fn is_name_error(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }
}
