//! Process-wide clock handle.
//!
//! Lease expiry and the sweeper compare nanosecond timestamps, so both are
//! written against this narrow trait instead of [`std::time::SystemTime`]
//! directly. Tests drive a [`ManualClock`] to make expiry deterministic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub type SharedClock = Arc<dyn Clock>;

pub trait Clock: Send + Sync {
    /// Nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// Wall clock used by the running server.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        // i64 nanoseconds cover dates through the year 2262.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// Hand-cranked clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(nanos: i64) -> Self {
        ManualClock {
            nanos: AtomicI64::new(nanos),
        }
    }

    pub fn advance(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
