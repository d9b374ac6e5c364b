//! Record bookkeeping and lifetime management.
//!
//! [`store::RecordStore`] is the typed CRUD layer over the key/value
//! contract; [`lifecycle::Lifecycle`] drives allocation, renewal, release
//! and the expiry sweep on top of it; [`sweeper::Sweeper`] is the
//! long-running task that keeps calling the sweep.

pub mod lifecycle;
pub mod store;
pub mod sweeper;

pub use lifecycle::{Allocation, Lifecycle};
#[allow(clippy::module_name_repetitions)]
pub use store::RecordStore;
pub use sweeper::Sweeper;
