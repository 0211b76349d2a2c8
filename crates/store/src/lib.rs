//! Transactional persistence for the order pipeline.
//!
//! Every business operation runs inside one [`Transaction`]: rows read with a
//! `lock_*` method stay exclusively locked until the transaction commits or is
//! dropped, and dropping an uncommitted transaction discards its writes.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{Store, Transaction};
