//! # Run Store
//!
//! Durable mapping of run → tests → steps plus append-only logs, indexed
//! for list/filter queries and streamed tails.
//!
//! [`RunStore`] is the storage seam: [`PostgresRunStore`] is the
//! production implementation (sqlx, forward-only migrations),
//! [`MemoryRunStore`] backs tests and embedded single-process use with
//! the same semantics — including unique-prefix lookup and the
//! change-sequence cursors the streaming endpoints tail.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryRunStore;
pub use postgres::PostgresRunStore;
pub use store::{NewRun, RunStore, StoreError, StoredLog, StoredStep};
