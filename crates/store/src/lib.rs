//! Storage collaborators for the checkout system.
//!
//! The checkout core only talks to these traits. Two implementations are
//! provided: [`InMemoryStore`] for tests and single-process runs, and
//! [`PostgresStore`] backed by a pooled connection.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{CartStore, CatalogStore, DecrementOutcome, OrderLedger, PrincipalDirectory};
