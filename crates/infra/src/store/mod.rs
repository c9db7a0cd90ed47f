//! Ledger Store boundary.
//!
//! Durable storage for users, wallets and ledger entries, exposed as scoped
//! sessions: open with [`LedgerStore::begin`], lock the rows you intend to
//! change, stage writes, then commit. Dropping a session without committing
//! discards every write and releases its locks.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerSession, LedgerStore, Record, StoreError, WriteBatch};
