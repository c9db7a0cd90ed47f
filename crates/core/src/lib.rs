//! `walletd-core`: shared building blocks for the wallet ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{LedgerError, LedgerResult};
pub use id::{TransactionId, UserId, WalletId};
