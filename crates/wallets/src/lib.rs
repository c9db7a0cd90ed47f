//! Wallet ledger domain (wallets, users, ledger entries, transfers).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The balance
//! engine in `walletd-infra` loads state, calls into this crate, and commits
//! whatever it returns.

pub mod money;
pub mod transaction;
pub mod transfer;
pub mod user;
pub mod wallet;

pub use money::{Amount, CURRENCY_SCALE, max_money};
pub use transaction::{Transaction, TransactionType};
pub use transfer::{TransferLegs, TransferResult, ensure_distinct, transfer};
pub use user::{NewUser, User};
pub use wallet::Wallet;
