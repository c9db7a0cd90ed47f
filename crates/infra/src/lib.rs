//! Infrastructure layer: ledger stores, user directory, and the services that
//! orchestrate domain operations against them.

pub mod directory;
pub mod engine;
pub mod provisioning;
pub mod store;


pub use directory::Directory;
pub use engine::BalanceEngine;
pub use provisioning::WalletProvisioner;
