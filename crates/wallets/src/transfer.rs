//! Paired debit/credit across two wallets.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use walletd_core::{LedgerError, LedgerResult, WalletId};

use crate::money::Amount;
use crate::transaction::Transaction;
use crate::wallet::Wallet;

pub(crate) const SAME_WALLET: &str = "Cannot transfer to same wallet";

/// Outcome of a committed transfer, carrying both post-transfer balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount: Decimal,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

/// The two ledger entries a transfer produces. They share one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLegs {
    pub debit: Transaction,
    pub credit: Transaction,
}

/// Reject a transfer whose endpoints are the same wallet.
pub fn ensure_distinct(from: WalletId, to: WalletId) -> LedgerResult<()> {
    if from == to {
        return Err(LedgerError::invalid(SAME_WALLET));
    }
    Ok(())
}

/// Move `amount` from `from` to `to`.
///
/// Both balances are computed before either is written, so on error neither
/// wallet changes.
pub fn transfer(
    from: &mut Wallet,
    to: &mut Wallet,
    amount: Amount,
    at: DateTime<Utc>,
) -> LedgerResult<TransferLegs> {
    ensure_distinct(from.id(), to.id())?;

    let from_after = from.debited(amount)?;
    let to_after = to.credited(amount)?;

    from.set_balance(from_after);
    to.set_balance(to_after);

    Ok(TransferLegs {
        debit: Transaction::transfer_out(from.id(), to.id(), amount, at),
        credit: Transaction::transfer_in(to.id(), from.id(), amount, at),
    })
}

impl TransferResult {
    pub fn new(from: &Wallet, to: &Wallet, amount: Amount) -> Self {
        Self {
            from_wallet_id: from.id(),
            to_wallet_id: to.id(),
            amount: amount.value(),
            from_balance: from.balance(),
            to_balance: to.balance(),
        }
    }
}
