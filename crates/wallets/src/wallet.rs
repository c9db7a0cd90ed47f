//! Wallet: a user's single balance-holding account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use walletd_core::{LedgerError, LedgerResult, UserId, WalletId};

use crate::money::{self, Amount};
use crate::transaction::Transaction;

pub(crate) const INSUFFICIENT_FUNDS: &str = "Insufficient funds";
pub(crate) const BALANCE_TOO_LARGE: &str = "Balance would exceed the maximum supported value";

/// Balance-holding account bound 1:1 to a user.
///
/// Invariant: `balance >= 0`. Every mutating method either succeeds completely
/// or leaves the wallet untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    id: WalletId,
    user_id: UserId,
    balance: Decimal,
}

impl Wallet {
    /// A fresh wallet for `user_id` with a zero balance.
    pub fn open(user_id: UserId) -> Self {
        Self {
            id: WalletId::new(),
            user_id,
            balance: money::zero(),
        }
    }

    /// Rebuild a wallet from persisted state.
    pub fn restore(id: WalletId, user_id: UserId, balance: Decimal) -> LedgerResult<Self> {
        if balance < Decimal::ZERO || balance > money::max_money() {
            return Err(LedgerError::storage(format!(
                "wallet {id} has out-of-range balance {balance}"
            )));
        }
        Ok(Self {
            id,
            user_id,
            balance,
        })
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Balance after adding `amount`, without applying it.
    pub(crate) fn credited(&self, amount: Amount) -> LedgerResult<Decimal> {
        // Both operands are at most `max_money()`, so the sum is exact.
        match self.balance.checked_add(amount.value()) {
            Some(next) if next <= money::max_money() => Ok(next),
            _ => Err(LedgerError::invalid(BALANCE_TOO_LARGE)),
        }
    }

    /// Balance after removing `amount`, without applying it.
    pub(crate) fn debited(&self, amount: Amount) -> LedgerResult<Decimal> {
        if self.balance < amount.value() {
            return Err(LedgerError::invalid(INSUFFICIENT_FUNDS));
        }
        Ok(self.balance - amount.value())
    }

    pub(crate) fn set_balance(&mut self, balance: Decimal) {
        debug_assert!(balance >= Decimal::ZERO);
        self.balance = balance;
    }

    /// Add `amount` and return the ledger entry recording it.
    pub fn deposit(&mut self, amount: Amount, at: DateTime<Utc>) -> LedgerResult<Transaction> {
        let next = self.credited(amount)?;
        self.set_balance(next);
        Ok(Transaction::deposit(self.id, amount, at))
    }

    /// Remove `amount` and return the ledger entry recording it.
    ///
    /// Fails with `InvalidArgument("Insufficient funds")` when the balance is
    /// smaller than `amount`.
    pub fn withdraw(&mut self, amount: Amount, at: DateTime<Utc>) -> LedgerResult<Transaction> {
        let next = self.debited(amount)?;
        self.set_balance(next);
        Ok(Transaction::withdrawal(self.id, amount, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionType;
    use rust_decimal_macros::dec;

    fn funded(balance: Decimal) -> Wallet {
        Wallet::restore(WalletId::new(), UserId::new(), balance).unwrap()
    }

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn opens_with_zero_balance() {
        let user_id = UserId::new();
        let wallet = Wallet::open(user_id);
        assert_eq!(wallet.balance(), Decimal::ZERO);
        assert_eq!(wallet.user_id(), user_id);
    }

    #[test]
    fn deposit_adds_and_records_entry() {
        let mut wallet = funded(dec!(10.00));
        let tx = wallet.deposit(amount(dec!(2.50)), Utc::now()).unwrap();

        assert_eq!(wallet.balance(), dec!(12.50));
        assert_eq!(tx.kind, TransactionType::Deposit);
        assert_eq!(tx.amount, dec!(2.50));
        assert_eq!(tx.wallet_id, wallet.id());
    }

    #[test]
    fn withdraw_more_than_balance_is_rejected_without_change() {
        let mut wallet = funded(dec!(100.00));
        let err = wallet.withdraw(amount(dec!(150.00)), Utc::now()).unwrap_err();

        assert_eq!(err, LedgerError::invalid(INSUFFICIENT_FUNDS));
        assert_eq!(wallet.balance(), dec!(100.00));
    }

    #[test]
    fn withdraw_exact_balance_reaches_zero() {
        let mut wallet = funded(dec!(40.00));
        let tx = wallet.withdraw(amount(dec!(40.00)), Utc::now()).unwrap();
        assert_eq!(wallet.balance(), Decimal::ZERO);
        assert_eq!(tx.kind, TransactionType::Withdrawal);
        assert_eq!(tx.description, "Wallet withdrawal");
    }

    #[test]
    fn deposit_past_the_ceiling_is_rejected_without_change() {
        let mut wallet = funded(money::max_money() - dec!(1.00));
        let err = wallet.deposit(amount(dec!(1.01)), Utc::now()).unwrap_err();

        assert_eq!(err, LedgerError::invalid(BALANCE_TOO_LARGE));
        assert_eq!(wallet.balance(), money::max_money() - dec!(1.00));

        wallet.deposit(amount(dec!(1.00)), Utc::now()).unwrap();
        assert_eq!(wallet.balance(), money::max_money());
    }

    #[test]
    fn restore_rejects_negative_balance() {
        let err = Wallet::restore(WalletId::new(), UserId::new(), dec!(-0.01)).unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(_)));
    }

    #[test]
    fn serializes_camel_case() {
        let wallet = funded(dec!(1.00));
        let json = serde_json::to_value(&wallet).unwrap();
        assert_eq!(json["balance"], "1.00");
        assert!(json.get("userId").is_some());
    }
}
