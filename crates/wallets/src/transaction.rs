//! Immutable ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use walletd_core::{LedgerError, TransactionId, WalletId};

use crate::money::Amount;

/// Kind of balance change a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::TransferOut => "TRANSFER_OUT",
        }
    }

    /// Whether this entry increased the wallet balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::TransferIn)
    }
}

impl core::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::invalid(format!("unknown transaction type '{s}'")))
    }
}

/// One balance change on one wallet.
///
/// Created only as a side effect of a wallet mutation and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    /// Always positive; direction comes from `kind`.
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl Transaction {
    fn record(
        wallet_id: WalletId,
        amount: Amount,
        kind: TransactionType,
        at: DateTime<Utc>,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            wallet_id,
            amount: amount.value(),
            kind,
            timestamp: at,
            description,
        }
    }

    pub fn deposit(wallet_id: WalletId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self::record(wallet_id, amount, TransactionType::Deposit, at, "Wallet deposit".to_string())
    }

    pub fn withdrawal(wallet_id: WalletId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self::record(
            wallet_id,
            amount,
            TransactionType::Withdrawal,
            at,
            "Wallet withdrawal".to_string(),
        )
    }

    pub fn transfer_out(from: WalletId, to: WalletId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self::record(
            from,
            amount,
            TransactionType::TransferOut,
            at,
            format!("Transfer to wallet {to}"),
        )
    }

    pub fn transfer_in(to: WalletId, from: WalletId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self::record(
            to,
            amount,
            TransactionType::TransferIn,
            at,
            format!("Transfer from wallet {from}"),
        )
    }

    /// Signed effect of this entry on its wallet's balance.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn has_four_kinds_with_stable_names() {
        assert_eq!(TransactionType::ALL.len(), 4);
        for kind in TransactionType::ALL {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
        assert!("CREDIT".parse::<TransactionType>().is_err());
    }

    #[test]
    fn serializes_type_in_screaming_case() {
        let tx = Transaction::deposit(WalletId::new(), Amount::new(dec!(5)).unwrap(), Utc::now());
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "DEPOSIT");
        assert_eq!(json["description"], "Wallet deposit");
        assert!(json.get("walletId").is_some());
    }

    #[test]
    fn transfer_descriptions_name_the_counterparty() {
        let from = WalletId::new();
        let to = WalletId::new();
        let amount = Amount::new(dec!(1)).unwrap();
        let at = Utc::now();

        let out = Transaction::transfer_out(from, to, amount, at);
        let inn = Transaction::transfer_in(to, from, amount, at);

        assert_eq!(out.description, format!("Transfer to wallet {to}"));
        assert_eq!(inn.description, format!("Transfer from wallet {from}"));
        assert_eq!(out.signed_amount(), dec!(-1));
        assert_eq!(inn.signed_amount(), dec!(1));
    }
}
