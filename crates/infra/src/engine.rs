//! Balance Engine: deposit, withdraw, transfer and balance queries.
//!
//! Each mutating operation runs as one scoped store session:
//!
//! ```text
//! validate input (no IO)
//!   ↓
//! begin session → lock wallet row(s), ascending id order
//!   ↓
//! apply the domain operation to the locked wallet(s)
//!   ↓
//! commit balances + ledger entries as one batch   (any error: roll back)
//! ```
//!
//! Holding the row locks from read to commit closes the lost-update window
//! between the sufficient-funds check and the debit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{Span, field, info, instrument, warn};

use walletd_core::{LedgerError, LedgerResult, WalletId};
use walletd_wallets::{
    Amount, Transaction, TransferResult, Wallet, ensure_distinct, transfer,
};

use crate::store::{LedgerSession, LedgerStore, WriteBatch};

pub(crate) const WALLET_NOT_FOUND: &str = "Wallet not found";
const SENDER_NOT_FOUND: &str = "Sender wallet not found";
const RECEIVER_NOT_FOUND: &str = "Receiver wallet not found";

/// Validates and applies balance mutations against a [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct BalanceEngine<S> {
    store: S,
}

impl<S> BalanceEngine<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Add `amount` to a wallet and record a `DEPOSIT` entry.
    ///
    /// A missing amount is rejected like a non-positive one.
    #[instrument(skip_all, fields(wallet_id = %wallet_id, amount = field::Empty))]
    pub async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: impl Into<Option<Decimal>>,
    ) -> LedgerResult<Wallet> {
        let amount = validate_amount(amount.into())
            .inspect_err(|e| warn!(error = %e, "deposit rejected"))?;
        let at = Utc::now();

        let mut session = self.store.begin().await?;
        let outcome = apply_deposit(&mut session, wallet_id, amount, at).await;
        let wallet = settle(session, outcome).await?;

        info!(balance = %wallet.balance(), "deposit committed");
        Ok(wallet)
    }

    /// Remove `amount` from a wallet and record a `WITHDRAWAL` entry.
    #[instrument(skip_all, fields(wallet_id = %wallet_id, amount = field::Empty))]
    pub async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: impl Into<Option<Decimal>>,
    ) -> LedgerResult<Wallet> {
        let amount = validate_amount(amount.into())
            .inspect_err(|e| warn!(error = %e, "withdrawal rejected"))?;
        let at = Utc::now();

        let mut session = self.store.begin().await?;
        let outcome = apply_withdrawal(&mut session, wallet_id, amount, at).await;
        let wallet = settle(session, outcome).await?;

        info!(balance = %wallet.balance(), "withdrawal committed");
        Ok(wallet)
    }

    /// Move `amount` between two wallets.
    ///
    /// Checks, in order: positive amount, distinct wallets, sender exists,
    /// receiver exists, sufficient funds. Both balance updates and both ledger
    /// entries (sharing one timestamp) commit together.
    #[instrument(skip_all, fields(from = %from_wallet_id, to = %to_wallet_id, amount = field::Empty))]
    pub async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: impl Into<Option<Decimal>>,
    ) -> LedgerResult<TransferResult> {
        let amount = validate_amount(amount.into())
            .and_then(|a| ensure_distinct(from_wallet_id, to_wallet_id).map(|()| a))
            .inspect_err(|e| warn!(error = %e, "transfer rejected"))?;
        let at = Utc::now();

        let mut session = self.store.begin().await?;
        let outcome = apply_transfer(&mut session, from_wallet_id, to_wallet_id, amount, at).await;
        let result = settle(session, outcome).await?;

        info!(
            from_balance = %result.from_balance,
            to_balance = %result.to_balance,
            "transfer committed"
        );
        Ok(result)
    }

    /// Latest committed balance of a wallet.
    #[instrument(skip_all, fields(wallet_id = %wallet_id))]
    pub async fn get_balance(&self, wallet_id: WalletId) -> LedgerResult<Decimal> {
        Ok(self.get_wallet(wallet_id).await?.balance())
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(WALLET_NOT_FOUND))
    }

    /// Audit trail of a wallet, oldest entry first.
    #[instrument(skip_all, fields(wallet_id = %wallet_id))]
    pub async fn list_transactions(&self, wallet_id: WalletId) -> LedgerResult<Vec<Transaction>> {
        self.get_wallet(wallet_id).await?;
        Ok(self.store.list_transactions(wallet_id).await?)
    }
}

/// Single validation point for caller-supplied amounts.
fn validate_amount(raw: Option<Decimal>) -> LedgerResult<Amount> {
    if let Some(raw) = raw {
        Span::current().record("amount", field::display(raw));
    }
    Amount::from_optional(raw)
}

async fn lock_wallet<T: LedgerSession>(
    session: &mut T,
    wallet_id: WalletId,
) -> LedgerResult<Wallet> {
    session
        .lock_wallets(&[wallet_id])
        .await?
        .pop()
        .flatten()
        .ok_or_else(|| LedgerError::not_found(WALLET_NOT_FOUND))
}

async fn apply_deposit<T: LedgerSession>(
    session: &mut T,
    wallet_id: WalletId,
    amount: Amount,
    at: DateTime<Utc>,
) -> LedgerResult<(Wallet, WriteBatch)> {
    let mut wallet = lock_wallet(session, wallet_id).await?;
    let entry = wallet.deposit(amount, at)?;
    let batch = WriteBatch::new()
        .update_wallet(wallet.clone())
        .insert_transaction(entry);
    Ok((wallet, batch))
}

async fn apply_withdrawal<T: LedgerSession>(
    session: &mut T,
    wallet_id: WalletId,
    amount: Amount,
    at: DateTime<Utc>,
) -> LedgerResult<(Wallet, WriteBatch)> {
    let mut wallet = lock_wallet(session, wallet_id).await?;
    let entry = wallet.withdraw(amount, at)?;
    let batch = WriteBatch::new()
        .update_wallet(wallet.clone())
        .insert_transaction(entry);
    Ok((wallet, batch))
}

async fn apply_transfer<T: LedgerSession>(
    session: &mut T,
    from_wallet_id: WalletId,
    to_wallet_id: WalletId,
    amount: Amount,
    at: DateTime<Utc>,
) -> LedgerResult<(TransferResult, WriteBatch)> {
    // The store acquires both row locks in ascending id order.
    let mut locked = session
        .lock_wallets(&[from_wallet_id, to_wallet_id])
        .await?
        .into_iter();
    let from = locked.next().flatten();
    let to = locked.next().flatten();

    let mut from = from.ok_or_else(|| LedgerError::not_found(SENDER_NOT_FOUND))?;
    let mut to = to.ok_or_else(|| LedgerError::not_found(RECEIVER_NOT_FOUND))?;

    let legs = transfer(&mut from, &mut to, amount, at)?;
    let result = TransferResult::new(&from, &to, amount);

    let batch = WriteBatch::new()
        .update_wallet(from)
        .update_wallet(to)
        .insert_transaction(legs.debit)
        .insert_transaction(legs.credit);
    Ok((result, batch))
}

/// Commit `outcome`'s batch, or roll the session back if the operation failed.
pub(crate) async fn settle<T, V>(session: T, outcome: LedgerResult<(V, WriteBatch)>) -> LedgerResult<V>
where
    T: LedgerSession,
{
    match outcome {
        Ok((value, batch)) => {
            session.commit_batch(batch).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            warn!(error = %err, "operation rejected");
            Err(err)
        }
    }
}
