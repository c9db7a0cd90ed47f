use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use walletd_core::{LedgerError, UserId, WalletId};
use walletd_wallets::{Transaction, User, Wallet};

/// Store operation error.
///
/// These are **infrastructure errors** (constraints, lock contention, backend
/// failures) as opposed to business-rule failures, which the engine detects
/// before it writes anything.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (duplicate wallet for a
    /// user, duplicate username/email).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The backend aborted the unit of work because of concurrent writers
    /// (serialization failure, deadlock, unlocked write).
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// A write referenced a row that does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A session tried to lock a row ordered below one it already holds.
    #[error("lock order violated: {0}")]
    LockOrder(String),

    /// Anything else the backend reported.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UniqueViolation(msg) => LedgerError::Conflict(msg),
            other => LedgerError::StorageFailure(other.to_string()),
        }
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    InsertWallet(Wallet),
    UpdateWallet(Wallet),
    LinkUserWallet { user_id: UserId, wallet_id: WalletId },
    InsertTransaction(Transaction),
}

/// Ordered group of writes committed together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    records: Vec<Record>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_wallet(mut self, wallet: Wallet) -> Self {
        self.records.push(Record::InsertWallet(wallet));
        self
    }

    pub fn update_wallet(mut self, wallet: Wallet) -> Self {
        self.records.push(Record::UpdateWallet(wallet));
        self
    }

    pub fn link_user_wallet(mut self, user_id: UserId, wallet_id: WalletId) -> Self {
        self.records.push(Record::LinkUserWallet { user_id, wallet_id });
        self
    }

    pub fn insert_transaction(mut self, transaction: Transaction) -> Self {
        self.records.push(Record::InsertTransaction(transaction));
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A scoped unit of work against the store.
///
/// ## Locking
///
/// `lock_wallets` / `lock_user` take exclusive row locks held until the
/// session ends. Locks are always acquired in ascending key order, whatever
/// order the caller passes, and a session may not lock a key ordered below one
/// it already holds. Two sessions that touch overlapping wallets are therefore
/// serialized and cannot deadlock.
///
/// ## Atomicity
///
/// Writes become visible only on `commit`. `rollback`, an error from
/// `commit`, or simply dropping the session leaves the store unchanged.
#[async_trait]
pub trait LedgerSession: Send + Sized {
    /// Lock the given wallets and return them in argument order (`None` for
    /// ids that do not exist).
    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<Vec<Option<Wallet>>, StoreError>;

    /// Lock a user row and return it.
    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn exists_wallet_for_user(&mut self, user_id: UserId) -> Result<bool, StoreError>;

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;

    /// Persist a wallet's new balance. The wallet must be locked by this session.
    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;

    /// Point a user's wallet reference at `wallet_id`. The user must be locked.
    async fn link_user_wallet(&mut self, user_id: UserId, wallet_id: WalletId)
        -> Result<(), StoreError>;

    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;

    /// Apply a single staged record.
    async fn write(&mut self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::InsertWallet(wallet) => self.insert_wallet(wallet).await,
            Record::UpdateWallet(wallet) => self.save_wallet(wallet).await,
            Record::LinkUserWallet { user_id, wallet_id } => {
                self.link_user_wallet(*user_id, *wallet_id).await
            }
            Record::InsertTransaction(transaction) => self.save_transaction(transaction).await,
        }
    }

    /// Write every record of `batch`, then commit. On any failure nothing is
    /// committed.
    async fn commit_batch(mut self, batch: WriteBatch) -> Result<(), StoreError> {
        for record in batch.records() {
            if let Err(err) = self.write(record).await {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed batch write failed");
                }
                return Err(err);
            }
        }
        self.commit().await
    }
}

/// Durable, transactional storage for the ledger.
///
/// Reads outside a session (`get_wallet`, `list_transactions`) only ever see
/// committed state, never half of a batch.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Session: LedgerSession;

    /// Open a new scoped session.
    async fn begin(&self) -> Result<Self::Session, StoreError>;

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    /// Every ledger entry of a wallet, oldest first.
    async fn list_transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Session = S::Session;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        (**self).begin().await
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        (**self).get_wallet(id).await
    }

    async fn list_transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        (**self).list_transactions(wallet_id).await
    }
}
