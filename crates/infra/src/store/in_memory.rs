use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use walletd_core::{TransactionId, UserId, WalletId};
use walletd_wallets::{NewUser, Transaction, User, Wallet};

use super::r#trait::{LedgerSession, LedgerStore, Record, StoreError};
use crate::directory::Directory;

/// Lockable row identity. Users order before wallets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum RowKey {
    User(UserId),
    Wallet(WalletId),
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    wallets: HashMap<WalletId, Wallet>,
    wallet_by_user: HashMap<UserId, WalletId>,
    usernames: HashSet<String>,
    emails: HashSet<String>,
    transactions: BTreeMap<WalletId, Vec<Transaction>>,
    transaction_ids: HashSet<TransactionId>,
}

impl Tables {
    /// Validate a batch against current state plus the batch's own earlier
    /// records. Mirrors the constraints of the relational schema.
    fn check(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut new_wallets: HashMap<WalletId, UserId> = HashMap::new();
        let mut new_owners: HashSet<UserId> = HashSet::new();
        let mut new_tx_ids: HashSet<TransactionId> = HashSet::new();

        for record in records {
            match record {
                Record::InsertWallet(wallet) => {
                    let id = wallet.id();
                    if self.wallets.contains_key(&id) || new_wallets.contains_key(&id) {
                        return Err(StoreError::UniqueViolation(format!("wallet {id} already exists")));
                    }
                    if !self.users.contains_key(&wallet.user_id()) {
                        return Err(StoreError::NotFound(format!("user {}", wallet.user_id())));
                    }
                    if self.wallet_by_user.contains_key(&wallet.user_id())
                        || !new_owners.insert(wallet.user_id())
                    {
                        return Err(StoreError::UniqueViolation("Wallet already exists".to_string()));
                    }
                    new_wallets.insert(id, wallet.user_id());
                }
                Record::UpdateWallet(wallet) => {
                    let owner = self
                        .wallets
                        .get(&wallet.id())
                        .map(Wallet::user_id)
                        .or_else(|| new_wallets.get(&wallet.id()).copied())
                        .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet.id())))?;
                    if owner != wallet.user_id() {
                        return Err(StoreError::Backend(format!(
                            "wallet {} cannot change owner",
                            wallet.id()
                        )));
                    }
                    if wallet.balance() < Decimal::ZERO {
                        return Err(StoreError::Backend(format!(
                            "wallet {} balance check failed",
                            wallet.id()
                        )));
                    }
                }
                Record::LinkUserWallet { user_id, wallet_id } => {
                    if !self.users.contains_key(user_id) {
                        return Err(StoreError::NotFound(format!("user {user_id}")));
                    }
                    if !self.wallets.contains_key(wallet_id) && !new_wallets.contains_key(wallet_id) {
                        return Err(StoreError::NotFound(format!("wallet {wallet_id}")));
                    }
                }
                Record::InsertTransaction(tx) => {
                    if !self.wallets.contains_key(&tx.wallet_id) && !new_wallets.contains_key(&tx.wallet_id) {
                        return Err(StoreError::NotFound(format!("wallet {}", tx.wallet_id)));
                    }
                    if tx.amount <= Decimal::ZERO {
                        return Err(StoreError::Backend(format!(
                            "transaction {} amount check failed",
                            tx.id
                        )));
                    }
                    if self.transaction_ids.contains(&tx.id) || !new_tx_ids.insert(tx.id) {
                        return Err(StoreError::UniqueViolation(format!(
                            "transaction {} already exists",
                            tx.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply a batch that passed `check`.
    fn apply(&mut self, records: Vec<Record>) {
        for record in records {
            match record {
                Record::InsertWallet(wallet) => {
                    self.wallet_by_user.insert(wallet.user_id(), wallet.id());
                    self.wallets.insert(wallet.id(), wallet);
                }
                Record::UpdateWallet(wallet) => {
                    self.wallets.insert(wallet.id(), wallet);
                }
                Record::LinkUserWallet { user_id, wallet_id } => {
                    if let Some(user) = self.users.get_mut(&user_id) {
                        user.wallet_id = Some(wallet_id);
                    }
                }
                Record::InsertTransaction(tx) => {
                    self.transaction_ids.insert(tx.id);
                    self.transactions.entry(tx.wallet_id).or_default().push(tx);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
}

impl Shared {
    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn row_lock(&self, key: RowKey) -> Result<Arc<RowMutex<()>>, StoreError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Release `held` and drop map entries nobody else references.
    ///
    /// A session waiting on a key holds a clone of its mutex, so an entry is
    /// only removed once no session holds or awaits it.
    fn release(&self, held: BTreeMap<RowKey, OwnedMutexGuard<()>>) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        for (key, guard) in held {
            drop(guard);
            if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn row_lock_count(&self) -> usize {
        self.row_locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Committed state sits behind one `RwLock`, so a
/// batch becomes visible all at once. Row locks are per-key async mutexes
/// held by a session until it ends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_user_now(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.shared.read_tables()?.users.get(&id).cloned())
    }

    fn create_user_now(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.shared.write_tables()?;

        if tables.usernames.contains(new_user.username())
            || tables.emails.contains(new_user.email())
        {
            return Err(StoreError::UniqueViolation(
                "Duplicate username or email".to_string(),
            ));
        }

        let user = new_user.into_user();
        tables.usernames.insert(user.username.clone());
        tables.emails.insert(user.email.clone());
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Session = InMemorySession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        Ok(InMemorySession {
            shared: self.shared.clone(),
            held: BTreeMap::new(),
            pending: Vec::new(),
        })
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.shared.read_tables()?.wallets.get(&id).cloned())
    }

    async fn list_transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        let mut items = self
            .shared
            .read_tables()?
            .transactions
            .get(&wallet_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(items)
    }
}

#[async_trait]
impl Directory for InMemoryLedgerStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.find_user_now(id)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.create_user_now(new_user)
    }
}

/// Session over [`InMemoryLedgerStore`]: held row locks plus staged writes.
pub struct InMemorySession {
    shared: Arc<Shared>,
    held: BTreeMap<RowKey, OwnedMutexGuard<()>>,
    pending: Vec<Record>,
}

impl InMemorySession {
    async fn acquire(&mut self, mut keys: Vec<RowKey>) -> Result<(), StoreError> {
        keys.sort();
        keys.dedup();
        keys.retain(|k| !self.held.contains_key(k));

        if let (Some(first), Some(highest)) = (keys.first(), self.held.keys().next_back()) {
            if first < highest {
                return Err(StoreError::LockOrder(format!(
                    "{first:?} requested while holding {highest:?}"
                )));
            }
        }

        for key in keys {
            let lock = self.shared.row_lock(key)?;
            let guard = lock.lock_owned().await;
            self.held.insert(key, guard);
        }
        Ok(())
    }

    /// Wallet as this session sees it: its own staged writes over committed state.
    fn view_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let staged = self.pending.iter().rev().find_map(|r| match r {
            Record::InsertWallet(w) | Record::UpdateWallet(w) if w.id() == id => Some(w.clone()),
            _ => None,
        });
        match staged {
            Some(w) => Ok(Some(w)),
            None => Ok(self.shared.read_tables()?.wallets.get(&id).cloned()),
        }
    }

    fn view_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let mut user = self.shared.read_tables()?.users.get(&id).cloned();
        if let Some(user) = user.as_mut() {
            for record in &self.pending {
                if let Record::LinkUserWallet { user_id, wallet_id } = record {
                    if *user_id == id {
                        user.wallet_id = Some(*wallet_id);
                    }
                }
            }
        }
        Ok(user)
    }

    fn ensure_held(&self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::WriteConflict(format!(
                "{key:?} written without holding its row lock"
            )))
        }
    }

    fn commit_now(mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        let mut tables = self.shared.write_tables()?;
        tables.check(&pending)?;
        tables.apply(pending);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.shared.release(std::mem::take(&mut self.held));
    }
}

#[async_trait]
impl LedgerSession for InMemorySession {
    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<Vec<Option<Wallet>>, StoreError> {
        self.acquire(ids.iter().copied().map(RowKey::Wallet).collect())
            .await?;
        ids.iter().map(|id| self.view_wallet(*id)).collect()
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.acquire(vec![RowKey::User(user_id)]).await?;
        self.view_user(user_id)
    }

    async fn exists_wallet_for_user(&mut self, user_id: UserId) -> Result<bool, StoreError> {
        let staged = self
            .pending
            .iter()
            .any(|r| matches!(r, Record::InsertWallet(w) if w.user_id() == user_id));
        if staged {
            return Ok(true);
        }
        Ok(self.shared.read_tables()?.wallet_by_user.contains_key(&user_id))
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.pending.push(Record::InsertWallet(wallet.clone()));
        Ok(())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.ensure_held(RowKey::Wallet(wallet.id()))?;
        self.pending.push(Record::UpdateWallet(wallet.clone()));
        Ok(())
    }

    async fn link_user_wallet(
        &mut self,
        user_id: UserId,
        wallet_id: WalletId,
    ) -> Result<(), StoreError> {
        self.ensure_held(RowKey::User(user_id))?;
        self.pending.push(Record::LinkUserWallet { user_id, wallet_id });
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        self.pending.push(Record::InsertTransaction(transaction.clone()));
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.commit_now()
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use walletd_wallets::Amount;

    use crate::store::WriteBatch;

    async fn user(store: &InMemoryLedgerStore, name: &str) -> User {
        store
            .create_user(NewUser::new(name, format!("{name}@example.com")).unwrap())
            .await
            .unwrap()
    }

    async fn wallet_for(store: &InMemoryLedgerStore, user: &User) -> Wallet {
        let wallet = Wallet::open(user.id);
        let mut session = store.begin().await.unwrap();
        session.lock_user(user.id).await.unwrap();
        session
            .commit_batch(
                WriteBatch::new()
                    .insert_wallet(wallet.clone())
                    .link_user_wallet(user.id, wallet.id()),
            )
            .await
            .unwrap();
        wallet
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_rejected() {
        let store = InMemoryLedgerStore::new();
        user(&store, "alice").await;

        let err = store
            .create_user(NewUser::new("alice", "other@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let err = store
            .create_user(NewUser::new("bob", "alice@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let tables = store.shared.read_tables().unwrap();
        assert_eq!(tables.users.len(), 1);
        assert_eq!(tables.usernames.len(), 1);
        assert_eq!(tables.emails.len(), 1);
    }

    #[tokio::test]
    async fn usernames_and_emails_are_indexed_independently() {
        let store = InMemoryLedgerStore::new();
        user(&store, "alice").await;
        user(&store, "bob").await;

        let carol = store
            .create_user(NewUser::new("carol", "carol@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(store.find_user(carol.id).await.unwrap(), Some(carol));

        let err = store
            .create_user(NewUser::new("dave", "bob@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn lookups_of_missing_wallets_leave_no_row_locks_behind() {
        let store = InMemoryLedgerStore::new();

        for _ in 0..1000 {
            let mut session = store.begin().await.unwrap();
            let found = session.lock_wallets(&[WalletId::new()]).await.unwrap();
            assert_eq!(found, vec![None]);
        }

        assert_eq!(store.shared.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn row_lock_survives_while_another_session_waits() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        let mut first = store.begin().await.unwrap();
        first.lock_wallets(&[wallet.id()]).await.unwrap();

        let waiter = {
            let store = store.clone();
            let id = wallet.id();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_wallets(&[id]).await.unwrap();
                second
            })
        };
        while Arc::strong_count(
            store.shared.row_locks.lock().unwrap().get(&RowKey::Wallet(wallet.id())).unwrap(),
        ) < 3
        {
            tokio::task::yield_now().await;
        }

        first.commit().await.unwrap();
        assert_eq!(store.shared.row_lock_count(), 1, "waiter still references the lock");

        let second = waiter.await.unwrap();
        assert_eq!(store.shared.row_lock_count(), 1);
        drop(second);
        assert_eq!(store.shared.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        let mut session = store.begin().await.unwrap();
        let mut locked = session.lock_wallets(&[wallet.id()]).await.unwrap().remove(0).unwrap();
        let tx = locked.deposit(Amount::new(dec!(10)).unwrap(), Utc::now()).unwrap();
        session.save_wallet(&locked).await.unwrap();
        session.save_transaction(&tx).await.unwrap();

        assert_eq!(store.get_wallet(wallet.id()).await.unwrap().unwrap().balance(), dec!(0));

        session.commit().await.unwrap();
        assert_eq!(store.get_wallet(wallet.id()).await.unwrap().unwrap().balance(), dec!(10));
        assert_eq!(store.list_transactions(wallet.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_session_discards_writes() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        {
            let mut session = store.begin().await.unwrap();
            let mut locked = session.lock_wallets(&[wallet.id()]).await.unwrap().remove(0).unwrap();
            locked.deposit(Amount::new(dec!(10)).unwrap(), Utc::now()).unwrap();
            session.save_wallet(&locked).await.unwrap();
        }

        assert_eq!(store.get_wallet(wallet.id()).await.unwrap().unwrap().balance(), dec!(0));
        // Row lock was released with the session.
        let mut session = store.begin().await.unwrap();
        assert!(session.lock_wallets(&[wallet.id()]).await.unwrap()[0].is_some());
    }

    #[tokio::test]
    async fn unlocked_wallet_write_is_refused() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        let mut session = store.begin().await.unwrap();
        let err = session.save_wallet(&wallet).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict(_)));
    }

    #[tokio::test]
    async fn lock_wallets_returns_argument_order_and_none_for_missing() {
        let store = InMemoryLedgerStore::new();
        let a = wallet_for(&store, &user(&store, "a").await).await;
        let b = wallet_for(&store, &user(&store, "b").await).await;
        let missing = WalletId::new();

        let mut session = store.begin().await.unwrap();
        let got = session.lock_wallets(&[b.id(), missing, a.id()]).await.unwrap();

        assert_eq!(got[0].as_ref().map(Wallet::id), Some(b.id()));
        assert!(got[1].is_none());
        assert_eq!(got[2].as_ref().map(Wallet::id), Some(a.id()));
    }

    #[tokio::test]
    async fn locking_below_a_held_key_is_refused() {
        let store = InMemoryLedgerStore::new();
        let low = WalletId::from_uuid(uuid::Uuid::from_u128(1));
        let high = WalletId::from_uuid(uuid::Uuid::from_u128(2));

        let mut session = store.begin().await.unwrap();
        session.lock_wallets(&[high]).await.unwrap();
        let err = session.lock_wallets(&[low]).await.unwrap_err();
        assert!(matches!(err, StoreError::LockOrder(_)));
    }

    #[tokio::test]
    async fn second_wallet_for_user_violates_uniqueness() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        wallet_for(&store, &alice).await;

        let session = store.begin().await.unwrap();
        let err = session
            .commit_batch(WriteBatch::new().insert_wallet(Wallet::open(alice.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        let mut session = store.begin().await.unwrap();
        let mut locked = session.lock_wallets(&[wallet.id()]).await.unwrap().remove(0).unwrap();
        let tx = locked.deposit(Amount::new(dec!(5)).unwrap(), Utc::now()).unwrap();
        // Second record references a wallet that does not exist.
        let orphan = Transaction::deposit(WalletId::new(), Amount::new(dec!(1)).unwrap(), Utc::now());

        let err = session
            .commit_batch(
                WriteBatch::new()
                    .update_wallet(locked)
                    .insert_transaction(tx)
                    .insert_transaction(orphan),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.get_wallet(wallet.id()).await.unwrap().unwrap().balance(), dec!(0));
        assert!(store.list_transactions(wallet.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn link_is_visible_on_user_after_commit() {
        let store = InMemoryLedgerStore::new();
        let alice = user(&store, "alice").await;
        let wallet = wallet_for(&store, &alice).await;

        let found = store.find_user(alice.id).await.unwrap().unwrap();
        assert_eq!(found.wallet_id, Some(wallet.id()));
    }
}
