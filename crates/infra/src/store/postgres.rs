//! Postgres-backed ledger store.
//!
//! A [`PostgresSession`] wraps one database transaction. Row locks are taken
//! with `SELECT ... FOR UPDATE` and released when the transaction ends, so
//! commit, rollback and drop all release them.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` | `UniqueViolation` | Second wallet for a user, duplicate username/email |
//! | `40001` | `WriteConflict` | Serialization failure |
//! | `40P01` | `WriteConflict` | Deadlock detected |
//! | Any other / non-database | `Backend` | Constraint, network, pool errors |

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction as PgTransaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use walletd_core::{TransactionId, UserId, WalletId};
use walletd_wallets::{NewUser, Transaction, TransactionType, User, Wallet};

use super::r#trait::{LedgerSession, LedgerStore, StoreError};
use crate::directory::Directory;

/// Idempotent schema for users, wallets and the transaction log.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id        UUID PRIMARY KEY,
    username  TEXT NOT NULL UNIQUE,
    email     TEXT NOT NULL UNIQUE,
    wallet_id UUID NULL
);

CREATE TABLE IF NOT EXISTS wallets (
    id      UUID PRIMARY KEY,
    user_id UUID NOT NULL UNIQUE REFERENCES users (id) ON DELETE CASCADE,
    balance NUMERIC(19, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0)
);

CREATE TABLE IF NOT EXISTS transactions (
    id          UUID PRIMARY KEY,
    wallet_id   UUID NOT NULL REFERENCES wallets (id),
    amount      NUMERIC(19, 2) NOT NULL CHECK (amount > 0),
    type        TEXT NOT NULL,
    timestamp   TIMESTAMPTZ NOT NULL,
    description TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_wallet_timestamp_idx
    ON transactions (wallet_id, timestamp, id);
"#;

const WALLET_EXISTS: &str = "Wallet already exists";
const DUPLICATE_USER: &str = "Duplicate username or email";

/// Lockable row identity. Users order before wallets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum LockKey {
    User(UserId),
    Wallet(WalletId),
}

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they are missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        debug!("schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Session = PostgresSession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresSession {
            tx,
            held: BTreeSet::new(),
        })
    }

    #[instrument(skip(self), fields(wallet_id = %id), err)]
    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query("SELECT id, user_id, balance FROM wallets WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_wallet", e))?;

        row.map(|row| Wallet::try_from(WalletRow::decode(&row)?))
            .transpose()
    }

    #[instrument(skip(self), fields(wallet_id = %wallet_id), err)]
    async fn list_transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, amount, type, timestamp, description
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(wallet_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        rows.iter()
            .map(|row| Transaction::try_from(TransactionRow::decode(row)?))
            .collect()
    }
}

#[async_trait]
impl Directory for PostgresLedgerStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, username, email, wallet_id FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;

        row.map(|row| UserRow::decode(&row).map(User::from)).transpose()
    }

    #[instrument(skip_all, fields(username = %new_user.username()), err)]
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let user = new_user.into_user();
        sqlx::query("INSERT INTO users (id, username, email, wallet_id) VALUES ($1, $2, $3, NULL)")
            .bind(user.id.as_uuid())
            .bind(&user.username)
            .bind(&user.email)
            .execute(&*self.pool)
            .await
            .map_err(|e| with_unique_message(map_sqlx_error("create_user", e), DUPLICATE_USER))?;
        Ok(user)
    }
}

/// One database transaction plus the row locks it has taken.
pub struct PostgresSession {
    tx: PgTransaction<'static, Postgres>,
    held: BTreeSet<LockKey>,
}

impl PostgresSession {
    /// Record `keys` as held, refusing any that order below a lock already
    /// taken. Returns the keys not yet held, ascending.
    fn claim(&mut self, keys: impl IntoIterator<Item = LockKey>) -> Result<Vec<LockKey>, StoreError> {
        let fresh: Vec<LockKey> = keys
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|k| !self.held.contains(k))
            .collect();

        if let (Some(first), Some(highest)) = (fresh.first(), self.held.last()) {
            if first < highest {
                return Err(StoreError::LockOrder(format!(
                    "{first:?} requested while holding {highest:?}"
                )));
            }
        }
        self.held.extend(fresh.iter().copied());
        Ok(fresh)
    }

    fn ensure_held(&self, key: LockKey) -> Result<(), StoreError> {
        if self.held.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::WriteConflict(format!(
                "{key:?} written without holding its row lock"
            )))
        }
    }
}

#[async_trait]
impl LedgerSession for PostgresSession {
    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<Vec<Option<Wallet>>, StoreError> {
        self.claim(ids.iter().copied().map(LockKey::Wallet))?;

        let mut sorted: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        sorted.sort();
        sorted.dedup();

        // ORDER BY makes Postgres take the row locks in ascending id order.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, balance
            FROM wallets
            WHERE id = ANY($1)
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .bind(&sorted)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_wallets", e))?;

        let mut found: HashMap<WalletId, Wallet> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let wallet: Wallet = WalletRow::decode(row)?.try_into()?;
            found.insert(wallet.id(), wallet);
        }
        Ok(ids.iter().map(|id| found.get(id).cloned()).collect())
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.claim([LockKey::User(user_id)])?;

        let row = sqlx::query(
            "SELECT id, username, email, wallet_id FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_user", e))?;

        row.map(|row| UserRow::decode(&row).map(User::from)).transpose()
    }

    async fn exists_wallet_for_user(&mut self, user_id: UserId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM wallets WHERE user_id = $1)")
            .bind(user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("exists_wallet_for_user", e))?;
        row.try_get::<bool, _>(0).map_err(decode_error)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO wallets (id, user_id, balance) VALUES ($1, $2, $3)")
            .bind(wallet.id().as_uuid())
            .bind(wallet.user_id().as_uuid())
            .bind(wallet.balance())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| with_unique_message(map_sqlx_error("insert_wallet", e), WALLET_EXISTS))?;
        Ok(())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.ensure_held(LockKey::Wallet(wallet.id()))?;

        let result = sqlx::query("UPDATE wallets SET balance = $2 WHERE id = $1")
            .bind(wallet.id().as_uuid())
            .bind(wallet.balance())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_wallet", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("wallet {}", wallet.id())));
        }
        Ok(())
    }

    async fn link_user_wallet(
        &mut self,
        user_id: UserId,
        wallet_id: WalletId,
    ) -> Result<(), StoreError> {
        self.ensure_held(LockKey::User(user_id))?;

        let result = sqlx::query("UPDATE users SET wallet_id = $2 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(wallet_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("link_user_wallet", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, wallet_id, amount, type, timestamp, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.wallet_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.kind.as_str())
        .bind(transaction.timestamp)
        .bind(&transaction.description)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_transaction", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("40001") | Some("40P01") => StoreError::WriteConflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

/// Replace the database's wording of a unique violation with the caller-facing one.
fn with_unique_message(err: StoreError, message: &str) -> StoreError {
    match err {
        StoreError::UniqueViolation(_) => StoreError::UniqueViolation(message.to_string()),
        other => other,
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

#[derive(Debug)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance: Decimal,
}

impl WalletRow {
    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Self::from_row(row).map_err(decode_error)
    }
}

impl<'r> FromRow<'r, PgRow> for WalletRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WalletRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            balance: row.try_get("balance")?,
        })
    }
}

impl TryFrom<WalletRow> for Wallet {
    type Error = StoreError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Wallet::restore(
            WalletId::from_uuid(row.id),
            UserId::from_uuid(row.user_id),
            row.balance,
        )
        .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    wallet_id: Option<Uuid>,
}

impl UserRow {
    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Self::from_row(row).map_err(decode_error)
    }
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            wallet_id: row.try_get("wallet_id")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            wallet_id: row.wallet_id.map(WalletId::from_uuid),
        }
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    amount: Decimal,
    kind: String,
    timestamp: DateTime<Utc>,
    description: String,
}

impl TransactionRow {
    fn decode(row: &PgRow) -> Result<Self, StoreError> {
        Self::from_row(row).map_err(decode_error)
    }
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            wallet_id: row.try_get("wallet_id")?,
            amount: row.try_get("amount")?,
            kind: row.try_get("type")?,
            timestamp: row.try_get("timestamp")?,
            description: row.try_get("description")?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TransactionType::from_str(&row.kind)
            .map_err(|e| StoreError::Backend(format!("transaction {}: {e}", row.id)))?;
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            wallet_id: WalletId::from_uuid(row.wallet_id),
            amount: row.amount,
            kind,
            timestamp: row.timestamp,
            description: row.description,
        })
    }
}
