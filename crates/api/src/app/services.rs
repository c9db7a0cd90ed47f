//! Backend wiring: the same services over an in-memory or Postgres store.

use rust_decimal::Decimal;

use walletd_core::{LedgerError, LedgerResult, UserId, WalletId};
use walletd_infra::store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use walletd_infra::{BalanceEngine, Directory, WalletProvisioner};
use walletd_wallets::{NewUser, Transaction, TransferResult, User, Wallet};

use crate::config::AppConfig;

const USER_NOT_FOUND: &str = "User not found";

/// Engine, provisioner and directory over one store.
#[derive(Debug, Clone)]
pub struct Backend<S> {
    engine: BalanceEngine<S>,
    provisioner: WalletProvisioner<S, S>,
    directory: S,
}

impl<S> Backend<S>
where
    S: LedgerStore + Directory + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            engine: BalanceEngine::new(store.clone()),
            provisioner: WalletProvisioner::new(store.clone(), store.clone()),
            directory: store,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppServices {
    InMemory(Backend<InMemoryLedgerStore>),
    Persistent(Backend<PostgresLedgerStore>),
}

/// Run `$body` against whichever backend is active.
macro_rules! on_backend {
    ($services:expr, $backend:ident => $body:expr) => {
        match $services {
            AppServices::InMemory($backend) => $body,
            AppServices::Persistent($backend) => $body,
        }
    };
}

impl AppServices {
    pub fn in_memory() -> Self {
        Self::InMemory(Backend::new(InMemoryLedgerStore::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
            Self::Persistent(_) => "postgres",
        }
    }

    pub async fn create_user(&self, username: String, email: String) -> LedgerResult<User> {
        let new_user = NewUser::new(username, email)?;
        on_backend!(self, b => Ok(b.directory.create_user(new_user).await?))
    }

    pub async fn get_user(&self, user_id: UserId) -> LedgerResult<User> {
        on_backend!(self, b => b.directory.find_user(user_id).await?)
            .ok_or_else(|| LedgerError::not_found(USER_NOT_FOUND))
    }

    pub async fn create_wallet(&self, user_id: UserId) -> LedgerResult<Wallet> {
        on_backend!(self, b => b.provisioner.create_wallet(user_id).await)
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        on_backend!(self, b => b.engine.get_wallet(wallet_id).await)
    }

    pub async fn deposit(&self, wallet_id: WalletId, amount: Option<Decimal>) -> LedgerResult<Wallet> {
        on_backend!(self, b => b.engine.deposit(wallet_id, amount).await)
    }

    pub async fn withdraw(&self, wallet_id: WalletId, amount: Option<Decimal>) -> LedgerResult<Wallet> {
        on_backend!(self, b => b.engine.withdraw(wallet_id, amount).await)
    }

    pub async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Option<Decimal>,
    ) -> LedgerResult<TransferResult> {
        on_backend!(self, b => b.engine.transfer(from_wallet_id, to_wallet_id, amount).await)
    }

    pub async fn get_balance(&self, wallet_id: WalletId) -> LedgerResult<Decimal> {
        on_backend!(self, b => b.engine.get_balance(wallet_id).await)
    }

    pub async fn list_transactions(&self, wallet_id: WalletId) -> LedgerResult<Vec<Transaction>> {
        on_backend!(self, b => b.engine.list_transactions(wallet_id).await)
    }
}

/// Pick the backend named by `config`.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    if !config.use_persistent_stores {
        tracing::info!(backend = "in_memory", "ledger store ready");
        return Ok(AppServices::in_memory());
    }

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"))?;

    let store = PostgresLedgerStore::connect(database_url, config.database_max_connections).await?;
    store.migrate().await?;

    tracing::info!(
        backend = "postgres",
        max_connections = config.database_max_connections,
        "ledger store ready"
    );
    Ok(AppServices::Persistent(Backend::new(store)))
}
