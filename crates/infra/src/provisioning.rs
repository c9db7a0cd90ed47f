//! Wallet provisioning: one wallet per user, created at zero balance.

use tracing::{info, instrument};

use walletd_core::{LedgerError, LedgerResult, UserId};
use walletd_wallets::Wallet;

use crate::directory::Directory;
use crate::engine::settle;
use crate::store::{LedgerSession, LedgerStore, WriteBatch};

const USER_NOT_FOUND: &str = "User not found";
const WALLET_EXISTS: &str = "Wallet already exists";

/// Creates wallets for users known to the [`Directory`].
#[derive(Debug, Clone)]
pub struct WalletProvisioner<S, D> {
    store: S,
    directory: D,
}

impl<S, D> WalletProvisioner<S, D>
where
    S: LedgerStore,
    D: Directory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self { store, directory }
    }

    /// Create the wallet of `user_id` and link it from the user record.
    ///
    /// The user row stays locked from the existence check to commit, so two
    /// concurrent requests for the same user yield exactly one wallet; the
    /// other gets `Conflict`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_wallet(&self, user_id: UserId) -> LedgerResult<Wallet> {
        self.directory
            .find_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(USER_NOT_FOUND))?;

        let mut session = self.store.begin().await?;
        let outcome = open_wallet(&mut session, user_id).await;
        let wallet = settle(session, outcome).await?;

        info!(wallet_id = %wallet.id(), "wallet created");
        Ok(wallet)
    }
}

async fn open_wallet<T: LedgerSession>(
    session: &mut T,
    user_id: UserId,
) -> LedgerResult<(Wallet, WriteBatch)> {
    if session.lock_user(user_id).await?.is_none() {
        return Err(LedgerError::not_found(USER_NOT_FOUND));
    }
    if session.exists_wallet_for_user(user_id).await? {
        return Err(LedgerError::conflict(WALLET_EXISTS));
    }

    let wallet = Wallet::open(user_id);
    let batch = WriteBatch::new()
        .insert_wallet(wallet.clone())
        .link_user_wallet(user_id, wallet.id());
    Ok((wallet, batch))
}
