//! User directory boundary.
//!
//! Resolves user identities for wallet provisioning and registers new users.

use std::sync::Arc;

use async_trait::async_trait;

use walletd_core::UserId;
use walletd_wallets::{NewUser, User};

use crate::store::StoreError;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Register a user. Duplicate usernames or emails fail with
    /// `StoreError::UniqueViolation`.
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;
}

#[async_trait]
impl<D> Directory for Arc<D>
where
    D: Directory + ?Sized,
{
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        (**self).find_user(id).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        (**self).create_user(new_user).await
    }
}
