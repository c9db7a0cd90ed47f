//! Directory identities that own wallets.

use serde::Serialize;

use walletd_core::{LedgerError, LedgerResult, UserId, WalletId};

/// A registered user. Owns at most one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// Reference written when the user's wallet is provisioned.
    pub wallet_id: Option<WalletId>,
}

/// Validated registration data for a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    username: String,
    email: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> LedgerResult<Self> {
        let username = username.into().trim().to_string();
        let email = email.into().trim().to_string();

        if username.is_empty() {
            return Err(LedgerError::invalid("username must not be blank"));
        }
        if email.is_empty() {
            return Err(LedgerError::invalid("email must not be blank"));
        }

        Ok(Self { username, email })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Materialise the user under a freshly generated id.
    pub fn into_user(self) -> User {
        User {
            id: UserId::new(),
            username: self.username,
            email: self.email,
            wallet_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_fields() {
        let new = NewUser::new("  johndoe ", " john.doe@example.com").unwrap();
        assert_eq!(new.username(), "johndoe");
        assert_eq!(new.email(), "john.doe@example.com");
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(NewUser::new("   ", "a@b.c").is_err());
        assert!(NewUser::new("alice", "").is_err());
    }

    #[test]
    fn new_users_have_no_wallet() {
        let user = NewUser::new("alice", "alice@example.com").unwrap().into_user();
        assert_eq!(user.wallet_id, None);
    }
}
