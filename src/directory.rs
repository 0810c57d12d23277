use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Coach,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub status: UserStatus,
}

/// Purchase record a booking is spawned from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Ulid,
    pub member_id: Ulid,
    #[serde(default)]
    pub booking_id: Option<Ulid>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(Ulid),
    #[error("directory backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error("seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("seed file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Account lookups owned by the user-management side of the gym app.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The user with `id` if it exists, holds `role` and is active.
    async fn find_active_user(&self, id: Ulid, role: Role) -> Result<Option<User>, DirectoryError>;
}

/// Purchase records owned by the payments side of the gym app.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_transaction(&self, id: Ulid) -> Result<Option<Transaction>, DirectoryError>;

    async fn update_transaction_booking_id(
        &self,
        transaction_id: Ulid,
        booking_id: Ulid,
    ) -> Result<(), DirectoryError>;
}

/// Users and transactions loaded at startup, e.g. from `COACHBOOK_SEED`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: Seed = serde_json::from_str(&raw)?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        for user in &self.users {
            if user.name.trim().is_empty() || user.name.len() > MAX_USER_NAME_LEN {
                return Err(DirectoryError::InvalidSeed(format!("user {} has an invalid name", user.id)));
            }
            if user.phone_number.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
                return Err(DirectoryError::InvalidSeed(format!("user {} phone number too long", user.id)));
            }
        }
        Ok(())
    }
}

/// Process-local directory backing both collaborator contracts.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<Ulid, User>,
    transactions: DashMap<Ulid, Transaction>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let directory = Self::new();
        for user in seed.users {
            directory.upsert_user(user);
        }
        for transaction in seed.transactions {
            directory.upsert_transaction(transaction);
        }
        directory
    }

    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn upsert_transaction(&self, transaction: Transaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn transaction(&self, id: &Ulid) -> Option<Transaction> {
        self.transactions.get(id).map(|e| e.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_active_user(&self, id: Ulid, role: Role) -> Result<Option<User>, DirectoryError> {
        Ok(self
            .users
            .get(&id)
            .filter(|u| u.role == role && u.status == UserStatus::Active)
            .map(|u| u.value().clone()))
    }
}

#[async_trait]
impl TransactionStore for InMemoryDirectory {
    async fn find_transaction(&self, id: Ulid) -> Result<Option<Transaction>, DirectoryError> {
        Ok(self.transaction(&id))
    }

    async fn update_transaction_booking_id(
        &self,
        transaction_id: Ulid,
        booking_id: Ulid,
    ) -> Result<(), DirectoryError> {
        let mut tx = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or(DirectoryError::TransactionNotFound(transaction_id))?;
        tx.booking_id = Some(booking_id);
        Ok(())
    }
}
