use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;
use ulid::Ulid;

use crate::directory::{DirectoryError, Transaction, TransactionStore};

use super::{Entity, SchedulingError};

/// What `attach` does when the transaction already points at a booking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkagePolicy {
    /// Silently replace the existing booking id.
    #[default]
    Overwrite,
    /// Refuse to create a second booking for a linked transaction.
    Strict,
}

impl FromStr for LinkagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(LinkagePolicy::Overwrite),
            "strict" => Ok(LinkagePolicy::Strict),
            other => Err(format!("unknown linkage policy {other:?} (expected overwrite or strict)")),
        }
    }
}

/// Binds bookings to the purchase transactions they were created from.
pub struct TransactionLinkage {
    store: Arc<dyn TransactionStore>,
    policy: LinkagePolicy,
    /// Transactions with a create in flight. Strict mode only.
    claims: Arc<DashMap<Ulid, ()>>,
}

/// Held by a strict-mode create between the eligibility check and the
/// attach. Dropping it releases the transaction.
pub(crate) struct LinkClaim {
    claims: Option<(Arc<DashMap<Ulid, ()>>, Ulid)>,
}

impl Drop for LinkClaim {
    fn drop(&mut self) {
        if let Some((claims, id)) = self.claims.take() {
            claims.remove(&id);
        }
    }
}

impl TransactionLinkage {
    pub fn new(store: Arc<dyn TransactionStore>, policy: LinkagePolicy) -> Self {
        Self {
            store,
            policy,
            claims: Arc::new(DashMap::new()),
        }
    }

    /// The transaction must exist; under `Strict` it must also be unlinked
    /// and not already claimed by a concurrent create.
    pub(crate) async fn check_eligible(
        &self,
        transaction_id: Ulid,
    ) -> Result<(Transaction, LinkClaim), SchedulingError> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found(Entity::Transaction, transaction_id))?;

        if self.policy == LinkagePolicy::Overwrite {
            return Ok((transaction, LinkClaim { claims: None }));
        }
        if let Some(booking_id) = transaction.booking_id {
            return Err(SchedulingError::Validation(format!(
                "transaction {transaction_id} is already linked to booking {booking_id}"
            )));
        }
        if self.claims.insert(transaction_id, ()).is_some() {
            return Err(SchedulingError::Validation(format!(
                "transaction {transaction_id} already has a booking in progress"
            )));
        }
        let claim = LinkClaim {
            claims: Some((self.claims.clone(), transaction_id)),
        };
        Ok((transaction, claim))
    }

    pub(crate) async fn attach(&self, transaction_id: Ulid, booking_id: Ulid) -> Result<(), SchedulingError> {
        match self.store.update_transaction_booking_id(transaction_id, booking_id).await {
            Ok(()) => Ok(()),
            Err(DirectoryError::TransactionNotFound(id)) => {
                warn!("transaction {id} vanished before booking {booking_id} was attached");
                Err(SchedulingError::not_found(Entity::Transaction, id))
            }
            Err(e) => Err(e.into()),
        }
    }
}
