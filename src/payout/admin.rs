//! Operator actions on transfers

use chrono::Utc;
use tracing::info;

use super::error::PayoutError;
use super::repository::PayoutStore;
use super::state::TransferStatus;
use super::types::TransferId;

/// Statuses an operator may still delete from
const DELETABLE: [TransferStatus; 4] = [
    TransferStatus::Creating,
    TransferStatus::New,
    TransferStatus::Error,
    TransferStatus::Failed,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteTransferOutcome {
    pub transfer_id: TransferId,
    /// Transactions released back to the unpaid pool
    pub released: u64,
}

pub struct TransferAdmin {
    store: PayoutStore,
}

impl TransferAdmin {
    pub fn new(store: PayoutStore) -> Self {
        Self { store }
    }

    /// Soft delete a transfer that never paid out and release its transactions
    pub async fn delete_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<DeleteTransferOutcome, PayoutError> {
        let transfer = self
            .store
            .transfers
            .get(transfer_id)
            .await?
            .ok_or(PayoutError::TransferNotFound(transfer_id))?;

        if transfer.deleted_at.is_some() || transfer.status == TransferStatus::Deleted {
            return Err(PayoutError::TransferDeleted(transfer_id));
        }
        if !DELETABLE.contains(&transfer.status) {
            return Err(PayoutError::InvalidState(format!(
                "transfer {} in status {} cannot be deleted",
                transfer_id, transfer.status
            )));
        }

        let attempts = self.store.attempts.list_by_transfer(transfer_id).await?;
        if attempts.iter().any(|a| a.is_ongoing()) {
            return Err(PayoutError::TransferProcessing(transfer_id));
        }

        self.store
            .transfers
            .mark_deleted(transfer_id, Utc::now())
            .await?;
        let released = self
            .store
            .transactions
            .unassign_transfer(transfer_id)
            .await?;

        info!(transfer_id, released, "Transfer deleted by operator");
        Ok(DeleteTransferOutcome {
            transfer_id,
            released,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::repository::memory::MemoryStore;
    use crate::payout::state::GatewayStatus;
    use crate::payout::types::{NewTransfer, TransferMethod};
    use std::sync::Arc;

    async fn seed(store: &Arc<MemoryStore>, status: TransferStatus) -> TransferId {
        let transfer = PayoutStore::memory(store.clone())
            .transfers
            .create(NewTransfer {
                payee_account_id: 1,
                currency: "USD".to_string(),
                amount: 900,
                method: Some(TransferMethod::Gateway),
                status,
                created_by: None,
            })
            .await
            .unwrap();
        for amount in [400, 500] {
            let tx = store.add_transaction(1, amount);
            store.attach(tx, transfer.id);
        }
        transfer.id
    }

    #[tokio::test]
    async fn test_delete_releases_transactions() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, TransferStatus::Error).await;
        let admin = TransferAdmin::new(PayoutStore::memory(store.clone()));

        let outcome = admin.delete_transfer(id).await.unwrap();
        assert_eq!(outcome.released, 2);

        let transfer = store.transfer(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Deleted);
        assert!(transfer.deleted_at.is_some());
        assert!(
            PayoutStore::memory(store.clone())
                .transactions
                .list_by_transfer(id)
                .await
                .unwrap()
                .is_empty()
        );

        assert!(matches!(
            admin.delete_transfer(id).await,
            Err(PayoutError::TransferDeleted(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_rejects_paid_transfer() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, TransferStatus::Paid).await;
        let admin = TransferAdmin::new(PayoutStore::memory(store.clone()));

        assert!(matches!(
            admin.delete_transfer(id).await,
            Err(PayoutError::InvalidState(_))
        ));
        assert_eq!(store.transfer(id).unwrap().status, TransferStatus::Paid);
    }

    #[tokio::test]
    async fn test_delete_blocked_by_ongoing_attempt() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, TransferStatus::Error).await;
        let payout_store = PayoutStore::memory(store.clone());
        let attempt = payout_store.attempts.create(id).await.unwrap();
        let admin = TransferAdmin::new(payout_store);

        assert!(matches!(
            admin.delete_transfer(id).await,
            Err(PayoutError::TransferProcessing(_))
        ));

        // a failed attempt no longer blocks
        store.update_attempt(attempt.id, |a| {
            a.gateway_status = Some(GatewayStatus::Failed)
        });
        assert!(admin.delete_transfer(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_unknown_transfer() {
        let admin = TransferAdmin::new(PayoutStore::memory(Arc::new(MemoryStore::new())));
        assert!(matches!(
            admin.delete_transfer(404).await,
            Err(PayoutError::TransferNotFound(404))
        ));
    }
}
