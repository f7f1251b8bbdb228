//! Postgres Ledger Repositories
//!
//! All five repository traits over one `PgPool`. Status updates that race
//! with other workers are written as conditional (CAS) updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::db::SafeRow;
use crate::payout::error::PayoutError;
use crate::payout::state::{GatewayStatus, SubmissionStatus, TransferStatus};
use crate::payout::types::{
    ActorId, Amount, AttemptId, GatewayTransferAttempt, IntermediateTransfer, NewTransfer,
    PayeeAccount, PayeeAccountId, Transaction, TransactionId, Transfer, TransferId,
    TransferMethod,
};

use super::{
    GatewayAttemptRepository, IntermediateTransferRepository, PayeeAccountRepository,
    TransactionRepository, TransferRepository,
};

const TRANSFER_COLUMNS: &str = "id, payee_account_id, currency, subtotal, amount, method, status, \
     status_code, created_by, created_at, submitted_at, submitted_by, deleted_at";

const ATTEMPT_COLUMNS: &str = "id, transfer_id, gateway_id, gateway_status, failure_code, \
     submission_status, bank_last4, submitted_at, last_event_at, created_at, updated_at";

const INTERMEDIATE_COLUMNS: &str = "id, transfer_id, payee_account_id, currency, amount, \
     gateway_transfer_id, gateway_status, submitted_at";

const ACCOUNT_COLUMNS: &str = "id, category, currency, gateway_account_id, gateway_country, \
     payout_day, payouts_disabled, bank_updated_at";

/// Postgres-backed payout ledger
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_account(row: &PgRow) -> Result<PayeeAccount, PayoutError> {
    let payout_day = match row.try_get_log::<Option<String>>("payout_day").flatten() {
        Some(day) => Some(day.parse::<Weekday>().map_err(|_| {
            PayoutError::SystemError(format!("Invalid payout_day: {}", day))
        })?),
        None => None,
    };

    Ok(PayeeAccount {
        id: row.get("id"),
        category: row.get("category"),
        currency: row.get("currency"),
        gateway_account_id: row.get("gateway_account_id"),
        gateway_country: row.get("gateway_country"),
        payout_day,
        payouts_disabled: row.get("payouts_disabled"),
        bank_updated_at: row.get("bank_updated_at"),
    })
}

fn row_to_transaction(row: &PgRow) -> Transaction {
    Transaction {
        id: row.get("id"),
        payee_account_id: row.get("payee_account_id"),
        amount: row.get("amount"),
        transfer_id: row.get("transfer_id"),
        created_at: row.get("created_at"),
    }
}

fn row_to_transfer(row: &PgRow) -> Result<Transfer, PayoutError> {
    let status_id: i16 = row.get("status");
    let status = TransferStatus::from_id(status_id)
        .ok_or_else(|| PayoutError::SystemError(format!("Invalid status ID: {}", status_id)))?;

    let method = match row.get::<Option<String>, _>("method") {
        Some(m) => Some(
            m.parse::<TransferMethod>()
                .map_err(PayoutError::SystemError)?,
        ),
        None => None,
    };

    Ok(Transfer {
        id: row.get("id"),
        payee_account_id: row.get("payee_account_id"),
        currency: row.get("currency"),
        subtotal: row.get("subtotal"),
        amount: row.get("amount"),
        method,
        status,
        status_code: row.get("status_code"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        submitted_at: row.get("submitted_at"),
        submitted_by: row.get("submitted_by"),
        deleted_at: row.get("deleted_at"),
    })
}

fn row_to_attempt(row: &PgRow) -> Result<GatewayTransferAttempt, PayoutError> {
    let submission_id: i16 = row.get("submission_status");
    let submission_status = SubmissionStatus::from_id(submission_id).ok_or_else(|| {
        PayoutError::SystemError(format!("Invalid submission_status: {}", submission_id))
    })?;

    let gateway_status = match row.get::<Option<String>, _>("gateway_status") {
        Some(s) => Some(s.parse::<GatewayStatus>().map_err(PayoutError::SystemError)?),
        None => None,
    };

    Ok(GatewayTransferAttempt {
        id: row.get("id"),
        transfer_id: row.get("transfer_id"),
        gateway_id: row.get("gateway_id"),
        gateway_status,
        failure_code: row.get("failure_code"),
        submission_status,
        bank_last4: row.get("bank_last4"),
        submitted_at: row.get("submitted_at"),
        last_event_at: row.get("last_event_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_intermediate(row: &PgRow) -> IntermediateTransfer {
    IntermediateTransfer {
        id: row.get("id"),
        transfer_id: row.get("transfer_id"),
        payee_account_id: row.get("payee_account_id"),
        currency: row.get("currency"),
        amount: row.get("amount"),
        gateway_transfer_id: row.get("gateway_transfer_id"),
        gateway_status: row.get("gateway_status"),
        submitted_at: row.get("submitted_at"),
    }
}

#[async_trait]
impl PayeeAccountRepository for PgPayoutStore {
    async fn get(&self, id: PayeeAccountId) -> Result<Option<PayeeAccount>, PayoutError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payee_accounts_tb WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_by_payout_day(
        &self,
        day: Weekday,
        after_id: PayeeAccountId,
        limit: i64,
    ) -> Result<Vec<PayeeAccount>, PayoutError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payee_accounts_tb WHERE payout_day = $1 AND id > $2 \
             ORDER BY id ASC LIMIT $3",
            ACCOUNT_COLUMNS
        ))
        .bind(day.to_string())
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }
}

#[async_trait]
impl TransactionRepository for PgPayoutStore {
    async fn list_unattached(
        &self,
        payee_account_id: PayeeAccountId,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PayoutError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payee_account_id, amount, transfer_id, created_at
            FROM transactions_tb
            WHERE payee_account_id = $1
              AND transfer_id IS NULL
              AND created_at < $2
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY id ASC
            "#,
        )
        .bind(payee_account_id)
        .bind(end)
        .bind(start)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_transaction).collect())
    }

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<Transaction>, PayoutError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payee_account_id, amount, transfer_id, created_at
            FROM transactions_tb
            WHERE transfer_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(transfer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_transaction).collect())
    }

    async fn assign_transfer(
        &self,
        ids: &[TransactionId],
        transfer_id: TransferId,
    ) -> Result<u64, PayoutError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions_tb
            SET transfer_id = $1, updated_at = NOW()
            WHERE id = ANY($2) AND transfer_id IS NULL
            "#,
        )
        .bind(transfer_id)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn unassign_transfer(&self, transfer_id: TransferId) -> Result<u64, PayoutError> {
        let result = sqlx::query(
            "UPDATE transactions_tb SET transfer_id = NULL, updated_at = NOW() WHERE transfer_id = $1",
        )
        .bind(transfer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransferRepository for PgPayoutStore {
    async fn create(&self, new: NewTransfer) -> Result<Transfer, PayoutError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transfers_tb
                (payee_account_id, currency, subtotal, amount, method, status, created_by,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(new.payee_account_id)
        .bind(&new.currency)
        .bind(new.amount)
        .bind(new.method.map(|m| m.as_str()))
        .bind(new.status.id())
        .bind(new.created_by)
        .fetch_one(&self.pool)
        .await?;

        row_to_transfer(&row)
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, PayoutError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers_tb WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
        status_code: Option<&str>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE transfers_tb
            SET status = $1, status_code = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.id())
        .bind(status_code)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool, PayoutError> {
        let result = sqlx::query(
            r#"
            UPDATE transfers_tb
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new_status.id())
        .bind(id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_submitted(
        &self,
        id: TransferId,
        status: TransferStatus,
        method: TransferMethod,
        submitted_by: Option<ActorId>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE transfers_tb
            SET status = $1, status_code = NULL, method = $2, submitted_by = $3,
                submitted_at = $4, updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(status.id())
        .bind(method.as_str())
        .bind(submitted_by)
        .bind(submitted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_deleted(
        &self,
        id: TransferId,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE transfers_tb
            SET status = $1, deleted_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(TransferStatus::Deleted.id())
        .bind(deleted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_stuck(
        &self,
        statuses: &[TransferStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError> {
        let status_ids: Vec<i16> = statuses.iter().map(|s| s.id()).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transfers_tb
            WHERE status = ANY($1)
              AND created_at < $2
              AND submitted_at IS NULL
              AND deleted_at IS NULL
            ORDER BY id ASC
            LIMIT $3
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(&status_ids)
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transfer).collect()
    }

    async fn find_submitted_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transfers_tb
            WHERE submitted_at >= $1
              AND method = $2
            ORDER BY submitted_at ASC
            LIMIT $3
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(since)
        .bind(TransferMethod::Gateway.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transfer).collect()
    }
}

#[async_trait]
impl GatewayAttemptRepository for PgPayoutStore {
    async fn create(&self, transfer_id: TransferId) -> Result<GatewayTransferAttempt, PayoutError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO gateway_attempts_tb (transfer_id, submission_status, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(transfer_id)
        .bind(SubmissionStatus::Submitting.id())
        .fetch_one(&self.pool)
        .await?;

        row_to_attempt(&row)
    }

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM gateway_attempts_tb WHERE transfer_id = $1 ORDER BY id ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(transfer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }

    async fn get_latest(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gateway_attempts_tb WHERE transfer_id = $1 ORDER BY id DESC LIMIT 1",
            ATTEMPT_COLUMNS
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    async fn get_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gateway_attempts_tb WHERE gateway_id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(gateway_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    async fn mark_submitted(
        &self,
        id: AttemptId,
        gateway_id: &str,
        gateway_status: GatewayStatus,
        bank_last4: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE gateway_attempts_tb
            SET submission_status = $1, gateway_id = $2, gateway_status = $3,
                bank_last4 = $4, submitted_at = $5, updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(SubmissionStatus::Submitted.id())
        .bind(gateway_id)
        .bind(gateway_status.as_str())
        .bind(bank_last4)
        .bind(submitted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed_to_submit(
        &self,
        id: AttemptId,
        failure_code: Option<&str>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE gateway_attempts_tb
            SET submission_status = $1, failure_code = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(SubmissionStatus::FailedToSubmit.id())
        .bind(failure_code)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_gateway_status(
        &self,
        id: AttemptId,
        status: GatewayStatus,
        failure_code: Option<&str>,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PayoutError> {
        // failed is sticky; events only move forward in gateway time
        let result = sqlx::query(
            r#"
            UPDATE gateway_attempts_tb
            SET gateway_status = $1,
                failure_code = COALESCE($2, failure_code),
                last_event_at = COALESCE($3, last_event_at),
                updated_at = NOW()
            WHERE id = $4
              AND (gateway_status IS NULL OR gateway_status <> $5)
              AND ($3::timestamptz IS NULL OR last_event_at IS NULL OR last_event_at < $3)
            "#,
        )
        .bind(status.as_str())
        .bind(failure_code)
        .bind(event_at)
        .bind(id)
        .bind(GatewayStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_submitting(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM gateway_attempts_tb
            WHERE submission_status = $1 AND updated_at < $2
            ORDER BY id ASC
            LIMIT $3
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(SubmissionStatus::Submitting.id())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }
}

#[async_trait]
impl IntermediateTransferRepository for PgPayoutStore {
    async fn get_by_transfer_id(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<IntermediateTransfer>, PayoutError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM intermediate_transfers_tb WHERE transfer_id = $1",
            INTERMEDIATE_COLUMNS
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_intermediate))
    }

    async fn create(
        &self,
        transfer_id: TransferId,
        payee_account_id: PayeeAccountId,
        currency: &str,
        amount: Amount,
    ) -> Result<IntermediateTransfer, PayoutError> {
        // transfer_id is UNIQUE: a concurrent creator loses here
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO intermediate_transfers_tb
                (transfer_id, payee_account_id, currency, amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING {}
            "#,
            INTERMEDIATE_COLUMNS
        ))
        .bind(transfer_id)
        .bind(payee_account_id)
        .bind(currency)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_intermediate(&row))
    }

    async fn update_amount(&self, id: i64, amount: Amount) -> Result<(), PayoutError> {
        sqlx::query(
            "UPDATE intermediate_transfers_tb SET amount = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(amount.max(0))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_submitted(
        &self,
        id: i64,
        gateway_transfer_id: &str,
        gateway_status: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        sqlx::query(
            r#"
            UPDATE intermediate_transfers_tb
            SET gateway_transfer_id = $1, gateway_status = $2, submitted_at = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(gateway_transfer_id)
        .bind(gateway_status)
        .bind(submitted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
