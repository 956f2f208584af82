//! Identity verification repository.

use crate::entities::{new_id, now_timestamp, IdentityVerification, VerificationStatus};
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct IdentityRepository {
    pool: SqlitePool,
}

/// Storage paths of the three identity documents
#[derive(Debug, Clone)]
pub struct IdentityDocuments {
    pub front_id_path: String,
    pub back_id_path: String,
    pub signature_path: String,
}

impl IdentityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_user(&self, user_id: &str) -> DatabaseResult<Option<IdentityVerification>> {
        let row = sqlx::query("SELECT * FROM identity_verifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(IdentityVerification::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Store new documents. A resubmission replaces the previous documents
    /// and returns the record to `pending`.
    pub async fn submit(
        &self,
        user_id: &str,
        documents: &IdentityDocuments,
    ) -> DatabaseResult<IdentityVerification> {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO identity_verifications (id, user_id, front_id_path, back_id_path, signature_path, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET front_id_path = excluded.front_id_path, \
             back_id_path = excluded.back_id_path, signature_path = excluded.signature_path, \
             status = 'pending', verified_at = NULL, verified_by = NULL, rejection_reason = NULL, \
             updated_at = excluded.updated_at",
        )
        .bind(new_id())
        .bind(user_id)
        .bind(&documents.front_id_path)
        .bind(&documents.back_id_path)
        .bind(&documents.signature_path)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.require(user_id).await
    }

    /// Record an administrator's decision. Approval also marks the user verified.
    pub async fn decide(
        &self,
        user_id: &str,
        status: VerificationStatus,
        decided_by: &str,
        rejection_reason: Option<&str>,
    ) -> DatabaseResult<IdentityVerification> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let (verified_at, verified_by, reason) = match status {
            VerificationStatus::Verified => (Some(now.as_str()), Some(decided_by), None),
            VerificationStatus::Rejected => (None, None, rejection_reason),
            VerificationStatus::Pending => (None, None, None),
        };

        let updated = sqlx::query(
            "UPDATE identity_verifications SET status = ?, verified_at = ?, verified_by = ?, \
             rejection_reason = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(status.as_str())
        .bind(verified_at)
        .bind(verified_by)
        .bind(reason)
        .bind(&now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "identity verification for user {user_id}"
            )));
        }

        if status == VerificationStatus::Verified {
            sqlx::query("UPDATE users SET is_verified = 1, updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.require(user_id).await
    }

    pub async fn count_by_status(&self, status: VerificationStatus) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM identity_verifications WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn require(&self, user_id: &str) -> DatabaseResult<IdentityVerification> {
        self.find_by_user(user_id).await?.ok_or_else(|| {
            DatabaseError::NotFound(format!("identity verification for user {user_id}"))
        })
    }
}
