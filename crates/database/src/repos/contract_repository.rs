//! Contract and signature repository.
//!
//! Every status change is a guarded update on the expected previous status,
//! so two concurrent requests cannot both move the same contract.

use crate::entities::{
    enum_column, new_id, now_timestamp, Contract, ContractFilter, ContractSignature,
    ContractStatus, CreateContractRequest, CreateSignatureRequest, UpdateContractRequest,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct ContractRepository {
    pool: SqlitePool,
}

impl ContractRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateContractRequest) -> DatabaseResult<Contract> {
        let id = new_id();
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO contracts (id, project_id, client_id, contract_number, title, content, amount, currency, \
             status, created_date, expiry_date, terms_and_conditions, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.client_id)
        .bind(&request.contract_number)
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&now)
        .bind(&request.expiry_date)
        .bind(&request.terms_and_conditions)
        .bind(&request.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.require(&id).await
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Contract>> {
        let row = sqlx::query("SELECT * FROM contracts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Contract::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(
        &self,
        filter: &ContractFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<Contract>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM contracts WHERE 1 = 1");
        push_contract_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM contracts WHERE 1 = 1");
        push_contract_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Contract::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Edit a contract while it is still a draft.
    pub async fn update_draft(
        &self,
        id: &str,
        request: &UpdateContractRequest,
    ) -> DatabaseResult<Option<Contract>> {
        let result = sqlx::query(
            "UPDATE contracts SET title = COALESCE(?, title), content = COALESCE(?, content), \
             amount = COALESCE(?, amount), expiry_date = COALESCE(?, expiry_date), \
             terms_and_conditions = COALESCE(?, terms_and_conditions), updated_at = ? \
             WHERE id = ? AND status = 'draft'",
        )
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.amount)
        .bind(&request.expiry_date)
        .bind(&request.terms_and_conditions)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// `draft -> sent`
    pub async fn mark_sent(&self, id: &str, sent_date: &str) -> DatabaseResult<Option<Contract>> {
        self.guarded_update(
            id,
            &[ContractStatus::Draft],
            ContractStatus::Sent,
            Some(("sent_date", sent_date)),
        )
        .await
    }

    /// `signed -> active`
    pub async fn mark_active(&self, id: &str) -> DatabaseResult<Option<Contract>> {
        self.guarded_update(id, &[ContractStatus::Signed], ContractStatus::Active, None)
            .await
    }

    /// `active -> completed`
    pub async fn mark_completed(
        &self,
        id: &str,
        completion_date: &str,
    ) -> DatabaseResult<Option<Contract>> {
        self.guarded_update(
            id,
            &[ContractStatus::Active],
            ContractStatus::Completed,
            Some(("completion_date", completion_date)),
        )
        .await
    }

    /// `sent -> expired`
    pub async fn mark_expired(&self, id: &str) -> DatabaseResult<Option<Contract>> {
        self.guarded_update(id, &[ContractStatus::Sent], ContractStatus::Expired, None)
            .await
    }

    /// Cancel from any non-terminal status, appending the reason to the terms.
    pub async fn mark_cancelled(
        &self,
        id: &str,
        from: ContractStatus,
        reason: Option<&str>,
    ) -> DatabaseResult<Option<Contract>> {
        let note = reason.map(|reason| format!("Cancellation reason: {reason}"));
        let result = sqlx::query(
            "UPDATE contracts SET status = 'cancelled', updated_at = ?, \
             terms_and_conditions = CASE \
                 WHEN ? IS NULL THEN terms_and_conditions \
                 WHEN terms_and_conditions IS NULL OR terms_and_conditions = '' THEN ? \
                 ELSE terms_and_conditions || char(10) || char(10) || ? END \
             WHERE id = ? AND status = ?",
        )
        .bind(now_timestamp())
        .bind(&note)
        .bind(&note)
        .bind(&note)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Insert the signature and move `sent -> signed` atomically.
    ///
    /// Fails with [`DatabaseError::Duplicate`] when this signer already signed
    /// and [`DatabaseError::Conflict`] when the contract left `sent` meanwhile.
    pub async fn sign(
        &self,
        request: &CreateSignatureRequest,
        signed_date: &str,
    ) -> DatabaseResult<(Contract, ContractSignature)> {
        let signature_id = new_id();
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO contract_signatures (id, contract_id, signer_id, signature_path, signed_at, \
             ip_address, user_agent, verification_status) VALUES (?, ?, ?, ?, ?, ?, ?, 'valid')",
        )
        .bind(&signature_id)
        .bind(&request.contract_id)
        .bind(&request.signer_id)
        .bind(&request.signature_path)
        .bind(&now)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE contracts SET status = 'signed', signed_date = ?, updated_at = ? \
             WHERE id = ? AND status = 'sent'",
        )
        .bind(signed_date)
        .bind(&now)
        .bind(&request.contract_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "contract {} is no longer awaiting signature",
                request.contract_id
            )));
        }

        let contract_row = sqlx::query("SELECT * FROM contracts WHERE id = ?")
            .bind(&request.contract_id)
            .fetch_one(&mut *tx)
            .await?;
        let signature_row = sqlx::query("SELECT * FROM contract_signatures WHERE id = ?")
            .bind(&signature_id)
            .fetch_one(&mut *tx)
            .await?;
        let signed = (
            Contract::from_row(&contract_row)?,
            ContractSignature::from_row(&signature_row)?,
        );

        tx.commit().await?;
        Ok(signed)
    }

    pub async fn signatures(&self, contract_id: &str) -> DatabaseResult<Vec<ContractSignature>> {
        let rows = sqlx::query(
            "SELECT * FROM contract_signatures WHERE contract_id = ? ORDER BY signed_at",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(ContractSignature::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn has_signed(&self, contract_id: &str, signer_id: &str) -> DatabaseResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contract_signatures WHERE contract_id = ? AND signer_id = ?",
        )
        .bind(contract_id)
        .bind(signer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Expire every sent contract past its expiry date.
    pub async fn expire_overdue(&self, today: &str) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE contracts SET status = 'expired', updated_at = ? \
             WHERE status = 'sent' AND expiry_date IS NOT NULL AND expiry_date < ?",
        )
        .bind(now_timestamp())
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Contracts awaiting signature whose expiry date has passed.
    pub async fn count_lapsed(&self, today: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contracts WHERE (status = 'expired') \
             OR (status = 'sent' AND expiry_date IS NOT NULL AND expiry_date < ?)",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_by_status(&self) -> DatabaseResult<Vec<(ContractStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM contracts GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(ContractStatus, i64), sqlx::Error> {
                Ok((enum_column(row, "status")?, row.try_get("total")?))
            })
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn sum_amount(&self, statuses: &[ContractStatus]) -> DatabaseResult<f64> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COALESCE(SUM(amount), 0.0) FROM contracts WHERE status IN (",
        );
        let mut separated = query.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        let total = query.build_query_scalar::<f64>().fetch_one(&self.pool).await?;
        Ok(total)
    }

    async fn guarded_update(
        &self,
        id: &str,
        from: &[ContractStatus],
        to: ContractStatus,
        stamp: Option<(&'static str, &str)>,
    ) -> DatabaseResult<Option<Contract>> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE contracts SET status = ");
        query.push_bind(to.as_str());
        query.push(", updated_at = ").push_bind(now_timestamp());
        if let Some((column, value)) = stamp {
            query.push(", ").push(column).push(" = ").push_bind(value.to_string());
        }
        query.push(" WHERE id = ").push_bind(id.to_string());
        query.push(" AND status IN (");
        let mut separated = query.separated(", ");
        for status in from {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn require(&self, id: &str) -> DatabaseResult<Contract> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("contract {id}")))
    }
}

fn push_contract_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ContractFilter) {
    if let Some(client_id) = &filter.client_id {
        query.push(" AND client_id = ").push_bind(client_id.clone());
    }
    if let Some(project_id) = &filter.project_id {
        query.push(" AND project_id = ").push_bind(project_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::{ProjectRepository, UserRepository};
    use crate::test_support::{create_admin, create_client, create_project, test_pool};

    async fn draft_contract(pool: &SqlitePool) -> (ContractRepository, Contract) {
        let users = UserRepository::new(pool.clone());
        let client = create_client(&users, "jane@example.com").await;
        let admin = create_admin(&users, "root@example.com").await;
        let project = create_project(&ProjectRepository::new(pool.clone()), &client.id).await;
        let repo = ContractRepository::new(pool.clone());
        let contract = repo
            .create(&CreateContractRequest {
                project_id: project.id,
                client_id: client.id,
                contract_number: "CON-20240101-ABCDEF12".into(),
                title: "Website build".into(),
                content: "Scope of work".into(),
                amount: 1200.0,
                currency: "OMR".into(),
                expiry_date: "2999-12-31".into(),
                terms_and_conditions: None,
                created_by: admin.id,
            })
            .await
            .unwrap();
        (repo, contract)
    }

    #[tokio::test]
    async fn second_signature_by_same_signer_is_a_duplicate() {
        let (pool, _dir) = test_pool().await;
        let (repo, contract) = draft_contract(&pool).await;
        assert_eq!(contract.status, ContractStatus::Draft);

        repo.mark_sent(&contract.id, "2024-01-02").await.unwrap().unwrap();
        let request = CreateSignatureRequest {
            contract_id: contract.id.clone(),
            signer_id: contract.client_id.clone(),
            signature_path: "contracts/x/sig.png".into(),
            ip_address: None,
            user_agent: None,
        };

        let (signed, signature) = repo.sign(&request, "2024-01-03").await.unwrap();
        assert_eq!(signed.status, ContractStatus::Signed);
        assert_eq!(signed.signed_date.as_deref(), Some("2024-01-03"));
        assert_eq!(signature.signer_id, contract.client_id);

        let err = repo.sign(&request, "2024-01-04").await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(repo.signatures(&contract.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn signing_requires_sent_status() {
        let (pool, _dir) = test_pool().await;
        let (repo, contract) = draft_contract(&pool).await;

        let err = repo
            .sign(
                &CreateSignatureRequest {
                    contract_id: contract.id.clone(),
                    signer_id: contract.client_id.clone(),
                    signature_path: "contracts/x/sig.png".into(),
                    ip_address: None,
                    user_agent: None,
                },
                "2024-01-03",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
        assert!(!repo.has_signed(&contract.id, &contract.client_id).await.unwrap());
    }

    #[tokio::test]
    async fn guarded_transitions_and_cancellation_note() {
        let (pool, _dir) = test_pool().await;
        let (repo, contract) = draft_contract(&pool).await;

        assert!(repo.mark_active(&contract.id).await.unwrap().is_none());
        let cancelled = repo
            .mark_cancelled(&contract.id, ContractStatus::Draft, Some("client withdrew"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, ContractStatus::Cancelled);
        assert_eq!(
            cancelled.terms_and_conditions.as_deref(),
            Some("Cancellation reason: client withdrew")
        );
        assert!(repo.mark_sent(&contract.id, "2024-01-02").await.unwrap().is_none());
    }
}
