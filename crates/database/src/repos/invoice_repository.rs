//! Invoice repository.

use crate::entities::{
    enum_column, json_text, new_id, now_timestamp, CreateInvoiceRequest, Invoice, InvoiceFilter,
    InvoiceStatus,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateInvoiceRequest) -> DatabaseResult<Invoice> {
        let id = new_id();
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO invoices (id, project_id, client_id, invoice_number, amount, tax_amount, total_amount, \
             currency, status, issue_date, due_date, description, line_items, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.client_id)
        .bind(&request.invoice_number)
        .bind(request.amount)
        .bind(request.tax_amount)
        .bind(request.total_amount)
        .bind(&request.currency)
        .bind(&request.issue_date)
        .bind(&request.due_date)
        .bind(&request.description)
        .bind(json_text(&request.line_items))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created invoice not found".to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Invoice>> {
        let row = sqlx::query("SELECT * FROM invoices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Invoice::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(
        &self,
        filter: &InvoiceFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<Invoice>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM invoices WHERE 1 = 1");
        push_invoice_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM invoices WHERE 1 = 1");
        push_invoice_filters(&mut query, filter);
        query
            .push(" ORDER BY issue_date DESC, created_at DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Invoice::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Guarded status change; `paid_date` is only written when given.
    pub async fn update_status(
        &self,
        id: &str,
        from: InvoiceStatus,
        to: InvoiceStatus,
        paid_date: Option<&str>,
    ) -> DatabaseResult<Option<Invoice>> {
        let result = sqlx::query(
            "UPDATE invoices SET status = ?, paid_date = COALESCE(?, paid_date), updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(paid_date)
        .bind(now_timestamp())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Flag sent invoices whose due date has passed.
    pub async fn mark_overdue(&self, today: &str) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE invoices SET status = 'overdue', updated_at = ? WHERE status = 'sent' AND due_date < ?",
        )
        .bind(now_timestamp())
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_status(&self) -> DatabaseResult<Vec<(InvoiceStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM invoices GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(InvoiceStatus, i64), sqlx::Error> {
                Ok((enum_column(row, "status")?, row.try_get("total")?))
            })
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }
}

fn push_invoice_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &InvoiceFilter) {
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
    use crate::test_support::{create_client, create_project, test_pool};
    use serde_json::json;

    #[tokio::test]
    async fn invoice_lifecycle() {
        let (pool, _dir) = test_pool().await;
        let client = create_client(&UserRepository::new(pool.clone()), "ivan@example.com").await;
        let project = create_project(&ProjectRepository::new(pool.clone()), &client.id).await;
        let repo = InvoiceRepository::new(pool);

        let invoice = repo
            .create(&CreateInvoiceRequest {
                project_id: project.id.clone(),
                client_id: client.id.clone(),
                invoice_number: "INV-20240101120000-ABC123".into(),
                amount: 100.0,
                tax_amount: 5.0,
                total_amount: 105.0,
                currency: "OMR".into(),
                issue_date: "2024-01-01".into(),
                due_date: "2024-01-31".into(),
                description: None,
                line_items: Some(json!([{ "description": "Design", "amount": 100.0 }])),
            })
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert!(invoice.line_items.is_some());

        assert!(repo
            .update_status(&invoice.id, InvoiceStatus::Sent, InvoiceStatus::Paid, Some("2024-01-05"))
            .await
            .unwrap()
            .is_none());
        repo.update_status(&invoice.id, InvoiceStatus::Draft, InvoiceStatus::Sent, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.mark_overdue("2024-02-15").await.unwrap(), 1);

        let page = repo
            .list(
                &InvoiceFilter {
                    client_id: Some(client.id),
                    status: Some(InvoiceStatus::Overdue),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
