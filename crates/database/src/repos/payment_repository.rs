//! Payment repository, including atomic application of gateway webhook events.

use crate::entities::{
    enum_column, new_id, now_timestamp, CreatePaymentRequest, GatewayEventOutcome,
    GatewayEventRecord, Payment, PaymentFilter, PaymentStatus,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

#[derive(Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreatePaymentRequest) -> DatabaseResult<Payment> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_payment(&mut conn, request, None, None, false).await?;
        drop(conn);
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created payment not found".to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Payment::from_row).transpose().map_err(Into::into)
    }

    pub async fn find_by_transaction_id(&self, transaction_id: &str) -> DatabaseResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Payment::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<Payment>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM payments WHERE 1 = 1");
        push_payment_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM payments WHERE 1 = 1");
        push_payment_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Payment::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Bind a gateway payment intent to a local payment and move it to
    /// `processing`. Returns `None` when the payment is not in `allowed_from`.
    pub async fn attach_intent(
        &self,
        id: &str,
        transaction_id: &str,
        gateway: &str,
        allowed_from: &[PaymentStatus],
    ) -> DatabaseResult<Option<Payment>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE payments SET status = 'processing', transaction_id = ",
        );
        query
            .push_bind(transaction_id.to_string())
            .push(", payment_gateway = ")
            .push_bind(gateway.to_string())
            .push(", updated_at = ")
            .push_bind(now_timestamp())
            .push(" WHERE id = ")
            .push_bind(id.to_string());
        push_status_guard(&mut query, allowed_from);

        let result = query.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Guarded status change. Returns `None` when the payment is not in `from`.
    pub async fn mark_status(
        &self,
        id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        paid_date: Option<&str>,
        gateway_response: Option<&Value>,
    ) -> DatabaseResult<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        let changed =
            update_status(&mut conn, id, from, to, paid_date, gateway_response, None).await?;
        drop(conn);
        if !changed {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Apply a verified gateway event exactly once.
    ///
    /// The event id is recorded first; a repeated id is reported as
    /// [`GatewayEventOutcome::Duplicate`] and nothing else is touched. The
    /// payment is located by transaction id, then by the local id carried in
    /// the gateway metadata, and finally created from `fallback`.
    pub async fn apply_gateway_event(
        &self,
        event: &GatewayEventRecord,
    ) -> DatabaseResult<GatewayEventOutcome> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            "INSERT INTO payment_events (id, gateway_event_id, event_type, payment_id, received_at) \
             VALUES (?, ?, ?, NULL, ?) ON CONFLICT(gateway_event_id) DO NOTHING",
        )
        .bind(new_id())
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            debug!(event_id = %event.event_id, "gateway event already processed");
            return Ok(GatewayEventOutcome::Duplicate);
        }

        let mut payment = fetch_by_transaction(&mut tx, &event.transaction_id).await?;

        if payment.is_none() {
            if let Some(payment_id) = &event.payment_id {
                sqlx::query(
                    "UPDATE payments SET transaction_id = ?, updated_at = ? \
                     WHERE id = ? AND transaction_id IS NULL",
                )
                .bind(&event.transaction_id)
                .bind(&now)
                .bind(payment_id)
                .execute(&mut *tx)
                .await?;
                payment = fetch_by_transaction(&mut tx, &event.transaction_id).await?;
            }
        }

        let outcome = match payment {
            Some(current) if current.status == event.target_status => {
                GatewayEventOutcome::Ignored(Some(current))
            }
            Some(current) if event.allowed_from.contains(&current.status) => {
                let changed = update_status(
                    &mut tx,
                    &current.id,
                    &[current.status],
                    event.target_status,
                    event.paid_date.as_deref(),
                    Some(&event.gateway_response),
                    Some(&event.gateway_name),
                )
                .await?;
                match fetch_by_transaction(&mut tx, &event.transaction_id).await? {
                    Some(updated) if changed => GatewayEventOutcome::Applied(updated),
                    other => GatewayEventOutcome::Ignored(other),
                }
            }
            Some(current) => GatewayEventOutcome::Ignored(Some(current)),
            None => match &event.fallback {
                Some(fallback) => {
                    insert_payment(
                        &mut tx,
                        fallback,
                        Some(&event.gateway_response),
                        event.paid_date.as_deref(),
                        true,
                    )
                    .await?;
                    match fetch_by_transaction(&mut tx, &event.transaction_id).await? {
                        Some(created) => GatewayEventOutcome::Created(created),
                        None => GatewayEventOutcome::Ignored(None),
                    }
                }
                None => GatewayEventOutcome::Ignored(None),
            },
        };

        let payment_id = match &outcome {
            GatewayEventOutcome::Applied(payment)
            | GatewayEventOutcome::Created(payment)
            | GatewayEventOutcome::Ignored(Some(payment)) => Some(payment.id.clone()),
            _ => None,
        };
        if let Some(payment_id) = payment_id {
            sqlx::query("UPDATE payment_events SET payment_id = ? WHERE gateway_event_id = ?")
                .bind(payment_id)
                .bind(&event.event_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn count_by_status(&self) -> DatabaseResult<Vec<(PaymentStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM payments GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(PaymentStatus, i64), sqlx::Error> {
                Ok((enum_column(row, "status")?, row.try_get("total")?))
            })
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Sum of payment amounts in `status`, optionally limited to payments
    /// updated at or after `since`.
    pub async fn sum_amount(&self, status: PaymentStatus, since: Option<&str>) -> DatabaseResult<f64> {
        let total = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0.0) FROM payments WHERE status = ? AND (? IS NULL OR updated_at >= ?)",
        )
        .bind(status.as_str())
        .bind(since)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    pub async fn count_overdue(&self, today: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE status = 'pending' AND due_date IS NOT NULL AND due_date < ?",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn recent(&self, client_id: Option<&str>, limit: i64) -> DatabaseResult<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT * FROM payments WHERE (? IS NULL OR client_id = ?) ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(client_id)
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Payment::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }
}

async fn fetch_by_transaction(
    conn: &mut SqliteConnection,
    transaction_id: &str,
) -> DatabaseResult<Option<Payment>> {
    let row = sqlx::query("SELECT * FROM payments WHERE transaction_id = ?")
        .bind(transaction_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Payment::from_row).transpose().map_err(Into::into)
}

async fn insert_payment(
    conn: &mut SqliteConnection,
    request: &CreatePaymentRequest,
    gateway_response: Option<&Value>,
    paid_date: Option<&str>,
    ignore_existing_transaction: bool,
) -> DatabaseResult<String> {
    let id = new_id();
    let now = now_timestamp();
    let mut sql = String::from(
        "INSERT INTO payments (id, project_id, milestone_id, contract_id, client_id, amount, currency, \
         payment_gateway, transaction_id, gateway_response, status, due_date, paid_date, description, \
         invoice_number, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    );
    if ignore_existing_transaction {
        sql.push_str(" ON CONFLICT(transaction_id) DO NOTHING");
    }

    sqlx::query(&sql)
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.milestone_id)
        .bind(&request.contract_id)
        .bind(&request.client_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&request.payment_gateway)
        .bind(&request.transaction_id)
        .bind(gateway_response.map(Value::to_string))
        .bind(request.status.as_str())
        .bind(&request.due_date)
        .bind(paid_date)
        .bind(&request.description)
        .bind(&request.invoice_number)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

async fn update_status(
    conn: &mut SqliteConnection,
    id: &str,
    from: &[PaymentStatus],
    to: PaymentStatus,
    paid_date: Option<&str>,
    gateway_response: Option<&Value>,
    gateway: Option<&str>,
) -> DatabaseResult<bool> {
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE payments SET status = ");
    query
        .push_bind(to.as_str())
        .push(", updated_at = ")
        .push_bind(now_timestamp())
        .push(", paid_date = COALESCE(")
        .push_bind(paid_date.map(str::to_string))
        .push(", paid_date), gateway_response = COALESCE(")
        .push_bind(gateway_response.map(Value::to_string))
        .push(", gateway_response), payment_gateway = COALESCE(payment_gateway, ")
        .push_bind(gateway.map(str::to_string))
        .push(") WHERE id = ")
        .push_bind(id.to_string());
    push_status_guard(&mut query, from);

    let result = query.build().execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

fn push_status_guard(query: &mut QueryBuilder<'_, Sqlite>, allowed: &[PaymentStatus]) {
    if allowed.is_empty() {
        query.push(" AND 1 = 0");
        return;
    }
    query.push(" AND status IN (");
    let mut separated = query.separated(", ");
    for status in allowed {
        separated.push_bind(status.as_str());
    }
    separated.push_unseparated(")");
}

fn push_payment_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &PaymentFilter) {
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

    async fn pending_payment(pool: &SqlitePool) -> (PaymentRepository, Payment) {
        let client = create_client(&UserRepository::new(pool.clone()), "hana@example.com").await;
        let project = create_project(&ProjectRepository::new(pool.clone()), &client.id).await;
        let repo = PaymentRepository::new(pool.clone());
        let payment = repo
            .create(&CreatePaymentRequest {
                project_id: project.id,
                milestone_id: None,
                contract_id: None,
                client_id: client.id,
                amount: 250.0,
                currency: "OMR".into(),
                description: Some("Deposit".into()),
                due_date: Some("2024-02-01".into()),
                invoice_number: None,
                status: PaymentStatus::Pending,
                payment_gateway: None,
                transaction_id: None,
            })
            .await
            .unwrap();
        (repo, payment)
    }

    fn succeeded_event(event_id: &str, payment: &Payment) -> GatewayEventRecord {
        GatewayEventRecord {
            event_id: event_id.into(),
            event_type: "payment_intent.succeeded".into(),
            transaction_id: "pi_123".into(),
            payment_id: Some(payment.id.clone()),
            target_status: PaymentStatus::Succeeded,
            allowed_from: vec![PaymentStatus::Pending, PaymentStatus::Processing],
            gateway_name: "stripe".into(),
            gateway_response: json!({ "id": "pi_123" }),
            paid_date: Some("2024-01-15".into()),
            fallback: None,
        }
    }

    #[tokio::test]
    async fn replayed_event_is_applied_once() {
        let (pool, _dir) = test_pool().await;
        let (repo, payment) = pending_payment(&pool).await;

        let first = repo.apply_gateway_event(&succeeded_event("evt_1", &payment)).await.unwrap();
        let GatewayEventOutcome::Applied(applied) = first else {
            panic!("expected the first delivery to apply, got {first:?}");
        };
        assert_eq!(applied.status, PaymentStatus::Succeeded);
        assert_eq!(applied.transaction_id.as_deref(), Some("pi_123"));
        assert_eq!(applied.paid_date.as_deref(), Some("2024-01-15"));

        let replay = repo.apply_gateway_event(&succeeded_event("evt_1", &payment)).await.unwrap();
        assert_eq!(replay, GatewayEventOutcome::Duplicate);

        let other_event = repo.apply_gateway_event(&succeeded_event("evt_2", &payment)).await.unwrap();
        assert!(matches!(other_event, GatewayEventOutcome::Ignored(Some(_))));
    }

    #[tokio::test]
    async fn unknown_transaction_uses_fallback_record() {
        let (pool, _dir) = test_pool().await;
        let (repo, payment) = pending_payment(&pool).await;

        let mut event = succeeded_event("evt_9", &payment);
        event.transaction_id = "pi_new".into();
        event.payment_id = None;
        event.fallback = Some(CreatePaymentRequest {
            project_id: payment.project_id.clone(),
            milestone_id: None,
            contract_id: None,
            client_id: payment.client_id.clone(),
            amount: 99.5,
            currency: "OMR".into(),
            description: None,
            due_date: None,
            invoice_number: None,
            status: PaymentStatus::Succeeded,
            payment_gateway: Some("stripe".into()),
            transaction_id: Some("pi_new".into()),
        });

        let outcome = repo.apply_gateway_event(&event).await.unwrap();
        let GatewayEventOutcome::Created(created) = outcome else {
            panic!("expected a created payment, got {outcome:?}");
        };
        assert_eq!(created.amount, 99.5);
        assert_eq!(created.status, PaymentStatus::Succeeded);
        assert_eq!(
            repo.find_by_transaction_id("pi_new").await.unwrap().map(|p| p.id),
            Some(created.id)
        );
    }

    #[tokio::test]
    async fn guarded_status_changes() {
        let (pool, _dir) = test_pool().await;
        let (repo, payment) = pending_payment(&pool).await;

        let processing = repo
            .attach_intent(&payment.id, "pi_abc", "stripe", &[PaymentStatus::Pending, PaymentStatus::Failed])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processing.status, PaymentStatus::Processing);

        assert!(repo
            .mark_status(&payment.id, &[PaymentStatus::Succeeded], PaymentStatus::Refunded, None, None)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.count_overdue("2024-03-01").await.unwrap(), 0);
        assert_eq!(repo.sum_amount(PaymentStatus::Succeeded, None).await.unwrap(), 0.0);
    }
}
