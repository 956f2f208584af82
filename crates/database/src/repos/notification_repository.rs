//! Notification repository.

use crate::entities::{new_id, now_timestamp, CreateNotificationRequest, Notification};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateNotificationRequest) -> DatabaseResult<Notification> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_notification(&mut conn, request).await?;
        drop(conn);
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created notification not found".to_string()))
    }

    /// Insert a batch of notifications in one transaction.
    pub async fn create_many(&self, requests: &[CreateNotificationRequest]) -> DatabaseResult<u64> {
        let mut tx = self.pool.begin().await?;
        for request in requests {
            insert_notification(&mut tx, request).await?;
        }
        tx.commit().await?;
        Ok(requests.len() as u64)
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Notification>> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(Notification::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list(
        &self,
        user_id: &str,
        unread_only: bool,
        pagination: Pagination,
    ) -> DatabaseResult<Page<Notification>> {
        let total = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND (? = 0 OR is_read = 0)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ? AND (? = 0 OR is_read = 0) \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(Notification::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Returns false when the notification is missing, already read, or owned
    /// by another user.
    pub async fn mark_read(&self, id: &str, user_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE id = ? AND user_id = ? AND is_read = 0",
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE user_id = ? AND is_read = 0",
        )
        .bind(now_timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, user_id: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn delete(&self, id: &str, user_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove read notifications created before `cutoff`.
    pub async fn purge_read_older_than(&self, cutoff: &str) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE is_read = 1 AND created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_notification(
    conn: &mut SqliteConnection,
    request: &CreateNotificationRequest,
) -> DatabaseResult<String> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO notifications (id, user_id, title, message, notification_type, related_entity_type, \
         related_entity_id, is_read, action_url, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id)
    .bind(&request.user_id)
    .bind(&request.title)
    .bind(&request.message)
    .bind(&request.notification_type)
    .bind(&request.related_entity_type)
    .bind(&request.related_entity_id)
    .bind(&request.action_url)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(id)
}
