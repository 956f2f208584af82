//! Repository for project messages and their threads.
//!
//! A thread is a root message (no parent) plus every message whose
//! `parent_message_id` points at it. Replies always hang off the root.

use crate::entities::{
    json_text, new_id, now_timestamp, CreateMessageRequest, Message, MessageFilter, MessageThread,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateMessageRequest) -> DatabaseResult<Message> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO messages (id, project_id, sender_id, recipient_id, subject, content, message_type, \
             is_read, parent_message_id, attachments, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.sender_id)
        .bind(&request.recipient_id)
        .bind(&request.subject)
        .bind(&request.content)
        .bind(request.message_type.as_str())
        .bind(&request.parent_message_id)
        .bind(json_text(&request.attachments))
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created message not found".to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Message::from_row).transpose().map_err(Into::into)
    }

    /// Thread roots matching `filter`, newest first, with reply counts.
    pub async fn list_threads(
        &self,
        filter: &MessageFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<MessageThread>> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM messages m WHERE m.parent_message_id IS NULL",
        );
        push_thread_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT m.*, (SELECT COUNT(*) FROM messages r WHERE r.parent_message_id = m.id) AS reply_count \
             FROM messages m WHERE m.parent_message_id IS NULL",
        );
        push_thread_filters(&mut query, filter);
        query
            .push(" ORDER BY m.created_at DESC, m.id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(|row| -> Result<MessageThread, sqlx::Error> {
                Ok(MessageThread {
                    message: Message::from_row(row)?,
                    reply_count: row.try_get("reply_count")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Replies to a thread root in chronological order.
    pub async fn replies(&self, root_id: &str) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE parent_message_id = ? ORDER BY created_at ASC, id",
        )
        .bind(root_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Message::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Mark one message read. Only its recipient can do so; returns false
    /// when the message was already read or belongs to someone else.
    pub async fn mark_read(&self, id: &str, recipient_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1, read_at = ? WHERE id = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a whole thread read for its recipient.
    pub async fn mark_thread_read(&self, root_id: &str, recipient_id: &str) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1, read_at = ? \
             WHERE (id = ? OR parent_message_id = ?) AND recipient_id = ? AND is_read = 0",
        )
        .bind(now_timestamp())
        .bind(root_id)
        .bind(root_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, recipient_id: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Latest messages involving `user_id`, or all users when `None`.
    pub async fn recent(&self, user_id: Option<&str>, limit: i64) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE (? IS NULL OR sender_id = ? OR recipient_id = ?) \
             ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Message::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn count_for_project(&self, project_id: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_for_user(&self, user_id: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ? OR recipient_id = ?",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn push_thread_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &MessageFilter) {
    if let Some(user_id) = &filter.participant_id {
        query
            .push(" AND (m.sender_id = ")
            .push_bind(user_id.clone())
            .push(" OR m.recipient_id = ")
            .push_bind(user_id.clone())
            .push(")");
    }
    if let Some(project_id) = &filter.project_id {
        query.push(" AND m.project_id = ").push_bind(project_id.clone());
    }
    if let Some(message_type) = filter.message_type {
        query
            .push(" AND m.message_type = ")
            .push_bind(message_type.as_str());
    }
    if let Some(user_id) = &filter.unread_for {
        query
            .push(
                " AND m.id IN (SELECT COALESCE(u.parent_message_id, u.id) FROM messages u \
                 WHERE u.is_read = 0 AND u.recipient_id = ",
            )
            .push_bind(user_id.clone())
            .push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MessageType;
    use crate::repos::{ProjectRepository, UserRepository};
    use crate::test_support::{create_admin, create_client, create_project, test_pool};

    #[tokio::test]
    async fn threads_replies_and_unread_counts() {
        let (pool, _dir) = test_pool().await;
        let users = UserRepository::new(pool.clone());
        let client = create_client(&users, "kim@example.com").await;
        let admin = create_admin(&users, "ops@example.com").await;
        let project = create_project(&ProjectRepository::new(pool.clone()), &client.id).await;
        let repo = MessageRepository::new(pool);

        let root = repo
            .create(&CreateMessageRequest {
                project_id: project.id.clone(),
                sender_id: client.id.clone(),
                recipient_id: admin.id.clone(),
                subject: Some("Kickoff".into()),
                content: "When do we start?".into(),
                message_type: MessageType::General,
                parent_message_id: None,
                attachments: None,
            })
            .await
            .unwrap();
        let reply = repo
            .create(&CreateMessageRequest {
                project_id: project.id.clone(),
                sender_id: admin.id.clone(),
                recipient_id: client.id.clone(),
                subject: None,
                content: "Monday.".into(),
                message_type: MessageType::Update,
                parent_message_id: Some(root.id.clone()),
                attachments: None,
            })
            .await
            .unwrap();

        assert_eq!(repo.unread_count(&admin.id).await.unwrap(), 1);
        assert_eq!(repo.unread_count(&client.id).await.unwrap(), 1);

        let threads = repo
            .list_threads(
                &MessageFilter {
                    unread_for: Some(client.id.clone()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(threads.total, 1);
        assert_eq!(threads.items[0].reply_count, 1);

        assert!(!repo.mark_read(&reply.id, &admin.id).await.unwrap());
        assert!(repo.mark_read(&reply.id, &client.id).await.unwrap());
        assert!(!repo.mark_read(&reply.id, &client.id).await.unwrap());
        assert_eq!(repo.unread_count(&client.id).await.unwrap(), 0);

        assert_eq!(repo.mark_thread_read(&root.id, &admin.id).await.unwrap(), 1);
        assert_eq!(repo.replies(&root.id).await.unwrap().len(), 1);
        assert_eq!(repo.count_for_project(&project.id).await.unwrap(), 2);
    }
}
