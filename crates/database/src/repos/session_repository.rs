//! Session repository for database operations.

use crate::entities::{new_id, now_timestamp, CreateSessionRequest, UserSession};
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::SqlitePool;

/// Repository for login sessions
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &CreateSessionRequest) -> DatabaseResult<UserSession> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, session_token, expires_at, ip_address, user_agent, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(&request.user_id)
        .bind(&request.session_token)
        .bind(&request.expires_at)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created session not found".to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<UserSession>> {
        let row = sqlx::query("SELECT * FROM user_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(UserSession::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Deactivate one session. Returns false when it was already inactive.
    pub async fn deactivate(&self, id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("UPDATE user_sessions SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every session of a user except `keep`.
    pub async fn deactivate_all_for_user(
        &self,
        user_id: &str,
        keep: Option<&str>,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1 AND (? IS NULL OR id != ?)",
        )
        .bind(user_id)
        .bind(keep)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn purge_expired(&self, now: &str) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ? OR is_active = 0")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::UserRepository;
    use crate::test_support::{create_client, test_pool};

    fn session_for(user_id: &str, token: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            user_id: user_id.to_string(),
            session_token: token.to_string(),
            expires_at: "2999-01-01T00:00:00Z".to_string(),
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn deactivating_all_sessions_can_keep_the_current_one() {
        let (pool, _dir) = test_pool().await;
        let user = create_client(&UserRepository::new(pool.clone()), "frank@example.com").await;
        let repo = SessionRepository::new(pool);

        let current = repo.create(&session_for(&user.id, "a")).await.unwrap();
        let other = repo.create(&session_for(&user.id, "b")).await.unwrap();

        let closed = repo
            .deactivate_all_for_user(&user.id, Some(&current.id))
            .await
            .unwrap();
        assert_eq!(closed, 1);
        assert!(repo.find_by_id(&current.id).await.unwrap().unwrap().is_active);
        assert!(!repo.find_by_id(&other.id).await.unwrap().unwrap().is_active);

        assert!(repo.deactivate(&current.id).await.unwrap());
        assert!(!repo.deactivate(&current.id).await.unwrap());
    }
}
