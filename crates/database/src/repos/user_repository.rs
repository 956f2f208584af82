//! User and profile repository for database operations.

use crate::entities::{
    new_id, now_timestamp, CreateUserRequest, UpdateProfileRequest, UpdateUserRequest,
    UpdateUserStatusRequest, User, UserFilter, UserOverview, UserProfile, UserRole,
    VerificationStatus,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, company, phone, role, \
     is_verified, is_active, created_at, updated_at, last_login_at";

/// Repository for user database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(User::from_row).transpose().map_err(Into::into)
    }

    /// Emails are stored lowercased; the lookup normalises its input the same way.
    pub async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(User::from_row).transpose().map_err(Into::into)
    }

    /// Create a user and its default profile in one transaction.
    pub async fn create(&self, request: &CreateUserRequest) -> DatabaseResult<User> {
        let now = now_timestamp();
        let user_id = new_id();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, company, phone, role, \
             is_verified, is_active, verification_token, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(request.email.trim().to_lowercase())
        .bind(&request.password_hash)
        .bind(request.first_name.trim())
        .bind(request.last_name.trim())
        .bind(&request.company)
        .bind(&request.phone)
        .bind(request.role.as_str())
        .bind(request.is_verified)
        .bind(&request.verification_token)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|err| match DatabaseError::from(err) {
            DatabaseError::Duplicate(_) => {
                DatabaseError::Duplicate(format!("email {} is already registered", request.email))
            }
            other => other,
        })?;

        sqlx::query(
            "INSERT INTO user_profiles (id, user_id, timezone, notification_preferences, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&user_id)
        .bind(request.timezone.as_deref().unwrap_or("UTC"))
        .bind(json!({"email": true, "sms": false, "push": true}).to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.find_by_id(&user_id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created user not found".to_string()))
    }

    pub async fn update_details(&self, id: &str, request: &UpdateUserRequest) -> DatabaseResult<User> {
        sqlx::query(
            "UPDATE users SET first_name = COALESCE(?, first_name), last_name = COALESCE(?, last_name), \
             company = COALESCE(?, company), phone = COALESCE(?, phone), updated_at = ? WHERE id = ?",
        )
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.company)
        .bind(&request.phone)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    pub async fn update_status(
        &self,
        id: &str,
        request: &UpdateUserStatusRequest,
    ) -> DatabaseResult<User> {
        sqlx::query(
            "UPDATE users SET is_active = COALESCE(?, is_active), is_verified = COALESCE(?, is_verified), \
             role = COALESCE(?, role), updated_at = ? WHERE id = ?",
        )
        .bind(request.is_active)
        .bind(request.is_verified)
        .bind(request.role.map(|role| role.as_str()))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    pub async fn touch_last_login(&self, id: &str) -> DatabaseResult<()> {
        let now = now_timestamp();
        sqlx::query("UPDATE users SET last_login_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_password(&self, id: &str, password_hash: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_reset_token(
        &self,
        id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE users SET reset_token_hash = ?, reset_token_expires_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Consume a reset token: the password is replaced and the token cleared
    /// only if the token is still stored and unexpired. Returns the user id.
    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: &str,
        new_password_hash: &str,
    ) -> DatabaseResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM users WHERE reset_token_hash = ? AND reset_token_expires_at > ?",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let updated = sqlx::query(
            "UPDATE users SET password_hash = ?, reset_token_hash = NULL, reset_token_expires_at = NULL, \
             updated_at = ? WHERE id = ? AND reset_token_hash = ?",
        )
        .bind(new_password_hash)
        .bind(now)
        .bind(&user_id)
        .bind(token_hash)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query("UPDATE user_sessions SET is_active = 0 WHERE user_id = ?")
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(user_id))
    }

    /// Mark the account owning `token` as verified. Returns the user.
    pub async fn verify_email(&self, token: &str) -> DatabaseResult<Option<User>> {
        let user_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM users WHERE verification_token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        let Some(user_id) = user_id else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE users SET is_verified = 1, verification_token = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_timestamp())
        .bind(&user_id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&user_id).await
    }

    pub async fn list(
        &self,
        filter: &UserFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<UserOverview>> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM users u LEFT JOIN identity_verifications iv ON iv.user_id = u.id WHERE 1 = 1",
        );
        push_user_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT u.*, iv.status AS verification_status, \
             (SELECT COUNT(*) FROM projects p WHERE p.client_id = u.id) AS project_count \
             FROM users u LEFT JOIN identity_verifications iv ON iv.user_id = u.id WHERE 1 = 1",
        );
        push_user_filters(&mut query, filter);
        query
            .push(" ORDER BY u.created_at DESC, u.id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let verification: Option<String> = row.try_get("verification_status")?;
            items.push(UserOverview {
                user: User::from_row(row)?,
                project_count: row.try_get("project_count")?,
                verification_status: verification
                    .map(|status| status.parse::<VerificationStatus>())
                    .transpose()
                    .map_err(|err| DatabaseError::QueryError(err.to_string()))?,
            });
        }

        Ok(Page::new(items, total, pagination))
    }

    pub async fn list_active_admins(&self) -> DatabaseResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'admin' AND is_active = 1 ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(User::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Ids of active users, optionally restricted to one role.
    pub async fn active_user_ids(&self, role: Option<UserRole>) -> DatabaseResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM users WHERE is_active = 1 AND (? IS NULL OR role = ?) ORDER BY created_at",
        )
        .bind(role.map(|r| r.as_str()))
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn count_clients(&self) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'client'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_clients_since(&self, since: &str) -> DatabaseResult<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'client' AND created_at >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn count_verified_clients(&self) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE role = 'client' AND is_verified = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn find_profile(&self, user_id: &str) -> DatabaseResult<Option<UserProfile>> {
        let row = sqlx::query("SELECT * FROM user_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(UserProfile::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Update the profile, creating it first for accounts that predate profiles.
    pub async fn update_profile(
        &self,
        user_id: &str,
        request: &UpdateProfileRequest,
    ) -> DatabaseResult<UserProfile> {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO user_profiles (id, user_id, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(new_id())
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE user_profiles SET avatar_url = COALESCE(?, avatar_url), bio = COALESCE(?, bio), \
             website = COALESCE(?, website), timezone = COALESCE(?, timezone), \
             notification_preferences = COALESCE(?, notification_preferences), updated_at = ? \
             WHERE user_id = ?",
        )
        .bind(&request.avatar_url)
        .bind(&request.bio)
        .bind(&request.website)
        .bind(&request.timezone)
        .bind(request.notification_preferences.as_ref().map(|value| value.to_string()))
        .bind(&now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.find_profile(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("profile for user {user_id}")))
    }

    async fn require(&self, id: &str) -> DatabaseResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {id}")))
    }
}

fn push_user_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    if let Some(role) = filter.role {
        query.push(" AND u.role = ").push_bind(role.as_str());
    }
    if let Some(active) = filter.is_active {
        query.push(" AND u.is_active = ").push_bind(active);
    }
    match &filter.verification_status {
        Some(Some(status)) => {
            query.push(" AND iv.status = ").push_bind(status.as_str());
        }
        Some(None) => {
            query.push(" AND iv.id IS NULL");
        }
        None => {}
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query
            .push(" AND (u.email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.last_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.company LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_client, test_pool};

    #[tokio::test]
    async fn create_normalises_email_and_creates_profile() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);

        let user = create_client(&repo, "  Alice@Example.COM ").await;
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, UserRole::Client);

        let found = repo.find_by_email("ALICE@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id.clone()));

        let profile = repo.find_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(profile.timezone, "UTC");
        assert_eq!(profile.notification_preferences["email"], true);
    }

    #[tokio::test]
    async fn duplicate_email_is_reported_as_duplicate() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);

        create_client(&repo, "bob@example.com").await;
        let err = repo
            .create(&CreateUserRequest {
                email: "BOB@example.com".into(),
                password_hash: "hash".into(),
                first_name: "Bob".into(),
                last_name: "Again".into(),
                company: None,
                phone: None,
                role: UserRole::Client,
                is_verified: false,
                verification_token: None,
                timezone: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn reset_token_is_single_use_and_time_limited() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);
        let user = create_client(&repo, "carol@example.com").await;

        repo.set_reset_token(&user.id, "digest", "2999-01-01T00:00:00Z")
            .await
            .unwrap();
        let consumed = repo
            .consume_reset_token("digest", "2024-01-01T00:00:00Z", "new-hash")
            .await
            .unwrap();
        assert_eq!(consumed, Some(user.id.clone()));

        let again = repo
            .consume_reset_token("digest", "2024-01-01T00:00:00Z", "other-hash")
            .await
            .unwrap();
        assert!(again.is_none());

        repo.set_reset_token(&user.id, "stale", "2020-01-01T00:00:00Z")
            .await
            .unwrap();
        let expired = repo
            .consume_reset_token("stale", "2024-01-01T00:00:00Z", "hash")
            .await
            .unwrap();
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_search_and_verification() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);
        create_client(&repo, "dave@acme.test").await;
        create_client(&repo, "erin@example.com").await;

        let page = repo
            .list(
                &UserFilter {
                    search: Some("acme".into()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user.email, "dave@acme.test");
        assert_eq!(page.items[0].project_count, 0);

        let unsubmitted = repo
            .list(
                &UserFilter {
                    verification_status: Some(None),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(unsubmitted.total, 2);
    }
}
