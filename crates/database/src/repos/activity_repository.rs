//! Append-only activity log.

use crate::entities::{
    json_text, new_id, now_timestamp, ActivityFilter, ActivityLog, CreateActivityLogRequest,
};
use crate::types::{DatabaseResult, Page, Pagination};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct ActivityRepository {
    pool: SqlitePool,
}

impl ActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, request: &CreateActivityLogRequest) -> DatabaseResult<String> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO activity_logs (id, user_id, action, entity_type, entity_id, old_values, new_values, \
             ip_address, user_agent, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.user_id)
        .bind(&request.action)
        .bind(&request.entity_type)
        .bind(&request.entity_id)
        .bind(json_text(&request.old_values))
        .bind(json_text(&request.new_values))
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list(
        &self,
        filter: &ActivityFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<ActivityLog>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM activity_logs WHERE 1 = 1");
        push_activity_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM activity_logs WHERE 1 = 1");
        push_activity_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(ActivityLog::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }
}

fn push_activity_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ActivityFilter) {
    if let Some(action) = &filter.action {
        query.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(entity_type) = &filter.entity_type {
        query.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(user_id) = &filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id.clone());
    }
}
