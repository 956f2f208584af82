use portal_database::{
    ActivityFilter, ActivityLog, ActivityRepository, CreateActivityLogRequest, Page, Pagination,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::warn;

use crate::actor::{Actor, RequestOrigin};
use crate::error::ServiceResult;

pub const DEFAULT_ACTIVITY_PAGE_SIZE: u32 = 50;

/// One audit entry to append
#[derive(Debug, Clone, Default)]
pub struct ActivityEntry {
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

impl ActivityEntry {
    pub fn new(action: impl Into<String>, entity_type: &str, entity_id: &str) -> Self {
        Self {
            action: action.into(),
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Self::default()
        }
    }

    pub fn old(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

#[derive(Clone)]
pub struct ActivityService {
    logs: ActivityRepository,
}

impl ActivityService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            logs: ActivityRepository::new(pool),
        }
    }

    /// Append an entry. The audit trail never fails the operation it
    /// describes, so errors are only logged.
    pub async fn record(&self, actor: Option<&Actor>, entry: ActivityEntry) {
        let origin = actor.map(|actor| actor.client.clone()).unwrap_or_default();
        self.record_from(actor.map(|actor| actor.user_id.as_str()), &origin, entry)
            .await;
    }

    pub async fn record_from(
        &self,
        user_id: Option<&str>,
        origin: &RequestOrigin,
        entry: ActivityEntry,
    ) {
        let action = entry.action.clone();
        let request = CreateActivityLogRequest {
            user_id: user_id.map(str::to_string),
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            old_values: entry.old_values,
            new_values: entry.new_values,
            ip_address: origin.ip_address.clone(),
            user_agent: origin.user_agent.clone(),
        };

        if let Err(err) = self.logs.record(&request).await {
            warn!(%action, error = %err, "failed to write activity log");
        }
    }

    pub async fn list(
        &self,
        actor: &Actor,
        filter: &ActivityFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<ActivityLog>> {
        actor.require_admin()?;
        Ok(self.logs.list(filter, pagination).await?)
    }
}
