use chrono::{Duration, SecondsFormat, Utc};
use portal_database::{
    CreateNotificationRequest, Notification, NotificationRepository, Page, Pagination,
    UserRepository, UserRole,
};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};

pub const DEFAULT_PURGE_DAYS: i64 = 30;

/// Event that produced a notification; stored as its `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Message,
    MessageReply,
    ProjectSubmitted,
    ProjectStatus,
    MilestoneCompleted,
    ContractSent,
    ContractSigned,
    PaymentRequest,
    PaymentCompleted,
    IdentitySubmitted,
    VerificationDecision,
    AccountStatus,
    Broadcast,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Message => "message",
            NotificationKind::MessageReply => "message_reply",
            NotificationKind::ProjectSubmitted => "project_submitted",
            NotificationKind::ProjectStatus => "project_status",
            NotificationKind::MilestoneCompleted => "milestone_completed",
            NotificationKind::ContractSent => "contract_sent",
            NotificationKind::ContractSigned => "contract_signed",
            NotificationKind::PaymentRequest => "payment_request",
            NotificationKind::PaymentCompleted => "payment_completed",
            NotificationKind::IdentitySubmitted => "identity_submitted",
            NotificationKind::VerificationDecision => "verification",
            NotificationKind::AccountStatus => "account_status",
            NotificationKind::Broadcast => "broadcast",
        }
    }
}

/// Notification to create
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related: Option<(&'static str, String)>,
    pub action_url: Option<String>,
}

impl Notice {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            related: None,
            action_url: None,
        }
    }

    pub fn about(mut self, entity_type: &'static str, entity_id: impl Into<String>) -> Self {
        self.related = Some((entity_type, entity_id.into()));
        self
    }

    pub fn link(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    fn for_user(&self, user_id: &str) -> CreateNotificationRequest {
        CreateNotificationRequest {
            user_id: user_id.to_string(),
            title: self.title.clone(),
            message: self.message.clone(),
            notification_type: self.kind.as_str().to_string(),
            related_entity_type: self.related.as_ref().map(|(kind, _)| kind.to_string()),
            related_entity_id: self.related.as_ref().map(|(_, id)| id.clone()),
            action_url: self.action_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastSummary {
    pub recipients: u64,
}

#[derive(Clone)]
pub struct NotificationService {
    notifications: NotificationRepository,
    users: UserRepository,
}

impl NotificationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            notifications: NotificationRepository::new(pool.clone()),
            users: UserRepository::new(pool),
        }
    }

    /// Side-effect notification; a failure is logged, never returned.
    pub async fn notify(&self, user_id: &str, notice: &Notice) {
        if let Err(err) = self.notifications.create(&notice.for_user(user_id)).await {
            warn!(user_id, kind = notice.kind.as_str(), error = %err, "failed to create notification");
        }
    }

    pub async fn notify_admins(&self, notice: &Notice) {
        match self.users.active_user_ids(Some(UserRole::Admin)).await {
            Ok(admin_ids) => {
                let requests: Vec<_> = admin_ids.iter().map(|id| notice.for_user(id)).collect();
                if let Err(err) = self.notifications.create_many(&requests).await {
                    warn!(kind = notice.kind.as_str(), error = %err, "failed to notify admins");
                }
            }
            Err(err) => warn!(error = %err, "failed to look up admins to notify"),
        }
    }

    /// Send a notice to every active user, optionally only one role.
    pub async fn broadcast(
        &self,
        actor: &Actor,
        role: Option<UserRole>,
        title: &str,
        message: &str,
    ) -> ServiceResult<BroadcastSummary> {
        actor.require_admin()?;
        if title.trim().is_empty() || message.trim().is_empty() {
            return Err(ServiceError::validation("Title and message are required"));
        }

        let notice = Notice::new(NotificationKind::Broadcast, title.trim(), message.trim());
        let recipients = self.users.active_user_ids(role).await?;
        let requests: Vec<_> = recipients.iter().map(|id| notice.for_user(id)).collect();
        let created = self.notifications.create_many(&requests).await?;

        info!(recipients = created, role = ?role, "broadcast notification sent");
        Ok(BroadcastSummary { recipients: created })
    }

    pub async fn list(
        &self,
        actor: &Actor,
        unread_only: bool,
        pagination: Pagination,
    ) -> ServiceResult<Page<Notification>> {
        Ok(self
            .notifications
            .list(&actor.user_id, unread_only, pagination)
            .await?)
    }

    pub async fn mark_read(&self, actor: &Actor, id: &str) -> ServiceResult<Notification> {
        let notification = self.owned(actor, id).await?;
        self.notifications.mark_read(id, &actor.user_id).await?;
        Ok(self
            .notifications
            .find_by_id(id)
            .await?
            .unwrap_or(notification))
    }

    pub async fn mark_all_read(&self, actor: &Actor) -> ServiceResult<u64> {
        Ok(self.notifications.mark_all_read(&actor.user_id).await?)
    }

    pub async fn unread_count(&self, actor: &Actor) -> ServiceResult<i64> {
        Ok(self.notifications.unread_count(&actor.user_id).await?)
    }

    pub async fn delete(&self, actor: &Actor, id: &str) -> ServiceResult<()> {
        self.owned(actor, id).await?;
        self.notifications.delete(id, &actor.user_id).await?;
        Ok(())
    }

    /// Remove read notifications older than `days`.
    pub async fn purge_read(&self, days: i64) -> ServiceResult<u64> {
        let cutoff = (Utc::now() - Duration::days(days.max(0)))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let removed = self.notifications.purge_read_older_than(&cutoff).await?;
        info!(removed, days, "purged read notifications");
        Ok(removed)
    }

    async fn owned(&self, actor: &Actor, id: &str) -> ServiceResult<Notification> {
        self.notifications
            .find_by_id(id)
            .await?
            .filter(|notification| notification.user_id == actor.user_id)
            .ok_or_else(|| ServiceError::not_found("Notification"))
    }
}
