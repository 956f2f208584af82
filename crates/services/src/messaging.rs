use portal_database::{
    CreateMessageRequest, Message, MessageFilter, MessageRepository, MessageThread, MessageType,
    Page, Pagination, ProjectRepository, UserRepository,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::notifications::{Notice, NotificationKind, NotificationService};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub project_id: String,
    pub subject: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyInput {
    pub content: String,
    pub attachments: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub project_id: Option<String>,
    pub message_type: Option<MessageType>,
    pub unread_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDetail {
    pub message: Message,
    pub replies: Vec<Message>,
}

/// `Re: <subject>` without stacking prefixes.
pub fn reply_subject(subject: Option<&str>) -> String {
    let subject = subject.map(str::trim).unwrap_or_default();
    if subject.is_empty() {
        "Re: (no subject)".to_string()
    } else if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

fn validate_attachments(attachments: &Option<Value>) -> ServiceResult<()> {
    match attachments {
        Some(value) if !value.is_array() => {
            Err(ServiceError::validation("Attachments must be a list"))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct MessagingService {
    messages: MessageRepository,
    projects: ProjectRepository,
    users: UserRepository,
    notifications: NotificationService,
}

impl MessagingService {
    pub fn new(pool: SqlitePool, notifications: NotificationService) -> Self {
        Self {
            messages: MessageRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            notifications,
        }
    }

    async fn require(&self, id: &str) -> ServiceResult<Message> {
        self.messages
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Message"))
    }

    pub async fn list(
        &self,
        actor: &Actor,
        query: MessageQuery,
        pagination: Pagination,
    ) -> ServiceResult<Page<MessageThread>> {
        if let Some(project_id) = &query.project_id {
            let project = self
                .projects
                .find_by_id(project_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Project"))?;
            actor.require_access(&project.client_id)?;
        }

        let filter = MessageFilter {
            participant_id: (!actor.is_admin()).then(|| actor.user_id.clone()),
            project_id: query.project_id,
            message_type: query.message_type,
            unread_for: query.unread_only.then(|| actor.user_id.clone()),
        };
        Ok(self.messages.list_threads(&filter, pagination).await?)
    }

    /// Open a message. The recipient's copy of the thread is marked read.
    pub async fn detail(&self, actor: &Actor, id: &str) -> ServiceResult<MessageDetail> {
        let message = self.require(id).await?;
        if !message.involves(&actor.user_id) && !actor.is_admin() {
            return Err(ServiceError::forbidden("Access denied"));
        }

        let root_id = message
            .parent_message_id
            .clone()
            .unwrap_or_else(|| message.id.clone());
        if message.recipient_id == actor.user_id {
            let marked = if message.parent_message_id.is_none() {
                self.messages.mark_thread_read(&root_id, &actor.user_id).await?
            } else {
                u64::from(self.messages.mark_read(&message.id, &actor.user_id).await?)
            };
            debug!(message_id = id, marked, "messages marked read");
        }

        let message = self.require(id).await?;
        let replies = if message.parent_message_id.is_none() {
            self.messages.replies(&root_id).await?
        } else {
            Vec::new()
        };
        Ok(MessageDetail { message, replies })
    }

    async fn recipient_for(&self, actor: &Actor, project_id: &str) -> ServiceResult<String> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project"))?;
        actor.require_access(&project.client_id)?;

        if actor.is_admin() {
            return Ok(project.client_id);
        }

        if let Some(admin_id) = &project.assigned_to {
            let assigned = self.users.find_by_id(admin_id).await?;
            if assigned.map(|admin| admin.is_active).unwrap_or(false) {
                return Ok(admin_id.clone());
            }
        }
        self.users
            .list_active_admins()
            .await?
            .into_iter()
            .next()
            .map(|admin| admin.id)
            .ok_or_else(|| ServiceError::validation("No administrator is available to receive messages"))
    }

    pub async fn send(&self, actor: &Actor, input: NewMessage) -> ServiceResult<Message> {
        if input.project_id.trim().is_empty() || input.content.trim().is_empty() {
            return Err(ServiceError::validation("project_id and content are required"));
        }
        validate_attachments(&input.attachments)?;
        let recipient_id = self.recipient_for(actor, &input.project_id).await?;

        let message = self
            .messages
            .create(&CreateMessageRequest {
                project_id: input.project_id,
                sender_id: actor.user_id.clone(),
                recipient_id,
                subject: input
                    .subject
                    .map(|subject| subject.trim().to_string())
                    .filter(|subject| !subject.is_empty()),
                content: input.content.trim().to_string(),
                message_type: input.message_type,
                parent_message_id: None,
                attachments: input.attachments,
            })
            .await?;

        info!(message_id = %message.id, project_id = %message.project_id, "message sent");
        self.notifications
            .notify(
                &message.recipient_id,
                &Notice::new(
                    NotificationKind::Message,
                    message
                        .subject
                        .clone()
                        .unwrap_or_else(|| "New message".to_string()),
                    preview(&message.content),
                )
                .about("message", message.id.clone())
                .link(format!("/messages/{}", message.id)),
            )
            .await;
        Ok(message)
    }

    pub async fn reply(&self, actor: &Actor, parent_id: &str, input: ReplyInput) -> ServiceResult<Message> {
        if input.content.trim().is_empty() {
            return Err(ServiceError::validation("Content is required"));
        }
        validate_attachments(&input.attachments)?;

        let parent = self.require(parent_id).await?;
        if !parent.involves(&actor.user_id) && !actor.is_admin() {
            return Err(ServiceError::forbidden("Access denied"));
        }
        let recipient_id = if parent.sender_id == actor.user_id {
            parent.recipient_id.clone()
        } else {
            parent.sender_id.clone()
        };
        let root_id = parent
            .parent_message_id
            .clone()
            .unwrap_or_else(|| parent.id.clone());

        let reply = self
            .messages
            .create(&CreateMessageRequest {
                project_id: parent.project_id.clone(),
                sender_id: actor.user_id.clone(),
                recipient_id,
                subject: Some(reply_subject(parent.subject.as_deref())),
                content: input.content.trim().to_string(),
                message_type: parent.message_type,
                parent_message_id: Some(root_id.clone()),
                attachments: input.attachments,
            })
            .await?;

        info!(message_id = %reply.id, thread = %root_id, "reply sent");
        self.notifications
            .notify(
                &reply.recipient_id,
                &Notice::new(
                    NotificationKind::MessageReply,
                    reply.subject.clone().unwrap_or_default(),
                    preview(&reply.content),
                )
                .about("message", root_id.clone())
                .link(format!("/messages/{root_id}")),
            )
            .await;
        Ok(reply)
    }

    pub async fn mark_read(&self, actor: &Actor, id: &str) -> ServiceResult<Message> {
        let message = self.require(id).await?;
        if message.recipient_id != actor.user_id {
            return Err(ServiceError::forbidden("Only the recipient can mark a message read"));
        }
        if !message.is_read {
            self.messages.mark_read(id, &actor.user_id).await?;
            return self.require(id).await;
        }
        Ok(message)
    }

    pub async fn unread_count(&self, actor: &Actor) -> ServiceResult<i64> {
        Ok(self.messages.unread_count(&actor.user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_subjects_are_not_doubled() {
        assert_eq!(reply_subject(Some("Design review")), "Re: Design review");
        assert_eq!(reply_subject(Some("Re: Design review")), "Re: Design review");
        assert_eq!(reply_subject(Some("RE: Invoice")), "RE: Invoice");
        assert_eq!(reply_subject(None), "Re: (no subject)");
    }

    #[test]
    fn previews_are_truncated() {
        let long = "x".repeat(150);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
