//! Project message rows

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use super::{enum_column, json_column};

text_enum! {
    pub enum MessageType ("message type") {
        General => "general",
        Update => "update",
        Feedback => "feedback",
        Invoice => "invoice",
        Milestone => "milestone",
        Urgent => "urgent",
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::General
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub subject: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub parent_message_id: Option<String>,
    pub attachments: Option<Value>,
    pub created_at: String,
}

impl Message {
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            sender_id: row.try_get("sender_id")?,
            recipient_id: row.try_get("recipient_id")?,
            subject: row.try_get("subject")?,
            content: row.try_get("content")?,
            message_type: enum_column(row, "message_type")?,
            is_read: row.try_get("is_read")?,
            read_at: row.try_get("read_at")?,
            parent_message_id: row.try_get("parent_message_id")?,
            attachments: json_column(row, "attachments")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateMessageRequest {
    pub project_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub subject: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub parent_message_id: Option<String>,
    pub attachments: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Restrict to messages sent or received by this user.
    pub participant_id: Option<String>,
    pub project_id: Option<String>,
    pub message_type: Option<MessageType>,
    /// Restrict to unread messages addressed to this user.
    pub unread_for: Option<String>,
}

/// A thread root with its number of replies
#[derive(Debug, Clone, Serialize)]
pub struct MessageThread {
    pub message: Message,
    pub reply_count: i64,
}
