//! Row types for the portal schema.
//!
//! Ids are cuid2 strings, timestamps are RFC 3339 (UTC, second precision) and
//! calendar dates are `YYYY-MM-DD` text, so both sort lexicographically.

use chrono::{SecondsFormat, Utc};
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use std::str::FromStr;
use thiserror::Error;

/// Declares a text-backed status enum with `as_str`, `FromStr` and `Display`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($kind:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::entities::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::entities::UnknownVariant::new($kind, other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod activity;
pub mod contract;
pub mod message;
pub mod notification;
pub mod payment;
pub mod project;
pub mod user;

pub use activity::{ActivityFilter, ActivityLog, CreateActivityLogRequest};
pub use contract::{
    Contract, ContractFilter, ContractSignature, ContractStatus, CreateContractRequest,
    CreateSignatureRequest, UpdateContractRequest,
};
pub use message::{CreateMessageRequest, Message, MessageFilter, MessageThread, MessageType};
pub use notification::{CreateNotificationRequest, Notification};
pub use payment::{
    CreateInvoiceRequest, CreatePaymentRequest, GatewayEventOutcome, GatewayEventRecord, Invoice,
    InvoiceFilter, InvoiceStatus, Payment, PaymentFilter, PaymentStatus,
};
pub use project::{
    CreateMilestoneRequest, CreateProjectFileRequest, CreateProjectRequest,
    CreateProjectTypeRequest, FileStats, MilestoneCompletion, MilestoneStatus, Project,
    ProjectFile, ProjectFilter, ProjectMilestone, ProjectPriority, ProjectStatus, ProjectType,
    UpdateMilestoneRequest, UpdateProjectRequest, UpdateProjectTypeRequest,
};
pub use user::{
    CreateSessionRequest, CreateUserRequest, IdentityVerification, UpdateProfileRequest,
    UpdateUserRequest, UpdateUserStatusRequest, User, UserFilter, UserOverview, UserProfile,
    UserRole, UserSession, VerificationStatus,
};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

/// Generate a new opaque row id.
pub fn new_id() -> String {
    CUID.create_id()
}

/// Current instant in the stored timestamp format.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Today's date (UTC) in the stored date format.
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Raised when a stored or submitted value does not name a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

pub(crate) fn enum_column<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|err: UnknownVariant| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    })
}

pub(crate) fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|err| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(err),
        })
}

pub(crate) fn json_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(Value::to_string)
}
