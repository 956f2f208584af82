//! User, profile, session and identity verification rows

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use super::{enum_column, json_column};

text_enum! {
    /// Account role
    pub enum UserRole ("user role") {
        Client => "client",
        Admin => "admin",
    }
}

text_enum! {
    /// Review state of submitted identity documents
    pub enum VerificationStatus ("verification status") {
        Pending => "pending",
        Verified => "verified",
        Rejected => "rejected",
    }
}

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: UserRole,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login_at: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            company: row.try_get("company")?,
            phone: row.try_get("phone")?,
            role: enum_column(row, "role")?,
            is_verified: row.try_get("is_verified")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

/// Request for creating a new user together with an empty profile
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: UserRole,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub timezone: Option<String>,
}

/// Self-service account fields; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

/// Administrative account flags; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UpdateUserStatusRequest {
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    /// `Some(None)` selects users that never submitted documents.
    pub verification_status: Option<Option<VerificationStatus>>,
    pub search: Option<String>,
}

/// A user row with the aggregates shown in admin listings
#[derive(Debug, Clone, Serialize)]
pub struct UserOverview {
    pub user: User,
    pub project_count: i64,
    pub verification_status: Option<VerificationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub user_id: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: String,
    pub notification_preferences: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl UserProfile {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            avatar_url: row.try_get("avatar_url")?,
            bio: row.try_get("bio")?,
            website: row.try_get("website")?,
            timezone: row.try_get("timezone")?,
            notification_preferences: json_column(row, "notification_preferences")?
                .unwrap_or(Value::Null),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: Option<String>,
    pub notification_preferences: Option<Value>,
}

/// Login session; JWTs reference it by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing, default)]
    pub session_token: String,
    pub expires_at: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl UserSession {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            session_token: row.try_get("session_token")?,
            expires_at: row.try_get("expires_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub session_token: String,
    pub expires_at: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Identity documents submitted by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityVerification {
    pub id: String,
    pub user_id: String,
    pub front_id_path: String,
    pub back_id_path: String,
    pub signature_path: String,
    pub status: VerificationStatus,
    pub verified_at: Option<String>,
    pub verified_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl IdentityVerification {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            front_id_path: row.try_get("front_id_path")?,
            back_id_path: row.try_get("back_id_path")?,
            signature_path: row.try_get("signature_path")?,
            status: enum_column(row, "status")?,
            verified_at: row.try_get("verified_at")?,
            verified_by: row.try_get("verified_by")?,
            rejection_reason: row.try_get("rejection_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
