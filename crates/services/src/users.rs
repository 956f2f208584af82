use portal_auth::validation;
use portal_database::{
    IdentityDocuments, IdentityRepository, IdentityVerification, MessageRepository, Page,
    Pagination, Payment, PaymentRepository, Project, ProjectRepository, UpdateProfileRequest,
    UpdateUserRequest, UpdateUserStatusRequest, User, UserFilter, UserOverview, UserProfile,
    UserRepository, VerificationStatus,
};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use crate::activity::{ActivityEntry, ActivityService};
use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::files::{FileService, Upload};
use crate::notifications::{Notice, NotificationKind, NotificationService};

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub user: User,
    pub profile: Option<UserProfile>,
    pub verification_status: Option<VerificationStatus>,
}

/// Self-service profile changes; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: Option<String>,
    pub notification_preferences: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct IdentityUploads {
    pub front_id: Upload,
    pub back_id: Upload,
    pub signature: Upload,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    pub user: User,
    pub profile: Option<UserProfile>,
    pub verification: Option<IdentityVerification>,
    pub recent_projects: Vec<Project>,
    pub recent_payments: Vec<Payment>,
    pub message_count: i64,
}

#[derive(Clone)]
pub struct UserService {
    users: UserRepository,
    identity: IdentityRepository,
    projects: ProjectRepository,
    payments: PaymentRepository,
    messages: MessageRepository,
    files: FileService,
    notifications: NotificationService,
    activity: ActivityService,
}

impl UserService {
    pub fn new(
        pool: SqlitePool,
        files: FileService,
        notifications: NotificationService,
        activity: ActivityService,
    ) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            identity: IdentityRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
            files,
            notifications,
            activity,
        }
    }

    async fn require_user(&self, id: &str) -> ServiceResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    pub async fn profile(&self, actor: &Actor) -> ServiceResult<ProfileView> {
        let user = self.require_user(&actor.user_id).await?;
        let profile = self.users.find_profile(&user.id).await?;
        let verification_status = self
            .identity
            .find_by_user(&user.id)
            .await?
            .map(|verification| verification.status);

        Ok(ProfileView {
            user,
            profile,
            verification_status,
        })
    }

    pub async fn update_profile(
        &self,
        actor: &Actor,
        update: ProfileUpdate,
    ) -> ServiceResult<ProfileView> {
        if let Some(first_name) = &update.first_name {
            validation::validate_name("First name", first_name)?;
        }
        if let Some(last_name) = &update.last_name {
            validation::validate_name("Last name", last_name)?;
        }
        if let Some(phone) = update.phone.as_deref().filter(|phone| !phone.is_empty()) {
            validation::validate_phone(phone)?;
        }
        if let Some(website) = &update.website {
            validation::validate_url(website)?;
        }
        if let Some(preferences) = &update.notification_preferences {
            if !preferences.is_object() {
                return Err(ServiceError::validation(
                    "Notification preferences must be an object",
                ));
            }
        }

        self.users
            .update_details(
                &actor.user_id,
                &UpdateUserRequest {
                    first_name: update.first_name.map(|name| name.trim().to_string()),
                    last_name: update.last_name.map(|name| name.trim().to_string()),
                    company: update.company,
                    phone: update.phone,
                },
            )
            .await?;
        self.users
            .update_profile(
                &actor.user_id,
                &UpdateProfileRequest {
                    avatar_url: None,
                    bio: update.bio,
                    website: update.website,
                    timezone: update.timezone,
                    notification_preferences: update.notification_preferences,
                },
            )
            .await?;

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("profile_updated", "user", &actor.user_id),
            )
            .await;
        self.profile(actor).await
    }

    pub async fn upload_avatar(&self, actor: &Actor, upload: &Upload) -> ServiceResult<ProfileView> {
        let extension = self.files.policy().check_image(upload)?;
        let previous = self
            .users
            .find_profile(&actor.user_id)
            .await?
            .and_then(|profile| profile.avatar_url);

        let folder = format!("general/{}", actor.user_id);
        let stored = self.files.store_in(&folder, "avatar-", upload, &extension).await?;
        let updated = self
            .users
            .update_profile(
                &actor.user_id,
                &UpdateProfileRequest {
                    avatar_url: Some(stored.file_path.clone()),
                    ..UpdateProfileRequest::default()
                },
            )
            .await;
        if let Err(err) = updated {
            self.files.discard(&stored.file_path).await;
            return Err(err.into());
        }

        if let Some(old) = previous.filter(|old| old.starts_with(&folder)) {
            self.files.discard(&old).await;
        }
        self.profile(actor).await
    }

    pub async fn identity(&self, actor: &Actor) -> ServiceResult<Option<IdentityVerification>> {
        Ok(self.identity.find_by_user(&actor.user_id).await?)
    }

    /// Store the three identity documents and queue them for review.
    pub async fn submit_identity(
        &self,
        actor: &Actor,
        uploads: &IdentityUploads,
    ) -> ServiceResult<IdentityVerification> {
        let previous = self.identity.find_by_user(&actor.user_id).await?;
        if previous
            .as_ref()
            .map(|verification| verification.status == VerificationStatus::Verified)
            .unwrap_or(false)
        {
            return Err(ServiceError::validation("Identity is already verified"));
        }

        let policy = self.files.policy();
        let front_ext = policy.check_image(&uploads.front_id)?;
        let back_ext = policy.check_image(&uploads.back_id)?;
        let signature_ext = policy.check_image(&uploads.signature)?;

        let folder = format!("identity/{}", actor.user_id);
        let mut stored_paths = Vec::with_capacity(3);
        for (upload, prefix, extension) in [
            (&uploads.front_id, "front-", &front_ext),
            (&uploads.back_id, "back-", &back_ext),
            (&uploads.signature, "signature-", &signature_ext),
        ] {
            match self.files.store_in(&folder, prefix, upload, extension).await {
                Ok(stored) => stored_paths.push(stored.file_path),
                Err(err) => {
                    for path in &stored_paths {
                        self.files.discard(path).await;
                    }
                    return Err(err);
                }
            }
        }

        let documents = IdentityDocuments {
            front_id_path: stored_paths[0].clone(),
            back_id_path: stored_paths[1].clone(),
            signature_path: stored_paths[2].clone(),
        };
        let verification = match self.identity.submit(&actor.user_id, &documents).await {
            Ok(verification) => verification,
            Err(err) => {
                for path in &stored_paths {
                    self.files.discard(path).await;
                }
                return Err(err.into());
            }
        };

        if let Some(old) = previous {
            for path in [old.front_id_path, old.back_id_path, old.signature_path] {
                self.files.discard(&path).await;
            }
        }

        info!(user_id = %actor.user_id, "identity documents submitted");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("identity_submitted", "identity_verification", &verification.id),
            )
            .await;
        self.notifications
            .notify_admins(
                &Notice::new(
                    NotificationKind::IdentitySubmitted,
                    "Identity verification submitted",
                    "A client submitted identity documents for review",
                )
                .about("user", actor.user_id.clone())
                .link(format!("/admin/users/{}", actor.user_id)),
            )
            .await;

        Ok(verification)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        filter: &UserFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<UserOverview>> {
        actor.require_admin()?;
        Ok(self.users.list(filter, pagination).await?)
    }

    pub async fn detail(&self, actor: &Actor, user_id: &str) -> ServiceResult<UserDetail> {
        actor.require_admin()?;
        let user = self.require_user(user_id).await?;

        Ok(UserDetail {
            profile: self.users.find_profile(user_id).await?,
            verification: self.identity.find_by_user(user_id).await?,
            recent_projects: self.projects.recent_for_client(user_id, RECENT_LIMIT).await?,
            recent_payments: self.payments.recent(Some(user_id), RECENT_LIMIT).await?,
            message_count: self.messages.count_for_user(user_id).await?,
            user,
        })
    }

    pub async fn update_status(
        &self,
        actor: &Actor,
        user_id: &str,
        changes: &UpdateUserStatusRequest,
    ) -> ServiceResult<User> {
        actor.require_admin()?;
        if changes.is_active.is_none() && changes.is_verified.is_none() && changes.role.is_none() {
            return Err(ServiceError::validation("No changes supplied"));
        }
        if user_id == actor.user_id
            && (changes.is_active == Some(false)
                || changes.role.map(|role| role != actor.role).unwrap_or(false))
        {
            return Err(ServiceError::validation(
                "You cannot deactivate or demote your own account",
            ));
        }

        let before = self.require_user(user_id).await?;
        let user = self.users.update_status(user_id, changes).await?;

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("user_status_updated", "user", user_id)
                    .old(json!({
                        "is_active": before.is_active,
                        "is_verified": before.is_verified,
                        "role": before.role,
                    }))
                    .new_values(json!({
                        "is_active": user.is_active,
                        "is_verified": user.is_verified,
                        "role": user.role,
                    })),
            )
            .await;

        let state = if user.is_active { "active" } else { "deactivated" };
        self.notifications
            .notify(
                user_id,
                &Notice::new(
                    NotificationKind::AccountStatus,
                    "Account updated",
                    format!("Your account is now {state}"),
                )
                .about("user", user_id.to_string()),
            )
            .await;

        info!(user_id, admin_id = %actor.user_id, "user status updated");
        Ok(user)
    }

    pub async fn decide_verification(
        &self,
        actor: &Actor,
        user_id: &str,
        status: VerificationStatus,
        rejection_reason: Option<&str>,
    ) -> ServiceResult<IdentityVerification> {
        actor.require_admin()?;
        let reason = rejection_reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty());
        if status == VerificationStatus::Rejected && reason.is_none() {
            return Err(ServiceError::validation("A rejection reason is required"));
        }

        let before = self
            .identity
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Identity verification"))?;
        let verification = self
            .identity
            .decide(user_id, status, &actor.user_id, reason)
            .await?;

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("identity_decided", "identity_verification", &verification.id)
                    .old(json!({ "status": before.status }))
                    .new_values(json!({ "status": status, "rejection_reason": reason })),
            )
            .await;

        let message = match status {
            VerificationStatus::Verified => "Your identity has been verified".to_string(),
            VerificationStatus::Rejected => format!(
                "Your identity verification was rejected: {}",
                reason.unwrap_or_default()
            ),
            VerificationStatus::Pending => "Your identity verification is under review".to_string(),
        };
        self.notifications
            .notify(
                user_id,
                &Notice::new(
                    NotificationKind::VerificationDecision,
                    "Identity verification",
                    message,
                )
                .about("identity_verification", verification.id.clone()),
            )
            .await;

        Ok(verification)
    }
}
