//! Profile, avatar and identity verification endpoints, plus the admin user views

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use portal_database::{
    IdentityVerification, UpdateUserStatusRequest, User, UserFilter, UserOverview, UserRole,
    VerificationStatus,
};
use portal_services::users::{IdentityUploads, ProfileUpdate, ProfileView, UserDetail};
use portal_services::Actor;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::extract::{ApiJson, ApiQuery, UploadForm};
use crate::rest::PageResponse;
use crate::state::GatewayState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub notification_preferences: Option<Value>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListUsersQuery {
    #[param(value_type = Option<String>)]
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    /// `pending`, `verified`, `rejected`, or `none` for users who never submitted.
    pub verification_status: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListUsersQuery {
    fn filter(&self) -> GatewayResult<UserFilter> {
        let verification_status = match self.verification_status.as_deref() {
            None | Some("") => None,
            Some("none") => Some(None),
            Some(value) => Some(Some(value.parse::<VerificationStatus>().map_err(|err| {
                GatewayError::InvalidRequest(err.to_string())
            })?)),
        };
        Ok(UserFilter {
            role: self.role,
            is_active: self.is_active,
            verification_status,
            search: self.search.clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateUserStatusBody {
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    #[schema(value_type = Option<String>)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerificationDecisionRequest {
    #[schema(value_type = String)]
    pub status: VerificationStatus,
    pub rejection_reason: Option<String>,
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/avatar", post(upload_avatar))
        .route(
            "/identity-verification",
            get(get_identity_verification).post(submit_identity_verification),
        )
        .route("/", get(list_users))
        .route("/:id", get(get_user))
        .route("/:id/status", put(update_user_status))
}

#[utoipa::path(
    get,
    path = "/api/users/profile",
    tag = "Users",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "User, profile and verification state"))
)]
pub async fn get_profile(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<ProfileView>> {
    Ok(Json(state.services.users.profile(&actor).await?))
}

#[utoipa::path(
    put,
    path = "/api/users/profile",
    tag = "Users",
    security(("bearerAuth" = [])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated"),
        (status = 400, description = "Invalid field", body = ErrorResponse)
    )
)]
pub async fn update_profile(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> GatewayResult<Json<ProfileView>> {
    let update = ProfileUpdate {
        first_name: payload.first_name,
        last_name: payload.last_name,
        company: payload.company,
        phone: payload.phone,
        bio: payload.bio,
        website: payload.website,
        timezone: payload.timezone,
        notification_preferences: payload.notification_preferences,
    };
    Ok(Json(state.services.users.update_profile(&actor, update).await?))
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct AvatarForm {
    #[schema(format = Binary)]
    avatar: String,
}

#[utoipa::path(
    post,
    path = "/api/users/avatar",
    tag = "Users",
    security(("bearerAuth" = [])),
    request_body(content = AvatarForm, content_type = "multipart/form-data", description = "Image in the `avatar` field"),
    responses(
        (status = 200, description = "Avatar replaced"),
        (status = 400, description = "Not an image or too large", body = ErrorResponse)
    )
)]
pub async fn upload_avatar(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> GatewayResult<Json<ProfileView>> {
    let mut form = UploadForm::read(multipart).await?;
    let avatar = form.file("avatar")?;
    Ok(Json(state.services.users.upload_avatar(&actor, &avatar).await?))
}

#[utoipa::path(
    get,
    path = "/api/users/identity-verification",
    tag = "Users",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Latest identity submission, or null"))
)]
pub async fn get_identity_verification(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<Option<IdentityVerification>>> {
    Ok(Json(state.services.users.identity(&actor).await?))
}

/// Identity documents; all three parts are required.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct IdentityDocumentsForm {
    #[schema(format = Binary)]
    front_id: String,
    #[schema(format = Binary)]
    back_id: String,
    #[schema(format = Binary)]
    signature: String,
}

#[utoipa::path(
    post,
    path = "/api/users/identity-verification",
    tag = "Users",
    security(("bearerAuth" = [])),
    request_body(content = IdentityDocumentsForm, content_type = "multipart/form-data", description = "`front_id`, `back_id` and `signature` images"),
    responses(
        (status = 201, description = "Submitted for review"),
        (status = 400, description = "Missing or invalid document", body = ErrorResponse),
        (status = 409, description = "Already approved or pending", body = ErrorResponse)
    )
)]
pub async fn submit_identity_verification(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> GatewayResult<(StatusCode, Json<IdentityVerification>)> {
    let mut form = UploadForm::read(multipart).await?;
    let uploads = IdentityUploads {
        front_id: form.file("front_id")?,
        back_id: form.file("back_id")?,
        signature: form.file("signature")?,
    };
    let verification = state.services.users.submit_identity(&actor, &uploads).await?;
    Ok((StatusCode::CREATED, Json(verification)))
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    security(("bearerAuth" = [])),
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Users with project counts"),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn list_users(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> GatewayResult<Json<PageResponse<UserOverview>>> {
    let filter = query.filter()?;
    let pagination = state.pagination(query.page, query.per_page);
    let page = state.services.users.list(&actor, &filter, pagination).await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "Users",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User with profile, verification and recent activity"),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
pub async fn get_user(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<UserDetail>> {
    Ok(Json(state.services.users.detail(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}/status",
    tag = "Users",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUserStatusBody,
    responses(
        (status = 200, description = "User updated"),
        (status = 400, description = "Admins cannot demote or disable themselves", body = ErrorResponse)
    )
)]
pub async fn update_user_status(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateUserStatusBody>,
) -> GatewayResult<Json<User>> {
    let changes = UpdateUserStatusRequest {
        is_active: payload.is_active,
        is_verified: payload.is_verified,
        role: payload.role,
    };
    Ok(Json(
        state.services.users.update_status(&actor, &id, &changes).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/verification",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "User id")),
    request_body = VerificationDecisionRequest,
    responses(
        (status = 200, description = "Identity verification decided"),
        (status = 400, description = "Rejection without a reason", body = ErrorResponse),
        (status = 404, description = "No submission for this user", body = ErrorResponse)
    )
)]
pub async fn decide_verification(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<VerificationDecisionRequest>,
) -> GatewayResult<Json<IdentityVerification>> {
    let verification = state
        .services
        .users
        .decide_verification(&actor, &id, payload.status, payload.rejection_reason.as_deref())
        .await?;
    Ok(Json(verification))
}
