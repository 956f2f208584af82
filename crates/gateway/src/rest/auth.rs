//! Authentication REST endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use portal_auth::{AuthTokens, ClientInfo, NewAccount};
use portal_database::{User, UserRole};
use portal_services::{users::ProfileView, Actor, RequestOrigin};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ErrorResponse, GatewayResult};
use crate::extract::ApiJson;
use crate::rest::MessageResponse;
use crate::state::GatewayState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    /// Generated and returned when omitted.
    pub password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    #[serde(flatten)]
    pub tokens: AuthTokens,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

pub fn public_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/verify-email", post(verify_email))
}

pub fn protected_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/me", get(me))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in"),
        (status = 400, description = "Invalid registration data", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<GatewayState>>,
    Extension(origin): Extension<RequestOrigin>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> GatewayResult<(StatusCode, Json<SessionResponse>)> {
    let registration = state
        .services
        .auth
        .register(
            NewAccount {
                email: payload.email,
                password: payload.password,
                first_name: payload.first_name,
                last_name: payload.last_name,
                company: payload.company,
                phone: payload.phone,
                role: UserRole::Client,
            },
            &ClientInfo::from(&origin),
        )
        .await?;

    let account = registration.account;
    let mail = &state.services.mail;
    mail.welcome(&account.user, account.generated_password.as_deref());
    mail.email_verification(&account.user, &account.verification_token);

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            user: account.user,
            tokens: registration.tokens,
            generated_password: account.generated_password,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in"),
        (status = 401, description = "Invalid credentials or disabled account", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    Extension(origin): Extension<RequestOrigin>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> GatewayResult<Json<SessionResponse>> {
    let outcome = state
        .services
        .auth
        .login(&payload.email, &payload.password, &ClientInfo::from(&origin))
        .await?;

    Ok(Json(SessionResponse {
        user: outcome.user,
        tokens: outcome.tokens,
        generated_password: None,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token"),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorResponse)
    )
)]
pub async fn refresh(
    State(state): State<Arc<GatewayState>>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> GatewayResult<Json<AuthTokens>> {
    let tokens = state.services.auth.refresh(&payload.refresh_token).await?;
    Ok(Json(tokens))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    tag = "Auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email sent when the account exists", body = MessageResponse)
    )
)]
pub async fn forgot_password(
    State(state): State<Arc<GatewayState>>,
    ApiJson(payload): ApiJson<ForgotPasswordRequest>,
) -> GatewayResult<Json<MessageResponse>> {
    if let Some(ticket) = state
        .services
        .auth
        .request_password_reset(payload.email.trim())
        .await?
    {
        state.services.mail.password_reset(&ticket.user, &ticket.token);
    }

    Ok(Json(MessageResponse::new(
        "If an account exists for this email, a reset link has been sent",
    )))
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    tag = "Auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    )
)]
pub async fn reset_password(
    State(state): State<Arc<GatewayState>>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> GatewayResult<Json<MessageResponse>> {
    state
        .services
        .auth
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    tag = "Auth",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified"),
        (status = 400, description = "Unknown token", body = ErrorResponse)
    )
)]
pub async fn verify_email(
    State(state): State<Arc<GatewayState>>,
    ApiJson(payload): ApiJson<VerifyEmailRequest>,
) -> GatewayResult<Json<User>> {
    let user = state.services.auth.verify_email(&payload.token).await?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Successfully logged out", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    )
)]
pub async fn logout(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<MessageResponse>> {
    state.services.auth.logout(&actor.session_id).await?;
    Ok(Json(MessageResponse::new("Logged out")))
}

#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    tag = "Auth",
    security(("bearerAuth" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password rejected", body = ErrorResponse),
        (status = 401, description = "Current password is wrong", body = ErrorResponse)
    )
)]
pub async fn change_password(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> GatewayResult<Json<MessageResponse>> {
    state
        .services
        .auth
        .change_password(
            &actor.user_id,
            &actor.session_id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;
    info!(user_id = %actor.user_id, "password changed");
    Ok(Json(MessageResponse::new("Password changed")))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Auth",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current user with profile"),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    )
)]
pub async fn me(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<ProfileView>> {
    Ok(Json(state.services.users.profile(&actor).await?))
}
