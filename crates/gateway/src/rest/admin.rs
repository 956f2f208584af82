//! Admin dashboard, catalogue and maintenance endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use portal_database::{
    ActivityFilter, ActivityLog, CreateProjectTypeRequest, ProjectType, UpdateProjectTypeRequest,
    UserRole,
};
use portal_services::admin::{CleanupKind, CleanupReport, Dashboard};
use portal_services::notifications::BroadcastSummary;
use portal_services::Actor;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::rest::{users, PageResponse};
use crate::state::GatewayState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectTypeRequest {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProjectTypeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityLogQuery {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    /// `notifications`, `contracts` or `invoices`
    #[serde(rename = "type")]
    pub kind: String,
    /// Age threshold for purging read notifications.
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
    /// Restrict to one role; everyone active when omitted.
    #[schema(value_type = Option<String>)]
    pub role: Option<UserRole>,
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users", get(users::list_users))
        .route("/users/:id", get(users::get_user))
        .route("/users/:id/status", put(users::update_user_status))
        .route("/users/:id/verification", put(users::decide_verification))
        .route(
            "/project-types",
            get(list_project_types).post(create_project_type),
        )
        .route("/project-types/:id", put(update_project_type))
        .route("/activity-logs", get(activity_logs))
        .route("/system/cleanup", post(system_cleanup))
        .route("/system/broadcast", post(broadcast))
}

#[utoipa::path(
    get,
    path = "/api/admin/dashboard",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Totals, alerts and recent activity"),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn dashboard(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<Dashboard>> {
    Ok(Json(state.services.admin.dashboard(&actor).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/project-types",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "All project types, inactive included"))
)]
pub async fn list_project_types(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<Vec<ProjectType>>> {
    actor.require_admin()?;
    Ok(Json(state.services.projects.list_types(true).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/project-types",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = ProjectTypeRequest,
    responses(
        (status = 201, description = "Project type created"),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    )
)]
pub async fn create_project_type(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<ProjectTypeRequest>,
) -> GatewayResult<(StatusCode, Json<ProjectType>)> {
    let created = state
        .services
        .projects
        .create_type(
            &actor,
            CreateProjectTypeRequest {
                name: payload.name,
                description: payload.description,
                icon: payload.icon,
                color: payload.color,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/api/admin/project-types/{id}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project type id")),
    request_body = ProjectTypeUpdate,
    responses(
        (status = 200, description = "Project type updated"),
        (status = 404, description = "Project type not found", body = ErrorResponse)
    )
)]
pub async fn update_project_type(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ProjectTypeUpdate>,
) -> GatewayResult<Json<ProjectType>> {
    let updated = state
        .services
        .projects
        .update_type(
            &actor,
            &id,
            UpdateProjectTypeRequest {
                name: payload.name,
                description: payload.description,
                icon: payload.icon,
                color: payload.color,
                is_active: payload.is_active,
            },
        )
        .await?;
    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/api/admin/activity-logs",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(ActivityLogQuery),
    responses((status = 200, description = "Audit trail, newest first"))
)]
pub async fn activity_logs(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ActivityLogQuery>,
) -> GatewayResult<Json<PageResponse<ActivityLog>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let filter = ActivityFilter {
        action: query.action,
        entity_type: query.entity_type,
        user_id: query.user_id,
    };
    let page = state
        .services
        .activity
        .list(&actor, &filter, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/system/cleanup",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Rows affected by the job"),
        (status = 400, description = "Unknown cleanup type", body = ErrorResponse)
    )
)]
pub async fn system_cleanup(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<CleanupRequest>,
) -> GatewayResult<Json<CleanupReport>> {
    actor.require_admin()?;
    let kind: CleanupKind = payload.kind.parse()?;
    Ok(Json(
        state.services.admin.cleanup(&actor, kind, payload.days).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/system/broadcast",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Number of users notified"),
        (status = 400, description = "Missing title or message", body = ErrorResponse)
    )
)]
pub async fn broadcast(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<BroadcastRequest>,
) -> GatewayResult<Json<BroadcastSummary>> {
    let summary = state
        .services
        .admin
        .broadcast(&actor, payload.role, &payload.title, &payload.message)
        .await?;
    Ok(Json(summary))
}
