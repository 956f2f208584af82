//! Project, milestone and project file endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use portal_database::{
    MilestoneCompletion, MilestoneStatus, Project, ProjectFile, ProjectMilestone, ProjectPriority,
    ProjectStatus, ProjectType, UpdateMilestoneRequest,
};
use portal_services::projects::{
    NewMilestone, NewProject, ProjectChanges, ProjectDetail, ProjectStats, PublicSubmission,
    SubmissionOutcome,
};
use portal_services::Actor;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::extract::{ApiJson, ApiQuery, UploadForm};
use crate::middleware::bearer_token;
use crate::rest::PageResponse;
use crate::state::GatewayState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub project_type_id: Option<String>,
    pub name: String,
    pub description: String,
    pub features: Option<String>,
    pub timeline: Option<String>,
    pub budget_range: Option<String>,
}

impl From<CreateProjectRequest> for NewProject {
    fn from(request: CreateProjectRequest) -> Self {
        NewProject {
            project_type_id: request.project_type_id,
            name: request.name,
            description: request.description,
            features: request.features,
            timeline: request.timeline,
            budget_range: request.budget_range,
        }
    }
}

/// Public submission; the contact fields are ignored for signed-in callers.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitProjectRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    #[serde(flatten)]
    pub project: CreateProjectRequest,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListProjectsQuery {
    #[param(value_type = Option<String>)]
    pub status: Option<ProjectStatus>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProjectRequest {
    #[schema(value_type = Option<String>)]
    pub status: Option<ProjectStatus>,
    #[schema(value_type = Option<String>)]
    pub priority: Option<ProjectPriority>,
    pub progress: Option<i64>,
    pub estimated_cost: Option<f64>,
    pub final_cost: Option<f64>,
    pub start_date: Option<String>,
    pub deadline: Option<String>,
    pub assigned_to: Option<String>,
    /// Skip the transition table; the override is written to the activity log.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMilestoneRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub payment_percentage: Option<f64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EditMilestoneRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    #[schema(value_type = Option<String>)]
    pub status: Option<MilestoneStatus>,
    pub payment_percentage: Option<f64>,
}

pub fn public_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/types", get(list_project_types))
        .route("/submit", post(submit_project))
}

pub fn protected_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/stats", get(project_stats))
        .route("/:id", get(get_project))
        .route("/:id/status", put(update_project))
        .route("/:id/milestones", get(list_milestones).post(create_milestone))
        .route("/:id/milestones/:milestone_id", put(update_milestone))
        .route("/:id/milestones/:milestone_id/complete", put(complete_milestone))
        .route("/:id/files", get(list_project_files).post(upload_project_file))
        .route("/:id/files/:file_id", delete(delete_project_file))
}

#[utoipa::path(
    get,
    path = "/api/projects/types",
    tag = "Projects",
    responses((status = 200, description = "Active project types"))
)]
pub async fn list_project_types(
    State(state): State<Arc<GatewayState>>,
) -> GatewayResult<Json<Vec<ProjectType>>> {
    Ok(Json(state.services.projects.list_types(false).await?))
}

#[utoipa::path(
    post,
    path = "/api/projects/submit",
    tag = "Projects",
    request_body = SubmitProjectRequest,
    responses(
        (status = 201, description = "Project submitted"),
        (status = 400, description = "Missing or unknown project type, or invalid contact data", body = ErrorResponse),
        (status = 401, description = "Account disabled", body = ErrorResponse)
    )
)]
pub async fn submit_project(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<SubmitProjectRequest>,
) -> GatewayResult<(StatusCode, Json<SubmissionOutcome>)> {
    let projects = &state.services.projects;

    let outcome = match bearer_token(&headers) {
        Some(token) => {
            let authenticated = state.services.auth.authenticate(token).await?;
            let actor = Actor::new(
                authenticated.user.id,
                authenticated.user.role,
                authenticated.session_id,
            );
            let project = projects.submit(&actor, payload.project.into()).await?;
            SubmissionOutcome {
                project,
                account_created: false,
            }
        }
        None => {
            projects
                .submit_public(PublicSubmission {
                    email: payload.email,
                    first_name: payload.first_name,
                    last_name: payload.last_name,
                    company: payload.company,
                    phone: payload.phone,
                    project: payload.project.into(),
                })
                .await?
        }
    };

    Ok((StatusCode::CREATED, Json(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(ListProjectsQuery),
    responses(
        (status = 200, description = "Projects visible to the caller"),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
pub async fn list_projects(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListProjectsQuery>,
) -> GatewayResult<Json<PageResponse<Project>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .projects
        .list(&actor, query.status, query.search, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/projects",
    tag = "Projects",
    security(("bearerAuth" = [])),
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project submitted"),
        (status = 400, description = "Missing or unknown project type", body = ErrorResponse)
    )
)]
pub async fn create_project(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<CreateProjectRequest>,
) -> GatewayResult<(StatusCode, Json<Project>)> {
    let project = state.services.projects.submit(&actor, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/api/projects/stats",
    tag = "Projects",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Project counts and revenue"),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn project_stats(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<ProjectStats>> {
    Ok(Json(state.services.projects.stats(&actor).await?))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project with client, type and milestones"),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Project not found", body = ErrorResponse)
    )
)]
pub async fn get_project(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<ProjectDetail>> {
    Ok(Json(state.services.projects.detail(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/projects/{id}/status",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Project updated"),
        (status = 400, description = "Invalid field", body = ErrorResponse),
        (status = 403, description = "Admin only", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse)
    )
)]
pub async fn update_project(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateProjectRequest>,
) -> GatewayResult<Json<Project>> {
    let changes = ProjectChanges {
        status: payload.status,
        priority: payload.priority,
        progress: payload.progress,
        estimated_cost: payload.estimated_cost,
        final_cost: payload.final_cost,
        start_date: payload.start_date,
        deadline: payload.deadline,
        assigned_to: payload.assigned_to,
        force: payload.force,
    };
    Ok(Json(state.services.projects.update(&actor, &id, changes).await?))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}/milestones",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id")),
    responses((status = 200, description = "Milestones in order"))
)]
pub async fn list_milestones(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Vec<ProjectMilestone>>> {
    Ok(Json(state.services.projects.milestones(&actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/milestones",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id")),
    request_body = CreateMilestoneRequest,
    responses(
        (status = 201, description = "Milestone created"),
        (status = 400, description = "Payment percentages exceed 100", body = ErrorResponse)
    )
)]
pub async fn create_milestone(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<CreateMilestoneRequest>,
) -> GatewayResult<(StatusCode, Json<ProjectMilestone>)> {
    let milestone = state
        .services
        .projects
        .create_milestone(
            &actor,
            &id,
            NewMilestone {
                title: payload.title,
                description: payload.description,
                due_date: payload.due_date,
                payment_percentage: payload.payment_percentage,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

#[utoipa::path(
    put,
    path = "/api/projects/{id}/milestones/{milestone_id}",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(
        ("id" = String, Path, description = "Project id"),
        ("milestone_id" = String, Path, description = "Milestone id")
    ),
    request_body = EditMilestoneRequest,
    responses(
        (status = 200, description = "Milestone updated"),
        (status = 409, description = "Milestone already completed", body = ErrorResponse)
    )
)]
pub async fn update_milestone(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone_id)): Path<(String, String)>,
    ApiJson(payload): ApiJson<EditMilestoneRequest>,
) -> GatewayResult<Json<ProjectMilestone>> {
    let changes = UpdateMilestoneRequest {
        title: payload.title,
        description: payload.description,
        due_date: payload.due_date,
        status: payload.status,
        payment_percentage: payload.payment_percentage,
    };
    let milestone = state
        .services
        .projects
        .update_milestone(&actor, &id, &milestone_id, changes)
        .await?;
    Ok(Json(milestone))
}

#[utoipa::path(
    put,
    path = "/api/projects/{id}/milestones/{milestone_id}/complete",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(
        ("id" = String, Path, description = "Project id"),
        ("milestone_id" = String, Path, description = "Milestone id")
    ),
    responses((status = 200, description = "Milestone completed; repeated calls are no-ops"))
)]
pub async fn complete_milestone(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path((id, milestone_id)): Path<(String, String)>,
) -> GatewayResult<Json<MilestoneCompletion>> {
    let completion = state
        .services
        .projects
        .complete_milestone(&actor, &id, &milestone_id)
        .await?;
    Ok(Json(completion))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}/files",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id"), PageQuery),
    responses((status = 200, description = "Files attached to the project"))
)]
pub async fn list_project_files(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> GatewayResult<Json<PageResponse<ProjectFile>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .files
        .list_project_files(&actor, &id, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ProjectFileForm {
    #[schema(format = Binary)]
    file: String,
    description: Option<String>,
    is_public: Option<bool>,
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/files",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id")),
    request_body(content = ProjectFileForm, content_type = "multipart/form-data", description = "`file`, optional `description` and `is_public`"),
    responses(
        (status = 201, description = "File stored"),
        (status = 400, description = "Missing file, bad extension or too large", body = ErrorResponse)
    )
)]
pub async fn upload_project_file(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> GatewayResult<(StatusCode, Json<ProjectFile>)> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.file("file")?;
    let file = state
        .services
        .files
        .upload_project_file(
            &actor,
            &id,
            &upload,
            form.text("description").map(str::to_string),
            form.flag("is_public"),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

#[utoipa::path(
    delete,
    path = "/api/projects/{id}/files/{file_id}",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(
        ("id" = String, Path, description = "Project id"),
        ("file_id" = String, Path, description = "File id")
    ),
    responses(
        (status = 204, description = "File deleted"),
        (status = 403, description = "Only the uploader or an admin may delete", body = ErrorResponse)
    )
)]
pub async fn delete_project_file(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path((id, file_id)): Path<(String, String)>,
) -> GatewayResult<StatusCode> {
    state
        .services
        .files
        .delete_project_file(&actor, &id, &file_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
