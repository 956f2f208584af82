//! Stored file endpoints. Paths are storage keys such as `projects/<id>/<name>`.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use portal_database::ProjectFile;
use portal_services::files::{FileInfo, StorageStats, StoredUpload};
use portal_services::Actor;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{ErrorResponse, GatewayResult};
use crate::extract::{ApiQuery, UploadForm};
use crate::rest::projects::PageQuery;
use crate::rest::PageResponse;
use crate::state::GatewayState;

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/upload", post(upload_file))
        .route("/download/*path", get(download_file))
        .route("/info/*path", get(file_info))
        .route("/delete/*path", delete(delete_file))
        .route("/project/:id", get(project_files))
        .route("/stats", get(storage_stats))
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadFileForm {
    #[schema(format = Binary)]
    file: String,
}

#[utoipa::path(
    post,
    path = "/api/files/upload",
    tag = "Files",
    security(("bearerAuth" = [])),
    request_body(content = UploadFileForm, content_type = "multipart/form-data", description = "File in the `file` field"),
    responses(
        (status = 201, description = "File stored under the caller's general area"),
        (status = 400, description = "Disallowed type or too large", body = ErrorResponse)
    )
)]
pub async fn upload_file(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> GatewayResult<(StatusCode, Json<StoredUpload>)> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let stored = state.services.files.upload_general(&actor, &file).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[utoipa::path(
    get,
    path = "/api/files/download/{path}",
    tag = "Files",
    security(("bearerAuth" = [])),
    params(("path" = String, Path, description = "Storage path")),
    responses(
        (status = 200, description = "File content"),
        (status = 403, description = "Path belongs to someone else", body = ErrorResponse),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
pub async fn download_file(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(path): Path<String>,
) -> GatewayResult<Response> {
    let file = state.services.files.download(&actor, &path).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace('"', "")
    );

    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.content,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/files/info/{path}",
    tag = "Files",
    security(("bearerAuth" = [])),
    params(("path" = String, Path, description = "Storage path")),
    responses(
        (status = 200, description = "Size, timestamps and the project record if any"),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
pub async fn file_info(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(path): Path<String>,
) -> GatewayResult<Json<FileInfo>> {
    Ok(Json(state.services.files.info(&actor, &path).await?))
}

#[utoipa::path(
    delete,
    path = "/api/files/delete/{path}",
    tag = "Files",
    security(("bearerAuth" = [])),
    params(("path" = String, Path, description = "Storage path")),
    responses(
        (status = 204, description = "File removed"),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
pub async fn delete_file(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(path): Path<String>,
) -> GatewayResult<StatusCode> {
    state.services.files.delete(&actor, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/files/project/{id}",
    tag = "Files",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Project id"), PageQuery),
    responses((status = 200, description = "Files attached to the project"))
)]
pub async fn project_files(
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

#[utoipa::path(
    get,
    path = "/api/files/stats",
    tag = "Files",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Storage backend and file totals"),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn storage_stats(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<StorageStats>> {
    Ok(Json(state.services.files.stats(&actor).await?))
}
