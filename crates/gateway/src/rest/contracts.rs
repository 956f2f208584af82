//! Contract lifecycle endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use portal_database::{Contract, ContractStatus, UpdateContractRequest};
use portal_services::contracts::{ContractDetail, ContractStats, NewContract, SignedContract};
use portal_services::Actor;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::extract::{ApiJson, ApiQuery, UploadForm};
use crate::rest::PageResponse;
use crate::state::GatewayState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListContractsQuery {
    pub project_id: Option<String>,
    #[param(value_type = Option<String>)]
    pub status: Option<ContractStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateContractRequest {
    pub project_id: String,
    pub title: String,
    pub content: String,
    pub amount: f64,
    pub currency: Option<String>,
    /// Defaults to the configured number of days from today.
    pub expiry_date: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EditContractRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub amount: Option<f64>,
    pub expiry_date: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelContractRequest {
    pub reason: Option<String>,
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list_contracts).post(create_contract))
        .route("/stats", get(contract_stats))
        .route("/:id", get(get_contract).put(update_contract))
        .route("/:id/send", put(send_contract))
        .route("/:id/sign", post(sign_contract))
        .route("/:id/activate", put(activate_contract))
        .route("/:id/complete", put(complete_contract))
        .route("/:id/cancel", put(cancel_contract))
        .route("/:id/download", get(download_contract))
}

#[utoipa::path(
    get,
    path = "/api/contracts",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(ListContractsQuery),
    responses((status = 200, description = "Contracts visible to the caller"))
)]
pub async fn list_contracts(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListContractsQuery>,
) -> GatewayResult<Json<PageResponse<Contract>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .contracts
        .list(&actor, query.project_id, query.status, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/contracts",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    request_body = CreateContractRequest,
    responses(
        (status = 201, description = "Draft contract created"),
        (status = 400, description = "Invalid amount or date", body = ErrorResponse),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn create_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<CreateContractRequest>,
) -> GatewayResult<(StatusCode, Json<Contract>)> {
    let contract = state
        .services
        .contracts
        .create(
            &actor,
            NewContract {
                project_id: payload.project_id,
                title: payload.title,
                content: payload.content,
                amount: payload.amount,
                currency: payload.currency,
                expiry_date: payload.expiry_date,
                terms_and_conditions: payload.terms_and_conditions,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

#[utoipa::path(
    get,
    path = "/api/contracts/stats",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Contract counts and signed value"))
)]
pub async fn contract_stats(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<ContractStats>> {
    Ok(Json(state.services.contracts.stats(&actor).await?))
}

#[utoipa::path(
    get,
    path = "/api/contracts/{id}",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    responses(
        (status = 200, description = "Contract with signatures"),
        (status = 404, description = "Contract not found", body = ErrorResponse)
    )
)]
pub async fn get_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<ContractDetail>> {
    Ok(Json(state.services.contracts.detail(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/contracts/{id}",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    request_body = EditContractRequest,
    responses(
        (status = 200, description = "Draft updated"),
        (status = 409, description = "Only drafts can be edited", body = ErrorResponse)
    )
)]
pub async fn update_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<EditContractRequest>,
) -> GatewayResult<Json<Contract>> {
    let changes = UpdateContractRequest {
        title: payload.title,
        content: payload.content,
        amount: payload.amount,
        expiry_date: payload.expiry_date,
        terms_and_conditions: payload.terms_and_conditions,
    };
    Ok(Json(state.services.contracts.update(&actor, &id, changes).await?))
}

#[utoipa::path(
    put,
    path = "/api/contracts/{id}/send",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    responses(
        (status = 200, description = "Contract sent to the client"),
        (status = 409, description = "Contract is not a draft", body = ErrorResponse)
    )
)]
pub async fn send_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Contract>> {
    Ok(Json(state.services.contracts.send(&actor, &id).await?))
}

/// Multipart body of a contract signature.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct SignatureForm {
    #[schema(format = Binary)]
    signature: String,
}

#[utoipa::path(
    post,
    path = "/api/contracts/{id}/sign",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    request_body(content = SignatureForm, content_type = "multipart/form-data", description = "Signature image in the `signature` field"),
    responses(
        (status = 200, description = "Contract signed"),
        (status = 400, description = "Identity not verified or invalid image", body = ErrorResponse),
        (status = 403, description = "Only the client can sign", body = ErrorResponse),
        (status = 409, description = "Already signed, expired or not awaiting signature", body = ErrorResponse)
    )
)]
pub async fn sign_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> GatewayResult<Json<SignedContract>> {
    let mut form = UploadForm::read(multipart).await?;
    let signature = form.file("signature")?;
    Ok(Json(
        state.services.contracts.sign(&actor, &id, &signature).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/contracts/{id}/activate",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    responses(
        (status = 200, description = "Contract active, project moved to in progress"),
        (status = 409, description = "Contract is not signed", body = ErrorResponse)
    )
)]
pub async fn activate_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Contract>> {
    Ok(Json(state.services.contracts.activate(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/contracts/{id}/complete",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    responses(
        (status = 200, description = "Contract completed"),
        (status = 409, description = "Contract is not active", body = ErrorResponse)
    )
)]
pub async fn complete_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Contract>> {
    Ok(Json(state.services.contracts.complete(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/contracts/{id}/cancel",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    request_body = CancelContractRequest,
    responses(
        (status = 200, description = "Contract cancelled"),
        (status = 409, description = "Contract already finished", body = ErrorResponse)
    )
)]
pub async fn cancel_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Option<Json<CancelContractRequest>>,
) -> GatewayResult<Json<Contract>> {
    let reason = payload.and_then(|Json(body)| body.reason);
    Ok(Json(
        state
            .services
            .contracts
            .cancel(&actor, &id, reason.as_deref())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/contracts/{id}/download",
    tag = "Contracts",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Contract id")),
    responses((status = 200, description = "Contract document as a JSON attachment"))
)]
pub async fn download_contract(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Response> {
    let document = state.services.contracts.document(&actor, &id).await?;
    let body = serde_json::to_vec_pretty(&document)
        .map_err(|err| GatewayError::InternalError(err.to_string()))?;
    let disposition = format!("attachment; filename=\"{}\"", document.file_name());

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
