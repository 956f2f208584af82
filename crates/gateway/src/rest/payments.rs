//! Payment, checkout, webhook and invoice endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Extension, Json, Router,
};
use portal_database::{Invoice, InvoiceStatus, Payment, PaymentStatus};
use portal_services::payments::{
    CheckoutSession, NewInvoice, NewPaymentRequest, PaymentStats, WebhookReceipt,
};
use portal_services::Actor;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::rest::PageResponse;
use crate::state::GatewayState;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPaymentsQuery {
    pub project_id: Option<String>,
    #[param(value_type = Option<String>)]
    pub status: Option<PaymentStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListInvoicesQuery {
    pub project_id: Option<String>,
    #[param(value_type = Option<String>)]
    pub status: Option<InvoiceStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub project_id: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub description: String,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateInvoiceRequest {
    pub project_id: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub due_date: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub line_items: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InvoiceStatusRequest {
    #[schema(value_type = String)]
    pub status: InvoiceStatus,
}

pub fn public_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/webhook", post(payment_webhook))
}

pub fn protected_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list_payments).post(create_payment))
        .route("/stats", get(payment_stats))
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/invoices/:id", get(get_invoice))
        .route("/invoices/:id/status", put(update_invoice_status))
        .route("/:id", get(get_payment))
        .route("/:id/intent", post(create_payment_intent))
        .route("/:id/confirm", post(confirm_payment))
        .route("/:id/refund", post(refund_payment))
        .route("/:id/cancel", put(cancel_payment))
}

#[utoipa::path(
    get,
    path = "/api/payments",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(ListPaymentsQuery),
    responses((status = 200, description = "Payments visible to the caller"))
)]
pub async fn list_payments(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListPaymentsQuery>,
) -> GatewayResult<Json<PageResponse<Payment>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .payments
        .list(&actor, query.project_id, query.status, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    tag = "Payments",
    security(("bearerAuth" = [])),
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment request created"),
        (status = 400, description = "Invalid amount or reference", body = ErrorResponse),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn create_payment(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<CreatePaymentRequest>,
) -> GatewayResult<(StatusCode, Json<Payment>)> {
    let payment = state
        .services
        .payments
        .create_request(
            &actor,
            NewPaymentRequest {
                project_id: payload.project_id,
                amount: payload.amount,
                currency: payload.currency,
                description: payload.description,
                milestone_id: payload.milestone_id,
                contract_id: payload.contract_id,
                due_date: payload.due_date,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

#[utoipa::path(
    get,
    path = "/api/payments/stats",
    tag = "Payments",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Revenue and payment counts"))
)]
pub async fn payment_stats(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<PaymentStats>> {
    Ok(Json(state.services.payments.stats(&actor).await?))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment"),
        (status = 404, description = "Payment not found", body = ErrorResponse)
    )
)]
pub async fn get_payment(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Payment>> {
    Ok(Json(state.services.payments.detail(&actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/intent",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Card payment intent, reused while processing"),
        (status = 409, description = "Payment cannot be paid", body = ErrorResponse),
        (status = 502, description = "Payment provider failure", body = ErrorResponse)
    )
)]
pub async fn create_payment_intent(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<CheckoutSession>> {
    Ok(Json(state.services.payments.create_intent(&actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/confirm",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Payment id")),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment state after checking the intent"),
        (status = 400, description = "Intent does not belong to this payment", body = ErrorResponse),
        (status = 502, description = "Payment provider failure", body = ErrorResponse)
    )
)]
pub async fn confirm_payment(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ConfirmPaymentRequest>,
) -> GatewayResult<Json<Payment>> {
    let payment = state
        .services
        .payments
        .confirm(&actor, &id, &payload.payment_intent_id)
        .await?;
    Ok(Json(payment))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/refund",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment refunded"),
        (status = 409, description = "Only succeeded payments can be refunded", body = ErrorResponse)
    )
)]
pub async fn refund_payment(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Payment>> {
    Ok(Json(state.services.payments.refund(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/payments/{id}/cancel",
    tag = "Payments",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment cancelled"),
        (status = 409, description = "Payment already settled", body = ErrorResponse)
    )
)]
pub async fn cancel_payment(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Payment>> {
    Ok(Json(state.services.payments.cancel(&actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    tag = "Payments",
    request_body(content = String, description = "Raw event payload as signed by the provider"),
    responses(
        (status = 200, description = "Event applied, ignored or already seen"),
        (status = 400, description = "Missing or invalid signature", body = ErrorResponse)
    )
)]
pub async fn payment_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Json<WebhookReceipt>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::InvalidRequest("Missing webhook signature".to_string()))?;

    let receipt = state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;
    info!(
        event_id = %receipt.event_id,
        event_type = %receipt.event_type,
        outcome = receipt.outcome,
        "webhook processed"
    );
    Ok(Json(receipt))
}

#[utoipa::path(
    get,
    path = "/api/payments/invoices",
    tag = "Invoices",
    security(("bearerAuth" = [])),
    params(ListInvoicesQuery),
    responses((status = 200, description = "Invoices visible to the caller"))
)]
pub async fn list_invoices(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListInvoicesQuery>,
) -> GatewayResult<Json<PageResponse<Invoice>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .payments
        .list_invoices(&actor, query.project_id, query.status, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/payments/invoices",
    tag = "Invoices",
    security(("bearerAuth" = [])),
    request_body = CreateInvoiceRequest,
    responses(
        (status = 201, description = "Draft invoice with tax applied"),
        (status = 403, description = "Admin only", body = ErrorResponse)
    )
)]
pub async fn create_invoice(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<CreateInvoiceRequest>,
) -> GatewayResult<(StatusCode, Json<Invoice>)> {
    let invoice = state
        .services
        .payments
        .create_invoice(
            &actor,
            NewInvoice {
                project_id: payload.project_id,
                amount: payload.amount,
                currency: payload.currency,
                due_date: payload.due_date,
                description: payload.description,
                line_items: payload.line_items,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

#[utoipa::path(
    get,
    path = "/api/payments/invoices/{id}",
    tag = "Invoices",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Invoice"),
        (status = 404, description = "Invoice not found", body = ErrorResponse)
    )
)]
pub async fn get_invoice(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Invoice>> {
    Ok(Json(state.services.payments.invoice(&actor, &id).await?))
}

#[utoipa::path(
    put,
    path = "/api/payments/invoices/{id}/status",
    tag = "Invoices",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Invoice id")),
    request_body = InvoiceStatusRequest,
    responses(
        (status = 200, description = "Invoice moved"),
        (status = 409, description = "Transition not allowed", body = ErrorResponse)
    )
)]
pub async fn update_invoice_status(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<InvoiceStatusRequest>,
) -> GatewayResult<Json<Invoice>> {
    let invoice = state
        .services
        .payments
        .update_invoice_status(&actor, &id, payload.status)
        .await?;
    Ok(Json(invoice))
}
