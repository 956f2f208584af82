//! Project messaging and in-app notification endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use portal_database::{Message, MessageThread, MessageType, Notification};
use portal_services::messaging::{MessageDetail, MessageQuery, NewMessage, ReplyInput};
use portal_services::Actor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::rest::{CountResponse, PageResponse};
use crate::state::GatewayState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListMessagesQuery {
    pub project_id: Option<String>,
    #[param(value_type = Option<String>)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub project_id: String,
    pub subject: Option<String>,
    pub content: String,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub message_type: MessageType,
    #[schema(value_type = Option<Vec<Object>>)]
    pub attachments: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplyRequest {
    pub content: String,
    #[schema(value_type = Option<Vec<Object>>)]
    pub attachments: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkedResponse {
    pub updated: u64,
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list_messages).post(send_message))
        .route("/unread-count", get(unread_message_count))
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_notification_count))
        .route("/notifications/mark-all-read", put(mark_all_notifications_read))
        .route("/notifications/:id/read", put(mark_notification_read))
        .route("/notifications/:id", delete(delete_notification))
        .route("/:id", get(get_message))
        .route("/:id/reply", post(reply_to_message))
        .route("/:id/read", put(mark_message_read))
}

#[utoipa::path(
    get,
    path = "/api/messages",
    tag = "Messages",
    security(("bearerAuth" = [])),
    params(ListMessagesQuery),
    responses((status = 200, description = "Thread roots with reply counts"))
)]
pub async fn list_messages(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListMessagesQuery>,
) -> GatewayResult<Json<PageResponse<MessageThread>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .messaging
        .list(
            &actor,
            MessageQuery {
                project_id: query.project_id,
                message_type: query.message_type,
                unread_only: query.unread_only,
            },
            pagination,
        )
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/api/messages",
    tag = "Messages",
    security(("bearerAuth" = [])),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent"),
        (status = 400, description = "Missing content or no recipient", body = ErrorResponse),
        (status = 403, description = "Not a participant of the project", body = ErrorResponse)
    )
)]
pub async fn send_message(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<SendMessageRequest>,
) -> GatewayResult<(StatusCode, Json<Message>)> {
    let message = state
        .services
        .messaging
        .send(
            &actor,
            NewMessage {
                project_id: payload.project_id,
                subject: payload.subject,
                content: payload.content,
                message_type: payload.message_type,
                attachments: payload.attachments,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[utoipa::path(
    get,
    path = "/api/messages/unread-count",
    tag = "Messages",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Unread messages addressed to the caller", body = CountResponse))
)]
pub async fn unread_message_count(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<CountResponse>> {
    let count = state.services.messaging.unread_count(&actor).await?;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    get,
    path = "/api/messages/{id}",
    tag = "Messages",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Message id")),
    responses(
        (status = 200, description = "Message with its replies; marks the thread read"),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Message not found", body = ErrorResponse)
    )
)]
pub async fn get_message(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<MessageDetail>> {
    Ok(Json(state.services.messaging.detail(&actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/api/messages/{id}/reply",
    tag = "Messages",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Message id")),
    request_body = ReplyRequest,
    responses(
        (status = 201, description = "Reply sent to the other participant"),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn reply_to_message(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ReplyRequest>,
) -> GatewayResult<(StatusCode, Json<Message>)> {
    let reply = state
        .services
        .messaging
        .reply(
            &actor,
            &id,
            ReplyInput {
                content: payload.content,
                attachments: payload.attachments,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

#[utoipa::path(
    put,
    path = "/api/messages/{id}/read",
    tag = "Messages",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Message id")),
    responses(
        (status = 200, description = "Message marked read"),
        (status = 403, description = "Only the recipient can mark a message read", body = ErrorResponse)
    )
)]
pub async fn mark_message_read(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Message>> {
    Ok(Json(state.services.messaging.mark_read(&actor, &id).await?))
}

#[utoipa::path(
    get,
    path = "/api/messages/notifications",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    params(ListNotificationsQuery),
    responses((status = 200, description = "Notifications of the caller, newest first"))
)]
pub async fn list_notifications(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(query): ApiQuery<ListNotificationsQuery>,
) -> GatewayResult<Json<PageResponse<Notification>>> {
    let pagination = state.pagination(query.page, query.per_page);
    let page = state
        .services
        .notifications
        .list(&actor, query.unread_only, pagination)
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/api/messages/notifications/unread-count",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Unread notifications", body = CountResponse))
)]
pub async fn unread_notification_count(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<CountResponse>> {
    let count = state.services.notifications.unread_count(&actor).await?;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    put,
    path = "/api/messages/notifications/mark-all-read",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Number of notifications marked", body = MarkedResponse))
)]
pub async fn mark_all_notifications_read(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
) -> GatewayResult<Json<MarkedResponse>> {
    let updated = state.services.notifications.mark_all_read(&actor).await?;
    Ok(Json(MarkedResponse { updated }))
}

#[utoipa::path(
    put,
    path = "/api/messages/notifications/{id}/read",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read"),
        (status = 404, description = "Notification not found", body = ErrorResponse)
    )
)]
pub async fn mark_notification_read(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Notification>> {
    Ok(Json(state.services.notifications.mark_read(&actor, &id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/messages/notifications/{id}",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 404, description = "Notification not found", body = ErrorResponse)
    )
)]
pub async fn delete_notification(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> GatewayResult<StatusCode> {
    state.services.notifications.delete(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
