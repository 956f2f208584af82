//! REST API endpoints for the gateway

pub mod admin;
pub mod auth;
pub mod contracts;
pub mod files;
pub mod health;
pub mod messages;
pub mod payments;
pub mod projects;
pub mod users;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use portal_database::Page;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::middleware::auth_middleware;
use crate::state::GatewayState;

/// Paging metadata attached to every list response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        let pagination = PaginationMeta {
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            pages: page.pages(),
            has_prev: page.has_prev(),
            has_next: page.has_next(),
        };
        Self {
            items: page.items,
            pagination,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: i64,
}

/// Create all REST API routes
pub fn create_rest_routes(state: Arc<GatewayState>) -> Router<Arc<GatewayState>> {
    let public = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::health_check))
        .nest("/api/auth", auth::public_routes())
        .nest("/api/projects", projects::public_routes())
        .nest("/api/payments", payments::public_routes());

    let protected = Router::new()
        .nest("/api/auth", auth::protected_routes())
        .nest("/api/users", users::routes())
        .nest("/api/projects", projects::protected_routes())
        .nest("/api/contracts", contracts::routes())
        .nest("/api/payments", payments::protected_routes())
        .nest("/api/messages", messages::routes())
        .nest("/api/files", files::routes())
        .nest("/api/admin", admin::routes())
        .route_layer(from_fn_with_state(state, auth_middleware));

    public.merge(protected)
}
