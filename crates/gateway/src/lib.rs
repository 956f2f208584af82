//! # Portal Gateway Crate
//!
//! HTTP layer of the client portal. Routes REST requests to the domain services and
//! turns service failures into JSON error responses.
//!
//! ## Architecture
//!
//! - **REST**: HTTP API endpoints with OpenAPI documentation
//! - **State**: Services and configuration shared by every handler
//! - **Middleware**: Authentication, request origin, CORS and request logging
//! - **Extract**: JSON, query and multipart extractors that reject with 400
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portal_gateway::{create_router, GatewayState};
//!
//! let state = GatewayState::new(services, config);
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

pub mod error;
pub mod extract;
pub mod middleware;
pub mod rest;
pub mod state;

pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use middleware::{auth_middleware, create_cors_layer};
pub use state::GatewayState;

use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, Router};
use std::sync::Arc;

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);
    let cors = create_cors_layer(&state.config.cors);
    let body_limit = state.body_limit();

    #[allow(unused_mut)]
    let mut router = rest::create_rest_routes(state.clone()).with_state(state);

    #[cfg(debug_assertions)]
    {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        router = router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
        );
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(axum_middleware::from_fn(middleware::request_context_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}

#[cfg(debug_assertions)]
mod docs {
    use crate::{error, rest};
    use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
    use utoipa::{Modify, OpenApi};

    struct BearerAuth;

    impl Modify for BearerAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(components) = openapi.components.as_mut() {
                components.add_security_scheme(
                    "bearerAuth",
                    SecurityScheme::Http(
                        HttpBuilder::new()
                            .scheme(HttpAuthScheme::Bearer)
                            .bearer_format("JWT")
                            .build(),
                    ),
                );
            }
        }
    }

    #[derive(OpenApi)]
    #[openapi(
        paths(
            rest::health::health_check,
            rest::auth::register,
            rest::auth::login,
            rest::auth::refresh,
            rest::auth::forgot_password,
            rest::auth::reset_password,
            rest::auth::verify_email,
            rest::auth::logout,
            rest::auth::change_password,
            rest::auth::me,
            rest::users::get_profile,
            rest::users::update_profile,
            rest::users::upload_avatar,
            rest::users::get_identity_verification,
            rest::users::submit_identity_verification,
            rest::users::list_users,
            rest::users::get_user,
            rest::users::update_user_status,
            rest::users::decide_verification,
            rest::projects::list_project_types,
            rest::projects::submit_project,
            rest::projects::list_projects,
            rest::projects::create_project,
            rest::projects::project_stats,
            rest::projects::get_project,
            rest::projects::update_project,
            rest::projects::list_milestones,
            rest::projects::create_milestone,
            rest::projects::update_milestone,
            rest::projects::complete_milestone,
            rest::projects::list_project_files,
            rest::projects::upload_project_file,
            rest::projects::delete_project_file,
            rest::contracts::list_contracts,
            rest::contracts::create_contract,
            rest::contracts::contract_stats,
            rest::contracts::get_contract,
            rest::contracts::update_contract,
            rest::contracts::send_contract,
            rest::contracts::sign_contract,
            rest::contracts::activate_contract,
            rest::contracts::complete_contract,
            rest::contracts::cancel_contract,
            rest::contracts::download_contract,
            rest::payments::list_payments,
            rest::payments::create_payment,
            rest::payments::payment_stats,
            rest::payments::get_payment,
            rest::payments::create_payment_intent,
            rest::payments::confirm_payment,
            rest::payments::refund_payment,
            rest::payments::cancel_payment,
            rest::payments::payment_webhook,
            rest::payments::list_invoices,
            rest::payments::create_invoice,
            rest::payments::get_invoice,
            rest::payments::update_invoice_status,
            rest::messages::list_messages,
            rest::messages::send_message,
            rest::messages::unread_message_count,
            rest::messages::get_message,
            rest::messages::reply_to_message,
            rest::messages::mark_message_read,
            rest::messages::list_notifications,
            rest::messages::unread_notification_count,
            rest::messages::mark_all_notifications_read,
            rest::messages::mark_notification_read,
            rest::messages::delete_notification,
            rest::files::upload_file,
            rest::files::download_file,
            rest::files::file_info,
            rest::files::delete_file,
            rest::files::project_files,
            rest::files::storage_stats,
            rest::admin::dashboard,
            rest::admin::list_project_types,
            rest::admin::create_project_type,
            rest::admin::update_project_type,
            rest::admin::activity_logs,
            rest::admin::system_cleanup,
            rest::admin::broadcast,
        ),
        components(
            schemas(
                error::ErrorResponse,
                rest::PaginationMeta,
                rest::MessageResponse,
                rest::CountResponse,
                rest::health::HealthResponse,
                rest::auth::RegisterRequest,
                rest::auth::LoginRequest,
                rest::auth::RefreshRequest,
                rest::auth::ForgotPasswordRequest,
                rest::auth::ResetPasswordRequest,
                rest::auth::VerifyEmailRequest,
                rest::auth::ChangePasswordRequest,
                rest::users::UpdateProfileRequest,
                rest::users::UpdateUserStatusBody,
                rest::users::VerificationDecisionRequest,
                rest::users::AvatarForm,
                rest::users::IdentityDocumentsForm,
                rest::projects::CreateProjectRequest,
                rest::projects::SubmitProjectRequest,
                rest::projects::UpdateProjectRequest,
                rest::projects::CreateMilestoneRequest,
                rest::projects::EditMilestoneRequest,
                rest::projects::ProjectFileForm,
                rest::contracts::CreateContractRequest,
                rest::contracts::EditContractRequest,
                rest::contracts::CancelContractRequest,
                rest::contracts::SignatureForm,
                rest::payments::CreatePaymentRequest,
                rest::payments::ConfirmPaymentRequest,
                rest::payments::CreateInvoiceRequest,
                rest::payments::InvoiceStatusRequest,
                rest::messages::SendMessageRequest,
                rest::messages::ReplyRequest,
                rest::messages::MarkedResponse,
                rest::files::UploadFileForm,
                rest::admin::ProjectTypeRequest,
                rest::admin::ProjectTypeUpdate,
                rest::admin::CleanupRequest,
                rest::admin::BroadcastRequest,
            )
        ),
        modifiers(&BearerAuth),
        tags(
            (name = "Health", description = "Liveness"),
            (name = "Auth", description = "Registration, sessions and account recovery"),
            (name = "Users", description = "Profiles and identity verification"),
            (name = "Projects", description = "Project workflow and milestones"),
            (name = "Contracts", description = "Contract lifecycle and signing"),
            (name = "Payments", description = "Payments and the Stripe webhook"),
            (name = "Invoices", description = "Invoices"),
            (name = "Messages", description = "Project messaging"),
            (name = "Notifications", description = "In-app notifications"),
            (name = "Files", description = "Stored files"),
            (name = "Admin", description = "Administration and maintenance"),
        )
    )]
    pub struct ApiDoc;
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use super::docs::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn openapi_document_declares_bearer_auth() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearerAuth"));
        assert!(doc.paths.paths.contains_key("/api/projects/submit"));
        for form in ["SignatureForm", "UploadFileForm", "ProjectFileForm", "AvatarForm", "IdentityDocumentsForm"] {
            assert!(components.schemas.contains_key(form), "{form} should be documented");
        }

        let sign = &doc.paths.paths["/api/contracts/{id}/sign"];
        let body = sign.operations[&utoipa::openapi::PathItemType::Post]
            .request_body
            .as_ref()
            .expect("sign request body");
        assert!(body.content.contains_key("multipart/form-data"));
    }
}
