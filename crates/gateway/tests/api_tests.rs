use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use portal_auth::NewAccount;
use portal_config::{AppConfig, AuthConfig, DatabaseConfig, PaymentsConfig};
use portal_database::{initialize_database, UserRole};
use portal_gateway::{create_router, GatewayState};
use portal_services::payment_gateway::webhook::sign_payload;
use portal_services::{LocalStorage, Services, StripeGateway};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "whsec_gateway_tests";

struct TestApp {
    router: Router,
    services: Services,
    _temp_dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let database = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("portal.sqlite").display()),
            max_connections: 5,
        };
        let pool = initialize_database(&database).await.unwrap();

        let config = AppConfig {
            database,
            auth: AuthConfig {
                jwt_secret: "gateway-test-secret-with-enough-entropy".into(),
                ..AuthConfig::default()
            },
            payments: PaymentsConfig {
                stripe_secret_key: Some("sk_test_gateway".into()),
                stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
                ..PaymentsConfig::default()
            },
            ..AppConfig::default()
        };

        let storage = Arc::new(LocalStorage::new(temp_dir.path().join("uploads")));
        let gateway = Arc::new(StripeGateway::from_config(&config.payments).unwrap());
        let services = Services::new(pool, &config, storage, gateway);
        let router = create_router(GatewayState::new(services.clone(), Arc::new(config)));

        Self {
            router,
            services,
            _temp_dir: temp_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        self.services
            .auth
            .create_account(NewAccount {
                email: "admin@example.com".into(),
                password: Some("Adm1nPassword".into()),
                first_name: "Ada".into(),
                last_name: "Admin".into(),
                company: None,
                phone: None,
                role: UserRole::Admin,
            })
            .await
            .unwrap();
        self.login("admin@example.com", "Adm1nPassword").await
    }

    async fn client_token(&self) -> String {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                json!({
                    "email": "client@example.com",
                    "password": "Cl1entPassword",
                    "first_name": "Casey",
                    "last_name": "Client"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["access_token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_reports_payment_availability() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["payments"], "configured");
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/projects", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].is_string());

    let (status, _) = app.get("/api/projects", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_then_login_returns_the_profile() {
    let app = TestApp::new().await;
    app.client_token().await;

    let token = app.login("client@example.com", "Cl1entPassword").await;
    let (status, body) = app.get("/api/auth/me", Some(&token)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "client@example.com");
    assert_eq!(body["user"]["role"], "client");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new().await;
    app.client_token().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/auth/register",
            None,
            json!({
                "email": "CLIENT@example.com",
                "password": "Cl1entPassword",
                "first_name": "Casey",
                "last_name": "Again"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    app.client_token().await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "client@example.com", "password": "nope" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\":"))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");
}

#[tokio::test]
async fn public_submission_requires_a_project_type() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/projects/submit",
            None,
            json!({
                "email": "lead@example.com",
                "first_name": "Lee",
                "last_name": "Lead",
                "name": "Brochure site",
                "description": "Five pages and a contact form"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn public_submission_creates_account_and_project() {
    let app = TestApp::new().await;

    let (status, types) = app.get("/api/projects/types", None).await;
    assert_eq!(status, StatusCode::OK);
    let type_id = types[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .json(
            Method::POST,
            "/api/projects/submit",
            None,
            json!({
                "email": "lead@example.com",
                "first_name": "Lee",
                "last_name": "Lead",
                "project_type_id": type_id,
                "name": "Brochure site",
                "description": "Five pages and a contact form"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["project"]["status"], "submitted");
    assert_eq!(body["account_created"], true);
}

#[tokio::test]
async fn illegal_transition_conflicts_and_keeps_status() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let client = app.client_token().await;

    let (_, types) = app.get("/api/projects/types", None).await;
    let (status, created) = app
        .json(
            Method::POST,
            "/api/projects",
            Some(&client),
            json!({
                "project_type_id": types[0]["id"],
                "name": "Mobile app",
                "description": "Companion app for the storefront"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let project_id = created["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/projects/{project_id}/status"),
            Some(&admin),
            json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, detail) = app
        .get(&format!("/api/projects/{project_id}"), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["project"]["status"], "submitted");

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/projects/{project_id}/status"),
            Some(&client),
            json!({ "status": "reviewing" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_are_forbidden_to_clients() {
    let app = TestApp::new().await;
    let client = app.client_token().await;

    let (status, body) = app.get("/api/admin/dashboard", Some(&client)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");
}

#[tokio::test]
async fn unread_counts_start_at_zero() {
    let app = TestApp::new().await;
    let client = app.client_token().await;

    let (status, body) = app.get("/api/messages/unread-count", Some(&client)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, body) = app
        .get("/api/messages/notifications/unread-count", Some(&client))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["count"].is_number());
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() {
    let app = TestApp::new().await;
    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_1", "object": "payment_intent" } }
    })
    .to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/webhook")
        .header("stripe-signature", format!("t={},v1=deadbeef", Utc::now().timestamp()))
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/webhook")
        .body(Body::from(payload))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_ignores_unhandled_events() {
    let app = TestApp::new().await;
    let payload = json!({
        "id": "evt_customer",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1", "object": "customer" } }
    })
    .to_string();
    let signature = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/webhook")
        .header("stripe-signature", signature)
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}
