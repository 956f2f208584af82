use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request, StatusCode,
    },
    Router,
};
use http_body_util::BodyExt;
use portal_auth::NewAccount;
use portal_backend_runtime::BackendServices;
use portal_config::AppConfig;
use portal_database::UserRole;
use portal_gateway::{create_router, GatewayState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "portal-e2e-boundary";

struct TestApp {
    router: Router,
    admin: String,
    client: String,
    _data_dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let data_dir = TempDir::new().expect("create temp dir");
        let db_path = data_dir.path().join("portal-e2e.db");

        let mut config = AppConfig::default();
        config.database.url = format!("sqlite://{}", db_path.to_string_lossy());
        config.database.max_connections = 5;
        config.auth.jwt_secret = "e2e-secret-that-is-long-enough-for-hs256".into();
        config.storage.upload_dir = data_dir
            .path()
            .join("uploads")
            .to_string_lossy()
            .into_owned();

        let services = BackendServices::initialise(&config)
            .await
            .expect("initialise backend services");

        services
            .services
            .auth
            .create_account(NewAccount {
                email: "owner@example.com".into(),
                password: Some("0wnerPassword".into()),
                first_name: "Olive".into(),
                last_name: "Owner".into(),
                company: None,
                phone: None,
                role: UserRole::Admin,
            })
            .await
            .expect("seed admin");

        let router = create_router(GatewayState::new(
            services.services.clone(),
            Arc::new(config),
        ));

        let mut app = Self {
            router,
            admin: String::new(),
            client: String::new(),
            _data_dir: data_dir,
        };

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                json!({ "email": "owner@example.com", "password": "0wnerPassword" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "admin login: {body}");
        app.admin = body["access_token"].as_str().unwrap().to_string();

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                json!({
                    "email": "buyer@example.com",
                    "password": "Buy3rPassword",
                    "first_name": "Bo",
                    "last_name": "Buyer"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "client register: {body}");
        app.client = body["access_token"].as_str().unwrap().to_string();

        app
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
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
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn put(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.json(Method::PUT, uri, Some(token), json!({})).await
    }

    async fn multipart(&self, uri: &str, token: &str, files: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        for (field, file_name) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&[0x89, b'P', b'N', b'G', 1, 2, 3, 4]);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn client_project(&self) -> String {
        let (_, types) = self.get("/api/projects/types", &self.client).await;
        let (status, project) = self
            .json(
                Method::POST,
                "/api/projects",
                Some(&self.client),
                json!({
                    "project_type_id": types[0]["id"],
                    "name": "Booking platform",
                    "description": "Appointments with reminders and payments"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create project: {project}");
        assert_eq!(project["status"], "submitted");
        project["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn contract_is_signed_once_after_identity_review() {
    let app = TestApp::new().await;
    let project_id = app.client_project().await;

    let (status, contract) = app
        .json(
            Method::POST,
            "/api/contracts",
            Some(&app.admin),
            json!({
                "project_id": project_id,
                "title": "Development agreement",
                "content": "Scope, schedule and payment terms",
                "amount": 4800.0
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create contract: {contract}");
    let contract_id = contract["id"].as_str().unwrap().to_string();
    assert_eq!(contract["status"], "draft");

    let (status, sent) = app
        .put(&format!("/api/contracts/{contract_id}/send"), &app.admin)
        .await;
    assert_eq!(status, StatusCode::OK, "send: {sent}");
    assert_eq!(sent["status"], "sent");

    let sign_uri = format!("/api/contracts/{contract_id}/sign");
    let (status, _) = app
        .multipart(&sign_uri, &app.client, &[("signature", "signature.png")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "unverified clients cannot sign");

    let (status, submitted) = app
        .multipart(
            "/api/users/identity-verification",
            &app.client,
            &[
                ("front_id", "front.png"),
                ("back_id", "back.png"),
                ("signature", "signature.png"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "identity: {submitted}");

    let (_, me) = app.get("/api/auth/me", &app.client).await;
    let client_id = me["user"]["id"].as_str().unwrap().to_string();
    let (status, decided) = app
        .json(
            Method::PUT,
            &format!("/api/admin/users/{client_id}/verification"),
            Some(&app.admin),
            json!({ "status": "verified" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "verification: {decided}");

    let (status, signed) = app
        .multipart(&sign_uri, &app.client, &[("signature", "signature.png")])
        .await;
    assert_eq!(status, StatusCode::OK, "sign: {signed}");

    let (status, again) = app
        .multipart(&sign_uri, &app.client, &[("signature", "signature.png")])
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "second signature: {again}");

    let (status, detail) = app
        .get(&format!("/api/contracts/{contract_id}"), &app.client)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["contract"]["status"], "signed");
}

#[tokio::test]
async fn unread_count_follows_messages_addressed_to_the_user() {
    let app = TestApp::new().await;
    let project_id = app.client_project().await;

    let (status, message) = app
        .json(
            Method::POST,
            "/api/messages",
            Some(&app.admin),
            json!({
                "project_id": project_id,
                "subject": "Kick-off",
                "content": "Can we schedule a call this week?"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "send message: {message}");
    let message_id = message["id"].as_str().unwrap().to_string();

    let (_, unread) = app.get("/api/messages/unread-count", &app.client).await;
    assert_eq!(unread["count"], 1);
    let (_, admin_unread) = app.get("/api/messages/unread-count", &app.admin).await;
    assert_eq!(admin_unread["count"], 0);

    let (status, _) = app
        .get(&format!("/api/messages/{message_id}"), &app.client)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, unread) = app.get("/api/messages/unread-count", &app.client).await;
    assert_eq!(unread["count"], 0);
}

#[tokio::test]
async fn forced_transition_is_recorded_in_the_activity_log() {
    let app = TestApp::new().await;
    let project_id = app.client_project().await;
    let status_uri = format!("/api/projects/{project_id}/status");

    let (status, _) = app
        .json(
            Method::PUT,
            &status_uri,
            Some(&app.admin),
            json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, forced) = app
        .json(
            Method::PUT,
            &status_uri,
            Some(&app.admin),
            json!({ "status": "completed", "force": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "forced: {forced}");
    assert_eq!(forced["status"], "completed");

    let (status, logs) = app
        .get("/api/admin/activity-logs?entity_type=project", &app.admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    let overridden = logs["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|entry| entry["entity_id"] == project_id.as_str() && entry["action"].as_str().unwrap_or("").contains("override"));
    assert!(overridden, "override should be logged: {logs}");
}
