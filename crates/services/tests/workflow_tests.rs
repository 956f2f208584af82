use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use portal_auth::NewAccount;
use portal_config::{AppConfig, AuthConfig, DatabaseConfig};
use portal_database::{
    initialize_database, ActivityFilter, ContractStatus, MessageType, Pagination, PaymentStatus,
    ProjectStatus, User, UserRole, VerificationStatus,
};
use portal_services::{
    contracts::NewContract,
    messaging::{MessageQuery, NewMessage},
    payment_gateway::{
        webhook, CreateIntent, GatewayClientError, PaymentIntent, Refund, WebhookEvent,
    },
    payments::NewPaymentRequest,
    projects::{NewMilestone, NewProject, ProjectChanges, PublicSubmission},
    users::IdentityUploads,
    Actor, LocalStorage, PaymentGateway, ServiceError, Services, Upload,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const WEBHOOK_SECRET: &str = "whsec_workflow_tests";

/// In-process stand-in for the card gateway.
#[derive(Default)]
struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl FakeGateway {
    fn settle(&self, intent_id: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(intent_id) {
            intent.status = "succeeded".to_string();
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayClientError> {
        let mut intents = self.intents.lock().unwrap();
        let intent = PaymentIntent {
            id: format!("pi_test_{}", intents.len() + 1),
            client_secret: Some("secret".to_string()),
            status: "requires_payment_method".to_string(),
            amount: request.amount,
            currency: request.currency.to_lowercase(),
            metadata: request.metadata.clone().into_iter().collect(),
        };
        intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayClientError> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or(GatewayClientError::Api {
                status: 404,
                message: "No such payment_intent".to_string(),
            })
    }

    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayClientError> {
        Ok(Refund {
            id: format!("re_{intent_id}"),
            status: "succeeded".to_string(),
        })
    }

    fn verify_webhook(&self, payload: &[u8], header: &str) -> Result<WebhookEvent, GatewayClientError> {
        webhook::verify_signature(payload, header, WEBHOOK_SECRET, 300, Utc::now().timestamp())?;
        serde_json::from_slice(payload).map_err(|err| GatewayClientError::Malformed(err.to_string()))
    }
}

struct TestContext {
    services: Services,
    gateway: Arc<FakeGateway>,
    admin: Actor,
    client: Actor,
    client_user: User,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("portal.sqlite");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 5,
        };
        let pool = initialize_database(&database).await?;

        let config = AppConfig {
            database,
            auth: AuthConfig {
                jwt_secret: "workflow-test-secret-with-enough-entropy".into(),
                ..AuthConfig::default()
            },
            ..AppConfig::default()
        };
        let gateway = Arc::new(FakeGateway::default());
        let storage = Arc::new(LocalStorage::new(temp_dir.path().join("uploads")));
        let services = Services::new(pool, &config, storage, gateway.clone());

        let admin_user = create_user(&services, "admin@example.com", UserRole::Admin).await?;
        let client_user = create_user(&services, "client@example.com", UserRole::Client).await?;

        Ok(Self {
            admin: Actor::new(&admin_user.id, UserRole::Admin, "admin-session"),
            client: Actor::new(&client_user.id, UserRole::Client, "client-session"),
            client_user,
            services,
            gateway,
            _temp_dir: temp_dir,
        })
    }

    async fn submitted_project(&self) -> TestResult<String> {
        let project = self
            .services
            .projects
            .submit(
                &self.client,
                NewProject {
                    project_type_id: Some("pt-web-development".into()),
                    name: "Storefront".into(),
                    description: "An online shop for handmade goods".into(),
                    ..NewProject::default()
                },
            )
            .await?;
        Ok(project.id)
    }

    async fn verify_client_identity(&self) -> TestResult {
        self.services
            .users
            .submit_identity(
                &self.client,
                &IdentityUploads {
                    front_id: image("front.png"),
                    back_id: image("back.png"),
                    signature: image("signature.png"),
                },
            )
            .await?;
        self.services
            .users
            .decide_verification(&self.admin, &self.client.user_id, VerificationStatus::Verified, None)
            .await?;
        Ok(())
    }
}

async fn create_user(services: &Services, email: &str, role: UserRole) -> TestResult<User> {
    let account = services
        .auth
        .create_account(NewAccount {
            email: email.into(),
            password: Some("Str0ngPassw0rd".into()),
            first_name: "Test".into(),
            last_name: "User".into(),
            company: None,
            phone: None,
            role,
        })
        .await?;
    Ok(account.user)
}

fn image(name: &str) -> Upload {
    Upload {
        file_name: name.to_string(),
        content_type: Some("image/png".to_string()),
        bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nimage-bytes"),
    }
}

fn first_page() -> Pagination {
    Pagination::new(None, None, 20)
}

#[tokio::test]
async fn illegal_project_transition_leaves_row_unchanged() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let err = ctx
        .services
        .projects
        .update(
            &ctx.admin,
            &project_id,
            ProjectChanges {
                status: Some(ProjectStatus::Completed),
                ..ProjectChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));

    let detail = ctx.services.projects.detail(&ctx.client, &project_id).await?;
    assert_eq!(detail.project.status, ProjectStatus::Submitted);
    assert!(detail.project.completion_date.is_none());

    let forced = ctx
        .services
        .projects
        .update(
            &ctx.admin,
            &project_id,
            ProjectChanges {
                status: Some(ProjectStatus::Completed),
                force: true,
                ..ProjectChanges::default()
            },
        )
        .await?;
    assert_eq!(forced.status, ProjectStatus::Completed);
    assert_eq!(forced.progress, 100);
    assert!(forced.completion_date.is_some());

    let overrides = ctx
        .services
        .activity
        .list(
            &ctx.admin,
            &ActivityFilter {
                action: Some("project_status_override".into()),
                entity_type: None,
                user_id: None,
            },
            first_page(),
        )
        .await?;
    assert_eq!(overrides.total, 1);
    Ok(())
}

#[tokio::test]
async fn clients_cannot_change_project_status() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let err = ctx
        .services
        .projects
        .update(
            &ctx.client,
            &project_id,
            ProjectChanges {
                status: Some(ProjectStatus::Reviewing),
                ..ProjectChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn submission_without_project_type_is_rejected() -> TestResult {
    let ctx = TestContext::new().await?;

    let err = ctx
        .services
        .projects
        .submit(
            &ctx.client,
            NewProject {
                project_type_id: None,
                name: "Storefront".into(),
                description: "An online shop".into(),
                ..NewProject::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = ctx
        .services
        .projects
        .submit(
            &ctx.client,
            NewProject {
                project_type_id: Some("pt-does-not-exist".into()),
                name: "Storefront".into(),
                description: "An online shop".into(),
                ..NewProject::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn public_submission_creates_an_account_once() -> TestResult {
    let ctx = TestContext::new().await?;
    let submission = || PublicSubmission {
        email: "newcomer@example.com".into(),
        first_name: "Nadia".into(),
        last_name: "Rahman".into(),
        project: NewProject {
            project_type_id: Some("pt-mobile-app".into()),
            name: "Delivery app".into(),
            description: "Courier tracking for a bakery".into(),
            ..NewProject::default()
        },
        ..PublicSubmission::default()
    };

    let first = ctx.services.projects.submit_public(submission()).await?;
    assert!(first.account_created);
    assert_eq!(first.project.status, ProjectStatus::Submitted);

    let second = ctx.services.projects.submit_public(submission()).await?;
    assert!(!second.account_created);
    assert_eq!(second.project.client_id, first.project.client_id);

    let admin_notifications = ctx
        .services
        .notifications
        .unread_count(&ctx.admin)
        .await?;
    assert_eq!(admin_notifications, 2);
    Ok(())
}

#[tokio::test]
async fn milestone_completion_is_idempotent() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let design = ctx
        .services
        .projects
        .create_milestone(
            &ctx.admin,
            &project_id,
            NewMilestone {
                title: "Design".into(),
                payment_percentage: Some(40.0),
                ..NewMilestone::default()
            },
        )
        .await?;
    ctx.services
        .projects
        .create_milestone(
            &ctx.admin,
            &project_id,
            NewMilestone {
                title: "Build".into(),
                payment_percentage: Some(60.0),
                ..NewMilestone::default()
            },
        )
        .await?;

    let over_budget = ctx
        .services
        .projects
        .create_milestone(
            &ctx.admin,
            &project_id,
            NewMilestone {
                title: "Extras".into(),
                payment_percentage: Some(1.0),
                ..NewMilestone::default()
            },
        )
        .await;
    assert!(matches!(over_budget, Err(ServiceError::Validation(_))));

    let before = ctx.services.notifications.unread_count(&ctx.client).await?;
    let first = ctx
        .services
        .projects
        .complete_milestone(&ctx.admin, &project_id, &design.id)
        .await?;
    assert!(first.newly_completed);
    assert_eq!(first.project_progress, 50);

    let again = ctx
        .services
        .projects
        .complete_milestone(&ctx.admin, &project_id, &design.id)
        .await?;
    assert!(!again.newly_completed);
    assert_eq!(again.milestone, first.milestone);

    let after = ctx.services.notifications.unread_count(&ctx.client).await?;
    assert_eq!(after - before, 1);
    Ok(())
}

#[tokio::test]
async fn contract_can_only_be_signed_once() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let contract = ctx
        .services
        .contracts
        .create(
            &ctx.admin,
            NewContract {
                project_id: project_id.clone(),
                title: "Development agreement".into(),
                content: "Scope, schedule and fees".into(),
                amount: 1500.0,
                ..NewContract::default()
            },
        )
        .await?;
    assert!(contract.contract_number.starts_with("CON-"));
    assert_eq!(contract.currency, "OMR");
    ctx.services.contracts.send(&ctx.admin, &contract.id).await?;

    let unverified = ctx
        .services
        .contracts
        .sign(&ctx.client, &contract.id, &image("signature.png"))
        .await;
    assert!(matches!(unverified, Err(ServiceError::Validation(_))));

    ctx.verify_client_identity().await?;

    let not_client = ctx
        .services
        .contracts
        .sign(&ctx.admin, &contract.id, &image("signature.png"))
        .await;
    assert!(matches!(not_client, Err(ServiceError::Forbidden(_))));

    let signed = ctx
        .services
        .contracts
        .sign(&ctx.client, &contract.id, &image("signature.png"))
        .await?;
    assert_eq!(signed.contract.status, ContractStatus::Signed);
    assert_eq!(signed.signature.signer_id, ctx.client.user_id);

    let again = ctx
        .services
        .contracts
        .sign(&ctx.client, &contract.id, &image("signature.png"))
        .await;
    assert!(matches!(again, Err(ServiceError::AlreadySigned)));

    let detail = ctx.services.contracts.detail(&ctx.client, &contract.id).await?;
    assert_eq!(detail.signatures.len(), 1);
    Ok(())
}

#[tokio::test]
async fn activating_a_contract_starts_an_approved_project() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;
    ctx.services
        .projects
        .update(
            &ctx.admin,
            &project_id,
            ProjectChanges {
                status: Some(ProjectStatus::Approved),
                ..ProjectChanges::default()
            },
        )
        .await?;
    ctx.verify_client_identity().await?;

    let contract = ctx
        .services
        .contracts
        .create(
            &ctx.admin,
            NewContract {
                project_id: project_id.clone(),
                title: "Agreement".into(),
                content: "Terms".into(),
                amount: 900.0,
                ..NewContract::default()
            },
        )
        .await?;
    ctx.services.contracts.send(&ctx.admin, &contract.id).await?;
    ctx.services
        .contracts
        .sign(&ctx.client, &contract.id, &image("signature.png"))
        .await?;

    let active = ctx.services.contracts.activate(&ctx.admin, &contract.id).await?;
    assert_eq!(active.status, ContractStatus::Active);
    let project = ctx.services.projects.detail(&ctx.admin, &project_id).await?;
    assert_eq!(project.project.status, ProjectStatus::InProgress);

    let completed = ctx.services.contracts.complete(&ctx.admin, &contract.id).await?;
    assert_eq!(completed.status, ContractStatus::Completed);
    let project = ctx.services.projects.detail(&ctx.admin, &project_id).await?;
    assert_eq!(project.project.status, ProjectStatus::Completed);

    let cancel = ctx.services.contracts.cancel(&ctx.admin, &contract.id, None).await;
    assert!(matches!(cancel, Err(ServiceError::InvalidTransition { .. })));
    Ok(())
}

#[tokio::test]
async fn overdue_contracts_expire_on_signature_and_in_the_sweep() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;
    ctx.verify_client_identity().await?;

    let mut ids = Vec::new();
    for (title, expiry_date) in [
        ("Lapsed agreement", Some("2000-01-01")),
        ("Forgotten agreement", Some("2000-01-01")),
        ("Current agreement", None),
    ] {
        let contract = ctx
            .services
            .contracts
            .create(
                &ctx.admin,
                NewContract {
                    project_id: project_id.clone(),
                    title: title.into(),
                    content: "Terms".into(),
                    amount: 300.0,
                    expiry_date: expiry_date.map(str::to_string),
                    ..NewContract::default()
                },
            )
            .await?;
        ctx.services.contracts.send(&ctx.admin, &contract.id).await?;
        ids.push(contract.id);
    }

    let lapsed = ctx
        .services
        .contracts
        .sign(&ctx.client, &ids[0], &image("signature.png"))
        .await;
    assert!(matches!(lapsed, Err(ServiceError::Conflict(_))));
    let detail = ctx.services.contracts.detail(&ctx.admin, &ids[0]).await?;
    assert_eq!(detail.contract.status, ContractStatus::Expired);
    assert!(detail.signatures.is_empty());

    assert_eq!(ctx.services.contracts.expire_overdue().await?, 1);
    let forgotten = ctx.services.contracts.detail(&ctx.admin, &ids[1]).await?;
    assert_eq!(forgotten.contract.status, ContractStatus::Expired);
    let current = ctx.services.contracts.detail(&ctx.admin, &ids[2]).await?;
    assert_eq!(current.contract.status, ContractStatus::Sent);
    assert_eq!(ctx.services.contracts.expire_overdue().await?, 0);

    ctx.services
        .contracts
        .sign(&ctx.client, &ids[2], &image("signature.png"))
        .await?;
    let cancelled = ctx
        .services
        .contracts
        .cancel(&ctx.admin, &ids[2], Some("Client withdrew"))
        .await?;
    assert_eq!(cancelled.status, ContractStatus::Cancelled);

    let from_expired = ctx.services.contracts.cancel(&ctx.admin, &ids[0], None).await;
    assert!(matches!(from_expired, Err(ServiceError::InvalidTransition { .. })));
    Ok(())
}

fn succeeded_event(event_id: &str, intent_id: &str, metadata: serde_json::Value) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": intent_id,
                "object": "payment_intent",
                "amount": 25_500,
                "currency": "omr",
                "status": "succeeded",
                "metadata": metadata,
            }
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn replayed_webhook_creates_a_single_payment() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let payload = succeeded_event(
        "evt_1",
        "pi_external",
        json!({ "project_id": project_id, "client_id": ctx.client.user_id }),
    );
    let header = webhook::sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());

    let first = ctx.services.payments.handle_webhook(&payload, &header).await?;
    assert_eq!(first.outcome, "applied");
    let replay = ctx.services.payments.handle_webhook(&payload, &header).await?;
    assert_eq!(replay.outcome, "duplicate");

    let payments = ctx
        .services
        .payments
        .list(&ctx.admin, Some(project_id), None, first_page())
        .await?;
    assert_eq!(payments.total, 1);
    let payment = &payments.items[0];
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(payment.transaction_id.as_deref(), Some("pi_external"));
    assert_eq!(payment.amount, 25.5);
    Ok(())
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() -> TestResult {
    let ctx = TestContext::new().await?;
    let payload = succeeded_event("evt_2", "pi_x", json!({}));
    let header = webhook::sign_payload(&payload, "wrong-secret", Utc::now().timestamp());

    let err = ctx
        .services
        .payments
        .handle_webhook(&payload, &header)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PaymentGateway(GatewayClientError::InvalidSignature)
    ));
    Ok(())
}

#[tokio::test]
async fn card_payment_flow_settles_requested_payment() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let payment = ctx
        .services
        .payments
        .create_request(
            &ctx.admin,
            NewPaymentRequest {
                project_id,
                amount: 120.5,
                description: "Deposit".into(),
                ..NewPaymentRequest::default()
            },
        )
        .await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.invoice_number.as_deref().unwrap_or_default().starts_with("INV-"));

    let checkout = ctx.services.payments.create_intent(&ctx.client, &payment.id).await?;
    assert_eq!(checkout.amount, 120_500);
    assert_eq!(checkout.payment.status, PaymentStatus::Processing);

    let resumed = ctx.services.payments.create_intent(&ctx.client, &payment.id).await?;
    assert!(resumed.reused);
    assert_eq!(resumed.intent_id, checkout.intent_id);

    let pending = ctx
        .services
        .payments
        .confirm(&ctx.client, &payment.id, &checkout.intent_id)
        .await?;
    assert_eq!(pending.status, PaymentStatus::Processing);

    ctx.gateway.settle(&checkout.intent_id);
    let paid = ctx
        .services
        .payments
        .confirm(&ctx.client, &payment.id, &checkout.intent_id)
        .await?;
    assert_eq!(paid.status, PaymentStatus::Succeeded);
    assert!(paid.paid_date.is_some());

    let refunded = ctx.services.payments.refund(&ctx.admin, &payment.id).await?;
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    Ok(())
}

#[tokio::test]
async fn unread_count_tracks_messages_to_the_user() -> TestResult {
    let ctx = TestContext::new().await?;
    let project_id = ctx.submitted_project().await?;

    let message = ctx
        .services
        .messaging
        .send(
            &ctx.admin,
            NewMessage {
                project_id: project_id.clone(),
                subject: Some("Kickoff".into()),
                content: "Welcome aboard".into(),
                message_type: MessageType::Update,
                attachments: None,
            },
        )
        .await?;
    assert_eq!(message.recipient_id, ctx.client_user.id);
    ctx.services
        .messaging
        .send(
            &ctx.admin,
            NewMessage {
                project_id: project_id.clone(),
                content: "Second note".into(),
                ..NewMessage::default()
            },
        )
        .await?;
    assert_eq!(ctx.services.messaging.unread_count(&ctx.client).await?, 2);
    assert_eq!(ctx.services.messaging.unread_count(&ctx.admin).await?, 0);

    let detail = ctx.services.messaging.detail(&ctx.client, &message.id).await?;
    assert!(detail.message.is_read);
    assert_eq!(ctx.services.messaging.unread_count(&ctx.client).await?, 1);

    let reply = ctx
        .services
        .messaging
        .reply(
            &ctx.client,
            &message.id,
            portal_services::messaging::ReplyInput {
                content: "Thanks!".into(),
                attachments: None,
            },
        )
        .await?;
    assert_eq!(reply.subject.as_deref(), Some("Re: Kickoff"));
    assert_eq!(reply.recipient_id, ctx.admin.user_id);
    assert_eq!(ctx.services.messaging.unread_count(&ctx.admin).await?, 1);

    let threads = ctx
        .services
        .messaging
        .list(&ctx.client, MessageQuery::default(), first_page())
        .await?;
    assert_eq!(threads.total, 2);

    let not_recipient = ctx.services.messaging.mark_read(&ctx.admin, &message.id).await;
    assert!(matches!(not_recipient, Err(ServiceError::Forbidden(_))));
    Ok(())
}
