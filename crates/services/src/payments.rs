use chrono::{Duration, SecondsFormat, Utc};
use portal_config::PaymentsConfig;
use portal_database::{
    today, ContractRepository, CreateInvoiceRequest, CreatePaymentRequest, GatewayEventOutcome,
    GatewayEventRecord, Invoice, InvoiceFilter, InvoiceRepository, InvoiceStatus, Page,
    Pagination, Payment, PaymentFilter, PaymentRepository, PaymentStatus, ProjectRepository,
};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityEntry, ActivityService};
use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::notifications::{Notice, NotificationKind, NotificationService};
use crate::numbering::{from_minor_units, invoice_number, round_money, to_minor_units};
use crate::payment_gateway::{CreateIntent, PaymentGateway, PaymentIntent, WebhookEvent};
use crate::projects::validate_date;
use crate::workflow::{invoice_transition_allowed, payment_predecessors};

#[derive(Debug, Clone, Default)]
pub struct NewPaymentRequest {
    pub project_id: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub description: String,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub project_id: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub due_date: Option<String>,
    pub description: Option<String>,
    pub line_items: Option<Value>,
}

/// What the browser needs to finish a card payment
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub payment: Payment,
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub publishable_key: Option<String>,
    /// Amount in minor units, as charged.
    pub amount: i64,
    pub currency: String,
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub event_id: String,
    pub event_type: String,
    pub outcome: &'static str,
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStats {
    pub by_status: BTreeMap<&'static str, i64>,
    pub total_revenue: f64,
    pub revenue_last_30_days: f64,
    pub pending_amount: f64,
    pub overdue_payments: i64,
    pub invoices_by_status: BTreeMap<&'static str, i64>,
}

/// How a webhook event type maps onto the payment status machine.
fn event_target(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "payment_intent.succeeded" => Some(PaymentStatus::Succeeded),
        "payment_intent.payment_failed" => Some(PaymentStatus::Failed),
        "charge.refunded" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

/// Statuses a gateway outcome may settle. A success also lands on payments
/// still pending or marked failed.
fn gateway_settles_from(target: PaymentStatus) -> Vec<PaymentStatus> {
    match target {
        PaymentStatus::Succeeded => vec![
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Failed,
        ],
        PaymentStatus::Failed => vec![PaymentStatus::Pending, PaymentStatus::Processing],
        other => payment_predecessors(other),
    }
}

fn positive_amount(amount: f64) -> ServiceResult<f64> {
    if amount.is_finite() && amount > 0.0 {
        Ok(round_money(amount))
    } else {
        Err(ServiceError::validation("Amount must be positive"))
    }
}

fn days_from_today(days: i64) -> String {
    (Utc::now() + Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

#[derive(Clone)]
pub struct PaymentService {
    payments: PaymentRepository,
    invoices: InvoiceRepository,
    projects: ProjectRepository,
    contracts: ContractRepository,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationService,
    activity: ActivityService,
    default_currency: String,
    due_days: i64,
    tax_rate: f64,
}

impl PaymentService {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationService,
        activity: ActivityService,
        config: &PaymentsConfig,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            payments: PaymentRepository::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool.clone()),
            contracts: ContractRepository::new(pool),
            gateway,
            notifications,
            activity,
            default_currency: default_currency.into(),
            due_days: config.due_days,
            tax_rate: config.tax_rate,
        }
    }

    fn currency_or_default(&self, currency: Option<String>) -> String {
        currency
            .map(|currency| currency.trim().to_uppercase())
            .filter(|currency| currency.len() == 3)
            .unwrap_or_else(|| self.default_currency.clone())
    }

    async fn require(&self, id: &str) -> ServiceResult<Payment> {
        self.payments
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment"))
    }

    async fn owned_by(&self, actor: &Actor, id: &str) -> ServiceResult<Payment> {
        let payment = self.require(id).await?;
        if payment.client_id != actor.user_id {
            return Err(ServiceError::forbidden("Access denied"));
        }
        Ok(payment)
    }

    async fn stale(&self, id: &str, to: PaymentStatus) -> ServiceError {
        match self.require(id).await {
            Ok(payment) => ServiceError::transition("payment", payment.status, to),
            Err(err) => err,
        }
    }

    async fn announce_completed(&self, payment: &Payment) {
        let notice = Notice::new(
            NotificationKind::PaymentCompleted,
            "Payment received",
            format!("Payment of {:.3} {} was received", payment.amount, payment.currency),
        )
        .about("payment", payment.id.clone());
        self.notifications.notify(&payment.client_id, &notice).await;
        self.notifications.notify_admins(&notice).await;
    }

    pub async fn create_request(&self, actor: &Actor, input: NewPaymentRequest) -> ServiceResult<Payment> {
        actor.require_admin()?;
        let project = self
            .projects
            .find_by_id(&input.project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project"))?;
        let amount = positive_amount(input.amount)?;
        if input.description.trim().is_empty() {
            return Err(ServiceError::validation("Description is required"));
        }

        if let Some(milestone_id) = &input.milestone_id {
            let belongs = self
                .projects
                .find_milestone(milestone_id)
                .await?
                .map(|milestone| milestone.project_id == project.id)
                .unwrap_or(false);
            if !belongs {
                return Err(ServiceError::validation("Milestone does not belong to this project"));
            }
        }
        if let Some(contract_id) = &input.contract_id {
            let belongs = self
                .contracts
                .find_by_id(contract_id)
                .await?
                .map(|contract| contract.project_id == project.id)
                .unwrap_or(false);
            if !belongs {
                return Err(ServiceError::validation("Contract does not belong to this project"));
            }
        }
        let due_date = match input.due_date {
            Some(date) => {
                validate_date("due_date", &date)?;
                date
            }
            None => days_from_today(self.due_days),
        };

        let payment = self
            .payments
            .create(&CreatePaymentRequest {
                project_id: project.id.clone(),
                milestone_id: input.milestone_id,
                contract_id: input.contract_id,
                client_id: project.client_id.clone(),
                amount,
                currency: self.currency_or_default(input.currency),
                description: Some(input.description.trim().to_string()),
                due_date: Some(due_date),
                invoice_number: Some(invoice_number(Utc::now())),
                status: PaymentStatus::Pending,
                payment_gateway: None,
                transaction_id: None,
            })
            .await?;

        info!(payment_id = %payment.id, project_id = %project.id, amount, "payment requested");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("payment_requested", "payment", &payment.id)
                    .new_values(json!({ "amount": payment.amount, "currency": payment.currency })),
            )
            .await;
        self.notifications
            .notify(
                &payment.client_id,
                &Notice::new(
                    NotificationKind::PaymentRequest,
                    "Payment requested",
                    format!(
                        "A payment of {:.3} {} is due for {}",
                        payment.amount, payment.currency, project.name
                    ),
                )
                .about("payment", payment.id.clone())
                .link(format!("/payments/{}", payment.id)),
            )
            .await;
        Ok(payment)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        project_id: Option<String>,
        status: Option<PaymentStatus>,
        pagination: Pagination,
    ) -> ServiceResult<Page<Payment>> {
        let filter = PaymentFilter {
            client_id: (!actor.is_admin()).then(|| actor.user_id.clone()),
            project_id,
            status,
        };
        Ok(self.payments.list(&filter, pagination).await?)
    }

    pub async fn detail(&self, actor: &Actor, id: &str) -> ServiceResult<Payment> {
        let payment = self.require(id).await?;
        actor.require_access(&payment.client_id)?;
        Ok(payment)
    }

    fn checkout(&self, payment: Payment, intent: PaymentIntent, reused: bool) -> CheckoutSession {
        CheckoutSession {
            payment,
            intent_id: intent.id,
            client_secret: intent.client_secret,
            publishable_key: self.gateway.publishable_key().map(str::to_string),
            amount: intent.amount,
            currency: intent.currency,
            reused,
        }
    }

    /// Start (or resume) a card payment for a pending payment.
    pub async fn create_intent(&self, actor: &Actor, id: &str) -> ServiceResult<CheckoutSession> {
        let payment = self.owned_by(actor, id).await?;
        let payable = [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Failed,
        ];
        if !payable.contains(&payment.status) {
            return Err(ServiceError::transition(
                "payment",
                payment.status,
                PaymentStatus::Processing,
            ));
        }

        if payment.status == PaymentStatus::Processing {
            if let Some(existing) = &payment.transaction_id {
                let intent = self.gateway.retrieve_intent(existing).await?;
                debug!(payment_id = id, intent_id = %intent.id, "reusing payment intent");
                return Ok(self.checkout(payment, intent, true));
            }
        }

        let metadata = BTreeMap::from([
            ("payment_id".to_string(), payment.id.clone()),
            ("project_id".to_string(), payment.project_id.clone()),
            ("client_id".to_string(), payment.client_id.clone()),
        ]);
        let intent = self
            .gateway
            .create_intent(&CreateIntent {
                amount: to_minor_units(payment.amount, &payment.currency),
                currency: payment.currency.clone(),
                description: payment.description.clone(),
                metadata,
            })
            .await?;

        let processing = match self
            .payments
            .attach_intent(id, &intent.id, self.gateway.name(), &payable)
            .await?
        {
            Some(processing) => processing,
            None => return Err(self.stale(id, PaymentStatus::Processing).await),
        };

        info!(payment_id = id, intent_id = %intent.id, "payment intent created");
        Ok(self.checkout(processing, intent, false))
    }

    /// Check an intent with the gateway after the browser flow finished.
    pub async fn confirm(&self, actor: &Actor, id: &str, intent_id: &str) -> ServiceResult<Payment> {
        let payment = self.owned_by(actor, id).await?;
        if payment.status == PaymentStatus::Succeeded
            && payment.transaction_id.as_deref() == Some(intent_id)
        {
            return Ok(payment);
        }
        if let Some(existing) = payment.transaction_id.as_deref() {
            if existing != intent_id {
                return Err(ServiceError::validation(
                    "Payment intent does not belong to this payment",
                ));
            }
        }

        let intent = self.gateway.retrieve_intent(intent_id).await?;
        if intent.payment_id() != Some(payment.id.as_str()) {
            return Err(ServiceError::validation(
                "Payment intent does not belong to this payment",
            ));
        }
        if !intent.is_succeeded() {
            debug!(payment_id = id, status = %intent.status, "payment intent not settled yet");
            return Ok(payment);
        }

        let open = gateway_settles_from(PaymentStatus::Succeeded);
        if payment.transaction_id.is_none()
            && self
                .payments
                .attach_intent(id, intent_id, self.gateway.name(), &open)
                .await?
                .is_none()
        {
            return Err(self.stale(id, PaymentStatus::Succeeded).await);
        }

        let response = serde_json::to_value(&intent).unwrap_or(Value::Null);
        let paid = match self
            .payments
            .mark_status(id, &open, PaymentStatus::Succeeded, Some(&today()), Some(&response))
            .await?
        {
            Some(paid) => paid,
            None => {
                let current = self.require(id).await?;
                if current.status == PaymentStatus::Succeeded {
                    return Ok(current);
                }
                return Err(ServiceError::transition(
                    "payment",
                    current.status,
                    PaymentStatus::Succeeded,
                ));
            }
        };

        info!(payment_id = id, intent_id, "payment confirmed");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("payment_completed", "payment", id)
                    .new_values(json!({ "transaction_id": intent_id })),
            )
            .await;
        self.announce_completed(&paid).await;
        Ok(paid)
    }

    /// Verify and apply a gateway webhook delivery. Replays are acknowledged
    /// without side effects.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> ServiceResult<WebhookReceipt> {
        let event = self.gateway.verify_webhook(payload, signature)?;
        let mut receipt = WebhookReceipt {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            outcome: "ignored",
            payment_id: None,
        };

        let (Some(target), Some(intent_id)) = (event_target(&event.event_type), event.intent_id())
        else {
            debug!(event_id = %event.id, event_type = %event.event_type, "unhandled webhook event");
            return Ok(receipt);
        };

        let record = GatewayEventRecord {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            transaction_id: intent_id.to_string(),
            payment_id: event.metadata("payment_id").map(str::to_string),
            target_status: target,
            allowed_from: gateway_settles_from(target),
            gateway_name: self.gateway.name().to_string(),
            gateway_response: event.data.object.clone(),
            paid_date: (target == PaymentStatus::Succeeded).then(today),
            fallback: self.fallback_payment(&event, intent_id, target),
        };

        let outcome = self.payments.apply_gateway_event(&record).await?;
        match outcome {
            GatewayEventOutcome::Duplicate => {
                receipt.outcome = "duplicate";
            }
            GatewayEventOutcome::Applied(payment) | GatewayEventOutcome::Created(payment)
                if target == PaymentStatus::Succeeded =>
            {
                receipt.outcome = "applied";
                receipt.payment_id = Some(payment.id.clone());
                self.announce_completed(&payment).await;
            }
            GatewayEventOutcome::Applied(payment) | GatewayEventOutcome::Created(payment) => {
                receipt.outcome = "applied";
                receipt.payment_id = Some(payment.id);
            }
            GatewayEventOutcome::Ignored(payment) => {
                receipt.payment_id = payment.map(|payment| payment.id);
            }
        }

        info!(
            event_id = %receipt.event_id,
            event_type = %receipt.event_type,
            outcome = receipt.outcome,
            "webhook processed"
        );
        if receipt.outcome == "applied" {
            self.activity
                .record(
                    None,
                    ActivityEntry::new(
                        "payment_webhook",
                        "payment",
                        receipt.payment_id.as_deref().unwrap_or_default(),
                    )
                    .new_values(json!({ "event": event.event_type, "status": target })),
                )
                .await;
        }
        Ok(receipt)
    }

    /// Record to create when a successful intent has no local payment yet.
    fn fallback_payment(
        &self,
        event: &WebhookEvent,
        intent_id: &str,
        target: PaymentStatus,
    ) -> Option<CreatePaymentRequest> {
        if target != PaymentStatus::Succeeded {
            return None;
        }
        let project_id = event.metadata("project_id")?;
        let client_id = event.metadata("client_id")?;
        let object = &event.data.object;
        let currency = object
            .get("currency")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.default_currency.clone());
        let amount = object.get("amount").and_then(Value::as_i64)?;

        Some(CreatePaymentRequest {
            project_id: project_id.to_string(),
            milestone_id: None,
            contract_id: None,
            client_id: client_id.to_string(),
            amount: from_minor_units(amount, &currency),
            currency,
            description: Some("Card payment".to_string()),
            due_date: None,
            invoice_number: Some(invoice_number(Utc::now())),
            status: PaymentStatus::Succeeded,
            payment_gateway: Some(self.gateway.name().to_string()),
            transaction_id: Some(intent_id.to_string()),
        })
    }

    pub async fn refund(&self, actor: &Actor, id: &str) -> ServiceResult<Payment> {
        actor.require_admin()?;
        let payment = self.require(id).await?;
        if payment.status != PaymentStatus::Succeeded {
            return Err(ServiceError::transition(
                "payment",
                payment.status,
                PaymentStatus::Refunded,
            ));
        }
        let transaction_id = payment
            .transaction_id
            .as_deref()
            .ok_or_else(|| ServiceError::validation("Payment has no gateway transaction"))?;

        let refund = self.gateway.refund(transaction_id).await?;
        let response = serde_json::to_value(&refund).unwrap_or(Value::Null);
        let refunded = match self
            .payments
            .mark_status(id, &[PaymentStatus::Succeeded], PaymentStatus::Refunded, None, Some(&response))
            .await?
        {
            Some(refunded) => refunded,
            None => {
                warn!(payment_id = id, refund_id = %refund.id, "payment changed while refunding");
                return Err(self.stale(id, PaymentStatus::Refunded).await);
            }
        };

        info!(payment_id = id, refund_id = %refund.id, "payment refunded");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("payment_refunded", "payment", id)
                    .new_values(json!({ "refund_id": refund.id })),
            )
            .await;
        Ok(refunded)
    }

    pub async fn cancel(&self, actor: &Actor, id: &str) -> ServiceResult<Payment> {
        actor.require_admin()?;
        let payment = self.require(id).await?;
        let from = payment_predecessors(PaymentStatus::Cancelled);
        if !from.contains(&payment.status) {
            return Err(ServiceError::transition(
                "payment",
                payment.status,
                PaymentStatus::Cancelled,
            ));
        }

        let cancelled = match self
            .payments
            .mark_status(id, &from, PaymentStatus::Cancelled, None, None)
            .await?
        {
            Some(cancelled) => cancelled,
            None => return Err(self.stale(id, PaymentStatus::Cancelled).await),
        };
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("payment_cancelled", "payment", id)
                    .old(json!({ "status": payment.status })),
            )
            .await;
        Ok(cancelled)
    }

    // Invoices

    pub async fn list_invoices(
        &self,
        actor: &Actor,
        project_id: Option<String>,
        status: Option<InvoiceStatus>,
        pagination: Pagination,
    ) -> ServiceResult<Page<Invoice>> {
        let filter = InvoiceFilter {
            client_id: (!actor.is_admin()).then(|| actor.user_id.clone()),
            project_id,
            status,
        };
        Ok(self.invoices.list(&filter, pagination).await?)
    }

    pub async fn invoice(&self, actor: &Actor, id: &str) -> ServiceResult<Invoice> {
        let invoice = self
            .invoices
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Invoice"))?;
        actor.require_access(&invoice.client_id)?;
        Ok(invoice)
    }

    pub async fn create_invoice(&self, actor: &Actor, input: NewInvoice) -> ServiceResult<Invoice> {
        actor.require_admin()?;
        let project = self
            .projects
            .find_by_id(&input.project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project"))?;
        let amount = positive_amount(input.amount)?;
        if let Some(items) = &input.line_items {
            if !items.is_array() {
                return Err(ServiceError::validation("Line items must be a list"));
            }
        }
        let due_date = match input.due_date {
            Some(date) => {
                validate_date("due_date", &date)?;
                date
            }
            None => days_from_today(self.due_days),
        };

        let tax_amount = round_money(amount * self.tax_rate);
        let invoice = self
            .invoices
            .create(&CreateInvoiceRequest {
                project_id: project.id,
                client_id: project.client_id,
                invoice_number: invoice_number(Utc::now()),
                amount,
                tax_amount,
                total_amount: round_money(amount + tax_amount),
                currency: self.currency_or_default(input.currency),
                issue_date: today(),
                due_date,
                description: input.description,
                line_items: input.line_items,
            })
            .await?;

        info!(invoice_id = %invoice.id, number = %invoice.invoice_number, "invoice created");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("invoice_created", "invoice", &invoice.id)
                    .new_values(json!({ "total_amount": invoice.total_amount })),
            )
            .await;
        Ok(invoice)
    }

    pub async fn update_invoice_status(
        &self,
        actor: &Actor,
        id: &str,
        to: InvoiceStatus,
    ) -> ServiceResult<Invoice> {
        actor.require_admin()?;
        let invoice = self.invoice(actor, id).await?;
        if !invoice_transition_allowed(invoice.status, to) {
            return Err(ServiceError::transition("invoice", invoice.status, to));
        }

        let paid_date = (to == InvoiceStatus::Paid).then(today);
        let updated = self
            .invoices
            .update_status(id, invoice.status, to, paid_date.as_deref())
            .await?;
        let updated = match updated {
            Some(updated) => updated,
            None => {
                let current = self.invoice(actor, id).await?;
                return Err(ServiceError::transition("invoice", current.status, to));
            }
        };

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("invoice_status_updated", "invoice", id)
                    .old(json!({ "status": invoice.status }))
                    .new_values(json!({ "status": to })),
            )
            .await;
        Ok(updated)
    }

    /// Flag sent invoices past their due date.
    pub async fn mark_overdue_invoices(&self) -> ServiceResult<u64> {
        Ok(self.invoices.mark_overdue(&today()).await?)
    }

    pub async fn stats(&self, actor: &Actor) -> ServiceResult<PaymentStats> {
        actor.require_admin()?;

        let mut by_status: BTreeMap<&'static str, i64> =
            PaymentStatus::ALL.iter().map(|status| (status.as_str(), 0)).collect();
        for (status, count) in self.payments.count_by_status().await? {
            by_status.insert(status.as_str(), count);
        }
        let mut invoices_by_status: BTreeMap<&'static str, i64> =
            InvoiceStatus::ALL.iter().map(|status| (status.as_str(), 0)).collect();
        for (status, count) in self.invoices.count_by_status().await? {
            invoices_by_status.insert(status.as_str(), count);
        }

        let month_ago = (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(PaymentStats {
            by_status,
            total_revenue: self.payments.sum_amount(PaymentStatus::Succeeded, None).await?,
            revenue_last_30_days: self
                .payments
                .sum_amount(PaymentStatus::Succeeded, Some(&month_ago))
                .await?,
            pending_amount: self.payments.sum_amount(PaymentStatus::Pending, None).await?,
            overdue_payments: self.payments.count_overdue(&today()).await?,
            invoices_by_status,
        })
    }
}
