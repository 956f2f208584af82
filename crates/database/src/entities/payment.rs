//! Payment, gateway event and invoice rows

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use super::{enum_column, json_column};

text_enum! {
    pub enum PaymentStatus ("payment status") {
        Pending => "pending",
        Processing => "processing",
        Succeeded => "succeeded",
        Failed => "failed",
        Refunded => "refunded",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum InvoiceStatus ("invoice status") {
        Draft => "draft",
        Sent => "sent",
        Paid => "paid",
        Overdue => "overdue",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub project_id: String,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub client_id: String,
    pub amount: f64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub payment_gateway: Option<String>,
    /// Gateway reference (payment intent id); unique when present.
    pub transaction_id: Option<String>,
    pub gateway_response: Option<Value>,
    pub status: PaymentStatus,
    pub due_date: Option<String>,
    pub paid_date: Option<String>,
    pub description: Option<String>,
    pub invoice_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Payment {
    pub fn is_overdue(&self, today: &str) -> bool {
        self.status == PaymentStatus::Pending
            && self
                .due_date
                .as_deref()
                .map(|due| due < today)
                .unwrap_or(false)
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            milestone_id: row.try_get("milestone_id")?,
            contract_id: row.try_get("contract_id")?,
            client_id: row.try_get("client_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            payment_method: row.try_get("payment_method")?,
            payment_gateway: row.try_get("payment_gateway")?,
            transaction_id: row.try_get("transaction_id")?,
            gateway_response: json_column(row, "gateway_response")?,
            status: enum_column(row, "status")?,
            due_date: row.try_get("due_date")?,
            paid_date: row.try_get("paid_date")?,
            description: row.try_get("description")?,
            invoice_number: row.try_get("invoice_number")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub project_id: String,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub client_id: String,
    pub amount: f64,
    pub currency: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub invoice_number: Option<String>,
    pub status: PaymentStatus,
    pub payment_gateway: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<PaymentStatus>,
}

/// A verified gateway webhook event, ready to be applied atomically.
#[derive(Debug, Clone)]
pub struct GatewayEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub transaction_id: String,
    /// Local payment named in the gateway metadata, if any.
    pub payment_id: Option<String>,
    pub target_status: PaymentStatus,
    /// Statuses the payment may move from; others are left untouched.
    pub allowed_from: Vec<PaymentStatus>,
    pub gateway_name: String,
    pub gateway_response: Value,
    pub paid_date: Option<String>,
    /// Record to insert when no local payment matches.
    pub fallback: Option<CreatePaymentRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventOutcome {
    /// The event id was seen before; nothing changed.
    Duplicate,
    Applied(Payment),
    Created(Payment),
    /// Recorded, but the payment was not in a state the event applies to.
    Ignored(Option<Payment>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub project_id: String,
    pub client_id: String,
    pub invoice_number: String,
    pub amount: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub issue_date: String,
    pub due_date: String,
    pub paid_date: Option<String>,
    pub description: Option<String>,
    pub line_items: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Invoice {
    pub fn is_overdue(&self, today: &str) -> bool {
        self.status == InvoiceStatus::Sent && self.due_date.as_str() < today
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            client_id: row.try_get("client_id")?,
            invoice_number: row.try_get("invoice_number")?,
            amount: row.try_get("amount")?,
            tax_amount: row.try_get("tax_amount")?,
            total_amount: row.try_get("total_amount")?,
            currency: row.try_get("currency")?,
            status: enum_column(row, "status")?,
            issue_date: row.try_get("issue_date")?,
            due_date: row.try_get("due_date")?,
            paid_date: row.try_get("paid_date")?,
            description: row.try_get("description")?,
            line_items: json_column(row, "line_items")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub project_id: String,
    pub client_id: String,
    pub invoice_number: String,
    pub amount: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
    pub currency: String,
    pub issue_date: String,
    pub due_date: String,
    pub description: Option<String>,
    pub line_items: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<InvoiceStatus>,
}
