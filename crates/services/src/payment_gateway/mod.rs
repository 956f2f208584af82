//! Card payment provider integration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;

#[derive(Debug, Error)]
pub enum GatewayClientError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected the request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed gateway payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateIntent {
    /// Amount in the currency's minor units.
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.metadata.get("payment_id").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
}

/// A webhook delivery whose signature checked out.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

impl WebhookEvent {
    /// Payment intent id the event refers to. Charge events carry it in
    /// `payment_intent`, intent events in `id`.
    pub fn intent_id(&self) -> Option<&str> {
        let object = &self.data.object;
        match object.get("object").and_then(Value::as_str) {
            Some("charge") => object.get("payment_intent").and_then(Value::as_str),
            _ => object.get("id").and_then(Value::as_str),
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Key the browser needs to complete a payment, if any.
    fn publishable_key(&self) -> Option<&str> {
        None
    }

    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayClientError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayClientError>;

    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayClientError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, GatewayClientError>;
}

/// Stand-in used when no gateway credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn create_intent(&self, _: &CreateIntent) -> Result<PaymentIntent, GatewayClientError> {
        Err(GatewayClientError::NotConfigured)
    }

    async fn retrieve_intent(&self, _: &str) -> Result<PaymentIntent, GatewayClientError> {
        Err(GatewayClientError::NotConfigured)
    }

    async fn refund(&self, _: &str) -> Result<Refund, GatewayClientError> {
        Err(GatewayClientError::NotConfigured)
    }

    fn verify_webhook(&self, _: &[u8], _: &str) -> Result<WebhookEvent, GatewayClientError> {
        Err(GatewayClientError::NotConfigured)
    }
}
