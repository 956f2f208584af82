use async_trait::async_trait;
use chrono::Utc;
use portal_config::PaymentsConfig;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::webhook::verify_signature;
use super::{
    CreateIntent, GatewayClientError, PaymentGateway, PaymentIntent, Refund, WebhookEvent,
};

/// Client for Stripe's REST API.
#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    api_base: String,
    secret_key: String,
    publishable_key: Option<String>,
    webhook_secret: Option<String>,
    tolerance_seconds: i64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    /// Returns `None` when no secret key is configured.
    pub fn from_config(config: &PaymentsConfig) -> Option<Self> {
        let secret_key = config
            .stripe_secret_key
            .clone()
            .filter(|key| !key.is_empty())?;

        Some(Self {
            http: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key,
            publishable_key: config.stripe_publishable_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            tolerance_seconds: config.webhook_tolerance_seconds,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayClientError> {
        let response = request.bearer_auth(&self.secret_key).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), %message, "stripe request rejected");
            return Err(GatewayClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn publishable_key(&self) -> Option<&str> {
        self.publishable_key.as_deref()
    }

    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayClientError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.to_ascii_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(description) = &request.description {
            form.push(("description".to_string(), description.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let intent: PaymentIntent = self
            .send(self.http.post(self.url("payment_intents")).form(&form))
            .await?;
        debug!(intent_id = %intent.id, amount = intent.amount, "created payment intent");
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayClientError> {
        self.send(
            self.http
                .get(self.url(&format!("payment_intents/{intent_id}"))),
        )
        .await
    }

    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayClientError> {
        let form = [("payment_intent", intent_id)];
        self.send(self.http.post(self.url("refunds")).form(&form))
            .await
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, GatewayClientError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or(GatewayClientError::NotConfigured)?;

        verify_signature(
            payload,
            signature_header,
            secret,
            self.tolerance_seconds,
            Utc::now().timestamp(),
        )?;

        serde_json::from_slice(payload).map_err(|err| GatewayClientError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_gateway::webhook::sign_payload;

    fn config() -> PaymentsConfig {
        PaymentsConfig {
            stripe_secret_key: Some("sk_test_123".into()),
            stripe_webhook_secret: Some("whsec_abc".into()),
            api_base: "https://api.stripe.test/v1/".into(),
            ..PaymentsConfig::default()
        }
    }

    #[test]
    fn missing_secret_key_disables_the_gateway() {
        assert!(StripeGateway::from_config(&PaymentsConfig::default()).is_none());
        let gateway = StripeGateway::from_config(&config()).unwrap();
        assert_eq!(gateway.url("refunds"), "https://api.stripe.test/v1/refunds");
    }

    #[test]
    fn webhook_events_are_parsed_after_verification() {
        let gateway = StripeGateway::from_config(&config()).unwrap();
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let header = sign_payload(payload, "whsec_abc", Utc::now().timestamp());

        let event = gateway.verify_webhook(payload, &header).unwrap();
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.intent_id(), Some("pi_1"));

        assert!(matches!(
            gateway.verify_webhook(payload, "t=1,v1=00"),
            Err(GatewayClientError::InvalidSignature)
        ));
    }
}
