//! Minimal Stripe REST client: Checkout and the billing portal.
//!
//! Requests are form-encoded `POST`s authenticated with the secret key, as the
//! Stripe API expects. Non-2xx answers become [`ApiError::Upstream`] carrying
//! Stripe's own error message.

use async_trait::async_trait;
use serde::Deserialize;

use super::{CheckoutRequest, PaymentProvider};
use crate::error::{ApiError, ApiResult};
use crate::settings::Stripe;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, settings: &Stripe) -> Self {
        Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
        }
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> ApiResult<SessionResponse> {
        if self.secret_key.is_empty() {
            return Err(ApiError::NotFound("Billing is not enabled".into()));
        }

        let response = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("Stripe request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(ApiError::Upstream(format!("Stripe {path}: {message}")));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("Invalid Stripe response: {e}")))
    }
}

/// Form fields of a subscription Checkout Session.
pub fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let user_id = request.user_id.to_string();
    let mut form = vec![
        ("mode".to_string(), "subscription".to_string()),
        ("line_items[0][price]".to_string(), request.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("client_reference_id".to_string(), user_id.clone()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("metadata[plan]".to_string(), request.plan.to_string()),
        ("subscription_data[metadata][user_id]".to_string(), user_id),
        ("subscription_data[metadata][plan]".to_string(), request.plan.to_string()),
    ];
    match &request.customer_id {
        Some(customer) => form.push(("customer".to_string(), customer.clone())),
        None => form.push(("customer_email".to_string(), request.email.clone())),
    }
    form
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> ApiResult<String> {
        let session = self
            .post_form("/v1/checkout/sessions", &checkout_form(&request))
            .await?;
        tracing::info!(user_id = %request.user_id, session_id = ?session.id, "checkout session created");
        session
            .url
            .ok_or_else(|| ApiError::Upstream("Stripe checkout session has no url".into()))
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> ApiResult<String> {
        let form = [
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        self.post_form("/v1/billing_portal/sessions", &form)
            .await?
            .url
            .ok_or_else(|| ApiError::Upstream("Stripe portal session has no url".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::models::Plan;
    use uuid::Uuid;

    fn request(customer_id: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            user_id: Uuid::nil(),
            email: "pat@example.org".into(),
            plan: Plan::Pro,
            price_id: "price_123".into(),
            customer_id: customer_id.map(str::to_string),
            success_url: "http://localhost:3000/billing?status=success".into(),
            cancel_url: "http://localhost:3000/billing?status=cancelled".into(),
        }
    }

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_checkout_form_fields() {
        let form = checkout_form(&request(None));
        assert_eq!(field(&form, "mode"), Some("subscription"));
        assert_eq!(field(&form, "line_items[0][price]"), Some("price_123"));
        assert_eq!(field(&form, "client_reference_id"), Some(Uuid::nil().to_string().as_str()));
        assert_eq!(field(&form, "customer_email"), Some("pat@example.org"));
        assert_eq!(field(&form, "customer"), None);
    }

    #[test]
    fn test_checkout_form_reuses_customer() {
        let form = checkout_form(&request(Some("cus_1")));
        assert_eq!(field(&form, "customer"), Some("cus_1"));
        assert_eq!(field(&form, "customer_email"), None);
    }

    #[tokio::test]
    async fn test_missing_secret_key_disables_billing() {
        let client = StripeClient::new(reqwest::Client::new(), &Stripe::default());
        assert!(matches!(
            client.create_portal_session("cus_1", "http://localhost").await,
            Err(ApiError::NotFound(_))
        ));
    }
}
