//! # Stripe webhooks
//!
//! `Stripe-Signature` carries `t=<unix seconds>` and one or more `v1=<hex>`
//! entries. A `v1` value is the HMAC-SHA256 of `"{t}.{raw body}"` keyed with the
//! endpoint secret. The payload is accepted when any `v1` matches (compared in
//! constant time) and `t` lies within the tolerance of the current time.
//!
//! Each event id is recorded before it is applied, so a redelivered event is
//! acknowledged without a second effect. Without a configured endpoint secret
//! every delivery is refused.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use store::models::{NotificationKind, Plan, Subscription, SubscriptionStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::email::{self, EmailTemplate};
use crate::error::{ApiError, ApiResult};
use crate::notifications::{self, Notice};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        ApiError::bad_request(format!("Invalid webhook signature: {err}"))
    }
}

/// `v1` signature of a payload, hex encoded.
pub fn sign(payload: &[u8], timestamp: i64, secret: &str) -> Option<String> {
    let mac = mac_for(payload, timestamp, secret)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn mac_for(payload: &[u8], timestamp: i64, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    Some(mac)
}

/// Check a `Stripe-Signature` header against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for item in header.split(',') {
        let Some((key, value)) = item.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() || secret.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mac = mac_for(payload, timestamp, secret).ok_or(SignatureError::Malformed)?;
    let matched = candidates.into_iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
    Duplicate,
}

/// Verify, de-duplicate and apply one webhook delivery.
pub async fn handle_webhook(state: &AppState, signature: Option<&str>, payload: &[u8]) -> ApiResult<Outcome> {
    let stripe = &state.settings.stripe;
    if stripe.webhook_secret.is_empty() {
        return Err(ApiError::NotFound("Billing is not enabled".into()));
    }
    let header = signature.ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;
    verify_signature(payload, header, &stripe.webhook_secret, stripe.webhook_tolerance_secs, Utc::now())?;

    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| ApiError::bad_request(format!("Invalid event payload: {e}")))?;

    if !state
        .store
        .record_stripe_event(&event.id, &event.kind, Utc::now())
        .await?
    {
        tracing::info!(event_id = %event.id, kind = %event.kind, "duplicate stripe event");
        return Ok(Outcome::Duplicate);
    }

    let object = &event.data.object;
    let outcome = match event.kind.as_str() {
        "checkout.session.completed" => checkout_completed(state, object).await?,
        "customer.subscription.created" | "customer.subscription.updated" => {
            subscription_changed(state, object, false).await?
        }
        "customer.subscription.deleted" => subscription_changed(state, object, true).await?,
        "invoice.payment_failed" => payment_failed(state, object).await?,
        _ => Outcome::Ignored,
    };

    tracing::info!(event_id = %event.id, kind = %event.kind, ?outcome, "stripe event");
    Ok(outcome)
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Stripe's `status` values folded onto ours.
pub fn map_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" | "unpaid" => SubscriptionStatus::PastDue,
        "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Incomplete,
    }
}

fn plan_for_price(state: &AppState, price_id: &str) -> Option<Plan> {
    let stripe = &state.settings.stripe;
    if !stripe.pro_price_id.is_empty() && price_id == stripe.pro_price_id {
        Some(Plan::Pro)
    } else if !stripe.employer_price_id.is_empty() && price_id == stripe.employer_price_id {
        Some(Plan::Employer)
    } else {
        None
    }
}

async fn subscription_for_user(state: &AppState, user_id: Uuid) -> ApiResult<Subscription> {
    Ok(state
        .store
        .find_subscription(user_id)
        .await?
        .unwrap_or_else(|| Subscription::free(user_id, Utc::now())))
}

async fn checkout_completed(state: &AppState, object: &Value) -> ApiResult<Outcome> {
    let Some(user_id) = str_field(object, "client_reference_id").and_then(|id| Uuid::parse_str(id).ok()) else {
        tracing::warn!("checkout session without client_reference_id");
        return Ok(Outcome::Ignored);
    };
    if state.store.find_user(user_id).await?.is_none() {
        tracing::warn!(user_id = %user_id, "checkout session for unknown user");
        return Ok(Outcome::Ignored);
    }

    let mut subscription = subscription_for_user(state, user_id).await?;
    if let Some(customer) = str_field(object, "customer") {
        subscription.stripe_customer_id = Some(customer.to_string());
    }
    if let Some(id) = str_field(object, "subscription") {
        subscription.stripe_subscription_id = Some(id.to_string());
    }
    if let Some(plan) = object
        .pointer("/metadata/plan")
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<Plan>().ok())
    {
        subscription.plan = plan;
    }
    subscription.status = SubscriptionStatus::Active;
    subscription.updated_at = Utc::now();
    state.store.upsert_subscription(subscription).await?;
    Ok(Outcome::Applied)
}

async fn subscription_changed(state: &AppState, object: &Value, deleted: bool) -> ApiResult<Outcome> {
    let customer = str_field(object, "customer");
    let existing = match customer {
        Some(customer) => state.store.find_subscription_by_customer(customer).await?,
        None => None,
    };
    let mut subscription = match existing {
        Some(subscription) => subscription,
        None => {
            let Some(user_id) = object
                .pointer("/metadata/user_id")
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok())
            else {
                tracing::warn!(customer = ?customer, "subscription event for unknown customer");
                return Ok(Outcome::Ignored);
            };
            subscription_for_user(state, user_id).await?
        }
    };

    if let Some(customer) = customer {
        subscription.stripe_customer_id = Some(customer.to_string());
    }
    if let Some(id) = str_field(object, "id") {
        subscription.stripe_subscription_id = Some(id.to_string());
    }

    let price_plan = object
        .pointer("/items/data/0/price/id")
        .and_then(Value::as_str)
        .and_then(|price| plan_for_price(state, price));
    let metadata_plan = object
        .pointer("/metadata/plan")
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<Plan>().ok());
    if let Some(plan) = price_plan.or(metadata_plan) {
        subscription.plan = plan;
    }

    subscription.status = if deleted {
        SubscriptionStatus::Canceled
    } else {
        str_field(object, "status").map_or(subscription.status, map_status)
    };
    if deleted {
        subscription.plan = Plan::Free;
    }
    subscription.current_period_end = object
        .get("current_period_end")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .or(subscription.current_period_end);
    subscription.cancel_at_period_end = object
        .get("cancel_at_period_end")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    subscription.updated_at = Utc::now();

    state.store.upsert_subscription(subscription).await?;
    Ok(Outcome::Applied)
}

async fn payment_failed(state: &AppState, object: &Value) -> ApiResult<Outcome> {
    let Some(customer) = str_field(object, "customer") else {
        return Ok(Outcome::Ignored);
    };
    let Some(mut subscription) = state.store.find_subscription_by_customer(customer).await? else {
        tracing::warn!(customer = %customer, "payment failure for unknown customer");
        return Ok(Outcome::Ignored);
    };

    subscription.status = SubscriptionStatus::PastDue;
    subscription.updated_at = Utc::now();
    let subscription = state.store.upsert_subscription(subscription).await?;

    let billing_url = format!("{}/billing", state.settings.server.app_base_url.trim_end_matches('/'));
    notifications::notify(
        state,
        subscription.user_id,
        Notice::new(
            NotificationKind::Billing,
            "Payment failed",
            format!("We could not process the payment for your {} plan.", subscription.plan),
        )
        .link("/billing"),
    )
    .await?;

    if let Some(user) = state.store.find_user(subscription.user_id).await? {
        email::deliver(
            state,
            &user.email,
            EmailTemplate::PaymentFailed {
                name: user.name.clone(),
                plan: subscription.plan,
                billing_url,
            },
        )
        .await;
    }
    Ok(Outcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "whsec_test";

    fn header_for(payload: &[u8], at: DateTime<Utc>) -> String {
        format!("t={},v1={}", at.timestamp(), sign(payload, at.timestamp(), SECRET).unwrap())
    }

    #[test]
    fn test_valid_signature() {
        let now = Utc::now();
        let payload = br#"{"id":"evt_1"}"#;
        assert_eq!(verify_signature(payload, &header_for(payload, now), SECRET, 300, now), Ok(()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = Utc::now();
        let header = header_for(br#"{"amount":100}"#, now);
        assert_eq!(
            verify_signature(br#"{"amount":999}"#, &header, SECRET, 300, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = Utc::now();
        let payload = b"{}";
        let header = header_for(payload, now - Duration::seconds(301));
        assert_eq!(
            verify_signature(payload, &header, SECRET, 300, now),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_any_v1_may_match() {
        let now = Utc::now();
        let payload = b"{}";
        let header = format!(
            "t={},v1=deadbeef,v0=ignored,v1={}",
            now.timestamp(),
            sign(payload, now.timestamp(), SECRET).unwrap()
        );
        assert_eq!(verify_signature(payload, &header, SECRET, 300, now), Ok(()));
    }

    #[test]
    fn test_malformed_header() {
        let now = Utc::now();
        assert_eq!(verify_signature(b"{}", "v1=abc", SECRET, 300, now), Err(SignatureError::Malformed));
        assert_eq!(
            verify_signature(b"{}", &format!("t={}", now.timestamp()), SECRET, 300, now),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let now = Utc::now();
        let payload = b"{}";
        let header = format!("t={},v1={}", now.timestamp(), sign(payload, now.timestamp(), "").unwrap());
        assert_eq!(verify_signature(payload, &header, "", 300, now), Err(SignatureError::Malformed));
    }

    #[tokio::test]
    async fn test_unconfigured_secret_rejects_signed_event() {
        let mut state = crate::testing::state();
        let mut settings = (*state.settings).clone();
        settings.stripe.webhook_secret = String::new();
        state.settings = std::sync::Arc::new(settings);

        let victim = crate::testing::user(&state, "uma@example.org", store::models::Role::Member).await;
        let payload = serde_json::json!({
            "id": "evt_forged",
            "type": "checkout.session.completed",
            "data": { "object": {
                "client_reference_id": victim.id.to_string(),
                "customer": "cus_forged",
                "subscription": "sub_forged",
                "metadata": { "plan": "employer" },
            }},
        })
        .to_string();
        let now = Utc::now();
        let header = format!("t={},v1={}", now.timestamp(), sign(payload.as_bytes(), now.timestamp(), "").unwrap());

        assert!(matches!(
            handle_webhook(&state, Some(&header), payload.as_bytes()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(state.store.find_subscription(victim.id).await.unwrap().is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("active"), SubscriptionStatus::Active);
        assert_eq!(map_status("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(map_status("incomplete_expired"), SubscriptionStatus::Canceled);
        assert_eq!(map_status("paused"), SubscriptionStatus::Incomplete);
    }
}
