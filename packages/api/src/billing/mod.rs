//! # Subscription billing
//!
//! Plans are sold through Stripe Checkout and managed in the Stripe billing
//! portal. Subscription state is only ever written from verified webhooks
//! ([`webhook`]); the API reads it back from the store.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::models::{Plan, Subscription, User};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeClient;

/// Everything Stripe needs to open a subscription checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub email: String,
    pub plan: Plan,
    pub price_id: String,
    pub customer_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Returns the hosted checkout URL.
    async fn create_checkout_session(&self, request: CheckoutRequest) -> ApiResult<String>;

    /// Returns the hosted billing-portal URL.
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> ApiResult<String>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedirectUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutInput {
    pub plan: Plan,
}

pub async fn get_subscription(state: &AppState, user_id: Uuid) -> ApiResult<Subscription> {
    Ok(state
        .store
        .find_subscription(user_id)
        .await?
        .unwrap_or_else(|| Subscription::free(user_id, Utc::now())))
}

fn billing_url(state: &AppState, query: &str) -> String {
    format!(
        "{}/billing{query}",
        state.settings.server.app_base_url.trim_end_matches('/')
    )
}

pub async fn create_checkout(state: &AppState, user: &User, plan: Plan) -> ApiResult<String> {
    let stripe = &state.settings.stripe;
    let price_id = match plan {
        Plan::Pro => &stripe.pro_price_id,
        Plan::Employer => &stripe.employer_price_id,
        Plan::Free => return Err(ApiError::bad_request("The free plan needs no checkout")),
    };
    if price_id.is_empty() {
        return Err(ApiError::NotFound(format!("The {plan} plan is not available")));
    }

    let customer_id = state
        .store
        .find_subscription(user.id)
        .await?
        .and_then(|s| s.stripe_customer_id);

    state
        .payments
        .create_checkout_session(CheckoutRequest {
            user_id: user.id,
            email: user.email.clone(),
            plan,
            price_id: price_id.clone(),
            customer_id,
            success_url: billing_url(state, "?status=success"),
            cancel_url: billing_url(state, "?status=cancelled"),
        })
        .await
}

pub async fn create_portal(state: &AppState, user_id: Uuid) -> ApiResult<String> {
    let customer_id = state
        .store
        .find_subscription(user_id)
        .await?
        .and_then(|s| s.stripe_customer_id)
        .ok_or_else(|| ApiError::not_found("Billing account"))?;
    state
        .payments
        .create_portal_session(&customer_id, &billing_url(state, ""))
        .await
}

async fn subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Subscription>> {
    get_subscription(&state, user.id).await.map(Json)
}

async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CheckoutInput>,
) -> ApiResult<Json<RedirectUrl>> {
    let url = create_checkout(&state, &user, input.plan).await?;
    Ok(Json(RedirectUrl { url }))
}

async fn portal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<RedirectUrl>> {
    let url = create_portal(&state, user.id).await?;
    Ok(Json(RedirectUrl { url }))
}

/// `POST /api/billing/webhook`, authenticated by signature rather than by user.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    let outcome = webhook::handle_webhook(&state, signature, &body).await?;
    Ok(Json(json!({
        "received": true,
        "duplicate": outcome == webhook::Outcome::Duplicate,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/billing/subscription", get(subscription))
        .route("/billing/checkout", post(checkout))
        .route("/billing/portal", post(portal))
        .route("/billing/webhook", post(stripe_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use store::models::{Role, SubscriptionStatus};

    #[tokio::test]
    async fn test_free_plan_by_default() {
        let state = testing::state();
        let user = testing::user(&state, "ruby@example.org", Role::Member).await;
        let subscription = get_subscription(&state, user.id).await.unwrap();
        assert_eq!(subscription.plan, Plan::Free);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_checkout_uses_configured_price() {
        let state = testing::state();
        let user = testing::user(&state, "sam@example.org", Role::Member).await;
        let url = create_checkout(&state, &user, Plan::Pro).await.unwrap();
        assert!(url.contains("price_pro"));
        assert!(matches!(
            create_checkout(&state, &user, Plan::Free).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_portal_requires_customer() {
        let state = testing::state();
        let user = testing::user(&state, "tai@example.org", Role::Member).await;
        assert!(matches!(
            create_portal(&state, user.id).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
