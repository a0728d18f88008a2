//! Fixtures for tests: an in-memory state with fake Stripe and storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use store::models::{AuthProvider, NewUser, Role, User};
use store::MemoryStore;

use crate::auth::password::hash_password;
use crate::billing::{CheckoutRequest, PaymentProvider};
use crate::email::MemoryMailer;
use crate::error::ApiResult;
use crate::realtime::Hub;
use crate::settings::Settings;
use crate::state::AppState;
use crate::uploads::UploadSigner;

pub const PASSWORD: &str = "correct horse battery";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Signs nothing; returns a recognisable URL for the key.
pub struct FakeSigner;

#[async_trait]
impl UploadSigner for FakeSigner {
    async fn presign_put(&self, key: &str, expires_in: Duration) -> ApiResult<String> {
        Ok(format!(
            "https://storage.test/{key}?X-Amz-Expires={}&X-Amz-Signature=fake",
            expires_in.as_secs()
        ))
    }
}

/// Answers with URLs on a fake Stripe host.
pub struct FakePayments;

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> ApiResult<String> {
        Ok(format!(
            "https://checkout.stripe.test/{}?client_reference_id={}",
            request.price_id, request.user_id
        ))
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> ApiResult<String> {
        Ok(format!("https://billing.stripe.test/{customer_id}"))
    }
}

pub fn settings() -> Settings {
    let mut settings = Settings::defaults().expect("default settings");
    settings.stripe.secret_key = "sk_test".into();
    settings.stripe.webhook_secret = WEBHOOK_SECRET.into();
    settings.stripe.pro_price_id = "price_pro".into();
    settings.stripe.employer_price_id = "price_employer".into();
    settings
}

/// State over a fresh [`MemoryStore`], returning the mailer for inspection.
pub fn state_with_mailer() -> (AppState, Arc<MemoryMailer>) {
    let mailer = Arc::new(MemoryMailer::default());
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        settings: Arc::new(settings()),
        hub: Hub::new(),
        mailer: mailer.clone(),
        uploads: Arc::new(FakeSigner),
        payments: Arc::new(FakePayments),
        http: reqwest::Client::new(),
    };
    (state, mailer)
}

pub fn state() -> AppState {
    state_with_mailer().0
}

/// Create a local account with [`PASSWORD`].
pub async fn user(state: &AppState, email: &str, role: Role) -> User {
    let name = email.split('@').next().unwrap_or(email).to_string();
    state
        .store
        .create_user(NewUser {
            email: email.to_string(),
            name,
            avatar_url: None,
            role,
            provider: AuthProvider::Local,
            provider_id: email.to_string(),
            password_hash: Some(hash_password(PASSWORD).expect("hash")),
        })
        .await
        .expect("create user")
}
