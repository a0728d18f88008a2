//! Shared application state handed to every handler.

use std::sync::Arc;

use store::Store;

use crate::billing::{PaymentProvider, StripeClient};
use crate::email::{LogMailer, Mailer};
use crate::error::ApiResult;
use crate::realtime::Hub;
use crate::settings::Settings;
use crate::uploads::{DisabledUploads, S3Signer, UploadSigner};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: Arc<Settings>,
    pub hub: Hub,
    pub mailer: Arc<dyn Mailer>,
    pub uploads: Arc<dyn UploadSigner>,
    pub payments: Arc<dyn PaymentProvider>,
    /// Outbound HTTP client for OAuth userinfo and Stripe.
    pub http: reqwest::Client,
}

impl AppState {
    /// Production wiring: Stripe, S3 when configured, and the logging mailer.
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> ApiResult<Self> {
        let http = reqwest::Client::new();
        let uploads: Arc<dyn UploadSigner> = if settings.storage.is_configured() {
            Arc::new(S3Signer::new(&settings.storage)?)
        } else {
            tracing::warn!("storage is not configured; uploads are disabled");
            Arc::new(DisabledUploads)
        };
        Ok(Self {
            store,
            hub: Hub::new(),
            mailer: Arc::new(LogMailer::new(settings.email.from.clone())),
            uploads,
            payments: Arc::new(StripeClient::new(http.clone(), &settings.stripe)),
            http,
            settings: Arc::new(settings),
        })
    }
}
