//! End-to-end checks through the full router over the in-memory store.

use api::auth::tokens::issue_pair;
use api::billing::webhook::sign;
use api::{testing, AppState};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use store::models::{Plan, Role, User};
use tower::ServiceExt;

struct Harness {
    state: AppState,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_state(testing::state())
    }

    fn with_state(state: AppState) -> Self {
        Self {
            app: api::app(state.clone()),
            state,
        }
    }

    async fn user(&self, email: &str, role: Role) -> (User, String) {
        let user = testing::user(&self.state, email, role).await;
        let pair = issue_pair(&self.state, user.id).await.unwrap();
        (user, pair.access_token)
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.call(request).await
    }
}

#[tokio::test]
async fn health_and_request_id() {
    let h = Harness::new();
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn protected_routes_require_auth() {
    let h = Harness::new();
    let (status, body) = h.send(Method::GET, "/api/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");

    let (status, _) = h
        .send(Method::GET, "/api/auth/me", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_then_me() {
    let h = Harness::new();
    let (status, body) = h
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "Warrick@Example.org", "password": testing::PASSWORD, "name": "Warrick" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "warrick@example.org");
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, me) = h.send(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Warrick");

    let (status, _) = h
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "warrick@example.org", "password": testing::PASSWORD, "name": "Again" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn direct_conversation_is_reused() {
    let h = Harness::new();
    let (_, alinta) = h.user("alinta@example.org", Role::Member).await;
    let (birrani, _) = h.user("birrani@example.org", Role::Member).await;

    let input = json!({ "participant_ids": [birrani.id] });
    let (status, first) = h
        .send(Method::POST, "/api/conversations", Some(&alinta), Some(input.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["isExisting"], false);

    let (status, second) = h
        .send(Method::POST, "/api/conversations", Some(&alinta), Some(input))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["isExisting"], true);
    assert!(second.get("is_existing").is_none());
    assert_eq!(second["id"], first["id"]);
}

#[tokio::test]
async fn message_ownership_and_membership() {
    let h = Harness::new();
    let (_, alinta) = h.user("alinta@example.org", Role::Member).await;
    let (birrani_user, birrani) = h.user("birrani@example.org", Role::Member).await;
    let (_, outsider) = h.user("outsider@example.org", Role::Member).await;

    let (_, conversation) = h
        .send(
            Method::POST,
            "/api/conversations",
            Some(&alinta),
            Some(json!({ "participant_ids": [birrani_user.id] })),
        )
        .await;
    let id = conversation["id"].as_str().unwrap();

    let (status, message) = h
        .send(
            Method::POST,
            &format!("/api/conversations/{id}/messages"),
            Some(&alinta),
            Some(json!({ "body": "Yaama, are you free Thursday?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = message["id"].as_str().unwrap();

    let (_, unread) = h
        .send(Method::GET, "/api/conversations/unread", Some(&birrani), None)
        .await;
    assert_eq!(unread["unread"], 1);

    // Someone else's message looks like a missing one.
    let (status, _) = h
        .send(Method::DELETE, &format!("/api/messages/{message_id}"), Some(&birrani), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h
        .send(
            Method::GET,
            &format!("/api/conversations/{id}/messages"),
            Some(&outsider),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h
        .send(Method::DELETE, &format!("/api/messages/{message_id}"), Some(&alinta), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn admin_routes_are_admin_only() {
    let h = Harness::new();
    let (_, member) = h.user("member@example.org", Role::Member).await;
    let (_, admin) = h.user("admin@example.org", Role::Admin).await;

    let (status, _) = h.send(Method::GET, "/api/admin/stats", Some(&member), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, stats) = h.send(Method::GET, "/api/admin/stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["users_by_role"]["admin"], 1);
}

#[tokio::test]
async fn stripe_webhook_is_verified_and_idempotent() {
    let h = Harness::new();
    let (user, token) = h.user("jedda@example.org", Role::Member).await;

    let payload = json!({
        "id": "evt_checkout_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "client_reference_id": user.id.to_string(),
            "customer": "cus_123",
            "subscription": "sub_123",
            "metadata": { "plan": "pro" },
        }},
    })
    .to_string();
    let timestamp = Utc::now().timestamp();
    let signature = sign(payload.as_bytes(), timestamp, testing::WEBHOOK_SECRET).unwrap();

    let webhook = |sig: String, body: String| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/billing/webhook")
            .header("stripe-signature", sig)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    };

    let tampered = payload.replace("pro", "employer");
    let (status, _) = h
        .call(webhook(format!("t={timestamp},v1={signature}"), tampered))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .call(webhook(format!("t={timestamp},v1={signature}"), payload.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "duplicate": false }));

    let (status, body) = h
        .call(webhook(format!("t={timestamp},v1={signature}"), payload))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);

    let subscription = h.state.store.find_subscription(user.id).await.unwrap().unwrap();
    assert_eq!(subscription.plan, Plan::Pro);

    let (_, current) = h
        .send(Method::GET, "/api/billing/subscription", Some(&token), None)
        .await;
    assert_eq!(current["plan"], "pro");
}

#[tokio::test]
async fn huge_page_numbers_are_empty_pages() {
    let h = Harness::new();
    let (_, member) = h.user("kaya@example.org", Role::Member).await;
    let (_, admin) = h.user("lachlan@example.org", Role::Admin).await;
    let huge = i64::MAX;

    for (uri, token) in [
        (format!("/api/feed?page={huge}&per_page=100"), &member),
        (format!("/api/jobs?page={huge}&per_page=100"), &member),
        (format!("/api/admin/users?page={huge}&per_page=100"), &admin),
    ] {
        let (status, body) = h.send(Method::GET, &uri, Some(token), None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["items"], json!([]), "{uri}");
    }
}

#[tokio::test]
async fn webhook_refused_without_endpoint_secret() {
    let mut settings = testing::settings();
    settings.stripe.webhook_secret = String::new();
    let mut state = testing::state();
    state.settings = std::sync::Arc::new(settings);
    let h = Harness::with_state(state);
    let (victim, token) = h.user("mardi@example.org", Role::Member).await;

    let payload = json!({
        "id": "evt_unsigned",
        "type": "checkout.session.completed",
        "data": { "object": {
            "client_reference_id": victim.id.to_string(),
            "customer": "cus_x",
            "subscription": "sub_x",
            "metadata": { "plan": "employer" },
        }},
    })
    .to_string();
    let timestamp = Utc::now().timestamp();
    let signature = sign(payload.as_bytes(), timestamp, "").unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/billing/webhook")
        .header("stripe-signature", format!("t={timestamp},v1={signature}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .unwrap();

    let (status, _) = h.call(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, subscription) = h
        .send(Method::GET, "/api/billing/subscription", Some(&token), None)
        .await;
    assert_eq!(subscription["plan"], "free");
}
