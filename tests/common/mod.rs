//! Test utilities and fixtures for webpay ledger integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tempfile::TempDir;
use tower::ServiceExt;

pub use webpay_ledger::buyer::{PaymentsApi, ProcessorBuyer, ProcessorTransaction};
pub use webpay_ledger::config::{Config, PurchaseTokenConfig};
pub use webpay_ledger::db::{AppState, create_pool, init_db, queries};
pub use webpay_ledger::error::AppError;
pub use webpay_ledger::handlers;
pub use webpay_ledger::jwt::{self, NoticePrice, NoticeResponse, PaymentClaims, PurchaseRequest, TokenKeys};
pub use webpay_ledger::models::*;
pub use webpay_ledger::notify::{Notification, NotificationKind, Notifier};
pub use webpay_ledger::products::{self, Product, ProductData};

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Notifier that keeps every dispatched notification for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// In-memory stand-in for the processor's lookup API.
#[derive(Default)]
pub struct FakePayments {
    /// contribution uuid -> buyer email
    transactions: Mutex<HashMap<String, String>>,
    /// processor buyer uuid -> email
    buyers: Mutex<HashMap<String, String>>,
    pub fail: Mutex<bool>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<usize>,
}

impl FakePayments {
    pub fn add_transaction(&self, contribution_uuid: &str, email: &str) {
        self.transactions
            .lock()
            .unwrap()
            .insert(contribution_uuid.to_string(), email.to_string());
    }

    pub fn add_buyer(&self, buyer_uuid: &str, email: &str) {
        self.buyers
            .lock()
            .unwrap()
            .insert(buyer_uuid.to_string(), email.to_string());
    }

    pub fn set_failing(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    async fn enter(&self) -> Result<(), AppError> {
        *self.calls.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(AppError::BuyerLookupFailed("processor unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentsApi for FakePayments {
    async fn get_transaction(
        &self,
        contribution_uuid: &str,
    ) -> Result<Option<ProcessorTransaction>, AppError> {
        self.enter().await?;
        let known = self
            .transactions
            .lock()
            .unwrap()
            .contains_key(contribution_uuid);
        Ok(known.then(|| ProcessorTransaction {
            uuid: Some(contribution_uuid.to_string()),
            buyer: Some(format!("/generic/buyer/{}/", contribution_uuid)),
        }))
    }

    async fn get_buyer(&self, resource_uri: &str) -> Result<Option<ProcessorBuyer>, AppError> {
        self.enter().await?;
        let key = resource_uri
            .trim_start_matches("/generic/buyer/")
            .trim_end_matches('/');
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(key)
            .map(|email| ProcessorBuyer {
                uuid: None,
                email: Some(email.clone()),
            }))
    }

    async fn get_buyer_by_uuid(&self, buyer_uuid: &str) -> Result<Option<ProcessorBuyer>, AppError> {
        self.enter().await?;
        Ok(self
            .buyers
            .lock()
            .unwrap()
            .get(buyer_uuid)
            .map(|email| ProcessorBuyer {
                uuid: Some(buyer_uuid.to_string()),
                email: Some(email.clone()),
            }))
    }
}

/// Everything a test needs: state wired to fakes, plus handles on the fakes.
/// The database lives in a temp dir so every pooled connection sees it.
pub struct TestContext {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: Arc<FakePayments>,
    _dir: TempDir,
}

impl TestContext {
    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().unwrap()
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.state.keys
    }

    pub fn app(&self) -> Router {
        handlers::webpay::router().with_state(self.state.clone())
    }
}

pub fn test_config(database_path: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        database_path: database_path.to_string(),
        base_url: "http://localhost:3000".to_string(),
        media_url: "http://localhost:3000/media".to_string(),
        dev_mode: true,
        domain: Some("marketplace.example.com".to_string()),
        purchase: PurchaseTokenConfig::default(),
        solitude_url: "http://127.0.0.1:9".to_string(),
        solitude_timeout: Duration::from_secs(1),
        postback_deadline: Duration::from_secs(5),
        notification_webhook_url: None,
    }
}

pub fn create_test_context() -> TestContext {
    create_test_context_with(|_| {})
}

pub fn create_test_context_with(customize: impl FnOnce(&mut Config)) -> TestContext {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("webpay.db");
    let mut config = test_config(path.to_str().unwrap());
    customize(&mut config);

    let pool = create_pool(&config.database_path).expect("Failed to create pool");
    {
        let conn = pool.get().unwrap();
        init_db(&conn).expect("Failed to initialize schema");
    }

    let keys = TokenKeys::from_config(&config.purchase).expect("Invalid token config");
    let notifier = Arc::new(RecordingNotifier::default());
    let payments = Arc::new(FakePayments::default());

    let state = AppState {
        db: pool,
        config: Arc::new(config),
        keys: Arc::new(keys),
        payments: payments.clone(),
        notifier: notifier.clone(),
    };

    TestContext {
        state,
        notifier,
        payments,
        _dir: dir,
    }
}

// ============ Catalog fixtures ============

pub fn create_test_user(conn: &Connection, email: &str) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            display_name: None,
            source: UserSource::Unknown,
        },
    )
    .expect("Failed to create test user")
}

pub fn create_paid_app(conn: &Connection, name: &str) -> Webapp {
    queries::create_webapp(
        conn,
        &CreateWebapp {
            name: name.to_string(),
            description: format!("<p>{}</p>", name),
            default_locale: "en-US".to_string(),
            solitude_public_id: Some(format!("public-{}", name)),
            application_size: Some(388_096),
            price_point: Some("1".to_string()),
            price_amount: Some(Decimal::new(99, 2)),
            currency: "USD".to_string(),
            has_icon: false,
            support_email: Some("support@example.com".to_string()),
            developer_email: Some("dev@example.com".to_string()),
        },
    )
    .expect("Failed to create test app")
}

pub fn create_inapp(
    conn: &Connection,
    webapp_id: Option<&str>,
    price: Decimal,
    simulate: bool,
) -> InAppProduct {
    queries::create_inapp_product(
        conn,
        &CreateInAppProduct {
            webapp_id: webapp_id.map(str::to_string),
            name: "Magic Sword".to_string(),
            logo_url: None,
            price_point: "1".to_string(),
            price_amount: price,
            currency: "USD".to_string(),
            simulate: simulate.then(|| serde_json::json!({"result": "postback"})),
        },
    )
    .expect("Failed to create test in-app product")
}

/// A PENDING contribution for `product`, optionally already tied to a buyer.
pub fn create_pending(conn: &Connection, product: ProductRef, uuid: &str, user_id: Option<&str>) -> Contribution {
    let mut input = CreateContribution::pending(product, uuid.to_string());
    input.user_id = user_id.map(str::to_string);
    queries::create_contribution(conn, &input).expect("Failed to create pending contribution")
}

/// Confirm a pending contribution without going through a notice.
pub fn complete_purchase(conn: &Connection, uuid: &str, transaction_id: &str) -> Contribution {
    let pending = get_contribution(conn, uuid);
    let claimed = queries::try_complete_purchase(
        conn,
        uuid,
        &queries::PurchaseCompletion {
            transaction_id,
            amount: None,
            currency: &pending.currency,
            user_id: None,
        },
    )
    .unwrap();
    assert!(claimed, "contribution {} was not pending", uuid);

    if let (Some(app_id), Some(user_id)) = (pending.product.webapp_id(), pending.user_id.as_deref()) {
        queries::upsert_app_purchase(conn, app_id, user_id, OwnershipStatus::Purchased).unwrap();
    }
    get_contribution(conn, uuid)
}

pub fn get_contribution(conn: &Connection, uuid: &str) -> Contribution {
    queries::get_contribution_by_uuid(conn, uuid)
        .unwrap()
        .expect("contribution should exist")
}

// ============ Notices ============

/// `productData` as an outbound request for `contribution` would carry it.
pub fn product_data_for(contribution: &Contribution) -> String {
    ProductData {
        contrib_uuid: contribution.uuid.clone(),
        product: contribution.product.clone(),
        public_id: Some("public".to_string()),
        application_size: None,
        buyer_email: None,
    }
    .encode()
}

/// Build a processor notice as the processor would sign it.
pub fn notice_claims(product_data: &str, transaction_id: &str, price: Option<(&str, &str)>) -> PaymentClaims {
    PaymentClaims {
        typ: "mozilla/payments/pay/postback/v1".to_string(),
        request: PurchaseRequest {
            product_data: Some(product_data.to_string()),
            ..Default::default()
        },
        response: Some(NoticeResponse {
            transaction_id: Some(transaction_id.to_string()),
            price: price.map(|(amount, currency)| NoticePrice {
                amount: amount.parse().unwrap(),
                currency: currency.to_string(),
            }),
            ..Default::default()
        }),
    }
}

pub fn sign_notice(keys: &TokenKeys, claims: PaymentClaims, issued_at: i64) -> String {
    keys.sign(claims, issued_at).expect("Failed to sign notice")
}

/// POST a `notice=<token>` form and return the status and body text.
pub async fn post_notice(app: Router, uri: &str, token: &str) -> (StatusCode, String) {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("notice", token)
        .finish();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
