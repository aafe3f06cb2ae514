mod notices;
mod prepare;
mod status;

pub use notices::*;
pub use prepare::*;
pub use status::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Processor -> marketplace notices (form field `notice`)
        .route("/webpay/postback", post(postback))
        .route("/webpay/chargeback", post(chargeback))
        // Payment UI -> marketplace
        .route("/webpay/prepare", post(prepare_pay))
        .route("/webpay/inapp/prepare", post(prepare_pay_inapp))
        .route("/webpay/status/{uuid}", get(pay_status))
        // Monitoring
        .route("/webpay/sig_check", post(sig_check))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
