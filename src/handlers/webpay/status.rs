use axum::extract::State;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::jwt::PaymentClaims;
use crate::ledger;

#[derive(Debug, Serialize)]
pub struct PayStatusResponse {
    /// `complete` once the purchase is confirmed, `incomplete` otherwise
    pub status: &'static str,
}

/// GET /webpay/status/{uuid}
///
/// Polled by the payment UI while it waits for the postback. Unknown uuids
/// are simply incomplete.
pub async fn pay_status(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<PayStatusResponse>> {
    let conn = state.db.get()?;
    let status = if ledger::is_complete(&conn, &uuid)? {
        "complete"
    } else {
        "incomplete"
    };
    Ok(Json(PayStatusResponse { status }))
}

#[derive(Debug, Serialize)]
pub struct SigCheckResponse {
    pub sig_check_jwt: String,
}

/// POST /webpay/sig_check
///
/// A signed token with an empty request, for monitoring that the processor
/// still accepts our signatures.
pub async fn sig_check(State(state): State<AppState>) -> Result<Json<SigCheckResponse>> {
    let claims = PaymentClaims {
        typ: state.keys.config().sig_check_typ.clone(),
        ..Default::default()
    };
    let sig_check_jwt = state.keys.sign(claims, queries::now())?;
    Ok(Json(SigCheckResponse { sig_check_jwt }))
}
