use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::id::is_valid_prefixed_id;
use crate::ledger::{self, PurchaseAttempt};
use crate::models::{ProductRef, User};
use crate::products::{self, Product};

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    /// App id
    pub app: String,
    /// Logged-in buyer, if known up front
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrepareInAppRequest {
    /// In-app product id
    pub inapp: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrepareResponse {
    #[serde(rename = "webpayJWT")]
    pub webpay_jwt: String,
    #[serde(rename = "contribStatusURL")]
    pub contrib_status_url: String,
}

/// Store the PENDING contribution and sign its request token in one
/// transaction, so a product that cannot be sold leaves no orphan row.
fn prepare(
    state: &AppState,
    product: &Product,
    buyer: Option<&User>,
    attempt: &PurchaseAttempt,
) -> Result<PrepareResponse> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let contribution = ledger::create_pending(&tx, product, buyer, attempt)?;
    let token = products::encode_request(
        &state.keys,
        &state.config,
        product,
        &contribution,
        buyer.map(|u| u.email.clone()),
        queries::now(),
    )?;

    tx.commit()?;

    Ok(PrepareResponse {
        webpay_jwt: token,
        contrib_status_url: format!("/webpay/status/{}", contribution.uuid),
    })
}

/// POST /webpay/prepare
pub async fn prepare_pay(
    State(state): State<AppState>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>> {
    let (product, buyer) = {
        let conn = state.db.get()?;
        let webapp = queries::get_webapp_by_id(&conn, &request.app)?.or_not_found("App not found")?;
        if !webapp.is_premium() {
            return Err(AppError::BadRequest(format!(
                "App {} is not a paid app",
                webapp.id
            )));
        }
        let buyer = match &request.user_id {
            Some(id) if !is_valid_prefixed_id(id) => {
                return Err(AppError::BadRequest(format!("Malformed user id {}", id)));
            }
            Some(id) => Some(queries::get_user_by_id(&conn, id)?.or_not_found("User not found")?),
            None => None,
        };
        (Product::App(webapp), buyer)
    };

    tracing::debug!(
        "Starting purchase of app {} by {}",
        product.id(),
        buyer.as_ref().map(|u| u.id.as_str()).unwrap_or("anonymous")
    );

    let attempt = PurchaseAttempt {
        source: request.source,
        locale: request.lang,
    };
    Ok(Json(prepare(&state, &product, buyer.as_ref(), &attempt)?))
}

/// POST /webpay/inapp/prepare
pub async fn prepare_pay_inapp(
    State(state): State<AppState>,
    Json(request): Json<PrepareInAppRequest>,
) -> Result<Json<PrepareResponse>> {
    let product = {
        let conn = state.db.get()?;
        products::resolve(&conn, &ProductRef::InApp(request.inapp.clone()))?
    };

    tracing::debug!("Starting purchase of in-app product {}", product.id());

    let attempt = PurchaseAttempt {
        source: request.source,
        locale: request.lang,
    };
    Ok(Json(prepare(&state, &product, None, &attempt)?))
}
