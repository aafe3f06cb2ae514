use std::collections::BTreeMap;

use jwt_simple::prelude::JWTClaims;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Custom claims of purchase-request, postback and chargeback tokens.
/// Standard claims (iss, aud, iat, exp) are handled by jwt-simple.
///
/// Every field is lenient on decode so that absence can be reported as a
/// missing claim instead of a generic parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentClaims {
    #[serde(default)]
    pub typ: String,
    #[serde(default)]
    pub request: PurchaseRequest,
    /// Only present on tokens sent back by the processor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<NoticeResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Icon URLs keyed by pixel size
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub icons: BTreeMap<String, String>,
    #[serde(rename = "pricePoint", default, skip_serializing_if = "Option::is_none")]
    pub price_point: Option<String>,
    #[serde(rename = "defaultLocale", default, skip_serializing_if = "Option::is_none")]
    pub default_locale: Option<String>,
    #[serde(rename = "postbackURL", default, skip_serializing_if = "Option::is_none")]
    pub postback_url: Option<String>,
    #[serde(rename = "chargebackURL", default, skip_serializing_if = "Option::is_none")]
    pub chargeback_url: Option<String>,
    /// URL-encoded key/value string, see `products::product_data`
    #[serde(rename = "productData", default, skip_serializing_if = "Option::is_none")]
    pub product_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoticeResponse {
    #[serde(rename = "transactionID", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<NoticePrice>,
    /// Buyer reference sent for free and simulated purchases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solitude_buyer_uuid: Option<String>,
    /// Chargeback notices: `refund` or `reversal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Price the processor actually charged. Authoritative over the requested price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticePrice {
    pub amount: Decimal,
    pub currency: String,
}

/// A processor notice that passed signature, structure and time checks.
#[derive(Debug, Clone)]
pub struct ValidatedNotice {
    pub issuer: Option<String>,
    pub product_data: String,
    pub transaction_id: String,
    pub price: Option<NoticePrice>,
    pub solitude_buyer_uuid: Option<String>,
    pub reason: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Check structural completeness, then that `now` lies inside the token's
/// stated lifetime and no more than `expiry_window` seconds after issue.
pub fn validate(
    claims: JWTClaims<PaymentClaims>,
    now: i64,
    expiry_window: u64,
) -> Result<ValidatedNotice> {
    let JWTClaims {
        issued_at,
        expires_at,
        issuer,
        custom,
        ..
    } = claims;

    let product_data = custom
        .request
        .product_data
        .filter(|pd| !pd.is_empty())
        .ok_or(AppError::MissingClaim("request.productData"))?;
    let response = custom
        .response
        .ok_or(AppError::MissingClaim("response.transactionID"))?;
    let transaction_id = response
        .transaction_id
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MissingClaim("response.transactionID"))?;

    let iat = issued_at.ok_or(AppError::MissingClaim("iat"))?.as_secs() as i64;
    let exp = expires_at.ok_or(AppError::MissingClaim("exp"))?.as_secs() as i64;

    if now < iat {
        return Err(AppError::RequestExpired(format!(
            "issued {}s in the future",
            iat - now
        )));
    }
    if now > exp {
        return Err(AppError::RequestExpired(format!(
            "expired {}s ago",
            now - exp
        )));
    }
    if (now - iat) as u64 > expiry_window {
        return Err(AppError::RequestExpired(format!(
            "issued {}s ago, window is {}s",
            now - iat,
            expiry_window
        )));
    }

    Ok(ValidatedNotice {
        issuer,
        product_data,
        transaction_id,
        price: response.price,
        solitude_buyer_uuid: response.solitude_buyer_uuid.filter(|u| !u.is_empty()),
        reason: response.reason,
        issued_at: iat,
        expires_at: exp,
    })
}
