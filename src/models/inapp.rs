use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A product sold from inside an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppProduct {
    pub id: String,
    /// Owning app; stub products used for simulations have none
    pub webapp_id: Option<String>,
    pub name: String,
    pub logo_url: Option<String>,
    pub price_point: String,
    pub price_amount: Decimal,
    pub currency: String,
    /// Canned processor result, e.g. `{"result": "postback"}`. When set no
    /// real payment happens.
    pub simulate: Option<serde_json::Value>,
    pub created_at: i64,
}

impl InAppProduct {
    pub fn is_simulation(&self) -> bool {
        self.simulate.is_some()
    }

    /// Free and simulated products identify the buyer through a
    /// processor-assigned buyer reference instead of a paid transaction.
    pub fn is_free_simulated(&self) -> bool {
        self.is_simulation() || self.price_amount.is_zero()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInAppProduct {
    pub webapp_id: Option<String>,
    pub name: String,
    pub logo_url: Option<String>,
    pub price_point: String,
    pub price_amount: Decimal,
    #[serde(default = "super::webapp::default_currency")]
    pub currency: String,
    pub simulate: Option<serde_json::Value>,
}
