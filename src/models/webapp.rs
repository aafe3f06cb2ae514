use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A marketplace app as seen by the payment flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webapp {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_locale: String,
    /// Seller product id cached from the processor; required to sell the app
    pub solitude_public_id: Option<String>,
    /// Size in bytes of the current version's package
    pub application_size: Option<i64>,
    pub price_point: Option<String>,
    pub price_amount: Option<Decimal>,
    pub currency: String,
    pub has_icon: bool,
    pub support_email: Option<String>,
    pub developer_email: Option<String>,
    pub created_at: i64,
}

impl Webapp {
    pub fn is_premium(&self) -> bool {
        self.price_amount.is_some_and(|p| !p.is_zero())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebapp {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_locale")]
    pub default_locale: String,
    pub solitude_public_id: Option<String>,
    pub application_size: Option<i64>,
    pub price_point: Option<String>,
    pub price_amount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub has_icon: bool,
    pub support_email: Option<String>,
    pub developer_email: Option<String>,
}

pub(crate) fn default_locale() -> String {
    "en-US".to_string()
}

pub(crate) fn default_currency() -> String {
    super::CURRENCY_DEFAULT.to_string()
}
