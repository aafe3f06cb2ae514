use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

pub const CURRENCY_DEFAULT: &str = "USD";

/// Kind of payment event a contribution row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContributionType {
    Pending,
    Purchase,
    Refund,
    Chargeback,
}

impl ContributionType {
    /// The ledger only ever moves `pending -> purchase -> refund | chargeback`.
    pub fn can_transition_to(self, next: ContributionType) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Purchase)
                | (Self::Purchase, Self::Refund)
                | (Self::Purchase, Self::Chargeback)
        )
    }

    pub fn is_reversal(self) -> bool {
        matches!(self, Self::Refund | Self::Chargeback)
    }
}

/// What a contribution paid for. Exactly one of the two catalog references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ProductRef {
    Webapp(String),
    InApp(String),
}

impl ProductRef {
    pub fn webapp_id(&self) -> Option<&str> {
        match self {
            ProductRef::Webapp(id) => Some(id),
            ProductRef::InApp(_) => None,
        }
    }

    pub fn inapp_id(&self) -> Option<&str> {
        match self {
            ProductRef::Webapp(_) => None,
            ProductRef::InApp(id) => Some(id),
        }
    }
}

/// One payment-lifecycle event. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: String,
    /// Correlation key shared by the outbound request and its postback
    pub uuid: String,
    /// Processor transaction id, set once when the purchase is confirmed
    pub transaction_id: Option<String>,
    #[serde(rename = "type")]
    pub contrib_type: ContributionType,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub product: ProductRef,
    pub user_id: Option<String>,
    /// Refunds and chargebacks point at the purchase they reverse
    pub related_id: Option<String>,
    pub source: Option<String>,
    pub source_locale: Option<String>,
    pub price_point: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Data required to create a new contribution row
#[derive(Debug, Clone)]
pub struct CreateContribution {
    pub uuid: String,
    pub contrib_type: ContributionType,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub product: ProductRef,
    pub user_id: Option<String>,
    pub related_id: Option<String>,
    pub source: Option<String>,
    pub source_locale: Option<String>,
    pub price_point: Option<String>,
}

impl CreateContribution {
    /// A new purchase attempt awaiting its postback.
    pub fn pending(product: ProductRef, uuid: String) -> Self {
        Self {
            uuid,
            contrib_type: ContributionType::Pending,
            transaction_id: None,
            amount: None,
            currency: CURRENCY_DEFAULT.to_string(),
            product,
            user_id: None,
            related_id: None,
            source: None,
            source_locale: None,
            price_point: None,
        }
    }
}
