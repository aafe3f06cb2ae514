use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::ContributionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OwnershipStatus {
    Purchased,
    Refunded,
    Chargeback,
}

impl OwnershipStatus {
    pub fn for_reversal(kind: ContributionType) -> Option<Self> {
        match kind {
            ContributionType::Refund => Some(Self::Refunded),
            ContributionType::Chargeback => Some(Self::Chargeback),
            _ => None,
        }
    }
}

/// Ownership of a catalog app by a user. One row per (app, user); reversals
/// update the status instead of removing the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPurchase {
    pub id: String,
    pub webapp_id: String,
    pub user_id: String,
    pub status: OwnershipStatus,
    pub created_at: i64,
    pub modified_at: i64,
}
