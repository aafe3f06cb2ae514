use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    ApprovedInstant,
    Declined,
    Failed,
}

impl RefundStatus {
    pub fn stamps_requested(self) -> bool {
        matches!(self, Self::Pending | Self::ApprovedInstant | Self::Failed)
    }

    pub fn stamps_approved(self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedInstant)
    }

    pub fn stamps_declined(self) -> bool {
        matches!(self, Self::Declined)
    }

    pub fn is_approved(self) -> bool {
        self.stamps_approved()
    }

    /// Legal moves for an existing refund. Re-entering the current status is
    /// always allowed; a failed or declined request may be re-opened as pending;
    /// approval is final.
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Failed | Self::Declined => next == Self::Pending,
            Self::Approved | Self::ApprovedInstant => false,
        }
    }
}

/// Refund request against a purchase contribution (one per purchase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub contribution_id: String,
    pub status: RefundStatus,
    pub requested_at: Option<i64>,
    pub approved_at: Option<i64>,
    pub declined_at: Option<i64>,
    pub refund_reason: String,
    pub rejection_reason: String,
    /// Who last moved the refund
    pub actor_id: String,
    pub created_at: i64,
    pub modified_at: i64,
}
