//! Refund requests against purchases.
//!
//! A refund moves `pending -> approved | approved_instant | declined | failed`.
//! Approval appends the REFUND reversal to the ledger in the same
//! transaction. The status-specific notification goes out after commit.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::ledger::{self, Reversal};
use crate::models::{Contribution, ContributionType, Refund, RefundStatus};
use crate::notify::{NotificationKind, Notifier};
use crate::products;

/// A requested refund status change.
#[derive(Debug, Clone)]
pub struct RefundChange<'a> {
    pub status: RefundStatus,
    /// Who is moving the refund (developer, reviewer, or the system)
    pub actor: &'a str,
    pub refund_reason: Option<&'a str>,
    pub rejection_reason: Option<&'a str>,
}

impl<'a> RefundChange<'a> {
    pub fn new(status: RefundStatus, actor: &'a str) -> Self {
        Self {
            status,
            actor,
            refund_reason: None,
            rejection_reason: None,
        }
    }

    pub fn refund_reason(mut self, reason: &'a str) -> Self {
        self.refund_reason = Some(reason);
        self
    }

    pub fn rejection_reason(mut self, reason: &'a str) -> Self {
        self.rejection_reason = Some(reason);
        self
    }
}

/// Get or create the refund for `contribution` and move it to `change.status`.
///
/// Timestamps implied by the target status are stamped only when unset or
/// when re-entering the same status; reasons are kept when a later call
/// omits them.
pub fn enqueue_refund(
    conn: &mut Connection,
    notifier: &dyn Notifier,
    contribution: &Contribution,
    change: RefundChange<'_>,
) -> Result<Refund> {
    let product = products::resolve(conn, &contribution.product)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let purchase = queries::get_contribution_by_id(&tx, &contribution.id)?
        .ok_or_else(|| AppError::UnknownContribution(contribution.uuid.clone()))?;
    if purchase.contrib_type != ContributionType::Purchase {
        return Err(AppError::IllegalTransition(format!(
            "cannot refund {} contribution {}",
            purchase.contrib_type.as_ref(),
            purchase.uuid
        )));
    }

    let now = queries::now();
    let existing = queries::get_refund_for_contribution(&tx, &purchase.id)?;
    let previous = existing.as_ref().map(|r| r.status);
    if let Some(from) = previous {
        if !from.can_transition_to(change.status) {
            return Err(AppError::IllegalTransition(format!(
                "refund for {} cannot move from {} to {}",
                purchase.uuid,
                from.as_ref(),
                change.status.as_ref()
            )));
        }
    }

    let mut refund = existing.unwrap_or_else(|| Refund {
        id: EntityType::Refund.gen_id(),
        contribution_id: purchase.id.clone(),
        status: RefundStatus::Pending,
        requested_at: None,
        approved_at: None,
        declined_at: None,
        refund_reason: String::new(),
        rejection_reason: String::new(),
        actor_id: change.actor.to_string(),
        created_at: now,
        modified_at: now,
    });

    let reentering = previous == Some(change.status);
    let stamp = |field: &mut Option<i64>, implied: bool| {
        if implied && (field.is_none() || reentering) {
            *field = Some(now);
        }
    };
    stamp(&mut refund.requested_at, change.status.stamps_requested());
    stamp(&mut refund.approved_at, change.status.stamps_approved());
    stamp(&mut refund.declined_at, change.status.stamps_declined());

    refund.status = change.status;
    if let Some(reason) = change.refund_reason.filter(|r| !r.is_empty()) {
        refund.refund_reason = reason.to_string();
    }
    if let Some(reason) = change.rejection_reason.filter(|r| !r.is_empty()) {
        refund.rejection_reason = reason.to_string();
    }
    refund.actor_id = change.actor.to_string();
    refund.modified_at = now;
    queries::save_refund(&tx, &refund)?;

    if change.status.is_approved() {
        match ledger::append_reversal(&tx, &purchase, ContributionType::Refund, None)? {
            Reversal::Recorded(reversal) => {
                tracing::info!(
                    "Recorded refund {} against purchase {}",
                    reversal.uuid,
                    purchase.uuid
                );
            }
            Reversal::Existing(existing) if existing.contrib_type == ContributionType::Refund => {}
            Reversal::Existing(existing) => {
                return Err(AppError::IllegalTransition(format!(
                    "purchase {} was already reversed by a {}",
                    purchase.uuid,
                    existing.contrib_type.as_ref()
                )));
            }
        }
    }

    tx.commit()?;
    tracing::info!(
        "Refund for {} is now {} (by {})",
        purchase.uuid,
        refund.status.as_ref(),
        change.actor
    );

    if reentering {
        return Ok(refund);
    }

    let developer = product.developer_email().map(str::to_string);
    let (kind, recipient, reason) = match refund.status {
        RefundStatus::Pending => (
            NotificationKind::RefundRequested,
            developer,
            Some(refund.refund_reason.clone()),
        ),
        RefundStatus::Approved | RefundStatus::ApprovedInstant => (
            NotificationKind::RefundApproved,
            ledger::user_email(conn, purchase.user_id.as_deref())?,
            None,
        ),
        RefundStatus::Declined => (
            NotificationKind::RefundDeclined,
            ledger::user_email(conn, purchase.user_id.as_deref())?,
            Some(refund.rejection_reason.clone()),
        ),
        RefundStatus::Failed => (NotificationKind::RefundFailed, developer, None),
    };
    notifier.dispatch(ledger::notification(
        kind,
        &purchase,
        &product,
        recipient,
        reason,
        Some(change.actor.to_string()),
    ));

    Ok(refund)
}
