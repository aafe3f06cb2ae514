//! Contribution ledger: purchase preparation, postback application and
//! reversals.
//!
//! Every transition of a contribution happens inside one IMMEDIATE SQLite
//! transaction, so two deliveries of the same notice serialize on the write
//! lock. The loser of a race observes the winner's committed state and falls
//! into the replay or conflict branch. Side effects (notifications) run only
//! after commit.

use rusqlite::{Connection, TransactionBehavior};

use crate::buyer::{lookup_buyer_email, resolve_buyer};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::id::gen_contrib_uuid;
use crate::jwt::ValidatedNotice;
use crate::models::{
    Contribution, ContributionType, CreateContribution, OwnershipStatus, User,
};
use crate::notify::{Notification, NotificationKind};
use crate::products::{self, Product, ProductData};

/// How a notice was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The ledger changed
    Fresh,
    /// Redelivery of a notice that was already applied; nothing changed
    Replay,
}

#[derive(Debug, Clone)]
pub struct NoticeOutcome {
    pub applied: Applied,
    /// The contribution the notice was about, as stored after applying it
    pub contribution: Contribution,
    pub transaction_id: String,
}

// ============ Outbound requests ============

/// Options recorded on a new purchase attempt.
#[derive(Debug, Clone, Default)]
pub struct PurchaseAttempt {
    pub source: Option<String>,
    pub locale: Option<String>,
}

/// Create the PENDING contribution an outbound purchase token is bound to.
/// App purchases record the requested price; in-app purchases have no amount
/// until the processor reports what was charged.
pub fn create_pending(
    conn: &Connection,
    product: &Product,
    buyer: Option<&User>,
    attempt: &PurchaseAttempt,
) -> Result<Contribution> {
    if let (Some(app_id), Some(user)) = (product.owned_webapp_id(), buyer) {
        if queries::user_owns_app(conn, app_id, &user.id)? {
            return Err(AppError::Conflict(format!(
                "User {} already owns app {}",
                user.id, app_id
            )));
        }
    }

    let mut input = CreateContribution::pending(product.product_ref(), gen_contrib_uuid());
    if let Some((amount, currency)) = product.price() {
        if matches!(product, Product::App(_)) {
            input.amount = Some(amount);
        }
        input.currency = currency.to_string();
    }
    input.price_point = product.price_point().map(str::to_string);
    input.user_id = buyer.map(|u| u.id.clone());
    input.source = attempt.source.clone();
    input.source_locale = attempt.locale.clone();

    let contribution = queries::create_contribution(conn, &input)?;
    tracing::debug!(
        "Stored pending contribution {} for product {}",
        contribution.uuid,
        product.id()
    );
    Ok(contribution)
}

// ============ Postbacks ============

/// Apply a verified purchase notice to the ledger.
pub async fn apply_postback(state: &AppState, notice: &ValidatedNotice) -> Result<NoticeOutcome> {
    let product_data = ProductData::parse(&notice.product_data)?;
    let uuid = product_data.contrib_uuid.as_str();

    // Referential checks and the cheap replay path, without any lock
    let (contribution, product) = {
        let conn = state.db.get()?;
        let contribution = queries::get_contribution_by_uuid(&conn, uuid)?
            .ok_or_else(|| AppError::UnknownContribution(uuid.to_string()))?;
        if let Some(replay) = check_already_applied(&contribution, &notice.transaction_id)? {
            return Ok(replay);
        }
        let product = product_for(&conn, &product_data, &contribution)?;
        (contribution, product)
    };

    // External lookup with no connection held
    let buyer_email = match contribution.user_id {
        Some(_) => None,
        None => {
            lookup_buyer_email(
                state.payments.as_ref(),
                product.is_free_simulated(),
                uuid,
                notice.solitude_buyer_uuid.as_deref(),
            )
            .await?
        }
    };

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let buyer_id = match &buyer_email {
        Some(email) => Some(resolve_buyer(&tx, email)?.id),
        None => contribution.user_id.clone(),
    };
    let (amount, currency) = match &notice.price {
        Some(price) => (Some(price.amount), price.currency.as_str()),
        None => (None, contribution.currency.as_str()),
    };

    let claimed = queries::try_complete_purchase(
        &tx,
        uuid,
        &queries::PurchaseCompletion {
            transaction_id: &notice.transaction_id,
            amount,
            currency,
            user_id: buyer_id.as_deref(),
        },
    )?;

    if !claimed {
        drop(tx);
        let current = queries::get_contribution_by_uuid(&conn, uuid)?
            .ok_or_else(|| AppError::UnknownContribution(uuid.to_string()))?;
        return check_already_applied(&current, &notice.transaction_id)?.ok_or_else(|| {
            AppError::Internal(format!("Contribution {} lost its transition", uuid))
        });
    }

    match (product.owned_webapp_id(), buyer_id.as_deref()) {
        (Some(app_id), Some(user_id)) if !product.is_simulation() => {
            queries::upsert_app_purchase(&tx, app_id, user_id, OwnershipStatus::Purchased)?;
        }
        (Some(app_id), None) => {
            tracing::warn!(
                "Purchase {} of app {} has no buyer, ownership not recorded",
                uuid,
                app_id
            );
        }
        _ => {}
    }

    tx.commit()?;

    let contribution = queries::get_contribution_by_uuid(&conn, uuid)?
        .ok_or_else(|| AppError::UnknownContribution(uuid.to_string()))?;
    tracing::info!(
        "Purchase complete for contribution {} with transaction {}",
        uuid,
        notice.transaction_id
    );

    let recipient = user_email(&conn, contribution.user_id.as_deref())?;
    state.notifier.dispatch(notification(
        NotificationKind::PurchaseReceipt,
        &contribution,
        &product,
        recipient,
        None,
        None,
    ));

    Ok(NoticeOutcome {
        applied: Applied::Fresh,
        transaction_id: notice.transaction_id.clone(),
        contribution,
    })
}

/// `Some` when the purchase was already applied with this transaction id;
/// an error when it was applied with another one or the row cannot take a
/// purchase; `None` when the contribution is still pending.
fn check_already_applied(
    contribution: &Contribution,
    transaction_id: &str,
) -> Result<Option<NoticeOutcome>> {
    if contribution.contrib_type.is_reversal() {
        return Err(AppError::IllegalTransition(format!(
            "contribution {} is a {} and cannot become a purchase",
            contribution.uuid,
            contribution.contrib_type.as_ref()
        )));
    }

    match &contribution.transaction_id {
        Some(existing) if existing == transaction_id => {
            tracing::info!(
                "Postback sent again for contribution {} (transaction {})",
                contribution.uuid,
                transaction_id
            );
            Ok(Some(NoticeOutcome {
                applied: Applied::Replay,
                contribution: contribution.clone(),
                transaction_id: transaction_id.to_string(),
            }))
        }
        Some(existing) => Err(AppError::TransactionConflict {
            uuid: contribution.uuid.clone(),
            existing: existing.clone(),
            incoming: transaction_id.to_string(),
        }),
        None if contribution.contrib_type == ContributionType::Pending => Ok(None),
        None => Err(AppError::IllegalTransition(format!(
            "contribution {} is a {} without a transaction",
            contribution.uuid,
            contribution.contrib_type.as_ref()
        ))),
    }
}

/// Resolve the product of a contribution, checking that the notice names the
/// same catalog entity.
fn product_for(
    conn: &Connection,
    product_data: &ProductData,
    contribution: &Contribution,
) -> Result<Product> {
    if product_data.product != contribution.product {
        return Err(AppError::UnknownProduct(format!(
            "notice for {} names {:?} but the contribution is for {:?}",
            contribution.uuid, product_data.product, contribution.product
        )));
    }
    products::resolve(conn, &contribution.product)
}

// ============ Reversals ============

/// Result of appending a reversal row.
#[derive(Debug, Clone)]
pub enum Reversal {
    Recorded(Contribution),
    /// The purchase was already reversed; carries the existing row
    Existing(Contribution),
}

/// Append a REFUND or CHARGEBACK row pointing at `purchase` and update the
/// buyer's ownership. Must run inside the caller's write transaction.
pub(crate) fn append_reversal(
    conn: &Connection,
    purchase: &Contribution,
    kind: ContributionType,
    transaction_id: Option<&str>,
) -> Result<Reversal> {
    if !purchase.contrib_type.can_transition_to(kind) {
        return Err(AppError::IllegalTransition(format!(
            "{} {} cannot be reversed by a {}",
            purchase.contrib_type.as_ref(),
            purchase.uuid,
            kind.as_ref()
        )));
    }
    if let Some(existing) = queries::get_reversal_for(conn, &purchase.id)? {
        return Ok(Reversal::Existing(existing));
    }

    let reversal = queries::create_contribution(
        conn,
        &CreateContribution {
            uuid: gen_contrib_uuid(),
            contrib_type: kind,
            transaction_id: transaction_id.map(str::to_string),
            amount: purchase.amount.map(|a| -a),
            currency: purchase.currency.clone(),
            product: purchase.product.clone(),
            user_id: purchase.user_id.clone(),
            related_id: Some(purchase.id.clone()),
            source: purchase.source.clone(),
            source_locale: purchase.source_locale.clone(),
            price_point: purchase.price_point.clone(),
        },
    )?;

    if let (Some(app_id), Some(user_id), Some(status)) = (
        purchase.product.webapp_id(),
        purchase.user_id.as_deref(),
        OwnershipStatus::for_reversal(kind),
    ) {
        queries::set_app_purchase_status(conn, app_id, user_id, status)?;
    }

    Ok(Reversal::Recorded(reversal))
}

/// Apply a verified chargeback notice. `response.reason = "refund"` records a
/// REFUND, anything else a CHARGEBACK.
pub fn apply_chargeback(state: &AppState, notice: &ValidatedNotice) -> Result<NoticeOutcome> {
    let product_data = ProductData::parse(&notice.product_data)?;
    let uuid = product_data.contrib_uuid.as_str();
    let kind = match notice.reason.as_deref() {
        Some("refund") => ContributionType::Refund,
        _ => ContributionType::Chargeback,
    };

    let mut conn = state.db.get()?;
    let purchase = queries::get_contribution_by_uuid(&conn, uuid)?
        .ok_or_else(|| AppError::UnknownContribution(uuid.to_string()))?;
    let product = product_for(&conn, &product_data, &purchase)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Re-read under the write lock
    let purchase = queries::get_contribution_by_uuid(&tx, uuid)?
        .ok_or_else(|| AppError::UnknownContribution(uuid.to_string()))?;
    let reversal = append_reversal(&tx, &purchase, kind, Some(&notice.transaction_id))?;

    // A refund approved locally has no processor transaction until the
    // processor confirms it here
    if let Reversal::Existing(existing) = &reversal {
        if existing.contrib_type == kind
            && existing.transaction_id.is_none()
            && queries::attach_reversal_transaction(&tx, &existing.id, &notice.transaction_id)?
        {
            tx.commit()?;
            tracing::info!(
                "Attached transaction {} to {} {} of purchase {}",
                notice.transaction_id,
                kind.as_ref(),
                existing.uuid,
                uuid
            );
            let mut contribution = existing.clone();
            contribution.transaction_id = Some(notice.transaction_id.clone());
            return Ok(NoticeOutcome {
                applied: Applied::Fresh,
                contribution,
                transaction_id: notice.transaction_id.clone(),
            });
        }
    }
    tx.commit()?;

    let reversal = match reversal {
        Reversal::Existing(existing) => {
            let same_notice = existing.contrib_type == kind
                && existing.transaction_id.as_deref() == Some(notice.transaction_id.as_str());
            if !same_notice {
                return Err(AppError::TransactionConflict {
                    uuid: purchase.uuid.clone(),
                    existing: format!(
                        "{} {}",
                        existing.contrib_type.as_ref(),
                        existing.transaction_id.as_deref().unwrap_or("-")
                    ),
                    incoming: format!("{} {}", kind.as_ref(), notice.transaction_id),
                });
            }
            tracing::info!(
                "{} notice sent again for contribution {}",
                kind.as_ref(),
                uuid
            );
            return Ok(NoticeOutcome {
                applied: Applied::Replay,
                contribution: existing,
                transaction_id: notice.transaction_id.clone(),
            });
        }
        Reversal::Recorded(reversal) => reversal,
    };

    tracing::info!(
        "Recorded {} {} against purchase {}",
        kind.as_ref(),
        reversal.uuid,
        uuid
    );

    let (notify_kind, recipient) = match kind {
        ContributionType::Refund => (
            NotificationKind::RefundApproved,
            user_email(&conn, purchase.user_id.as_deref())?,
        ),
        _ => (
            NotificationKind::Chargeback,
            product.developer_email().map(str::to_string),
        ),
    };
    state.notifier.dispatch(notification(
        notify_kind,
        &reversal,
        &product,
        recipient,
        notice.reason.clone(),
        None,
    ));

    Ok(NoticeOutcome {
        applied: Applied::Fresh,
        contribution: reversal,
        transaction_id: notice.transaction_id.clone(),
    })
}

/// Whether the purchase attempt `uuid` has been confirmed.
pub fn is_complete(conn: &Connection, uuid: &str) -> Result<bool> {
    Ok(queries::get_contribution_by_uuid(conn, uuid)?
        .is_some_and(|c| c.contrib_type == ContributionType::Purchase))
}

// ============ Post-commit hooks ============

pub(crate) fn user_email(conn: &Connection, user_id: Option<&str>) -> Result<Option<String>> {
    match user_id {
        Some(id) => Ok(queries::get_user_by_id(conn, id)?.map(|u| u.email)),
        None => Ok(None),
    }
}

pub(crate) fn notification(
    kind: NotificationKind,
    contribution: &Contribution,
    product: &Product,
    recipient: Option<String>,
    reason: Option<String>,
    actor: Option<String>,
) -> Notification {
    Notification {
        kind,
        recipient,
        contribution_uuid: contribution.uuid.clone(),
        transaction_id: contribution.transaction_id.clone(),
        product_id: product.id().to_string(),
        product_name: product.name().to_string(),
        amount: contribution.amount,
        currency: contribution.currency.clone(),
        reason: reason.filter(|r| !r.is_empty()),
        actor,
        timestamp: queries::now(),
        idempotency_key: uuid::Uuid::new_v4().to_string(),
    }
}
