use chrono::Utc;
use rusqlite::{Connection, params};
use rust_decimal::Decimal;

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    APP_PURCHASE_COLS, CONTRIBUTION_COLS, INAPP_COLS, REFUND_COLS, USER_COLS, WEBAPP_COLS,
    query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn decimal_text(d: Option<Decimal>) -> Option<String> {
    d.map(|d| d.normalize().to_string())
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    input.validate()?;
    let id = EntityType::User.gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();
    let display_name = input
        .display_name
        .clone()
        .unwrap_or_else(|| default_display_name(&email));

    conn.execute(
        "INSERT INTO users (id, email, display_name, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &email, &display_name, input.source.as_ref(), now],
    )?;

    Ok(User {
        id,
        email,
        display_name,
        source: input.source,
        created_at: now,
    })
}

fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

/// Look up a user by email, creating one tagged with `source` if absent.
/// Safe to race: the losing insert is ignored and both callers read the
/// same row.
pub fn get_or_create_user(conn: &Connection, email: &str, source: UserSource) -> Result<User> {
    let email = email.trim().to_lowercase();
    if let Some(user) = get_user_by_email(conn, &email)? {
        return Ok(user);
    }

    let created = conn.execute(
        "INSERT OR IGNORE INTO users (id, email, display_name, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            EntityType::User.gen_id(),
            &email,
            default_display_name(&email),
            source.as_ref(),
            now()
        ],
    )?;
    if created > 0 {
        tracing::info!("Created {} user for {}", source.as_ref(), email);
    }

    get_user_by_email(conn, &email)?
        .ok_or_else(|| AppError::Internal(format!("User {} vanished after insert", email)))
}

// ============ Catalog ============

pub fn create_webapp(conn: &Connection, input: &CreateWebapp) -> Result<Webapp> {
    let id = EntityType::Webapp.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO webapps (id, name, description, default_locale, solitude_public_id,
                              application_size, price_point, price_amount, currency, has_icon,
                              support_email, developer_email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            &input.name,
            &input.description,
            &input.default_locale,
            &input.solitude_public_id,
            input.application_size,
            &input.price_point,
            decimal_text(input.price_amount),
            &input.currency,
            input.has_icon as i32,
            &input.support_email,
            &input.developer_email,
            now,
        ],
    )?;

    Ok(Webapp {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        default_locale: input.default_locale.clone(),
        solitude_public_id: input.solitude_public_id.clone(),
        application_size: input.application_size,
        price_point: input.price_point.clone(),
        price_amount: input.price_amount,
        currency: input.currency.clone(),
        has_icon: input.has_icon,
        support_email: input.support_email.clone(),
        developer_email: input.developer_email.clone(),
        created_at: now,
    })
}

pub fn get_webapp_by_id(conn: &Connection, id: &str) -> Result<Option<Webapp>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webapps WHERE id = ?1", WEBAPP_COLS),
        &[&id],
    )
}

pub fn create_inapp_product(conn: &Connection, input: &CreateInAppProduct) -> Result<InAppProduct> {
    let id = EntityType::InAppProduct.gen_id();
    let now = now();
    let simulate = input
        .simulate
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO inapp_products (id, webapp_id, name, logo_url, price_point, price_amount,
                                     currency, simulate, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.webapp_id,
            &input.name,
            &input.logo_url,
            &input.price_point,
            decimal_text(Some(input.price_amount)),
            &input.currency,
            simulate,
            now,
        ],
    )?;

    Ok(InAppProduct {
        id,
        webapp_id: input.webapp_id.clone(),
        name: input.name.clone(),
        logo_url: input.logo_url.clone(),
        price_point: input.price_point.clone(),
        price_amount: input.price_amount,
        currency: input.currency.clone(),
        simulate: input.simulate.clone(),
        created_at: now,
    })
}

pub fn get_inapp_product_by_id(conn: &Connection, id: &str) -> Result<Option<InAppProduct>> {
    query_one(
        conn,
        &format!("SELECT {} FROM inapp_products WHERE id = ?1", INAPP_COLS),
        &[&id],
    )
}

// ============ Contributions ============

pub fn create_contribution(conn: &Connection, input: &CreateContribution) -> Result<Contribution> {
    let id = EntityType::Contribution.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO contributions (id, uuid, transaction_id, type, amount, currency, webapp_id,
                                    inapp_product_id, user_id, related_id, source, source_locale,
                                    price_point, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            &id,
            &input.uuid,
            &input.transaction_id,
            input.contrib_type.as_ref(),
            decimal_text(input.amount),
            &input.currency,
            input.product.webapp_id(),
            input.product.inapp_id(),
            &input.user_id,
            &input.related_id,
            &input.source,
            &input.source_locale,
            &input.price_point,
            now,
            now,
        ],
    )?;

    Ok(Contribution {
        id,
        uuid: input.uuid.clone(),
        transaction_id: input.transaction_id.clone(),
        contrib_type: input.contrib_type,
        amount: input.amount,
        currency: input.currency.clone(),
        product: input.product.clone(),
        user_id: input.user_id.clone(),
        related_id: input.related_id.clone(),
        source: input.source.clone(),
        source_locale: input.source_locale.clone(),
        price_point: input.price_point.clone(),
        created_at: now,
        modified_at: now,
    })
}

pub fn get_contribution_by_id(conn: &Connection, id: &str) -> Result<Option<Contribution>> {
    query_one(
        conn,
        &format!("SELECT {} FROM contributions WHERE id = ?1", CONTRIBUTION_COLS),
        &[&id],
    )
}

pub fn get_contribution_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<Contribution>> {
    query_one(
        conn,
        &format!("SELECT {} FROM contributions WHERE uuid = ?1", CONTRIBUTION_COLS),
        &[&uuid],
    )
}

/// Refund or chargeback row recorded against a purchase, if any.
pub fn get_reversal_for(conn: &Connection, purchase_id: &str) -> Result<Option<Contribution>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM contributions WHERE related_id = ?1",
            CONTRIBUTION_COLS
        ),
        &[&purchase_id],
    )
}

/// Record the processor's transaction id on a reversal that was created
/// locally without one. Returns false if the row already carries an id.
pub fn attach_reversal_transaction(conn: &Connection, id: &str, transaction_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE contributions SET transaction_id = ?1, modified_at = ?2
         WHERE id = ?3 AND related_id IS NOT NULL AND transaction_id IS NULL",
        params![transaction_id, now(), id],
    )?;
    Ok(affected > 0)
}

pub fn list_contributions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Contribution>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM contributions WHERE user_id = ?1 ORDER BY created_at, id",
            CONTRIBUTION_COLS
        ),
        &[&user_id],
    )
}

/// Fields written when a postback confirms a purchase.
#[derive(Debug, Clone)]
pub struct PurchaseCompletion<'a> {
    pub transaction_id: &'a str,
    pub amount: Option<Decimal>,
    pub currency: &'a str,
    pub user_id: Option<&'a str>,
}

/// Atomically move a pending contribution to PURCHASE.
/// Returns false if the row was not pending any more (another delivery won).
pub fn try_complete_purchase(
    conn: &Connection,
    uuid: &str,
    completion: &PurchaseCompletion<'_>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE contributions
         SET type = ?1, transaction_id = ?2, amount = COALESCE(?3, amount), currency = ?4,
             user_id = COALESCE(?5, user_id), modified_at = ?6
         WHERE uuid = ?7 AND type = ?8 AND transaction_id IS NULL",
        params![
            ContributionType::Purchase.as_ref(),
            completion.transaction_id,
            decimal_text(completion.amount),
            completion.currency,
            completion.user_id,
            now(),
            uuid,
            ContributionType::Pending.as_ref(),
        ],
    )?;
    Ok(affected > 0)
}

// ============ Refunds ============

pub fn get_refund_for_contribution(conn: &Connection, contribution_id: &str) -> Result<Option<Refund>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM refunds WHERE contribution_id = ?1",
            REFUND_COLS
        ),
        &[&contribution_id],
    )
}

/// Insert or overwrite the refund row for its contribution.
pub fn save_refund(conn: &Connection, refund: &Refund) -> Result<()> {
    conn.execute(
        "INSERT INTO refunds (id, contribution_id, status, requested_at, approved_at, declined_at,
                              refund_reason, rejection_reason, actor_id, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(contribution_id) DO UPDATE SET
             status = excluded.status,
             requested_at = excluded.requested_at,
             approved_at = excluded.approved_at,
             declined_at = excluded.declined_at,
             refund_reason = excluded.refund_reason,
             rejection_reason = excluded.rejection_reason,
             actor_id = excluded.actor_id,
             modified_at = excluded.modified_at",
        params![
            &refund.id,
            &refund.contribution_id,
            refund.status.as_ref(),
            refund.requested_at,
            refund.approved_at,
            refund.declined_at,
            &refund.refund_reason,
            &refund.rejection_reason,
            &refund.actor_id,
            refund.created_at,
            refund.modified_at,
        ],
    )?;
    Ok(())
}

// ============ App Ownership ============

pub fn get_app_purchase(
    conn: &Connection,
    webapp_id: &str,
    user_id: &str,
) -> Result<Option<AppPurchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM app_purchases WHERE webapp_id = ?1 AND user_id = ?2",
            APP_PURCHASE_COLS
        ),
        &[&webapp_id, &user_id],
    )
}

/// Record (or restore) ownership of an app after a confirmed purchase.
pub fn upsert_app_purchase(
    conn: &Connection,
    webapp_id: &str,
    user_id: &str,
    status: OwnershipStatus,
) -> Result<()> {
    let now = now();
    conn.execute(
        "INSERT INTO app_purchases (id, webapp_id, user_id, status, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(webapp_id, user_id) DO UPDATE SET
             status = excluded.status,
             modified_at = excluded.modified_at",
        params![
            EntityType::AppPurchase.gen_id(),
            webapp_id,
            user_id,
            status.as_ref(),
            now
        ],
    )?;
    Ok(())
}

/// Returns false when there is no ownership row to update.
pub fn set_app_purchase_status(
    conn: &Connection,
    webapp_id: &str,
    user_id: &str,
    status: OwnershipStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE app_purchases SET status = ?1, modified_at = ?2
         WHERE webapp_id = ?3 AND user_id = ?4",
        params![status.as_ref(), now(), webapp_id, user_id],
    )?;
    Ok(affected > 0)
}

pub fn user_owns_app(conn: &Connection, webapp_id: &str, user_id: &str) -> Result<bool> {
    Ok(get_app_purchase(conn, webapp_id, user_id)?
        .is_some_and(|p| p.status == OwnershipStatus::Purchased))
}
