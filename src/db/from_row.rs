//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use rust_decimal::Decimal;

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Amounts are stored as canonical decimal text.
fn parse_decimal(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<String>>(col)?
        .map(|s| {
            s.parse::<Decimal>().map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    col,
                    col_name.to_string(),
                    rusqlite::types::Type::Text,
                )
            })
        })
        .transpose()
}

fn parse_json(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    row.get::<_, Option<String>>(col)?
        .map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    col,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, display_name, source, created_at";

pub const WEBAPP_COLS: &str = "id, name, description, default_locale, solitude_public_id, application_size, price_point, price_amount, currency, has_icon, support_email, developer_email, created_at";

pub const INAPP_COLS: &str =
    "id, webapp_id, name, logo_url, price_point, price_amount, currency, simulate, created_at";

pub const CONTRIBUTION_COLS: &str = "id, uuid, transaction_id, type, amount, currency, webapp_id, inapp_product_id, user_id, related_id, source, source_locale, price_point, created_at, modified_at";

pub const REFUND_COLS: &str = "id, contribution_id, status, requested_at, approved_at, declined_at, refund_reason, rejection_reason, actor_id, created_at, modified_at";

pub const APP_PURCHASE_COLS: &str = "id, webapp_id, user_id, status, created_at, modified_at";

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            source: parse_enum(row, 3, "source")?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Webapp {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Webapp {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            default_locale: row.get(3)?,
            solitude_public_id: row.get(4)?,
            application_size: row.get(5)?,
            price_point: row.get(6)?,
            price_amount: parse_decimal(row, 7, "price_amount")?,
            currency: row.get(8)?,
            has_icon: row.get::<_, i32>(9)? != 0,
            support_email: row.get(10)?,
            developer_email: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for InAppProduct {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(InAppProduct {
            id: row.get(0)?,
            webapp_id: row.get(1)?,
            name: row.get(2)?,
            logo_url: row.get(3)?,
            price_point: row.get(4)?,
            price_amount: parse_decimal(row, 5, "price_amount")?.unwrap_or_default(),
            currency: row.get(6)?,
            simulate: parse_json(row, 7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for Contribution {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let webapp_id: Option<String> = row.get(6)?;
        let inapp_id: Option<String> = row.get(7)?;
        let product = match (webapp_id, inapp_id) {
            (Some(id), None) => ProductRef::Webapp(id),
            (None, Some(id)) => ProductRef::InApp(id),
            _ => {
                return Err(rusqlite::Error::InvalidColumnType(
                    6,
                    "webapp_id".to_string(),
                    rusqlite::types::Type::Null,
                ));
            }
        };

        Ok(Contribution {
            id: row.get(0)?,
            uuid: row.get(1)?,
            transaction_id: row.get(2)?,
            contrib_type: parse_enum(row, 3, "type")?,
            amount: parse_decimal(row, 4, "amount")?,
            currency: row.get(5)?,
            product,
            user_id: row.get(8)?,
            related_id: row.get(9)?,
            source: row.get(10)?,
            source_locale: row.get(11)?,
            price_point: row.get(12)?,
            created_at: row.get(13)?,
            modified_at: row.get(14)?,
        })
    }
}

impl FromRow for Refund {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Refund {
            id: row.get(0)?,
            contribution_id: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            requested_at: row.get(3)?,
            approved_at: row.get(4)?,
            declined_at: row.get(5)?,
            refund_reason: row.get(6)?,
            rejection_reason: row.get(7)?,
            actor_id: row.get(8)?,
            created_at: row.get(9)?,
            modified_at: row.get(10)?,
        })
    }
}

impl FromRow for AppPurchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AppPurchase {
            id: row.get(0)?,
            webapp_id: row.get(1)?,
            user_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            created_at: row.get(4)?,
            modified_at: row.get(5)?,
        })
    }
}
