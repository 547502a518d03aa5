//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
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

pub const SUBSCRIPTION_COLS: &str = "id, user_id, business_type, sku_id, purchase_token, order_id, status, purchase_date, expiry_date, renewal_date, auto_renew, price_amount_micros, currency_code, cancellation_date, cancellation_reason, raw_provider_response, version, created_at, updated_at";

pub const PURCHASE_EVENT_COLS: &str =
    "id, subscription_id, user_id, event_type, event_data, created_at";

// ============ FromRow Implementations ============

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            business_type: parse_enum(row, 2, "business_type")?,
            sku_id: row.get(3)?,
            purchase_token: row.get(4)?,
            order_id: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            purchase_date: row.get(7)?,
            expiry_date: row.get(8)?,
            renewal_date: row.get(9)?,
            auto_renew: row.get::<_, i64>(10)? != 0,
            price_amount_micros: row.get(11)?,
            currency_code: row.get(12)?,
            cancellation_date: row.get(13)?,
            cancellation_reason: row.get(14)?,
            raw_provider_response: row.get(15)?,
            version: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

impl FromRow for PurchaseEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let event_data: String = row.get(4)?;
        Ok(PurchaseEvent {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            user_id: row.get(2)?,
            event_type: parse_enum(row, 3, "event_type")?,
            event_data: serde_json::from_str(&event_data).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    4,
                    "event_data".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            created_at: row.get(5)?,
        })
    }
}
