//! Row mapping for stored secrets.

use certvault_core::{Secret, SecretKind};
use rusqlite::types::Type;
use rusqlite::Row;

/// Columns in the order [`secret_from_row`] expects.
pub const SECRET_COLUMNS: &str = "id, kind, data, comment, version, deleted";

pub fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<Secret> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse::<SecretKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(Secret {
        id: row.get(0)?,
        kind,
        payload: row.get(2)?,
        comment: row.get(3)?,
        version: row.get(4)?,
        deleted: row.get(5)?,
    })
}
