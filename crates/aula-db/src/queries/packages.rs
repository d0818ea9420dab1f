//! Course package catalog queries.

use aula_types::{Credits, PackageId};
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A course package row.
#[derive(Debug, Clone)]
pub struct PackageRow {
    pub id: PackageId,
    pub name: String,
    pub grade: String,
    pub price: Credits,
    pub duration_days: u64,
    pub is_active: bool,
    pub created_at: u64,
}

/// Insert a new package. Returns the row id.
pub fn insert(
    conn: &Connection,
    name: &str,
    grade: &str,
    price: Credits,
    duration_days: u64,
    now: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO packages (name, grade, price, duration_days, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![name, grade, price as i64, duration_days as i64, now as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a package by id.
pub fn get(conn: &Connection, id: PackageId) -> Result<Option<PackageRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, grade, price, duration_days, is_active, created_at
             FROM packages WHERE id = ?1",
            [id as i64],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// List active packages, optionally filtered by grade.
pub fn list_active(conn: &Connection, grade: Option<&str>) -> Result<Vec<PackageRow>> {
    let rows = match grade {
        Some(g) => {
            let mut stmt = conn.prepare(
                "SELECT id, name, grade, price, duration_days, is_active, created_at
                 FROM packages WHERE is_active = 1 AND grade = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([g], row_from_sql)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, name, grade, price, duration_days, is_active, created_at
                 FROM packages WHERE is_active = 1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], row_from_sql)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Deactivate a package so it can no longer be purchased.
pub fn deactivate(conn: &Connection, id: PackageId) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE packages SET is_active = 0 WHERE id = ?1 AND is_active = 1",
        [id as i64],
    )?;
    Ok(updated == 1)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> std::result::Result<PackageRow, rusqlite::Error> {
    Ok(PackageRow {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        grade: row.get(2)?,
        price: row.get::<_, i64>(3)? as u64,
        duration_days: row.get::<_, i64>(4)? as u64,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}
