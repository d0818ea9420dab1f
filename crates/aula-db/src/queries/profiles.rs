//! Student profile queries.
//!
//! Profiles are a read-only projection of the external identity store;
//! the payment core only consults the grade for code eligibility.

use aula_types::UserId;
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A student profile row.
#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub user_id: UserId,
    pub display_name: String,
    pub grade: String,
    pub created_at: u64,
}

/// Insert or replace a profile.
pub fn upsert(
    conn: &Connection,
    user_id: UserId,
    display_name: &str,
    grade: &str,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO profiles (user_id, display_name, grade, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET display_name = ?2, grade = ?3",
        rusqlite::params![user_id as i64, display_name, grade, now as i64],
    )?;
    Ok(())
}

/// Get a profile by user id.
pub fn get(conn: &Connection, user_id: UserId) -> Result<Option<ProfileRow>> {
    let row = conn
        .query_row(
            "SELECT user_id, display_name, grade, created_at FROM profiles WHERE user_id = ?1",
            [user_id as i64],
            |row| {
                Ok(ProfileRow {
                    user_id: row.get::<_, i64>(0)? as u64,
                    display_name: row.get(1)?,
                    grade: row.get(2)?,
                    created_at: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let conn = crate::open_memory().expect("open test db");
        upsert(&conn, 1, "Sara", "first", 100).expect("upsert");

        let row = get(&conn, 1).expect("get").expect("exists");
        assert_eq!(row.display_name, "Sara");
        assert_eq!(row.grade, "first");

        // Grade promotion updates in place.
        upsert(&conn, 1, "Sara", "second", 200).expect("upsert");
        let row = get(&conn, 1).expect("get").expect("exists");
        assert_eq!(row.grade, "second");

        assert!(get(&conn, 2).expect("get").is_none());
    }
}
