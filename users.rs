use crate::error::{Error, Result};
use crate::models::{millis_to_datetime, UserId, UserRecord};
use rusqlite::{params, Connection, OptionalExtension};

pub fn create_user(conn: &Connection, full_name: &str, email: &str) -> Result<UserRecord> {
    let full_name = full_name.trim();
    let email = email.trim();
    if full_name.is_empty() || email.is_empty() {
        return Err(Error::InvalidInput("full name and email are required".into()));
    }
    let now = chrono::Utc::now().timestamp_millis();
    let inserted = conn.execute(
        "INSERT INTO users (full_name, email, created_at) VALUES (?1, ?2, ?3)",
        params![full_name, email, now],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::Conflict(format!("email {email} is already registered")));
        }
        Err(err) => return Err(err.into()),
    }
    let id = UserId(conn.last_insert_rowid());
    log::info!("Created user {id}");
    Ok(UserRecord {
        id,
        full_name: full_name.to_string(),
        email: email.to_string(),
        created_at: millis_to_datetime(now),
    })
}

pub fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", params![id.0], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn created_user_exists() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = create_user(&conn, "Amal Haddad", "amal@example.com").unwrap();
        assert!(user_exists(&conn, user.id).unwrap());
        assert!(!user_exists(&conn, UserId(user.id.0 + 100)).unwrap());
    }

    #[test]
    fn email_is_unique_ignoring_case() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        create_user(&conn, "Amal Haddad", "amal@example.com").unwrap();
        let err = create_user(&conn, "Other", "AMAL@example.com").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn blank_fields_are_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let err = create_user(&conn, " ", "x@example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.status_code(), 400);
        assert!(create_user(&conn, "Amal", "").is_err());
    }
}
