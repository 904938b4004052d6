use rusqlite::{params, OptionalExtension};

use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub struct Registration<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Create a local account. Returns the new user id.
pub fn register(pool: &DbPool, reg: &Registration<'_>, cost: u32) -> AppResult<i64> {
    let email = reg.email.trim();
    let username = reg.username.trim();
    if email.is_empty() || username.is_empty() || reg.password.is_empty() {
        return Err(AppError::InvalidInput(
            "Email, username and password are required".into(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::InvalidInput("Invalid email address".into()));
    }

    let hash = bcrypt::hash(reg.password, cost)?;

    let conn = pool.get()?;
    let inserted = conn.execute(
        "INSERT INTO users (email, username, password_hash) VALUES (?1, ?2, ?3)
         ON CONFLICT(email) DO NOTHING",
        params![email, username, hash],
    )?;
    if inserted == 0 {
        return Err(AppError::InvalidInput("Email already registered".into()));
    }

    let id = conn.last_insert_rowid();
    tracing::info!(user_id = id, "user registered");
    Ok(id)
}

pub fn find_by_email(pool: &DbPool, email: &str) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT id, email, username, password_hash FROM users WHERE email = ?1",
            params![email.trim()],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_by_id(pool: &DbPool, id: i64) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT id, email, username, password_hash FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
    })
}

/// Check an email/password pair. Both failure modes yield the same error.
pub fn verify_local_credentials(pool: &DbPool, email: &str, password: &str) -> AppResult<User> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::InvalidCredentials);
    }

    let user = find_by_email(pool, email)?.ok_or(AppError::InvalidCredentials)?;
    if password_matches(&user, password) {
        Ok(user)
    } else {
        Err(AppError::InvalidCredentials)
    }
}

/// Constant-time check via bcrypt. Accounts without a local password never match.
pub fn password_matches(user: &User, password: &str) -> bool {
    if user.password_hash.is_empty() {
        return false;
    }
    bcrypt::verify(password, &user.password_hash).unwrap_or(false)
}
