use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AppResult;
use crate::state::DbPool;

/// Identity resolved from a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

/// Start a session for a user. Any previous token stops working.
pub fn create_session(pool: &DbPool, user_id: i64) -> AppResult<String> {
    let conn = pool.get()?;
    let token = generate_token();

    conn.execute(
        "UPDATE users SET session_token = ?1 WHERE id = ?2",
        params![token, user_id],
    )?;

    tracing::debug!(user_id, "session issued");
    Ok(token)
}

/// Resolve a token to its user. Unknown or malformed tokens are simply
/// unauthenticated, never an error.
pub fn authenticate(pool: &DbPool, token: &str) -> AppResult<Option<SessionUser>> {
    if Uuid::parse_str(token).is_err() {
        return Ok(None);
    }

    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT id, username FROM users WHERE session_token = ?1",
            params![token],
            |row| {
                Ok(SessionUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(user)
}

/// Forget a session token.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE users SET session_token = NULL WHERE session_token = ?1",
        params![token],
    )?;
    Ok(())
}

fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

// -- Cookie helpers --

pub fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        auth.cookie_name,
        token,
        auth.session_hours * 3600
    )
}

pub fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

pub fn get_cookie_value<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}
