//! Up/down votes on posts and comments.
//!
//! Each (user, target) pair is in one of three states. A repeated vote in
//! the same direction withdraws it, an opposite vote flips it. The target's
//! `like_count` always equals the signed sum of its vote rows because both
//! are written in the same immediate transaction.

use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::error::{AppError, AppResult};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
}

/// A user's current stance on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    None,
    Up,
    Down,
}

impl VoteState {
    fn weight(self) -> i64 {
        match self {
            VoteState::None => 0,
            VoteState::Up => 1,
            VoteState::Down => -1,
        }
    }

    fn from_weight(weight: Option<i64>) -> Self {
        match weight {
            Some(1) => VoteState::Up,
            Some(-1) => VoteState::Down,
            _ => VoteState::None,
        }
    }

    /// Next state plus the like-count adjustment for a vote request.
    pub fn apply(self, direction: VoteDirection) -> (VoteState, i64) {
        let next = match (self, direction) {
            (VoteState::Up, VoteDirection::Up) | (VoteState::Down, VoteDirection::Down) => {
                VoteState::None
            }
            (_, VoteDirection::Up) => VoteState::Up,
            (_, VoteDirection::Down) => VoteState::Down,
        };
        (next, next.weight() - self.weight())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Post,
    Comment,
}

impl TargetKind {
    fn table(self) -> &'static str {
        match self {
            TargetKind::Post => "posts",
            TargetKind::Comment => "comments",
        }
    }

    fn vote_table(self) -> &'static str {
        match self {
            TargetKind::Post => "post_votes",
            TargetKind::Comment => "comment_votes",
        }
    }

    fn vote_column(self) -> &'static str {
        match self {
            TargetKind::Post => "post_id",
            TargetKind::Comment => "comment_id",
        }
    }
}

/// Apply a vote and return the target's new like-count.
pub fn vote(
    pool: &DbPool,
    user_id: i64,
    kind: TargetKind,
    target_id: i64,
    direction: VoteDirection,
) -> AppResult<i64> {
    let mut conn = pool.get()?;
    // IMMEDIATE takes the write lock up front so two voters cannot both
    // read the old state.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists = tx
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", kind.table()),
            params![target_id],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        return Err(AppError::NotFound);
    }

    let current: Option<i64> = tx
        .query_row(
            &format!(
                "SELECT direction FROM {} WHERE user_id = ?1 AND {} = ?2",
                kind.vote_table(),
                kind.vote_column()
            ),
            params![user_id, target_id],
            |row| row.get(0),
        )
        .optional()?;

    let (next, delta) = VoteState::from_weight(current).apply(direction);

    match next {
        VoteState::None => {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE user_id = ?1 AND {} = ?2",
                    kind.vote_table(),
                    kind.vote_column()
                ),
                params![user_id, target_id],
            )?;
        }
        VoteState::Up | VoteState::Down => {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (user_id, {col}, direction) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id, {col}) DO UPDATE SET direction = excluded.direction",
                    table = kind.vote_table(),
                    col = kind.vote_column()
                ),
                params![user_id, target_id, next.weight()],
            )?;
        }
    }

    let like_count: i64 = tx.query_row(
        &format!(
            "UPDATE {} SET like_count = like_count + ?1 WHERE id = ?2 RETURNING like_count",
            kind.table()
        ),
        params![delta, target_id],
        |row| row.get(0),
    )?;

    tx.commit()?;

    tracing::debug!(user_id, ?kind, target_id, ?next, like_count, "vote applied");
    Ok(like_count)
}

/// The user's current stance on a target.
pub fn current_vote(
    pool: &DbPool,
    user_id: i64,
    kind: TargetKind,
    target_id: i64,
) -> AppResult<VoteState> {
    let conn = pool.get()?;
    let weight: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT direction FROM {} WHERE user_id = ?1 AND {} = ?2",
                kind.vote_table(),
                kind.vote_column()
            ),
            params![user_id, target_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(VoteState::from_weight(weight))
}
