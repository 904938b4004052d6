use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Column list matching [`Post::from_row`]; queries alias the posts table as `p`.
pub const POST_COLUMNS: &str =
    "p.id, p.user_id, p.username, p.title, p.content, p.like_count, p.photo_path, p.created_at";

/// Column list matching [`Comment::from_row`]; queries alias the comments table as `c`.
pub const COMMENT_COLUMNS: &str =
    "c.id, c.post_id, c.user_id, c.username, c.body, c.like_count, c.created_at";

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    /// Empty for accounts created through an external login.
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    #[serde(rename = "userid")]
    pub user_id: i64,
    pub username: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "likecount")]
    pub like_count: i64,
    #[serde(rename = "photopath")]
    pub photo_path: String,
    #[serde(skip)]
    pub created_at: String,
}

impl Post {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            username: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            like_count: row.get(5)?,
            photo_path: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    pub fn has_photo(&self) -> bool {
        !self.photo_path.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(rename = "postid")]
    pub post_id: i64,
    #[serde(rename = "userid")]
    pub user_id: i64,
    pub username: String,
    #[serde(rename = "comment")]
    pub body: String,
    #[serde(rename = "likecount")]
    pub like_count: i64,
    #[serde(skip)]
    pub created_at: String,
}

impl Comment {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            user_id: row.get(2)?,
            username: row.get(3)?,
            body: row.get(4)?,
            like_count: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostWithComments {
    #[serde(rename = "Post")]
    pub post: Post,
    #[serde(rename = "Comments")]
    pub comments: Vec<Comment>,
}
