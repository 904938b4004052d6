//! Posts, comments and account removal.
//!
//! Functions here take the pool rather than a connection and never hold a
//! pooled connection while calling into another service.

use std::path::Path;
use std::str::FromStr;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::auth::password;
use crate::db::models::{Comment, Post, PostWithComments, COMMENT_COLUMNS, POST_COLUMNS};
use crate::error::{AppError, AppResult};
use crate::forum::category::{Category, CategorySet};
use crate::forum::uploads::{self, PhotoUpload};
use crate::state::DbPool;

/// Who is writing. The name is snapshotted onto the row.
#[derive(Debug, Clone, Copy)]
pub struct Author<'a> {
    pub id: i64,
    pub username: &'a str,
}

#[derive(Debug, Default)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub categories: CategorySet,
    pub photo: Option<PhotoUpload>,
}

pub fn create_post(
    pool: &DbPool,
    uploads_dir: &Path,
    author: Author<'_>,
    new_post: &NewPost,
) -> AppResult<i64> {
    let title = new_post.title.trim();
    let content = new_post.content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(AppError::InvalidInput(
            "Title and content cannot be empty".into(),
        ));
    }

    let photo_path = match &new_post.photo {
        Some(photo) => uploads::store_photo(uploads_dir, photo)?,
        None => String::new(),
    };

    match insert_post(pool, author, title, content, &photo_path, new_post.categories) {
        Ok(id) => {
            tracing::info!(post_id = id, user_id = author.id, "post created");
            Ok(id)
        }
        Err(e) => {
            if !photo_path.is_empty() {
                uploads::remove_photo(uploads_dir, &photo_path);
            }
            Err(e)
        }
    }
}

fn insert_post(
    pool: &DbPool,
    author: Author<'_>,
    title: &str,
    content: &str,
    photo_path: &str,
    categories: CategorySet,
) -> AppResult<i64> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO posts (user_id, username, title, content, photo_path)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![author.id, author.username, title, content, photo_path],
    )?;
    let post_id = tx.last_insert_rowid();

    let placeholders = (2..=Category::COUNT + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO post_categories (post_id, {}) VALUES (?1, {})",
        CategorySet::column_list(),
        placeholders
    );
    let mut values = vec![Value::Integer(post_id)];
    values.extend(
        categories
            .flags()
            .into_iter()
            .map(|flag| Value::Integer(i64::from(flag))),
    );
    tx.execute(&sql, params_from_iter(values))?;

    tx.commit()?;
    Ok(post_id)
}

pub fn post_categories(pool: &DbPool, post_id: i64) -> AppResult<CategorySet> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM post_categories WHERE post_id = ?1",
        CategorySet::column_list()
    );
    let set = conn
        .query_row(&sql, params![post_id], |row| {
            let mut flags = [false; Category::COUNT];
            for (i, flag) in flags.iter_mut().enumerate() {
                *flag = row.get::<_, bool>(i)?;
            }
            Ok(CategorySet::from_flags(flags))
        })
        .optional()?;
    Ok(set.unwrap_or_default())
}

pub fn create_comment(
    pool: &DbPool,
    author: Author<'_>,
    post_id: i64,
    body: &str,
) -> AppResult<i64> {
    let body = body.trim();
    if body.is_empty() {
        return Err(AppError::InvalidInput("Comment cannot be empty".into()));
    }

    let conn = pool.get()?;
    let inserted = conn.execute(
        "INSERT INTO comments (post_id, user_id, username, body)
         SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM posts WHERE id = ?1)",
        params![post_id, author.id, author.username, body],
    )?;
    if inserted == 0 {
        return Err(AppError::NotFound);
    }
    let id = conn.last_insert_rowid();
    tracing::info!(comment_id = id, post_id, user_id = author.id, "comment created");
    Ok(id)
}

/// Delete a post owned by `user_id`. Comments and votes go with it.
pub fn delete_post(pool: &DbPool, uploads_dir: &Path, user_id: i64, post_id: i64) -> AppResult<()> {
    let photo_path = {
        let conn = pool.get()?;
        let (owner, photo_path): (i64, String) = conn
            .query_row(
                "SELECT user_id, photo_path FROM posts WHERE id = ?1",
                params![post_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or(AppError::NotFound)?;

        if owner != user_id {
            return Err(AppError::Unauthorized);
        }

        conn.execute(
            "DELETE FROM posts WHERE id = ?1 AND user_id = ?2",
            params![post_id, user_id],
        )?;
        photo_path
    };

    if !photo_path.is_empty() {
        uploads::remove_photo(uploads_dir, &photo_path);
    }
    tracing::info!(post_id, user_id, "post deleted");
    Ok(())
}

/// Delete a comment owned by `user_id`, returning the post it was on.
pub fn delete_comment(pool: &DbPool, user_id: i64, comment_id: i64) -> AppResult<i64> {
    let conn = pool.get()?;
    let (owner, post_id): (i64, i64) = conn
        .query_row(
            "SELECT user_id, post_id FROM comments WHERE id = ?1",
            params![comment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(AppError::NotFound)?;

    if owner != user_id {
        return Err(AppError::Unauthorized);
    }

    conn.execute(
        "DELETE FROM comments WHERE id = ?1 AND user_id = ?2",
        params![comment_id, user_id],
    )?;
    tracing::info!(comment_id, user_id, "comment deleted");
    Ok(post_id)
}

/// Remove an account after re-checking its password.
///
/// The account's votes are backed out of every like-count they touched
/// before the user row goes, so surviving posts and comments still sum
/// correctly. Foreign-key cascades remove the rest.
pub fn delete_account(
    pool: &DbPool,
    uploads_dir: &Path,
    user_id: i64,
    password: &str,
) -> AppResult<()> {
    let user = password::find_by_id(pool, user_id)?.ok_or(AppError::NotFound)?;
    if !password::password_matches(&user, password) {
        return Err(AppError::InvalidCredentials);
    }

    let photos = {
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE posts SET like_count = like_count - (
                 SELECT v.direction FROM post_votes v
                 WHERE v.post_id = posts.id AND v.user_id = ?1)
             WHERE id IN (SELECT post_id FROM post_votes WHERE user_id = ?1)",
            params![user_id],
        )?;
        tx.execute(
            "UPDATE comments SET like_count = like_count - (
                 SELECT v.direction FROM comment_votes v
                 WHERE v.comment_id = comments.id AND v.user_id = ?1)
             WHERE id IN (SELECT comment_id FROM comment_votes WHERE user_id = ?1)",
            params![user_id],
        )?;

        let photos = {
            let mut stmt =
                tx.prepare("SELECT photo_path FROM posts WHERE user_id = ?1 AND photo_path != ''")?;
            let rows = stmt.query_map(params![user_id], |r| r.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()?;
        photos
    };

    for photo in &photos {
        uploads::remove_photo(uploads_dir, photo);
    }
    tracing::info!(user_id, "account deleted");
    Ok(())
}

pub fn get_post_with_comments(pool: &DbPool, post_id: i64) -> AppResult<PostWithComments> {
    let conn = pool.get()?;
    let post = conn
        .query_row(
            &format!("SELECT {} FROM posts p WHERE p.id = ?1", POST_COLUMNS),
            params![post_id],
            Post::from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c WHERE c.post_id = ?1 ORDER BY c.id ASC",
        COMMENT_COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![post_id], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PostWithComments { post, comments })
}

/// Which slice of posts a listing covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostFilter {
    #[default]
    All,
    /// Posts written by the viewer.
    Mine,
    /// Posts the viewer currently upvotes.
    Voted,
}

impl FromStr for PostFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" | "allposts" => Ok(PostFilter::All),
            "myposts" => Ok(PostFilter::Mine),
            "myvotedposts" => Ok(PostFilter::Voted),
            other => Err(AppError::InvalidInput(format!("Unknown filter: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub filter: PostFilter,
    pub category: Option<Category>,
    pub text: String,
}

impl SearchQuery {
    /// Build from raw query-string values. Blank values and a category of
    /// `all` mean "no restriction".
    pub fn parse(
        filter: Option<&str>,
        category: Option<&str>,
        text: Option<&str>,
    ) -> AppResult<Self> {
        let filter = filter.unwrap_or_default().parse()?;
        let category = match category.map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(name) => Some(name.parse()?),
        };
        Ok(Self {
            filter,
            category,
            text: text.unwrap_or_default().trim().to_string(),
        })
    }
}

fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Posts matching `query`, newest first.
pub fn search_posts(pool: &DbPool, viewer: Option<i64>, query: &SearchQuery) -> AppResult<Vec<Post>> {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut join = String::new();

    match query.filter {
        PostFilter::All => {}
        PostFilter::Mine => {
            let viewer = viewer.ok_or(AppError::Unauthorized)?;
            values.push(Value::Integer(viewer));
            conditions.push(format!("p.user_id = ?{}", values.len()));
        }
        PostFilter::Voted => {
            let viewer = viewer.ok_or(AppError::Unauthorized)?;
            values.push(Value::Integer(viewer));
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM post_votes v
                         WHERE v.post_id = p.id AND v.user_id = ?{} AND v.direction = 1)",
                values.len()
            ));
        }
    }

    if let Some(category) = query.category {
        join.push_str(" JOIN post_categories pc ON pc.post_id = p.id");
        conditions.push(format!("pc.{} = 1", category.as_str()));
    }

    if !query.text.is_empty() {
        values.push(Value::Text(like_pattern(&query.text)));
        let n = values.len();
        conditions.push(format!(
            "(p.title LIKE ?{n} ESCAPE '\\' OR p.content LIKE ?{n} ESCAPE '\\')"
        ));
    }

    let mut sql = format!("SELECT {} FROM posts p{}", POST_COLUMNS, join);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY p.created_at DESC, p.id DESC");

    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params_from_iter(values), Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

fn listing(pool: &DbPool, viewer: Option<i64>, filter: PostFilter) -> AppResult<Vec<Post>> {
    search_posts(
        pool,
        viewer,
        &SearchQuery {
            filter,
            ..SearchQuery::default()
        },
    )
}

pub fn list_all_posts(pool: &DbPool) -> AppResult<Vec<Post>> {
    listing(pool, None, PostFilter::All)
}

pub fn list_my_posts(pool: &DbPool, user_id: i64) -> AppResult<Vec<Post>> {
    listing(pool, Some(user_id), PostFilter::Mine)
}

pub fn list_my_voted_posts(pool: &DbPool, user_id: i64) -> AppResult<Vec<Post>> {
    listing(pool, Some(user_id), PostFilter::Voted)
}

/// The user's comments across all posts, newest first.
pub fn list_my_comments(pool: &DbPool, user_id: i64) -> AppResult<Vec<Comment>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c WHERE c.user_id = ?1 ORDER BY c.created_at DESC, c.id DESC",
        COMMENT_COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![user_id], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}
