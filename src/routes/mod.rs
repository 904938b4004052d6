pub mod api;
pub mod assets;
pub mod auth;
pub mod home;
pub mod pages;

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::forum::content::{self, Author, NewPost};
use crate::forum::uploads::PhotoUpload;
use crate::state::AppState;

/// Run password hashing and other slow synchronous work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        tracing::error!("spawn_blocking join error: {}", e);
        AppError::Internal(e.to_string())
    })?
}

/// Store a submitted post for `user`. The photo write and the inserts run on
/// the blocking pool.
pub(crate) async fn publish_post(
    state: &AppState,
    user: &CurrentUser,
    new_post: NewPost,
) -> AppResult<i64> {
    let pool = state.db.clone();
    let uploads_dir = state.config.uploads_path();
    let (user_id, username) = (user.id, user.username.clone());

    blocking(move || {
        let author = Author {
            id: user_id,
            username: &username,
        };
        content::create_post(&pool, &uploads_dir, author, &new_post)
    })
    .await
}

/// Form ids arrive as text; anything non-numeric is a bad request.
pub(crate) fn parse_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::InvalidInput("Invalid id".into()))
}

pub(crate) fn is_checked(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("on") | Some("1"))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::InvalidInput(e.body_text())
    }
}

/// Collect the fields of a post submission: `title`, `content`, an optional
/// `photo` file and one `<category>=true` field per tag.
pub(crate) async fn read_new_post(mut multipart: Multipart) -> AppResult<NewPost> {
    let mut post = NewPost::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "photo" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty part when no file was picked.
                if !file_name.is_empty() && !bytes.is_empty() {
                    post.photo = Some(PhotoUpload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "title" => post.title = field.text().await.map_err(multipart_error)?,
            "content" => post.content = field.text().await.map_err(multipart_error)?,
            _ => {
                let value = field.text().await.map_err(multipart_error)?;
                post.categories.apply_form_field(&name, &value);
            }
        }
    }

    Ok(post)
}
