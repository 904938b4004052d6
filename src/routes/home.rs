use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{NaiveDateTime, Utc};

use crate::db::models::{Comment, Post};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::forum::category::Category;
use crate::forum::content;
use crate::routes::api::SearchParams;
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

// --- View structs ---

pub struct PostView {
    pub id: i64,
    pub username: String,
    pub title: String,
    pub content: String,
    pub like_count: i64,
    pub photo_path: String,
    pub has_photo: bool,
    pub age: String,
    pub owned: bool,
}

impl PostView {
    pub fn new(post: Post, viewer: Option<i64>) -> Self {
        Self {
            has_photo: post.has_photo(),
            owned: viewer == Some(post.user_id),
            age: parse_and_format_time(&post.created_at),
            id: post.id,
            username: post.username,
            title: post.title,
            content: post.content,
            like_count: post.like_count,
            photo_path: post.photo_path,
        }
    }
}

pub struct CommentView {
    pub id: i64,
    pub post_id: i64,
    pub username: String,
    pub body: String,
    pub like_count: i64,
    pub age: String,
    pub owned: bool,
}

impl CommentView {
    pub fn new(comment: Comment, viewer: Option<i64>) -> Self {
        Self {
            owned: viewer == Some(comment.user_id),
            age: parse_and_format_time(&comment.created_at),
            id: comment.id,
            post_id: comment.post_id,
            username: comment.username,
            body: comment.body,
            like_count: comment.like_count,
        }
    }
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/home.html")]
pub struct ListTemplate {
    pub viewer: Option<String>,
    pub heading: String,
    pub posts: Vec<PostView>,
    pub categories: Vec<Category>,
    pub filter: String,
    pub selected_category: String,
    pub search_text: String,
}

impl ListTemplate {
    pub fn new(viewer: Option<String>, heading: &str, posts: Vec<PostView>) -> Self {
        Self {
            viewer,
            heading: heading.to_string(),
            posts,
            categories: Category::ALL.to_vec(),
            filter: "all".into(),
            selected_category: String::new(),
            search_text: String::new(),
        }
    }
}

// --- Handlers ---

/// GET /
pub async fn index(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Html<ListTemplate>> {
    let viewer_id = maybe_user.id();
    let posts = content::list_all_posts(&state.db)?
        .into_iter()
        .map(|p| PostView::new(p, viewer_id))
        .collect();
    let viewer = maybe_user.0.map(|u| u.username);

    Ok(Html(ListTemplate::new(viewer, "All posts", posts)))
}

/// GET /search
pub async fn search(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Response> {
    let query = params.to_query()?;
    let viewer_id = maybe_user.id();
    // Personal filters send anonymous visitors to the login form.
    let posts = match content::search_posts(&state.db, viewer_id, &query) {
        Ok(posts) => posts,
        Err(AppError::Unauthorized) => return Ok(Redirect::to("/login").into_response()),
        Err(e) => return Err(e),
    };
    let posts = posts
        .into_iter()
        .map(|p| PostView::new(p, viewer_id))
        .collect();

    let mut page = ListTemplate::new(maybe_user.0.map(|u| u.username), "Search results", posts);
    page.filter = params.filter.unwrap_or_else(|| "all".into());
    page.selected_category = query.category.map(|c| c.as_str().to_string()).unwrap_or_default();
    page.search_text = query.text;

    Ok(Html(page).into_response())
}

// --- Time formatting ---

fn parse_and_format_time(db_time: &str) -> String {
    NaiveDateTime::parse_from_str(db_time, "%Y-%m-%d %H:%M:%S")
        .map(|dt| format_relative_time(&dt))
        .unwrap_or_else(|_| db_time.to_string())
}

pub fn format_relative_time(dt: &NaiveDateTime) -> String {
    let diff = Utc::now().naive_utc().signed_duration_since(*dt);

    match diff.num_seconds() {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{}m ago", diff.num_minutes()),
        s if s < 86_400 => format!("{}h ago", diff.num_hours()),
        _ if diff.num_days() < 7 => format!("{}d ago", diff.num_days()),
        _ => dt.format("%b %-d, %Y").to_string(),
    }
}
