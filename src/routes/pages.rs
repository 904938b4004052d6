//! Server-rendered forum pages and the form actions behind them.

use askama::Template;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::forum::category::Category;
use crate::forum::content::{self, Author};
use crate::forum::vote::{self, TargetKind, VoteDirection};
use crate::routes::api::{CommentForm, IdForm, IdQuery, VoteForm};
use crate::routes::home::{self, CommentView, Html, ListTemplate, PostView};
use crate::routes::{parse_id, publish_post, read_new_post};
use crate::state::AppState;

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub viewer: Option<String>,
    pub post: PostView,
    pub categories: Vec<&'static str>,
    pub comments: Vec<CommentView>,
}

#[derive(Template)]
#[template(path = "pages/my_comments.html")]
pub struct MyCommentsTemplate {
    pub viewer: Option<String>,
    pub comments: Vec<CommentView>,
}

#[derive(Template)]
#[template(path = "pages/create_post.html")]
pub struct CreatePostTemplate {
    pub viewer: Option<String>,
    pub categories: Vec<Category>,
    pub error: Option<String>,
}

impl CreatePostTemplate {
    fn new(viewer: String, error: Option<String>) -> Self {
        Self {
            viewer: Some(viewer),
            categories: Category::ALL.to_vec(),
            error,
        }
    }
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/search", get(home::search))
        .route("/myposts", get(my_posts))
        .route("/myvotedposts", get(my_voted_posts))
        .route("/mycomments", get(my_comments))
        .route("/post", get(post_page))
        .route("/createpost", get(create_post_page).post(create_post))
        .route("/createcomment", post(create_comment))
        .route("/upvote", post(upvote))
        .route("/downvote", post(downvote))
        .route("/deletepost", post(delete_post))
        .route("/deletecomment", post(delete_comment))
}

fn login_redirect() -> Response {
    Redirect::to("/login").into_response()
}

fn post_redirect(post_id: i64) -> Response {
    Redirect::to(&format!("/post?id={}", post_id)).into_response()
}

// --- Listings ---

async fn my_posts(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    let Some(user) = maybe_user.0 else {
        return Ok(login_redirect());
    };
    let posts = content::list_my_posts(&state.db, user.id)?
        .into_iter()
        .map(|p| PostView::new(p, Some(user.id)))
        .collect();

    let mut page = ListTemplate::new(Some(user.username), "My posts", posts);
    page.filter = "myposts".into();
    Ok(Html(page).into_response())
}

async fn my_voted_posts(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    let Some(user) = maybe_user.0 else {
        return Ok(login_redirect());
    };
    let posts = content::list_my_voted_posts(&state.db, user.id)?
        .into_iter()
        .map(|p| PostView::new(p, Some(user.id)))
        .collect();

    let mut page = ListTemplate::new(Some(user.username), "Posts I upvoted", posts);
    page.filter = "myvotedposts".into();
    Ok(Html(page).into_response())
}

async fn my_comments(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    let Some(user) = maybe_user.0 else {
        return Ok(login_redirect());
    };
    let comments = content::list_my_comments(&state.db, user.id)?
        .into_iter()
        .map(|c| CommentView::new(c, Some(user.id)))
        .collect();

    Ok(Html(MyCommentsTemplate {
        viewer: Some(user.username),
        comments,
    })
    .into_response())
}

/// GET /post?id=
async fn post_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Query(query): Query<IdQuery>,
) -> AppResult<Html<PostTemplate>> {
    let id = parse_id(query.id.as_deref().unwrap_or_default())?;
    let viewer_id = maybe_user.id();

    let full = content::get_post_with_comments(&state.db, id)?;
    let categories = content::post_categories(&state.db, id)?
        .iter()
        .map(Category::label)
        .collect();

    Ok(Html(PostTemplate {
        viewer: maybe_user.0.map(|u| u.username),
        post: PostView::new(full.post, viewer_id),
        categories,
        comments: full
            .comments
            .into_iter()
            .map(|c| CommentView::new(c, viewer_id))
            .collect(),
    }))
}

// --- Post creation ---

async fn create_post_page(maybe_user: MaybeUser) -> Response {
    match maybe_user.0 {
        Some(user) => Html(CreatePostTemplate::new(user.username, None)).into_response(),
        None => login_redirect(),
    }
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let result = match read_new_post(multipart).await {
        Ok(new_post) => publish_post(&state, &user, new_post).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => Ok(Redirect::to("/myposts").into_response()),
        Err(AppError::InvalidInput(msg)) => {
            let page = CreatePostTemplate::new(user.username, Some(msg));
            Ok((StatusCode::BAD_REQUEST, Html(page)).into_response())
        }
        Err(e) => Err(e),
    }
}

// --- Form actions ---

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let post_id = parse_id(&form.id)?;
    content::create_comment(
        &state.db,
        Author {
            id: user.id,
            username: &user.username,
        },
        post_id,
        &form.comment,
    )?;
    Ok(post_redirect(post_id))
}

fn vote_and_return(
    state: &AppState,
    user: &CurrentUser,
    form: &VoteForm,
    direction: VoteDirection,
) -> AppResult<Response> {
    let (kind, id) = form.target()?;

    // Comment votes carry the post id so the browser lands back on the thread.
    // A malformed one is rejected before anything is written.
    let back = match (kind, form.post_id.as_deref()) {
        (_, Some(raw)) if !raw.trim().is_empty() => Some(parse_id(raw)?),
        (TargetKind::Post, _) => Some(id),
        (TargetKind::Comment, _) => None,
    };

    vote::vote(&state.db, user.id, kind, id, direction)?;
    Ok(match back {
        Some(post_id) => post_redirect(post_id),
        None => Redirect::to("/").into_response(),
    })
}

async fn upvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<VoteForm>,
) -> AppResult<Response> {
    vote_and_return(&state, &user, &form, VoteDirection::Up)
}

async fn downvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<VoteForm>,
) -> AppResult<Response> {
    vote_and_return(&state, &user, &form, VoteDirection::Down)
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<IdForm>,
) -> AppResult<Response> {
    let id = parse_id(&form.id)?;
    content::delete_post(&state.db, &state.config.uploads_path(), user.id, id)?;
    Ok(Redirect::to("/myposts").into_response())
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<IdForm>,
) -> AppResult<Response> {
    let id = parse_id(&form.id)?;
    let post_id = content::delete_comment(&state.db, user.id, id)?;
    Ok(post_redirect(post_id))
}
