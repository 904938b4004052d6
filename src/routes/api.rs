//! JSON API under `/api`.

use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::handlers::{self as auth, LoginForm, PasswordForm, RegisterForm};
use crate::db::models::{Comment, Post, PostWithComments};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::forum::content::{self, Author, SearchQuery};
use crate::forum::vote::{self, TargetKind, VoteDirection};
use crate::routes::{is_checked, parse_id, publish_post, read_new_post};
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct IdForm {
    pub id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CommentForm {
    pub id: String,
    pub comment: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct VoteForm {
    pub id: String,
    #[serde(rename = "isComment")]
    pub is_comment: Option<String>,
    /// Post the target belongs to; only used to redirect HTML callers.
    pub post_id: Option<String>,
}

impl VoteForm {
    pub(crate) fn target(&self) -> AppResult<(TargetKind, i64)> {
        let kind = if is_checked(self.is_comment.as_deref()) {
            TargetKind::Comment
        } else {
            TargetKind::Post
        };
        Ok((kind, parse_id(&self.id)?))
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct IdQuery {
    pub id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SearchParams {
    pub filter: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
}

impl SearchParams {
    pub(crate) fn to_query(&self) -> AppResult<SearchQuery> {
        SearchQuery::parse(
            self.filter.as_deref(),
            self.category.as_deref(),
            self.search.as_deref(),
        )
    }
}

#[derive(Serialize)]
struct Created {
    id: i64,
}

#[derive(Serialize)]
struct LikeCount {
    likecount: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/deleteaccount", post(delete_account))
        .route("/api/createpost", post(create_post))
        .route("/api/createcomment", post(create_comment))
        .route("/api/upvote", post(upvote))
        .route("/api/downvote", post(downvote))
        .route("/api/deletepost", post(delete_post))
        .route("/api/deletecomment", post(delete_comment))
        .route("/api/allposts", get(all_posts))
        .route("/api/myposts", get(my_posts))
        .route("/api/mycomments", get(my_comments))
        .route("/api/myvotedposts", get(my_voted_posts))
        .route("/api/postandcomments", get(post_and_comments))
        .route("/api/searchedposts", get(searched_posts))
}

// -- Accounts --

async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Json<Created>> {
    let id = auth::sign_up(&state, form).await?;
    Ok(Json(Created { id }))
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> AppResult<Response> {
    let cookie = auth::sign_in(&state, form).await?;
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(json!({ "status": "User successfully logged in" })),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> AppResult<Response> {
    let cookie = auth::sign_out(&state, user.as_ref())?;
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(json!({ "status": "User successfully logged out" })),
    )
        .into_response())
}

async fn delete_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<PasswordForm>,
) -> AppResult<Response> {
    let cookie = auth::close_account(&state, &user, form.password).await?;
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(json!({ "status": "Account deleted" })),
    )
        .into_response())
}

// -- Writes --

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Json<Created>> {
    let new_post = read_new_post(multipart).await?;
    let id = publish_post(&state, &user, new_post).await?;
    Ok(Json(Created { id }))
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<CommentForm>,
) -> AppResult<Json<Created>> {
    let post_id = parse_id(&form.id)?;
    let author = Author {
        id: user.id,
        username: &user.username,
    };
    let id = content::create_comment(&state.db, author, post_id, &form.comment)?;
    Ok(Json(Created { id }))
}

fn cast_vote(
    state: &AppState,
    user: &CurrentUser,
    form: &VoteForm,
    direction: VoteDirection,
) -> AppResult<Json<LikeCount>> {
    let (kind, id) = form.target()?;
    let likecount = vote::vote(&state.db, user.id, kind, id, direction)?;
    Ok(Json(LikeCount { likecount }))
}

async fn upvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<VoteForm>,
) -> AppResult<Json<LikeCount>> {
    cast_vote(&state, &user, &form, VoteDirection::Up)
}

async fn downvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<VoteForm>,
) -> AppResult<Json<LikeCount>> {
    cast_vote(&state, &user, &form, VoteDirection::Down)
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<IdForm>,
) -> AppResult<Json<serde_json::Value>> {
    let id = parse_id(&form.id)?;
    content::delete_post(&state.db, &state.config.uploads_path(), user.id, id)?;
    Ok(Json(json!({ "status": "Post deleted" })))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<IdForm>,
) -> AppResult<Json<serde_json::Value>> {
    let id = parse_id(&form.id)?;
    content::delete_comment(&state.db, user.id, id)?;
    Ok(Json(json!({ "status": "Comment deleted" })))
}

// -- Reads --

async fn all_posts(State(state): State<AppState>) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(content::list_all_posts(&state.db)?))
}

async fn my_posts(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(content::list_my_posts(&state.db, user.id)?))
}

async fn my_voted_posts(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(content::list_my_voted_posts(&state.db, user.id)?))
}

async fn my_comments(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(content::list_my_comments(&state.db, user.id)?))
}

async fn post_and_comments(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> AppResult<Json<PostWithComments>> {
    let raw = query
        .id
        .ok_or_else(|| AppError::InvalidInput("Missing id".into()))?;
    let id = parse_id(&raw)?;
    Ok(Json(content::get_post_with_comments(&state.db, id)?))
}

async fn searched_posts(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Vec<Post>>> {
    let query = params.to_query()?;
    Ok(Json(content::search_posts(
        &state.db,
        maybe_user.id(),
        &query,
    )?))
}
