use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::oauth::{self, CallbackQuery, Provider};
use crate::auth::password::{self, Registration};
use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::forum::content;
use crate::routes::blocking;
use crate::routes::home::Html;
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub viewer: Option<String>,
    pub error: Option<String>,
    pub providers: Vec<Provider>,
}

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub viewer: Option<String>,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "pages/delete_account.html")]
pub struct DeleteAccountTemplate {
    pub viewer: Option<String>,
    pub error: Option<String>,
}

// -- Request types --

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PasswordForm {
    pub password: String,
}

// -- Shared flows --

/// Check credentials and start a session. Returns the `Set-Cookie` value.
pub(crate) async fn sign_in(state: &AppState, form: LoginForm) -> AppResult<String> {
    let pool = state.db.clone();
    let user = blocking(move || {
        password::verify_local_credentials(&pool, &form.email, &form.password)
    })
    .await?;

    let token = session::create_session(&state.db, user.id)?;
    tracing::info!(user_id = user.id, "user logged in");
    Ok(session::session_cookie(&state.config.auth, &token))
}

pub(crate) async fn sign_up(state: &AppState, form: RegisterForm) -> AppResult<i64> {
    let pool = state.db.clone();
    let cost = state.config.auth.bcrypt_cost;
    blocking(move || {
        password::register(
            &pool,
            &Registration {
                email: &form.email,
                username: &form.username,
                password: &form.password,
            },
            cost,
        )
    })
    .await
}

/// Delete the requesting account. Returns the cookie that clears the session.
pub(crate) async fn close_account(
    state: &AppState,
    user: &CurrentUser,
    password: String,
) -> AppResult<String> {
    let pool = state.db.clone();
    let uploads = state.config.uploads_path();
    let user_id = user.id;
    blocking(move || content::delete_account(&pool, &uploads, user_id, &password)).await?;
    Ok(session::clear_session_cookie(&state.config.auth))
}

/// Forget the session (if any). Returns the cookie that clears it.
pub(crate) fn sign_out(state: &AppState, user: Option<&CurrentUser>) -> AppResult<String> {
    if let Some(user) = user {
        session::delete_session(&state.db, &user.token)?;
        tracing::info!(user_id = user.id, "user logged out");
    }
    Ok(session::clear_session_cookie(&state.config.auth))
}

/// Errors the user can fix are shown on the form; anything else propagates.
fn form_error(err: AppError) -> AppResult<String> {
    match err {
        AppError::InvalidInput(msg) => Ok(msg),
        AppError::InvalidCredentials => Ok(err.to_string()),
        other => Err(other),
    }
}

// -- Local login --

/// GET /login
pub async fn login_page(State(state): State<AppState>, maybe_user: MaybeUser) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(LoginTemplate {
        viewer: None,
        error: None,
        providers: Provider::configured(&state.config.oauth),
    })
    .into_response()
}

/// POST /login
pub async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    match sign_in(&state, form).await {
        Ok(cookie) => {
            Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/")).into_response())
        }
        Err(e) => {
            let error = form_error(e)?;
            let page = LoginTemplate {
                viewer: None,
                error: Some(error),
                providers: Provider::configured(&state.config.oauth),
            };
            Ok((StatusCode::BAD_REQUEST, Html(page)).into_response())
        }
    }
}

/// GET /register
pub async fn register_page(maybe_user: MaybeUser) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(RegisterTemplate {
        viewer: None,
        error: None,
    })
    .into_response()
}

/// POST /register
pub async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    match sign_up(&state, form).await {
        Ok(_) => Ok(Redirect::to("/login").into_response()),
        Err(e) => {
            let error = form_error(e)?;
            let page = RegisterTemplate {
                viewer: None,
                error: Some(error),
            };
            Ok((StatusCode::BAD_REQUEST, Html(page)).into_response())
        }
    }
}

/// POST /logout
pub async fn logout(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Response> {
    let cookie = sign_out(&state, user.as_ref())?;
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/")).into_response())
}

/// GET /deleteaccount
pub async fn delete_account_page(user: CurrentUser) -> Html<DeleteAccountTemplate> {
    Html(DeleteAccountTemplate {
        viewer: Some(user.username),
        error: None,
    })
}

/// POST /deleteaccount
pub async fn delete_account_submit(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<PasswordForm>,
) -> AppResult<Response> {
    match close_account(&state, &user, form.password).await {
        Ok(cookie) => {
            Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/")).into_response())
        }
        Err(e) => {
            let error = form_error(e)?;
            let page = DeleteAccountTemplate {
                viewer: Some(user.username),
                error: Some(error),
            };
            Ok((StatusCode::BAD_REQUEST, Html(page)).into_response())
        }
    }
}

// -- External login --

/// GET /login/{provider}: send the browser to the provider's consent page.
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Response> {
    let provider: Provider = provider.parse()?;
    let url = oauth::authorization_url(&state.config.oauth, provider)?;
    Ok(Redirect::temporary(url.as_str()).into_response())
}

/// GET /callback/{provider}
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let provider: Provider = provider.parse()?;
    let code = oauth::check_callback(&state.config.oauth, &query)?;

    let identity = state.identity.fetch_identity(provider, code).await?;
    let user_id = oauth::upsert_user(&state.db, &identity)?;
    let token = session::create_session(&state.db, user_id)?;
    tracing::info!(user_id, %provider, "external login");

    let cookie = session::session_cookie(&state.config.auth, &token);
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/")).into_response())
}
