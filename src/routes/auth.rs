use axum::routing::{get, post};
use axum::Router;

use crate::auth::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/register",
            get(handlers::register_page).post(handlers::register_submit),
        )
        .route(
            "/login",
            get(handlers::login_page).post(handlers::login_submit),
        )
        .route("/logout", post(handlers::logout))
        .route(
            "/deleteaccount",
            get(handlers::delete_account_page).post(handlers::delete_account_submit),
        )
        .route("/login/{provider}", get(handlers::oauth_login))
        .route("/callback/{provider}", get(handlers::oauth_callback))
}
