use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agora::auth::oauth::{ExternalIdentity, IdentityProvider, OAuthError, Provider};
use agora::config::{Config, ProviderCredentials};
use agora::db;
use agora::state::{AppState, DbPool};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Stands in for Google/GitHub/Facebook: the code becomes the mailbox name.
#[derive(Default)]
struct FakeProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn fetch_identity(
        &self,
        _provider: Provider,
        code: &str,
    ) -> Result<ExternalIdentity, OAuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExternalIdentity {
            email: format!("{}@example.com", code),
            name: "oscar".into(),
        })
    }
}

struct TestApp {
    _tmp: TempDir,
    router: Router,
    pool: DbPool,
    provider: Arc<FakeProvider>,
}

fn test_app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = Some(tmp.path().join("forum.db"));
    config.storage.path = Some(tmp.path().join("uploads"));
    config.auth.bcrypt_cost = 4;
    config.oauth.state = "test-state".into();
    config.oauth.google = ProviderCredentials {
        client_id: "g-id".into(),
        client_secret: "g-secret".into(),
    };
    tweak(&mut config);

    let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let provider = Arc::new(FakeProvider::default());
    let state = AppState {
        db: pool.clone(),
        config,
        identity: provider.clone(),
    };

    TestApp {
        _tmp: tmp,
        router: agora::app(state),
        pool,
        provider,
    }
}

fn test_app() -> TestApp {
    test_app_with(|_| {})
}

const BOUNDARY: &str = "agora-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, form: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::post(uri).header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(form.to_string())).unwrap())
            .await
    }

    async fn post_multipart(
        &self,
        uri: &str,
        parts: &[Part<'_>],
        cookie: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::post(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(multipart_body(parts))).unwrap())
            .await
    }

    /// Register and log in, returning the `name=value` cookie pair.
    async fn sign_up(&self, email: &str, username: &str, password: &str) -> String {
        let resp = self
            .post_form(
                "/api/register",
                &format!("email={}&username={}&password={}", email, username, password),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = self
            .post_form(
                "/api/login",
                &format!("email={}&password={}", email, password),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        session_cookie(&resp)
    }

    async fn create_post(&self, cookie: &str, title: &str, content: &str) -> i64 {
        let resp = self
            .post_multipart(
                "/api/createpost",
                &[
                    Part::Text("title", title),
                    Part::Text("content", content),
                    Part::Text("go", "true"),
                ],
                Some(cookie),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        json(resp).await["id"].as_i64().unwrap()
    }

    fn post_count(&self) -> i64 {
        self.pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))
            .unwrap()
    }
}

fn session_cookie(resp: &Response<Body>) -> String {
    let raw = resp
        .headers()
        .get(header::SET_COOKIE)
        .expect("response should set a cookie")
        .to_str()
        .unwrap();
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("Path=/"));
    raw.split(';').next().unwrap().to_string()
}

async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json(resp: Response<Body>) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

#[tokio::test]
async fn register_post_and_vote_round_trip() {
    let app = test_app();

    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    assert!(alice.starts_with("session_token="));

    let post_id = app.create_post(&alice, "Hello", "World").await;

    let resp = app
        .get(&format!("/api/postandcomments?id={}", post_id), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let payload = json(resp).await;
    assert_eq!(payload["Post"]["title"], "Hello");
    assert_eq!(payload["Post"]["username"], "alice");
    assert_eq!(payload["Post"]["likecount"], 0);
    assert_eq!(payload["Comments"].as_array().unwrap().len(), 0);

    let bob = app.sign_up("b@x.com", "bob", "pw2").await;
    let vote_form = format!("id={}", post_id);

    let resp = app.post_form("/api/upvote", &vote_form, Some(&bob)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["likecount"], 1);

    let resp = app.post_form("/api/upvote", &vote_form, Some(&bob)).await;
    assert_eq!(json(resp).await["likecount"], 0);

    let resp = app.post_form("/api/upvote", &vote_form, Some(&bob)).await;
    assert_eq!(json(resp).await["likecount"], 1);
    let resp = app.post_form("/api/downvote", &vote_form, Some(&bob)).await;
    assert_eq!(json(resp).await["likecount"], -1);
}

#[tokio::test]
async fn category_search_finds_tagged_post() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    let post_id = app.create_post(&alice, "Goroutines", "channels").await;

    let resp = app.get("/api/searchedposts?category=go", None).await;
    let posts = json(resp).await;
    assert_eq!(posts[0]["id"].as_i64(), Some(post_id));

    let resp = app.get("/api/searchedposts?category=rust", None).await;
    assert!(json(resp).await.as_array().unwrap().is_empty());

    let resp = app.get("/api/searchedposts?filter=myposts", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_is_rejected_with_generic_message() {
    let app = test_app();
    app.sign_up("a@x.com", "alice", "pw1").await;

    for form in ["email=a@x.com&password=nope", "email=z@x.com&password=pw1"] {
        let resp = app.post_form("/api/login", form, None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_text(resp).await, "Invalid email or password");
    }
}

#[tokio::test]
async fn relogin_invalidates_previous_session() {
    let app = test_app();
    let first = app.sign_up("a@x.com", "alice", "pw1").await;

    let resp = app
        .post_form("/api/login", "email=a@x.com&password=pw1", None)
        .await;
    let second = session_cookie(&resp);
    assert_ne!(first, second);

    let resp = app.get("/api/myposts", Some(&first)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = app.get("/api/myposts", Some(&second)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn voting_requires_a_session() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    let post_id = app.create_post(&alice, "Hello", "World").await;

    let form = format!("id={}", post_id);
    let resp = app.post_form("/api/upvote", &form, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .post_form("/api/upvote", &form, Some("session_token=not-a-uuid"))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.post_form("/api/upvote", "id=999", Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_title_is_rejected_without_a_row() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;

    let resp = app
        .post_multipart(
            "/api/createpost",
            &[Part::Text("title", "   "), Part::Text("content", "World")],
            Some(&alice),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.post_count(), 0);
}

#[tokio::test]
async fn photo_upload_is_served_back() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;

    let resp = app
        .post_multipart(
            "/api/createpost",
            &[
                Part::Text("title", "Pic"),
                Part::Text("content", "look"),
                Part::File("photo", "cat.GIF", b"GIF89a-pixels"),
            ],
            Some(&alice),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let id = json(resp).await["id"].as_i64().unwrap();

    let resp = app
        .get(&format!("/api/postandcomments?id={}", id), None)
        .await;
    let photo = json(resp).await["Post"]["photopath"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(photo.starts_with("/uploads/"));
    assert!(photo.ends_with(".gif"));

    let resp = app.get(&photo, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "GIF89a-pixels");

    let resp = app
        .post_multipart(
            "/api/createpost",
            &[
                Part::Text("title", "Doc"),
                Part::Text("content", "x"),
                Part::File("photo", "notes.pdf", b"%PDF"),
            ],
            Some(&alice),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let app = test_app_with(|config| config.storage.max_upload_bytes = 1024);
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;

    let big = vec![b'x'; 4096];
    let resp = app
        .post_multipart(
            "/api/createpost",
            &[
                Part::Text("title", "Big"),
                Part::Text("content", "photo"),
                Part::File("photo", "big.png", &big),
            ],
            Some(&alice),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.post_count(), 0);
}

#[tokio::test]
async fn account_deletion_removes_everything() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    let bob = app.sign_up("b@x.com", "bob", "pw2").await;

    let alice_post = app.create_post(&alice, "Mine", "a").await;
    let bob_post = app.create_post(&bob, "Theirs", "b").await;
    app.post_form("/api/upvote", &format!("id={}", bob_post), Some(&alice))
        .await;

    let resp = app
        .post_form("/api/deleteaccount", "password=wrong", Some(&alice))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .post_form("/api/deleteaccount", "password=pw1", Some(&alice))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .get(&format!("/api/postandcomments?id={}", alice_post), None)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .get(&format!("/api/postandcomments?id={}", bob_post), None)
        .await;
    assert_eq!(json(resp).await["Post"]["likecount"], 0);

    let resp = app.get("/api/myposts", Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oauth_callback_with_forged_state_is_rejected() {
    let app = test_app();

    let resp = app
        .get("/callback/google?state=forged&code=valid", None)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oauth_callback_creates_account_and_session() {
    let app = test_app();

    let resp = app
        .get("/callback/google?state=test-state&code=oscar", None)
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/");
    let cookie = session_cookie(&resp);
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 1);

    let resp = app.get("/api/myposts", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Same email logs into the same account.
    let again = app
        .get("/callback/google?state=test-state&code=oscar", None)
        .await;
    session_cookie(&again);
    let users: i64 = app
        .pool
        .get()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .unwrap();
    assert_eq!(users, 1);

    // External accounts have no password to log in with.
    let resp = app
        .post_form("/api/login", "email=oscar@example.com&password=", None)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oauth_login_redirects_to_provider() {
    let app = test_app();

    let resp = app.get("/login/google", None).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = resp.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://accounts.google.com/"));
    assert!(location.contains("state=test-state"));

    let resp = app.get("/login/myspace", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn html_pages_render_and_form_actions_redirect() {
    let app = test_app();

    let resp = app.get("/", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Log in"));

    let resp = app
        .post_form(
            "/register",
            "email=a@x.com&username=alice&password=pw1",
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/login");

    let resp = app
        .post_form("/login", "email=a@x.com&password=pw1", None)
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&resp);

    let post_id = app.create_post(&cookie, "Hello", "World").await;

    let resp = app.get(&format!("/post?id={}", post_id), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_text(resp).await;
    assert!(page.contains("Hello"));
    assert!(page.contains("Go"));

    let resp = app
        .post_form("/createcomment", &format!("id={}&comment=nice", post_id), Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        resp.headers()[header::LOCATION],
        format!("/post?id={}", post_id).as_str()
    );

    let resp = app
        .post_form("/upvote", &format!("id={}", post_id), Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let resp = app.get("/mycomments", Some(&cookie)).await;
    assert!(body_text(resp).await.contains("nice"));

    let resp = app.get("/myposts", None).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/login");

    let resp = app.post_form("/login", "email=a@x.com&password=bad", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("Invalid email or password"));
}

#[tokio::test]
async fn only_owners_can_delete() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    let bob = app.sign_up("b@x.com", "bob", "pw2").await;
    let post_id = app.create_post(&alice, "Hello", "World").await;

    let form = format!("id={}", post_id);
    let resp = app.post_form("/api/deletepost", &form, Some(&bob)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.post_form("/api/deletepost", &form, Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.post_count(), 0);

    let resp = app.post_form("/api/deletepost", "id=abc", Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_return_target_leaves_vote_untouched() {
    let app = test_app();
    let alice = app.sign_up("a@x.com", "alice", "pw1").await;
    let post_id = app.create_post(&alice, "Hello", "World").await;

    let form = format!("id={}&post_id=junk", post_id);
    let resp = app.post_form("/upvote", &form, Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/postandcomments?id={}", post_id);
    let payload = json(app.get(&uri, None).await).await;
    assert_eq!(payload["Post"]["likecount"], 0);

    // The same vote with a usable target goes through once.
    let form = format!("id={}&post_id={}", post_id, post_id);
    let resp = app.post_form("/upvote", &form, Some(&alice)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let payload = json(app.get(&uri, None).await).await;
    assert_eq!(payload["Post"]["likecount"], 1);
}

#[tokio::test]
async fn stylesheet_is_served() {
    let app = test_app();
    let resp = app.get("/assets/css/forum.css", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
}
