//! External login through Google, GitHub and Facebook.
//!
//! Every provider follows the same authorization-code exchange: redirect
//! with a fixed `state`, validate it on callback, trade the code for an
//! access token, read the user's email, then upsert a local account keyed
//! by that email. Network access sits behind [`IdentityProvider`] so the
//! callback handler can be exercised without reaching a provider.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::params;
use serde::Deserialize;
use url::Url;

use crate::config::{OAuthConfig, ProviderCredentials};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    GitHub,
    Facebook,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Google, Provider::GitHub, Provider::Facebook];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
            Provider::Facebook => "facebook",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::GitHub => "GitHub",
            Provider::Facebook => "Facebook",
        }
    }

    /// Providers with credentials present, in display order.
    pub fn configured(config: &OAuthConfig) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| p.credentials(config).is_configured())
            .collect()
    }

    fn authorize_endpoint(self) -> &'static str {
        match self {
            Provider::Google => "https://accounts.google.com/o/oauth2/auth",
            Provider::GitHub => "https://github.com/login/oauth/authorize",
            Provider::Facebook => "https://www.facebook.com/v12.0/dialog/oauth",
        }
    }

    fn token_endpoint(self) -> &'static str {
        match self {
            Provider::Google => "https://oauth2.googleapis.com/token",
            Provider::GitHub => "https://github.com/login/oauth/access_token",
            Provider::Facebook => "https://graph.facebook.com/v12.0/oauth/access_token",
        }
    }

    fn userinfo_endpoint(self) -> &'static str {
        match self {
            Provider::Google => "https://www.googleapis.com/oauth2/v2/userinfo",
            Provider::GitHub => "https://api.github.com/user",
            Provider::Facebook => "https://graph.facebook.com/me?fields=email,name",
        }
    }

    fn scope(self) -> &'static str {
        match self {
            Provider::Google => {
                "https://www.googleapis.com/auth/userinfo.profile https://www.googleapis.com/auth/userinfo.email"
            }
            Provider::GitHub => "read:user user:email",
            Provider::Facebook => "email",
        }
    }

    /// Userinfo field holding the display name.
    fn name_field(self) -> &'static str {
        match self {
            Provider::GitHub => "login",
            Provider::Google | Provider::Facebook => "name",
        }
    }

    pub fn credentials(self, config: &OAuthConfig) -> &ProviderCredentials {
        match self {
            Provider::Google => &config.google,
            Provider::GitHub => &config.github,
            Provider::Facebook => &config.facebook,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or(AppError::NotFound)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0} login is not configured")]
    NotConfigured(Provider),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider response had no access token")]
    MissingAccessToken,

    #[error("provider response had no email address")]
    MissingEmail,
}

/// What a provider tells us about the person logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Trade an authorization code for the user's identity.
    async fn fetch_identity(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<ExternalIdentity, OAuthError>;
}

pub fn redirect_uri(config: &OAuthConfig, provider: Provider) -> String {
    format!(
        "{}/callback/{}",
        config.redirect_base.trim_end_matches('/'),
        provider
    )
}

/// Where to send the browser to start a login.
pub fn authorization_url(config: &OAuthConfig, provider: Provider) -> Result<Url, OAuthError> {
    let creds = provider.credentials(config);
    if !creds.is_configured() {
        return Err(OAuthError::NotConfigured(provider));
    }

    let redirect = redirect_uri(config, provider);
    let mut query = vec![
        ("client_id", creds.client_id.as_str()),
        ("redirect_uri", redirect.as_str()),
        ("scope", provider.scope()),
        ("state", config.state.as_str()),
    ];
    match provider {
        Provider::Google => {
            query.push(("response_type", "code"));
            query.push(("prompt", "select_account"));
        }
        Provider::GitHub => query.push(("prompt", "select_account")),
        Provider::Facebook => {}
    }

    // Static endpoints always parse.
    Url::parse_with_params(provider.authorize_endpoint(), &query)
        .map_err(|_| OAuthError::NotConfigured(provider))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// Validate callback parameters, returning the authorization code.
/// A state mismatch is rejected before the code is even looked at.
pub fn check_callback<'a>(config: &OAuthConfig, query: &'a CallbackQuery) -> AppResult<&'a str> {
    if query.state.as_deref() != Some(config.state.as_str()) {
        tracing::warn!("oauth callback with invalid state");
        return Err(AppError::InvalidInput("Invalid state".into()));
    }
    match query.code.as_deref() {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(AppError::InvalidInput("No code in response".into())),
    }
}

/// Find or create the local account for an external identity.
pub fn upsert_user(pool: &DbPool, identity: &ExternalIdentity) -> AppResult<i64> {
    let conn = pool.get()?;
    let created = conn.execute(
        "INSERT INTO users (email, username, password_hash) VALUES (?1, ?2, '')
         ON CONFLICT(email) DO NOTHING",
        params![identity.email, identity.name],
    )?;
    if created > 0 {
        tracing::info!(email = %identity.email, "account created from external login");
    }

    let id = conn.query_row(
        "SELECT id FROM users WHERE email = ?1",
        params![identity.email],
        |row| row.get(0),
    )?;
    Ok(id)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

/// Prefer the verified primary address, then any verified one.
pub fn pick_github_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .filter(|e| e.verified)
        .max_by_key(|e| e.primary)
        .map(|e| e.email.clone())
}

/// Talks to the real providers over HTTPS.
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: &OAuthConfig) -> Result<Self, OAuthError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("agora/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<String, OAuthError> {
        let creds = provider.credentials(&self.config);
        if !creds.is_configured() {
            return Err(OAuthError::NotConfigured(provider));
        }
        let redirect = redirect_uri(&self.config, provider);
        let mut form = vec![
            ("code", code),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("redirect_uri", redirect.as_str()),
        ];

        let request = match provider {
            Provider::Google => {
                form.push(("grant_type", "authorization_code"));
                self.http.post(provider.token_endpoint()).form(&form)
            }
            Provider::GitHub => self
                .http
                .post(provider.token_endpoint())
                .query(&form)
                .header(reqwest::header::ACCEPT, "application/json"),
            Provider::Facebook => self.http.post(provider.token_endpoint()).form(&form),
        };

        let token: TokenResponse = request.send().await?.error_for_status()?.json().await?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(OAuthError::MissingAccessToken)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<T, OAuthError> {
        Ok(self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

/// The address from a userinfo payload, if the provider vouches for it.
/// Google marks unconfirmed addresses with `verified_email: false`.
pub fn extract_email(provider: Provider, info: &serde_json::Value) -> Option<String> {
    let email = info["email"].as_str().filter(|e| !e.is_empty())?;
    if provider == Provider::Google && info["verified_email"].as_bool() != Some(true) {
        return None;
    }
    Some(email.to_string())
}

#[async_trait]
impl IdentityProvider for OAuthClient {
    async fn fetch_identity(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<ExternalIdentity, OAuthError> {
        let token = self.exchange_code(provider, code).await?;
        let info: serde_json::Value = self.get_json(provider.userinfo_endpoint(), &token).await?;

        let mut email = extract_email(provider, &info);

        // GitHub hides the address unless it is public.
        if email.is_none() && provider == Provider::GitHub {
            let emails: Vec<GitHubEmail> = self
                .get_json("https://api.github.com/user/emails", &token)
                .await?;
            email = pick_github_email(&emails);
        }
        let email = email.ok_or(OAuthError::MissingEmail)?;

        let name = info[provider.name_field()]
            .as_str()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        Ok(ExternalIdentity { email, name })
    }
}
